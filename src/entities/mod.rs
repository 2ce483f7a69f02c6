pub mod remote_record;

pub use remote_record::Entity as RemoteRecord;
