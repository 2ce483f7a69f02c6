//! Remote record repository for database operations.

use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Schema,
};

use crate::entities::remote_record;

/// Repository for remote record queries. Every query is scoped to one owner.
pub struct RemoteRecordRepository;

impl RemoteRecordRepository {
    /// Create the records table if it does not exist yet.
    pub async fn ensure_schema<C>(conn: &C) -> Result<(), DbErr>
    where
        C: ConnectionTrait,
    {
        let backend = conn.get_database_backend();
        let schema = Schema::new(backend);
        let mut statement = schema.create_table_from_entity(remote_record::Entity);
        statement.if_not_exists();
        conn.execute(backend.build(&statement)).await?;
        Ok(())
    }

    /// Get a single record.
    pub async fn get<C>(conn: &C, owner_id: &str, entity_type: &str, id: &str) -> Result<Option<remote_record::Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        remote_record::Entity::find_by_id((owner_id.to_string(), entity_type.to_string(), id.to_string()))
            .one(conn)
            .await
    }

    /// Get every record of an entity type, oldest update first.
    pub async fn get_all<C>(conn: &C, owner_id: &str, entity_type: &str) -> Result<Vec<remote_record::Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        remote_record::Entity::find()
            .filter(remote_record::Column::OwnerId.eq(owner_id))
            .filter(remote_record::Column::EntityType.eq(entity_type))
            .order_by_asc(remote_record::Column::UpdatedAt)
            .order_by_asc(remote_record::Column::Id)
            .all(conn)
            .await
    }

    /// Count the records of an entity type.
    pub async fn count<C>(conn: &C, owner_id: &str, entity_type: &str) -> Result<u64, DbErr>
    where
        C: ConnectionTrait,
    {
        remote_record::Entity::find()
            .filter(remote_record::Column::OwnerId.eq(owner_id))
            .filter(remote_record::Column::EntityType.eq(entity_type))
            .count(conn)
            .await
    }

    /// Cheapest possible round trip: fetch at most one row of the owner's data.
    pub async fn probe<C>(conn: &C, owner_id: &str) -> Result<(), DbErr>
    where
        C: ConnectionTrait,
    {
        remote_record::Entity::find()
            .filter(remote_record::Column::OwnerId.eq(owner_id))
            .limit(1)
            .all(conn)
            .await?;
        Ok(())
    }

    /// Insert or update a record keyed by (owner, entity type, id).
    pub async fn upsert<C>(conn: &C, model: remote_record::Model) -> Result<(), DbErr>
    where
        C: ConnectionTrait,
    {
        let active_model: remote_record::ActiveModel = model.into();
        remote_record::Entity::insert(active_model)
            .on_conflict(
                OnConflict::columns([
                    remote_record::Column::OwnerId,
                    remote_record::Column::EntityType,
                    remote_record::Column::Id,
                ])
                .update_columns([remote_record::Column::Payload, remote_record::Column::UpdatedAt])
                .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;
        Ok(())
    }

    /// Delete a record. Returns whether a row was removed.
    pub async fn delete<C>(conn: &C, owner_id: &str, entity_type: &str, id: &str) -> Result<bool, DbErr>
    where
        C: ConnectionTrait,
    {
        let result = remote_record::Entity::delete_by_id((owner_id.to_string(), entity_type.to_string(), id.to_string()))
            .exec(conn)
            .await?;
        Ok(result.rows_affected > 0)
    }
}
