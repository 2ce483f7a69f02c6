//! Backend-agnostic record model.
//!
//! The storage layer never interprets record content. Every record is an opaque JSON
//! payload plus the metadata both backends need: entity type, owner and update time.
//! Typed access happens at the edges through [`Record::from_payload`] and
//! [`Record::decode`].

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The fixed set of entity types the application persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Task,
    SettingSet,
    Session,
    Achievement,
    StreakCounter,
}

impl EntityType {
    /// Every entity type, in migration order.
    pub const ALL: [EntityType; 5] = [
        EntityType::Task,
        EntityType::SettingSet,
        EntityType::Session,
        EntityType::Achievement,
        EntityType::StreakCounter,
    ];

    /// Stable identifier used for storage keys and the remote `entity_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Task => "task",
            EntityType::SettingSet => "setting_set",
            EntityType::Session => "session",
            EntityType::Achievement => "achievement",
            EntityType::StreakCounter => "streak_counter",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .iter()
            .copied()
            .find(|entity| entity.as_str() == s)
            .ok_or_else(|| format!("unknown entity type '{s}'"))
    }
}

/// A single stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub entity_type: EntityType,
    /// Stamped by the remote client; records created offline carry `None`.
    #[serde(default)]
    pub owner_id: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl Record {
    /// Create a record with a fresh id.
    pub fn new(entity_type: EntityType, payload: serde_json::Value) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), entity_type, payload)
    }

    pub fn with_id(id: impl Into<String>, entity_type: EntityType, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            entity_type,
            owner_id: None,
            updated_at: Utc::now(),
            payload,
        }
    }

    /// Encode a typed payload into a record.
    pub fn from_payload<T: Serialize>(
        id: impl Into<String>,
        entity_type: EntityType,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::with_id(id, entity_type, serde_json::to_value(payload)?))
    }

    /// Decode the payload into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// Bump `updated_at` to now.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Shape both backends require: a non-blank id and a JSON object payload.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("record id cannot be empty".to_string());
        }
        if !self.payload.is_object() {
            return Err(format!("payload of record '{}' must be a JSON object", self.id));
        }
        Ok(())
    }
}
