//! Caller-visible error type.
//!
//! Queries never fail: they return sentinels. Only operations that can be
//! refused (spawning past capacity, bad config writes, record restores)
//! surface a `SimError`.

use crate::entity::EntityId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("combatant capacity of {capacity} reached")]
    CapacityExceeded { capacity: usize },

    #[error("invalid combatant id: {0:?}")]
    InvalidEntity(EntityId),

    #[error("unknown config key: {0}")]
    UnknownConfigKey(String),

    #[error("config value for {key} must be finite, got {value}")]
    InvalidConfigValue { key: String, value: f32 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
