//! Collaborator interfaces consumed by the engine.
//!
//! The engine never talks to a database or cache server directly; it is
//! handed these traits by the host service. `memory` provides in-process
//! implementations used as the test harness and for single-node setups.

pub mod memory;

use crate::error::Result;
use crate::models::{Interaction, Item};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

pub use memory::{InMemoryCache, InMemoryCatalog, InMemoryInteractionStore};

/// TTL key-value cache. Values are JSON strings; use [`get_json`] /
/// [`set_json`] for typed access.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;
    async fn del(&self, key: &str) -> Result<()>;
}

/// Typed cache read
pub async fn get_json<T: DeserializeOwned>(cache: &dyn Cache, key: &str) -> Result<Option<T>> {
    match cache.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Typed cache write
pub async fn set_json<T: Serialize + Sync>(
    cache: &dyn Cache,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<()> {
    cache.set(key, serde_json::to_string(value)?, ttl).await
}

/// Read-only catalog of recommendable items
#[async_trait]
pub trait ItemCatalog: Send + Sync {
    async fn get_item(&self, id: Uuid) -> Result<Option<Item>>;
    async fn get_items(&self, ids: &[Uuid]) -> Result<Vec<Item>>;
    /// Items with `availability_score > 0.0`, up to `limit`
    async fn available_items(&self, limit: usize) -> Result<Vec<Item>>;
}

/// Append-only interaction event log with time-range queries
#[async_trait]
pub trait InteractionStore: Send + Sync {
    async fn append(&self, interaction: Interaction) -> Result<()>;
    async fn for_user(&self, user_id: Uuid) -> Result<Vec<Interaction>>;
    async fn since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Interaction>>;
    async fn user_ids(&self) -> Result<Vec<Uuid>>;
}

/// Unified cache key schema with versioning
pub mod keys {
    use uuid::Uuid;

    pub const CACHE_VERSION: &str = "v1";

    pub fn user_profile(user_id: Uuid) -> String {
        format!("reco:{}:profile:{}", CACHE_VERSION, user_id)
    }

    pub fn user_neighbors(user_id: Uuid) -> String {
        format!("reco:{}:neighbors:{}", CACHE_VERSION, user_id)
    }

    pub fn daily_trends() -> String {
        format!("reco:{}:trending:daily", CACHE_VERSION)
    }

    pub fn seasonal_trends(season: &str) -> String {
        format!("reco:{}:trending:seasonal:{}", CACHE_VERSION, season)
    }

    pub fn assignment(user_id: Uuid, experiment_id: Uuid) -> String {
        format!(
            "reco:{}:assignment:{}:{}",
            CACHE_VERSION, experiment_id, user_id
        )
    }
}
