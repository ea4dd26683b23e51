//! In-memory collaborator implementations.
//!
//! Safe for concurrent use; cache writes are idempotent overwrites. Expiry
//! is checked lazily on read, so a stale entry occupies memory until the
//! next `get` touches it.

use crate::error::Result;
use crate::models::{Interaction, Item};
use crate::stores::{Cache, InteractionStore, ItemCatalog};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

/// TTL key-value cache backed by a `HashMap`
#[derive(Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let expired = {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((value, expires_at)) => {
                    if Instant::now() < *expires_at {
                        return Ok(Some(value.clone()));
                    }
                    true
                }
                None => false,
            }
        };
        if expired {
            self.entries.write().await.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let expires_at = Instant::now() + ttl;
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value, expires_at));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Catalog backed by a `HashMap`
#[derive(Default)]
pub struct InMemoryCatalog {
    items: RwLock<HashMap<Uuid, Item>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, item: Item) {
        self.items.write().await.insert(item.id, item);
    }

    pub async fn insert_all(&self, items: Vec<Item>) {
        let mut map = self.items.write().await;
        for item in items {
            map.insert(item.id, item);
        }
    }
}

#[async_trait]
impl ItemCatalog for InMemoryCatalog {
    async fn get_item(&self, id: Uuid) -> Result<Option<Item>> {
        Ok(self.items.read().await.get(&id).cloned())
    }

    async fn get_items(&self, ids: &[Uuid]) -> Result<Vec<Item>> {
        let items = self.items.read().await;
        Ok(ids.iter().filter_map(|id| items.get(id).cloned()).collect())
    }

    async fn available_items(&self, limit: usize) -> Result<Vec<Item>> {
        let items = self.items.read().await;
        let mut available: Vec<Item> = items
            .values()
            .filter(|item| item.availability_score > 0.0)
            .cloned()
            .collect();
        // Deterministic order for repeatable candidate pools
        available.sort_by(|a, b| a.id.cmp(&b.id));
        available.truncate(limit);
        Ok(available)
    }
}

/// Append-only interaction log backed by a `Vec`
#[derive(Default)]
pub struct InMemoryInteractionStore {
    events: RwLock<Vec<Interaction>>,
}

impl InMemoryInteractionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InteractionStore for InMemoryInteractionStore {
    async fn append(&self, interaction: Interaction) -> Result<()> {
        self.events.write().await.push(interaction);
        Ok(())
    }

    async fn for_user(&self, user_id: Uuid) -> Result<Vec<Interaction>> {
        Ok(self
            .events
            .read()
            .await
            .iter()
            .filter(|event| event.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Interaction>> {
        Ok(self
            .events
            .read()
            .await
            .iter()
            .filter(|event| event.timestamp >= cutoff)
            .cloned()
            .collect())
    }

    async fn user_ids(&self) -> Result<Vec<Uuid>> {
        let events = self.events.read().await;
        let mut ids: Vec<Uuid> = events.iter().map(|event| event.user_id).collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}
