//! Opt-in TTL cache for deterministic requests (temperature ≤ 0, no
//! attachments).

use dashmap::DashMap;
use llm::{GenerateRequest, GenerateResponse};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: 300,
            capacity: 1_000,
        }
    }
}

struct CacheEntry {
    response: GenerateResponse,
    inserted_at: Instant,
}

pub struct ResponseCache {
    config: CacheConfig,
    entries: DashMap<u64, CacheEntry>,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
        }
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.ttl_secs)
    }

    /// Cache key, or `None` when the request must not be cached.
    pub fn key_for(&self, request: &GenerateRequest) -> Option<u64> {
        if !self.config.enabled || request.temperature > 0.0 || !request.attachments.is_empty() {
            return None;
        }

        let mut hasher = DefaultHasher::new();
        request.model.hash(&mut hasher);
        request.fallback_models.hash(&mut hasher);
        request.token_budget().hash(&mut hasher);
        request.category.hash(&mut hasher);
        request.quality.hash(&mut hasher);
        for message in &request.messages {
            message.role.hash(&mut hasher);
            message.content.hash(&mut hasher);
        }
        Some(hasher.finish())
    }

    pub fn get(&self, key: u64) -> Option<GenerateResponse> {
        let ttl = self.ttl();
        let hit = self
            .entries
            .get(&key)
            .filter(|e| e.inserted_at.elapsed() < ttl)
            .map(|e| e.response.clone());

        if hit.is_none() {
            self.entries.remove_if(&key, |_, e| e.inserted_at.elapsed() >= ttl);
        }

        hit.map(|mut response| {
            response.cache_hit = true;
            response
        })
    }

    pub fn insert(&self, key: u64, response: &GenerateResponse) {
        if self.config.capacity == 0 {
            return;
        }
        if self.entries.len() >= self.config.capacity && !self.entries.contains_key(&key) {
            self.purge_expired();
            if self.entries.len() >= self.config.capacity {
                self.evict_oldest();
            }
        }
        self.entries.insert(
            key,
            CacheEntry {
                response: response.clone(),
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn purge_expired(&self) -> usize {
        let ttl = self.ttl();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.inserted_at.elapsed() < ttl);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!("Purged {} expired cache entries", removed);
        }
        removed
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.inserted_at)
            .map(|e| *e.key());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
