use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, instrument};

use lucid_core::{Backend, BackendError, LucidError};

pub const DEFAULT_LABEL: &str = "production";
pub const DEFAULT_TTL_SECS: i64 = 300;

/// How long a fetched prompt stays valid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheTtl {
    /// Always refetch; nothing is stored.
    Disabled,
    Expires(Duration),
    Never,
}

impl CacheTtl {
    /// Negative means never expire, zero disables caching.
    pub fn from_secs(secs: i64) -> Self {
        match secs {
            s if s < 0 => Self::Never,
            0 => Self::Disabled,
            s => Self::Expires(Duration::from_secs(s as u64)),
        }
    }
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self::from_secs(DEFAULT_TTL_SECS)
    }
}

struct CacheEntry {
    text: String,
    created: Instant,
    ttl: CacheTtl,
}

impl CacheEntry {
    fn is_valid(&self, now: Instant) -> bool {
        match self.ttl {
            CacheTtl::Never => true,
            CacheTtl::Disabled => false,
            CacheTtl::Expires(ttl) => now.duration_since(self.created) < ttl,
        }
    }
}

/// Prompt templates keyed by (name, label).
pub struct PromptCache {
    backend: Arc<dyn Backend>,
    entries: DashMap<(String, String), CacheEntry>,
}

impl PromptCache {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            entries: DashMap::new(),
        }
    }

    fn lookup(&self, key: &(String, String)) -> Option<String> {
        let entry = self.entries.get(key)?;
        if entry.is_valid(Instant::now()) {
            Some(entry.text.clone())
        } else {
            None
        }
    }

    /// Cached text if still valid, otherwise fetched from the backend.
    #[instrument(skip(self))]
    pub async fn get(&self, name: &str, label: &str, ttl: CacheTtl) -> Result<String, LucidError> {
        let key = (name.to_string(), label.to_string());
        if ttl != CacheTtl::Disabled {
            if let Some(text) = self.lookup(&key) {
                debug!("prompt cache hit");
                return Ok(text);
            }
        }

        let text = self.backend.fetch_prompt(name, label).await.map_err(|e| match e {
            BackendError::NotFound(msg) => {
                LucidError::PromptResolution(format!("prompt '{name}' ({label}) not found: {msg}"))
            }
            other => LucidError::Backend(other),
        })?;

        match ttl {
            CacheTtl::Disabled => {
                self.entries.remove(&key);
            }
            _ => {
                self.entries.insert(
                    key,
                    CacheEntry {
                        text: text.clone(),
                        created: Instant::now(),
                        ttl,
                    },
                );
            }
        }
        Ok(text)
    }

    pub fn invalidate(&self, name: &str, label: &str) -> bool {
        self.entries
            .remove(&(name.to_string(), label.to_string()))
            .is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
