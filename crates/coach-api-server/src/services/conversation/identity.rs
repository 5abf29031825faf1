use dashmap::DashMap;
use std::fmt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::chat::DEFAULT_ID;

/// Internal, rotatable key addressing one thread in the checkpoint store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    /// `{external_id}-{32 hex chars}`; the suffix makes every key unique.
    fn mint(external_id: &str) -> Self {
        Self(format!("{}-{}", external_id, Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of [`ThreadResolver::reset`]
#[derive(Debug, Clone)]
pub struct ThreadReset {
    pub current: SessionKey,
    /// Key that was active before the reset, if the id had been seen
    pub previous: Option<SessionKey>,
}

/// Maps external conversation ids to their active session key.
///
/// One external id has exactly one active key at a time. Resetting an id
/// swaps in a brand new key; the old thread stays in the store but can no
/// longer be reached through this table.
#[derive(Debug, Default)]
pub struct ThreadResolver {
    threads: DashMap<String, SessionKey>,
}

impl ThreadResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active key for `external_id`, minting one on first use
    pub fn resolve(&self, external_id: &str) -> SessionKey {
        let external_id = normalize(external_id);
        self.threads
            .entry(external_id.to_string())
            .or_insert_with(|| {
                let key = SessionKey::mint(external_id);
                debug!("New thread {} for {}", key, external_id);
                key
            })
            .value()
            .clone()
    }

    /// Unconditionally replace the key for `external_id`
    pub fn reset(&self, external_id: &str) -> ThreadReset {
        let external_id = normalize(external_id);
        let current = SessionKey::mint(external_id);
        let previous = self.threads.insert(external_id.to_string(), current.clone());

        info!("Thread reset for {}: now {}", external_id, current);
        ThreadReset { current, previous }
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

fn normalize(external_id: &str) -> &str {
    if external_id.is_empty() {
        DEFAULT_ID
    } else {
        external_id
    }
}
