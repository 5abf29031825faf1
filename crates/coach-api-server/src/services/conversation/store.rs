use anyhow::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::models::chat::ChatMessage;

use super::identity::SessionKey;

/// Saved state of one conversation thread
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub turns: Vec<ChatMessage>,
    /// Bumped on every save
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(turns: Vec<ChatMessage>, version: u64) -> Self {
        Self {
            turns,
            version,
            updated_at: Utc::now(),
        }
    }
}

/// Storage backend for conversation checkpoints
#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, session: &SessionKey) -> Result<Option<Checkpoint>>;
    async fn save(&self, session: &SessionKey, checkpoint: Checkpoint) -> Result<()>;
    /// Returns whether a checkpoint existed
    async fn delete(&self, session: &SessionKey) -> Result<bool>;
    fn thread_count(&self) -> usize;
}

/// Process-lifetime checkpoint store
#[derive(Debug, Default)]
pub struct MemoryCheckpointer {
    storage: DashMap<SessionKey, Checkpoint>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CheckpointStore for MemoryCheckpointer {
    async fn load(&self, session: &SessionKey) -> Result<Option<Checkpoint>> {
        Ok(self.storage.get(session).map(|entry| entry.value().clone()))
    }

    async fn save(&self, session: &SessionKey, checkpoint: Checkpoint) -> Result<()> {
        debug!(
            "Checkpoint {} v{} ({} turns)",
            session,
            checkpoint.version,
            checkpoint.turns.len()
        );
        self.storage.insert(session.clone(), checkpoint);
        Ok(())
    }

    async fn delete(&self, session: &SessionKey) -> Result<bool> {
        Ok(self.storage.remove(session).is_some())
    }

    fn thread_count(&self) -> usize {
        self.storage.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::conversation::identity::ThreadResolver;

    #[tokio::test]
    async fn test_checkpoint_lifecycle() {
        let store = MemoryCheckpointer::new();
        let session = ThreadResolver::new().resolve("u1:c1");

        assert!(store.load(&session).await.unwrap().is_none());

        let turns = vec![ChatMessage::user("Bonjour"), ChatMessage::assistant("Salut")];
        store.save(&session, Checkpoint::new(turns.clone(), 1)).await.unwrap();
        assert_eq!(store.thread_count(), 1);

        let loaded = store.load(&session).await.unwrap().unwrap();
        assert_eq!(loaded.turns, turns);
        assert_eq!(loaded.version, 1);

        assert!(store.delete(&session).await.unwrap());
        assert!(!store.delete(&session).await.unwrap());
        assert_eq!(store.thread_count(), 0);
    }
}
