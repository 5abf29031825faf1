use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::models::chat::ChatMessage;

use super::identity::SessionKey;
use super::store::{Checkpoint, CheckpointStore};

/// Trait for LLM service
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Stored state of a thread as seen by callers
#[derive(Debug, Clone)]
pub struct ConversationSnapshot {
    pub session: SessionKey,
    pub turns: Vec<ChatMessage>,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// Runs single conversation turns against a checkpointed thread
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ConversationEngine: Send + Sync {
    /// Append `input` to the thread, run the model once and return every turn
    /// of the thread, the model reply last.
    async fn invoke(
        &self,
        session: &SessionKey,
        system_prompt: &str,
        input: Vec<ChatMessage>,
    ) -> Result<Vec<ChatMessage>>;

    /// `None` when the thread was never written
    async fn get_state(&self, session: &SessionKey) -> Result<Option<ConversationSnapshot>>;

    /// Drop the thread's stored state
    async fn discard(&self, session: &SessionKey) -> Result<bool>;
}

/// Per-thread turn slot; `retired` is set once the thread is discarded.
#[derive(Debug, Default)]
struct ThreadSlot {
    retired: bool,
}

/// One model node over a checkpoint store.
///
/// The system prompt is injected per call and never stored. A turn is
/// persisted only once the model has replied.
pub struct CheckpointedEngine {
    llm: Arc<dyn LlmProvider>,
    store: Arc<dyn CheckpointStore>,
    /// Serializes turns and discards on the same thread. Entries only live
    /// while someone holds or waits for them.
    session_locks: DashMap<SessionKey, Arc<Mutex<ThreadSlot>>>,
}

impl CheckpointedEngine {
    pub fn new(llm: Arc<dyn LlmProvider>, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            llm,
            store,
            session_locks: DashMap::new(),
        }
    }

    fn session_lock(&self, session: &SessionKey) -> Arc<Mutex<ThreadSlot>> {
        self.session_locks
            .entry(session.clone())
            .or_default()
            .value()
            .clone()
    }

    /// Drop the lock entry once the caller's handle is gone and nobody waits
    fn release_lock(&self, session: &SessionKey, lock: Arc<Mutex<ThreadSlot>>) {
        drop(lock);
        self.session_locks
            .remove_if(session, |_, slot| Arc::strong_count(slot) == 1);
    }

    async fn run_turn(
        &self,
        session: &SessionKey,
        system_prompt: &str,
        input: Vec<ChatMessage>,
    ) -> Result<Vec<ChatMessage>> {
        let previous = self
            .store
            .load(session)
            .await
            .with_context(|| format!("failed to load checkpoint {}", session))?;
        let version = previous.as_ref().map_or(0, |cp| cp.version);

        let mut turns = previous.map(|cp| cp.turns).unwrap_or_default();
        turns.extend(input);

        let mut messages = Vec::with_capacity(turns.len() + 1);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend(turns.iter().cloned());

        debug!("Invoking model for {} ({} turns)", session, turns.len());
        let reply = self.llm.generate(&messages).await?;
        turns.push(ChatMessage::assistant(reply));

        self.store
            .save(session, Checkpoint::new(turns.clone(), version + 1))
            .await
            .with_context(|| format!("failed to save checkpoint {}", session))?;

        Ok(turns)
    }
}

#[async_trait::async_trait]
impl ConversationEngine for CheckpointedEngine {
    async fn invoke(
        &self,
        session: &SessionKey,
        system_prompt: &str,
        input: Vec<ChatMessage>,
    ) -> Result<Vec<ChatMessage>> {
        let lock = self.session_lock(session);
        let result = {
            let slot = lock.lock().await;
            if slot.retired {
                Err(anyhow!("thread {} was reset", session))
            } else {
                self.run_turn(session, system_prompt, input).await
            }
        };
        self.release_lock(session, lock);
        result
    }

    async fn get_state(&self, session: &SessionKey) -> Result<Option<ConversationSnapshot>> {
        let checkpoint = self.store.load(session).await?;
        Ok(checkpoint.map(|cp| ConversationSnapshot {
            session: session.clone(),
            turns: cp.turns,
            version: cp.version,
            updated_at: cp.updated_at,
        }))
    }

    /// Waits for an in-flight turn on the thread, then deletes its state.
    /// Turns still queued on the thread are refused.
    async fn discard(&self, session: &SessionKey) -> Result<bool> {
        let lock = self.session_lock(session);
        let result = {
            let mut slot = lock.lock().await;
            slot.retired = true;
            self.store.delete(session).await
        };
        self.release_lock(session, lock);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::Role;
    use crate::services::conversation::identity::ThreadResolver;
    use crate::services::conversation::store::MemoryCheckpointer;
    use std::time::Duration;

    /// Model that takes a while to answer
    struct SlowLlm(Duration);

    #[async_trait::async_trait]
    impl LlmProvider for SlowLlm {
        async fn generate(&self, _messages: &[ChatMessage]) -> Result<String> {
            tokio::time::sleep(self.0).await;
            Ok("late reply".to_string())
        }
    }

    fn engine_with(llm: MockLlmProvider) -> (CheckpointedEngine, Arc<MemoryCheckpointer>) {
        let store = Arc::new(MemoryCheckpointer::new());
        (CheckpointedEngine::new(Arc::new(llm), store.clone()), store)
    }

    #[tokio::test]
    async fn test_invoke_prepends_system_prompt_and_saves() {
        let mut llm = MockLlmProvider::new();
        llm.expect_generate()
            .withf(|messages| {
                messages.len() == 2
                    && messages[0] == ChatMessage::system("Sois bref.")
                    && messages[1] == ChatMessage::user("Bonjour")
            })
            .times(1)
            .returning(|_| Ok("Salut !".to_string()));

        let (engine, store) = engine_with(llm);
        let session = ThreadResolver::new().resolve("u1:c1");

        let turns = engine
            .invoke(&session, "Sois bref.", vec![ChatMessage::user("Bonjour")])
            .await
            .unwrap();

        assert_eq!(turns, vec![ChatMessage::user("Bonjour"), ChatMessage::assistant("Salut !")]);

        let saved = store.load(&session).await.unwrap().unwrap();
        assert_eq!(saved.version, 1);
        assert!(saved.turns.iter().all(|t| t.role != Role::System));
    }

    #[tokio::test]
    async fn test_invoke_replays_history() {
        let mut llm = MockLlmProvider::new();
        let mut seq = mockall::Sequence::new();
        llm.expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("first".to_string()));
        llm.expect_generate()
            .withf(|messages| {
                messages.len() == 4
                    && messages[2].content == "first"
                    && messages[3].content == "second question"
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("second".to_string()));

        let (engine, _store) = engine_with(llm);
        let session = ThreadResolver::new().resolve("u1:c1");

        engine.invoke(&session, "p", vec![ChatMessage::user("first question")]).await.unwrap();
        let turns = engine
            .invoke(&session, "p", vec![ChatMessage::user("second question")])
            .await
            .unwrap();

        assert_eq!(turns.len(), 4);
        let state = engine.get_state(&session).await.unwrap().unwrap();
        assert_eq!(state.version, 2);
        assert_eq!(state.turns.last().unwrap().content, "second");
    }

    #[tokio::test]
    async fn test_failed_turn_is_not_persisted() {
        let mut llm = MockLlmProvider::new();
        llm.expect_generate()
            .returning(|_| Err(anyhow::anyhow!("connection refused")));

        let (engine, store) = engine_with(llm);
        let session = ThreadResolver::new().resolve("u1:c1");

        let err = engine
            .invoke(&session, "p", vec![ChatMessage::user("Bonjour")])
            .await
            .unwrap_err();

        assert!(err.to_string().contains("connection refused"));
        assert!(engine.get_state(&session).await.unwrap().is_none());
        assert_eq!(store.thread_count(), 0);
    }

    #[tokio::test]
    async fn test_discard_drops_state() {
        let mut llm = MockLlmProvider::new();
        llm.expect_generate().returning(|_| Ok("ok".to_string()));

        let (engine, store) = engine_with(llm);
        let session = ThreadResolver::new().resolve("u1:c1");
        engine.invoke(&session, "p", vec![ChatMessage::user("hi")]).await.unwrap();

        assert!(engine.discard(&session).await.unwrap());
        assert!(engine.get_state(&session).await.unwrap().is_none());
        assert_eq!(store.thread_count(), 0);
    }

    #[tokio::test]
    async fn test_session_locks_released_after_turn() {
        let mut llm = MockLlmProvider::new();
        llm.expect_generate().returning(|_| Ok("ok".to_string()));

        let (engine, _store) = engine_with(llm);
        let resolver = ThreadResolver::new();
        for i in 0..5 {
            let session = resolver.resolve(&format!("u{}:c1", i));
            engine.invoke(&session, "p", vec![ChatMessage::user("hi")]).await.unwrap();
        }
        assert!(engine.session_locks.is_empty());

        let session = resolver.resolve("u0:c1");
        engine.discard(&session).await.unwrap();
        assert!(engine.session_locks.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_discard_waits_for_running_turn() {
        let store = Arc::new(MemoryCheckpointer::new());
        let engine = Arc::new(CheckpointedEngine::new(
            Arc::new(SlowLlm(Duration::from_millis(200))),
            store.clone(),
        ));
        let session = ThreadResolver::new().resolve("u1:c1");

        let running = {
            let engine = engine.clone();
            let session = session.clone();
            tokio::spawn(async move {
                engine.invoke(&session, "p", vec![ChatMessage::user("hi")]).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(engine.discard(&session).await.unwrap());
        assert_eq!(running.await.unwrap().unwrap().last().unwrap().content, "late reply");
        assert_eq!(store.thread_count(), 0);
        assert!(engine.get_state(&session).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_turn_queued_behind_discard_is_refused() {
        let store = Arc::new(MemoryCheckpointer::new());
        let engine = Arc::new(CheckpointedEngine::new(
            Arc::new(SlowLlm(Duration::from_millis(300))),
            store.clone(),
        ));
        let session = ThreadResolver::new().resolve("u1:c1");

        let spawn_turn = |engine: Arc<CheckpointedEngine>, session: SessionKey| {
            tokio::spawn(async move {
                engine.invoke(&session, "p", vec![ChatMessage::user("hi")]).await
            })
        };

        let first = spawn_turn(engine.clone(), session.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let discard = {
            let engine = engine.clone();
            let session = session.clone();
            tokio::spawn(async move { engine.discard(&session).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let queued = spawn_turn(engine.clone(), session.clone());

        assert!(first.await.unwrap().is_ok());
        assert!(discard.await.unwrap().unwrap());
        let err = queued.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("was reset"));
        assert_eq!(store.thread_count(), 0);
        assert!(engine.session_locks.is_empty());
    }
}
