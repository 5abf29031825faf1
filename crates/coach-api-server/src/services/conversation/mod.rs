//! Conversation handling
//!
//! - Thread identity: external id -> rotatable session key (DashMap)
//! - Prompt selection by language / persona
//! - Checkpointed single-node engine over a pluggable store
//! - `ConversationManager` tying them together for the HTTP layer

pub mod engine;
pub mod identity;
pub mod manager;
pub mod prompt;
pub mod store;

pub use engine::{CheckpointedEngine, ConversationEngine, ConversationSnapshot, LlmProvider};
pub use identity::{SessionKey, ThreadResolver};
pub use manager::{ConversationManager, MODEL_ERROR_PREFIX};
pub use prompt::{Language, Persona, PromptCatalog, PromptSelection};
pub use store::{Checkpoint, CheckpointStore, MemoryCheckpointer};
