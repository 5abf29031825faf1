pub mod settings;

pub use settings::{ConversationConfig, LlmConfig, PromptsConfig, ServerConfig, Settings};
