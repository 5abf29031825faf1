use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::models::chat::{ChatMessage, HistoryEntry, Role};

use super::engine::ConversationEngine;
use super::identity::{SessionKey, ThreadReset, ThreadResolver};
use super::prompt::{PromptCatalog, PromptSelection};

/// Prefix of the reply returned when the model cannot be reached
pub const MODEL_ERROR_PREFIX: &str = "Erreur lors de la communication avec le modèle";

/// Entry point for chat turns, history reads and conversation resets.
///
/// Owns the external id → session key table and the active system prompt.
/// Everything else lives behind the [`ConversationEngine`].
pub struct ConversationManager {
    engine: Arc<dyn ConversationEngine>,
    threads: ThreadResolver,
    prompts: PromptCatalog,
    active_prompt: RwLock<PromptSelection>,
    purge_on_reset: bool,
}

impl ConversationManager {
    pub fn new(engine: Arc<dyn ConversationEngine>, prompts: PromptCatalog, purge_on_reset: bool) -> Self {
        let initial = prompts.select(Some("fr"), Some("expert_comptable"));
        Self {
            engine,
            threads: ThreadResolver::new(),
            prompts,
            active_prompt: RwLock::new(initial),
            purge_on_reset,
        }
    }

    /// Run one chat turn and return the model's reply.
    ///
    /// Never fails: an engine error comes back as a readable message that
    /// starts with [`MODEL_ERROR_PREFIX`].
    pub async fn converse(
        &self,
        message: &str,
        external_id: &str,
        language: Option<&str>,
        persona: Option<&str>,
    ) -> String {
        // Only empty strings count as "no preference"; a blank value still
        // resets the prompt to the language default.
        let language = language.filter(|v| !v.is_empty());
        let persona = persona.filter(|v| !v.is_empty());

        // The turn uses the prompt it selected, even if another request
        // replaces the active one meanwhile.
        let system_prompt = if language.is_some() || persona.is_some() {
            let selection = self.prompts.select(language, persona);
            debug!(
                "Active prompt -> voice={} persona={}",
                selection.voice.code(),
                selection.persona.label()
            );
            let text = selection.text.clone();
            *self.active_prompt.write() = selection;
            text
        } else {
            self.active_prompt.read().text.clone()
        };

        let session = self.threads.resolve(external_id);
        let input = vec![ChatMessage::user(message)];

        match self.engine.invoke(&session, &system_prompt, input).await {
            Ok(turns) => match turns.last() {
                Some(reply) => reply.content.clone(),
                None => {
                    error!("Engine returned no messages for {}", session);
                    format!("{} : no message returned", MODEL_ERROR_PREFIX)
                }
            },
            Err(e) => {
                error!("Chat turn failed for {}: {:#}", session, e);
                format!("{} : {:#}", MODEL_ERROR_PREFIX, e)
            }
        }
    }

    /// User and assistant turns of the active thread, oldest first
    pub async fn history(&self, external_id: &str) -> Vec<HistoryEntry> {
        let session = self.threads.resolve(external_id);

        let snapshot = match self.engine.get_state(&session).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("Could not read state of {}: {:#}", session, e);
                return Vec::new();
            }
        };

        snapshot
            .turns
            .into_iter()
            .filter(|turn| matches!(turn.role, Role::User | Role::Assistant))
            .map(|turn| HistoryEntry {
                role: turn.role,
                content: turn.content,
            })
            .collect()
    }

    /// Point `external_id` at a fresh thread.
    pub async fn reset(&self, external_id: &str) -> SessionKey {
        let ThreadReset { current, previous } = self.threads.reset(external_id);

        if let (true, Some(previous)) = (self.purge_on_reset, previous) {
            match self.engine.discard(&previous).await {
                Ok(existed) => info!("Purged thread {} (had state: {})", previous, existed),
                Err(e) => warn!("Failed to purge thread {}: {:#}", previous, e),
            }
        }

        current
    }

    pub fn current_prompt(&self) -> PromptSelection {
        self.active_prompt.read().clone()
    }

    pub fn active_threads(&self) -> usize {
        self.threads.len()
    }
}
