//! Per-agent run state.

use crate::client::ChatMessage;
use crate::models::RuntimeModels;

/// Everything one agent owns for the duration of its turn loop.
///
/// Created at entry, dropped at exit, never shared across agents. The
/// conversation history grows by one assistant and (usually) one user
/// message per turn; the system prompt is never stored here.
pub struct RunContext {
    pub run_id: String,
    pub parent_run_id: Option<String>,
    pub depth: u32,
    pub models: RuntimeModels,
    pub messages: Vec<ChatMessage>,
    /// Chat-completion calls made so far, bounded by MAX_CALLS.
    pub calls: u32,
}

impl RunContext {
    pub fn new(
        run_id: String,
        parent_run_id: Option<String>,
        depth: u32,
        models: RuntimeModels,
    ) -> Self {
        Self {
            run_id,
            parent_run_id,
            depth,
            models,
            messages: Vec::new(),
            calls: 0,
        }
    }

    /// The model for this agent's role: primary at the root, sub below.
    pub fn model(&self) -> &str {
        if self.depth == 0 {
            &self.models.primary
        } else {
            &self.models.sub
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::user(content));
    }

    pub fn push_assistant(&mut self, message: serde_json::Value) {
        self.messages.push(ChatMessage::assistant_raw(message));
    }
}
