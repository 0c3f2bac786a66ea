//! Event records for the run stream.
//!
//! A `LogEvent` is one line in the run log. Records for a given `run_id`
//! appear in non-decreasing `step` order; `run_start` precedes all others
//! for that run and `final_result`, when present, is last.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// What happened at this point of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// An agent was created and is about to enter its turn loop.
    RunStart,
    /// The model produced a reply; code may or may not have been extracted.
    CodeGenerated,
    /// Extracted code was executed and its output observed.
    ExecutionResult,
    /// The agent produced its final value and is returning.
    FinalResult,
    /// The agent is unwinding with an error.
    Error,
}

/// One record in the run log.
///
/// Only `time`, `run_id`, `depth`, and `event_type` are always present;
/// the remaining fields are event-specific and omitted from the wire when
/// unset. Domain payloads (`usage`, `result`) are opaque JSON so the event
/// model stays independent of driver types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    /// Milliseconds since the Unix epoch.
    pub time: i64,

    /// Correlation id for the agent that emitted this event.
    pub run_id: String,

    /// The spawning agent's run id, absent for the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,

    /// Recursion depth of the emitting agent (root is 0).
    pub depth: u32,

    /// Event discriminator.
    pub event_type: EventType,

    /// Per-run step counter; 0 is the seed execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,

    /// Code the model produced (or the seed program).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Captured (possibly truncated) execution output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Whether the captured output contained an error line.
    #[serde(rename = "hasError", default, skip_serializing_if = "Option::is_none")]
    pub has_error: Option<bool>,

    /// Opaque model reasoning attached to the reply, logged but never re-sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,

    /// Canonical usage for the call that produced this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<serde_json::Value>,

    /// Query preview, present on `run_start`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    /// Final value, present on `final_result`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Human-readable detail, present on `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl LogEvent {
    /// Create an event stamped with the current time.
    pub fn new(run_id: impl Into<String>, depth: u32, event_type: EventType) -> Self {
        Self {
            time: Utc::now().timestamp_millis(),
            run_id: run_id.into(),
            parent_run_id: None,
            depth,
            event_type,
            step: None,
            code: None,
            output: None,
            has_error: None,
            reasoning: None,
            usage: None,
            query: None,
            result: None,
            message: None,
        }
    }

    pub fn with_parent(mut self, parent_run_id: Option<String>) -> Self {
        self.parent_run_id = parent_run_id;
        self
    }

    pub fn with_step(mut self, step: u32) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_output(mut self, output: impl Into<String>, has_error: bool) -> Self {
        self.output = Some(output.into());
        self.has_error = Some(has_error);
        self
    }

    pub fn with_reasoning(mut self, reasoning: Option<String>) -> Self {
        self.reasoning = reasoning;
        self
    }

    pub fn with_usage(mut self, usage: serde_json::Value) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
