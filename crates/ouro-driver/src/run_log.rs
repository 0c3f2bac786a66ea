//! Per-agent event emission.
//!
//! A `RunLogger` is created at agent entry: it mints the agent's `run_id`,
//! records the parent linkage, and numbers step events so each run's records
//! are monotonically ordered. All agents of one tree share the same
//! [`EventSink`].

use std::sync::Arc;

use ouro_events::{EventSink, EventType, LogEvent};

use crate::error::Result;
use crate::usage::Usage;

/// How much of the context is kept on the `run_start` record.
const QUERY_PREVIEW_CHARS: usize = 500;

pub struct RunLogger {
    sink: Arc<EventSink>,
    run_id: String,
    parent_run_id: Option<String>,
    depth: u32,
    step: u32,
}

impl RunLogger {
    /// Mint a run id and write the `run_start` record.
    pub fn start(
        sink: Arc<EventSink>,
        depth: u32,
        parent_run_id: Option<String>,
        query: &str,
    ) -> Result<Self> {
        let mut logger = Self {
            sink,
            run_id: uuid::Uuid::new_v4().to_string(),
            parent_run_id,
            depth,
            step: 0,
        };
        let preview: String = query.chars().take(QUERY_PREVIEW_CHARS).collect();
        let event = logger
            .base(EventType::RunStart)
            .with_query(preview);
        logger.sink.write(&event)?;
        Ok(logger)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn base(&self, event_type: EventType) -> LogEvent {
        LogEvent::new(self.run_id.as_str(), self.depth, event_type)
            .with_parent(self.parent_run_id.clone())
    }

    fn next_step(&mut self) -> u32 {
        let step = self.step;
        self.step += 1;
        step
    }

    /// Step 0: the seed execution.
    pub fn seed(&mut self, code: &str, output: &str) -> Result<()> {
        let step = self.next_step();
        let event = self
            .base(EventType::ExecutionResult)
            .with_step(step)
            .with_code(code)
            .with_output(output, false)
            .with_usage(Usage::default().to_value());
        Ok(self.sink.write(&event)?)
    }

    /// A reply was received; no execution happened this step (extraction
    /// miss, or the turn terminated via the final result).
    pub fn code_generated(
        &mut self,
        code: &str,
        reasoning: Option<&str>,
        usage: &Usage,
    ) -> Result<()> {
        let step = self.next_step();
        let event = self
            .base(EventType::CodeGenerated)
            .with_step(step)
            .with_code(code)
            .with_reasoning(reasoning.map(str::to_string))
            .with_usage(usage.to_value());
        Ok(self.sink.write(&event)?)
    }

    /// A full generate-execute-observe turn.
    pub fn execution_result(
        &mut self,
        code: &str,
        output: &str,
        has_error: bool,
        reasoning: Option<&str>,
        usage: &Usage,
    ) -> Result<()> {
        let step = self.next_step();
        let event = self
            .base(EventType::ExecutionResult)
            .with_step(step)
            .with_code(code)
            .with_output(output, has_error)
            .with_reasoning(reasoning.map(str::to_string))
            .with_usage(usage.to_value());
        Ok(self.sink.write(&event)?)
    }

    /// The agent's final value; the last record for this run.
    pub fn final_result(&mut self, result: &serde_json::Value) -> Result<()> {
        let step = self.next_step();
        let event = self
            .base(EventType::FinalResult)
            .with_step(step)
            .with_result(result.clone());
        Ok(self.sink.write(&event)?)
    }

    /// Best-effort error record on the unwind path.
    pub fn error(&mut self, message: &str) {
        let step = self.next_step();
        let event = self
            .base(EventType::Error)
            .with_step(step)
            .with_message(message);
        let _ = self.sink.write(&event);
    }
}
