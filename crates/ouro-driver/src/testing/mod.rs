//! Test doubles for the driver.
//!
//! `MockChatBackend` returns scripted replies in order and logs every
//! request; `MockEvaluator` plays scripted executions against an in-memory
//! globals map. Both are deterministic, so engine scenarios can assert on
//! exact event sequences.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::client::{ChatBackend, ChatMessage, Generation};
use crate::error::{DriverError, Result};
use crate::sandbox::{
    EvalOutcome, Evaluator, EvaluatorFactory, FINAL_RESULT_GLOBAL, HostBridge,
};
use crate::usage::Usage;

// ─────────────────────────────────────────────────────────────────────────────
// Chat backend
// ─────────────────────────────────────────────────────────────────────────────

/// One scripted model reply.
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    pub content: String,
    pub reasoning: Option<String>,
    pub usage: Usage,
}

impl ScriptedReply {
    /// A reply whose content is one `repl` block around `code`.
    pub fn code(code: &str) -> Self {
        Self {
            content: format!("```repl\n{code}\n```"),
            reasoning: None,
            usage: Usage::default(),
        }
    }

    /// A prose-only reply with no fenced code.
    pub fn prose(text: &str) -> Self {
        Self {
            content: text.to_string(),
            reasoning: None,
            usage: Usage::default(),
        }
    }

    pub fn with_usage(mut self, prompt: u64, completion: u64) -> Self {
        self.usage = Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
            ..Default::default()
        };
        self
    }

    pub fn with_reasoning(mut self, reasoning: &str) -> Self {
        self.reasoning = Some(reasoning.to_string());
        self
    }
}

/// A recorded request: the model asked for and the message count sent.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub model: String,
    pub message_count: usize,
}

/// Scripted chat backend; replies are consumed in order.
pub struct MockChatBackend {
    replies: Mutex<Vec<ScriptedReply>>,
    requests: Mutex<Vec<RecordedRequest>>,
    models: Vec<String>,
}

impl MockChatBackend {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies),
            requests: Mutex::new(Vec::new()),
            models: vec!["gpt-5".to_string(), "gpt-5-codex-mini".to_string()],
        }
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatBackend for MockChatBackend {
    async fn generate_code(&self, messages: &[ChatMessage], model: &str) -> Result<Generation> {
        self.requests.lock().unwrap().push(RecordedRequest {
            model: model.to_string(),
            message_count: messages.len(),
        });

        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            return Err(DriverError::Proxy(
                "MockChatBackend: no more scripted replies".to_string(),
            ));
        }
        let reply = replies.remove(0);

        let mut message = serde_json::json!({
            "role": "assistant",
            "content": reply.content,
        });
        if let Some(reasoning) = &reply.reasoning {
            message["reasoning"] = serde_json::json!(reasoning);
        }
        Ok(Generation::from_message(message, reply.usage))
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        if self.models.is_empty() {
            return Err(DriverError::Model(
                "provider returned an empty model catalog".to_string(),
            ));
        }
        Ok(self.models.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Evaluator
// ─────────────────────────────────────────────────────────────────────────────

/// One scripted execution.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEval {
    /// What the execution "prints".
    pub stdout: String,
    /// Exception message, appended by the session as an `Error:` line.
    pub error: Option<String>,
    /// Value assigned to `__final_result__` after the execution.
    pub set_final: Option<serde_json::Value>,
    /// Context passed to `llm_query` during the execution.
    pub llm_query: Option<String>,
    /// Route the host answer into `__final_result__` instead of stdout,
    /// mimicking `FINAL(llm_query(...))`.
    pub final_from_host: bool,
}

impl ScriptedEval {
    pub fn prints(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            ..Default::default()
        }
    }

    pub fn raises(stdout: &str, error: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    /// Mimics `FINAL(value)`.
    pub fn finishes(value: serde_json::Value) -> Self {
        Self {
            set_final: Some(value),
            ..Default::default()
        }
    }

    /// Mimics `print(llm_query(context))`.
    pub fn queries(context: &str) -> Self {
        Self {
            llm_query: Some(context.to_string()),
            ..Default::default()
        }
    }

    /// Mimics `FINAL(llm_query(context))`.
    pub fn delegates(context: &str) -> Self {
        Self {
            llm_query: Some(context.to_string()),
            final_from_host: true,
            ..Default::default()
        }
    }
}

/// Scripted evaluator with an in-memory globals map.
pub struct MockEvaluator {
    scripts: Vec<ScriptedEval>,
    globals: HashMap<String, serde_json::Value>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl MockEvaluator {
    pub fn new(scripts: Vec<ScriptedEval>) -> Self {
        let mut globals = HashMap::new();
        globals.insert(FINAL_RESULT_GLOBAL.to_string(), serde_json::Value::Null);
        Self {
            scripts,
            globals,
            executed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn with_executed(mut self, executed: Arc<Mutex<Vec<String>>>) -> Self {
        self.executed = executed;
        self
    }
}

#[async_trait]
impl Evaluator for MockEvaluator {
    async fn eval(&mut self, code: &str, host: &mut dyn HostBridge) -> Result<EvalOutcome> {
        self.executed.lock().unwrap().push(code.to_string());

        // The seed program runs before any scripted turn; synthesize its
        // observable output from the bound context.
        if code == crate::prompts::SEED_PROGRAM {
            let context = self
                .globals
                .get(crate::sandbox::CONTEXT_GLOBAL)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let shown: String = if context.chars().count() <= 500 {
                context.clone()
            } else {
                let head: String = context.chars().take(500).collect();
                let tail: String =
                    context.chars().skip(context.chars().count() - 500).collect();
                format!("{head}\n...\n{tail}")
            };
            return Ok(EvalOutcome {
                stdout: format!(
                    "Context type: str\nContext length: {}\n{shown}\n",
                    context.chars().count()
                ),
                error: None,
            });
        }

        if self.scripts.is_empty() {
            return Err(DriverError::Runtime(
                "MockEvaluator: no more scripted executions".to_string(),
            ));
        }
        let script = self.scripts.remove(0);

        let mut outcome = EvalOutcome {
            stdout: script.stdout,
            error: script.error,
        };

        if let Some(context) = script.llm_query {
            match host.llm_query(context).await {
                Ok(value) => {
                    if script.final_from_host {
                        self.globals
                            .insert(FINAL_RESULT_GLOBAL.to_string(), value);
                    } else {
                        outcome.stdout.push_str(&format!("{value}\n"));
                    }
                }
                // A failed host call raises inside the sandboxed code.
                Err(message) => outcome.error = Some(message),
            }
        }

        if let Some(value) = script.set_final {
            self.globals.insert(FINAL_RESULT_GLOBAL.to_string(), value);
        }

        Ok(outcome)
    }

    async fn set_global(&mut self, name: &str, value: &serde_json::Value) -> Result<()> {
        self.globals.insert(name.to_string(), value.clone());
        Ok(())
    }

    async fn get_global(&mut self, name: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.globals.get(name).cloned())
    }

    async fn shutdown(&mut self) {}
}

/// Factory handing out one scripted evaluator per agent, in spawn order:
/// the root agent gets the first script set, the first child the second,
/// and so on (the tree is a DFS, so spawn order is deterministic).
pub struct MockEvaluatorFactory {
    scripts: Mutex<Vec<Vec<ScriptedEval>>>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl MockEvaluatorFactory {
    pub fn new(scripts: Vec<Vec<ScriptedEval>>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            executed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every piece of code executed across all spawned evaluators, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl EvaluatorFactory for MockEvaluatorFactory {
    async fn spawn(&self) -> Result<Box<dyn Evaluator>> {
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.is_empty() {
            return Err(DriverError::Runtime(
                "MockEvaluatorFactory: no script set for this agent".to_string(),
            ));
        }
        let evaluator =
            MockEvaluator::new(scripts.remove(0)).with_executed(self.executed.clone());
        Ok(Box::new(evaluator))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bridges
// ─────────────────────────────────────────────────────────────────────────────

/// A bridge that rejects every call; for tests that never recurse.
pub struct NullBridge;

#[async_trait]
impl HostBridge for NullBridge {
    async fn llm_query(
        &mut self,
        _context: String,
    ) -> std::result::Result<serde_json::Value, String> {
        Err("llm_query is not available in this test".to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────────────────

/// OpenAI-shaped completion response body.
pub fn completion_body(content: &str, prompt_tokens: u64, completion_tokens: u64) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {
            "prompt_tokens": prompt_tokens,
            "completion_tokens": completion_tokens,
            "total_tokens": prompt_tokens + completion_tokens
        }
    })
}

/// `/models` catalog body.
pub fn models_body(ids: &[&str]) -> serde_json::Value {
    serde_json::json!({
        "data": ids.iter().map(|id| serde_json::json!({"id": id})).collect::<Vec<_>>()
    })
}
