//! Recursive driver engine.
//!
//! This module implements the per-agent turn loop: seed the sandbox with
//! the context, then iterate generate → extract → execute → observe until
//! the sandboxed code assigns a final result, a budget trips, or the call
//! limit runs out. Sub-agents spawned through `llm_query` run this same
//! loop one level deeper, sharing the ledger, the event sink, and the
//! resolved model pair.

mod bridge;
mod run;


pub use run::RunContext;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use ouro_events::EventSink;

use crate::budget::{BudgetCaps, UsageLedger};
use crate::client::ChatBackend;
use crate::error::{DriverError, Result};
use crate::models::{RequestedModels, RuntimeModels, resolve_runtime_models};
use crate::prompts::{NO_CODE_MESSAGE, SEED_PROGRAM, seed_message};
use crate::run_log::RunLogger;
use crate::sandbox::{CONTEXT_GLOBAL, EvaluatorFactory, FINAL_RESULT_GLOBAL, SandboxSession};
use crate::usage::Usage;

use bridge::TurnBridge;

/// Raised when an agent burns through MAX_CALLS without a final result.
pub const EXHAUSTED_MESSAGE: &str = "Did not finish the function stack before subagent died";

/// Per-agent and per-tree limits.
#[derive(Debug, Clone, Copy)]
pub struct DriverLimits {
    /// Chat-completion calls each agent may make.
    pub max_calls: u32,
    /// Deepest depth at which `llm_query` may still spawn a child.
    pub max_depth: u32,
    /// Tail length observations are truncated to.
    pub truncate_len: usize,
}

impl Default for DriverLimits {
    fn default() -> Self {
        Self {
            max_calls: 20,
            max_depth: 3,
            truncate_len: 5000,
        }
    }
}

impl DriverLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_calls(mut self, max_calls: u32) -> Self {
        self.max_calls = max_calls;
        self
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_truncate_len(mut self, truncate_len: usize) -> Self {
        self.truncate_len = truncate_len;
        self
    }
}

/// Dependencies for the driver.
pub struct DriverDeps {
    pub client: Arc<dyn ChatBackend>,
    pub evaluators: Arc<dyn EvaluatorFactory>,
    pub sink: Arc<EventSink>,
}

impl DriverDeps {
    pub fn new(
        client: Arc<dyn ChatBackend>,
        evaluators: Arc<dyn EvaluatorFactory>,
        sink: Arc<EventSink>,
    ) -> Self {
        Self {
            client,
            evaluators,
            sink,
        }
    }
}

/// Configuration for the driver.
#[derive(Debug, Clone, Default)]
pub struct DriverConfig {
    pub limits: DriverLimits,
    pub caps: BudgetCaps,
    /// Model names as requested; pinned against the catalog at preflight.
    pub requested: Option<RequestedModels>,
    /// Environment map consulted for fallback overrides at preflight.
    pub env: HashMap<String, String>,
    /// Values redacted from any error that reaches the caller.
    pub secrets: Vec<String>,
}

impl DriverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(mut self, limits: DriverLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_caps(mut self, caps: BudgetCaps) -> Self {
        self.caps = caps;
        self
    }

    pub fn with_requested(mut self, requested: RequestedModels) -> Self {
        self.requested = Some(requested);
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_secrets(mut self, secrets: Vec<String>) -> Self {
        self.secrets = secrets;
        self
    }
}

/// What a top-level invocation hands back to its caller.
#[derive(Debug)]
pub struct RunOutcome {
    /// The final value, when the run produced one.
    pub result: Option<serde_json::Value>,
    /// Path of the event log, when any event was written.
    pub log_file: Option<PathBuf>,
    /// The failure that ended the run, secrets redacted.
    pub error: Option<DriverError>,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        self.error.as_ref().map_or(0, DriverError::exit_code)
    }
}

/// The recursive driver.
pub struct Driver {
    client: Arc<dyn ChatBackend>,
    evaluators: Arc<dyn EvaluatorFactory>,
    sink: Arc<EventSink>,
    ledger: Arc<UsageLedger>,
    limits: DriverLimits,
    requested: Option<RequestedModels>,
    env: HashMap<String, String>,
    secrets: Vec<String>,
}

impl Driver {
    pub fn new(deps: DriverDeps, config: DriverConfig) -> Self {
        Self {
            client: deps.client,
            evaluators: deps.evaluators,
            sink: deps.sink,
            ledger: Arc::new(UsageLedger::new(config.caps)),
            limits: config.limits,
            requested: config.requested,
            env: config.env,
            secrets: config.secrets,
        }
    }

    pub fn limits(&self) -> DriverLimits {
        self.limits
    }

    pub fn sink(&self) -> &Arc<EventSink> {
        &self.sink
    }

    /// Running totals across the whole tree.
    pub fn usage(&self) -> Usage {
        self.ledger.snapshot()
    }

    /// Drive one top-level invocation to completion.
    ///
    /// The ledger is reset, the tree is run, and the sink is flushed on
    /// every path. Errors come back with secrets redacted.
    pub async fn run(&self, context: &str) -> RunOutcome {
        self.ledger.reset();
        let result = self.subagent(context.to_string(), 0, None, None).await;

        if let Err(e) = self.sink.flush() {
            tracing::warn!(error = %e, "failed to flush event sink");
        }
        let log_file = self.sink.path();

        match result {
            Ok(value) => RunOutcome {
                result: Some(value),
                log_file,
                error: None,
            },
            Err(e) => {
                let secrets: Vec<&str> = self.secrets.iter().map(String::as_str).collect();
                RunOutcome {
                    result: None,
                    log_file,
                    error: Some(e.redacted(&secrets)),
                }
            }
        }
    }

    /// Fetch the catalog and pin the model pair. Once per invocation tree.
    async fn preflight(&self) -> Result<RuntimeModels> {
        let requested = self.requested.clone().unwrap_or_else(|| RequestedModels {
            primary: "gpt-5".to_string(),
            sub: "gpt-5-codex-mini".to_string(),
        });
        let available = self.client.list_models().await?;
        let resolved = resolve_runtime_models(&requested, &available, &self.env);
        for warning in &resolved.warnings {
            tracing::warn!(warning = %warning, "model fallback");
        }
        Ok(resolved)
    }

    /// Run one agent at `depth`. Boxed because `llm_query` recurses here.
    ///
    /// Descendants pass the parent's `models`; only the root preflights.
    pub fn subagent(
        &self,
        context: String,
        depth: u32,
        parent_run_id: Option<String>,
        models: Option<RuntimeModels>,
    ) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            let models = match models {
                Some(models) => models,
                None => self.preflight().await?,
            };

            let mut logger =
                RunLogger::start(self.sink.clone(), depth, parent_run_id.clone(), &context)?;
            let mut ctx = RunContext::new(
                logger.run_id().to_string(),
                parent_run_id,
                depth,
                models,
            );

            let mut session = match self.evaluators.spawn().await {
                Ok(evaluator) => SandboxSession::new(evaluator),
                Err(e) => {
                    logger.error(&e.to_string());
                    return Err(e);
                }
            };

            let outcome = self.drive(&mut ctx, &mut logger, &mut session, &context).await;

            // Release the sandbox on every path before surfacing anything.
            session.close().await;

            if let Err(e) = &outcome {
                logger.error(&e.to_string());
            }
            outcome
        })
    }

    async fn drive(
        &self,
        ctx: &mut RunContext,
        logger: &mut RunLogger,
        session: &mut SandboxSession,
        context: &str,
    ) -> Result<serde_json::Value> {
        session
            .bind(CONTEXT_GLOBAL, &serde_json::Value::String(context.to_string()))
            .await?;
        session
            .bind(FINAL_RESULT_GLOBAL, &serde_json::Value::Null)
            .await?;

        // Seed turn: show the model what `context` holds.
        {
            let mut bridge = TurnBridge {
                driver: self,
                run_id: ctx.run_id.clone(),
                depth: ctx.depth,
                models: &ctx.models,
            };
            session.run(SEED_PROGRAM, &mut bridge).await?;
        }
        let seed_output = session.take_stdout();
        logger.seed(SEED_PROGRAM, &seed_output)?;
        ctx.push_user(seed_message(self.limits.truncate_len, &seed_output));

        for _ in 0..self.limits.max_calls {
            let generation = self.client.generate_code(&ctx.messages, ctx.model()).await?;
            ctx.calls += 1;
            ctx.push_assistant(generation.message.clone());

            // Post-increment check: the overflowing call is counted, then
            // the whole tree unwinds.
            self.ledger.track_and_check(&generation.usage)?;

            if !generation.success {
                logger.code_generated("", generation.reasoning.as_deref(), &generation.usage)?;
                ctx.push_user(NO_CODE_MESSAGE);
                continue;
            }

            session.take_stdout();
            {
                let mut bridge = TurnBridge {
                    driver: self,
                    run_id: ctx.run_id.clone(),
                    depth: ctx.depth,
                    models: &ctx.models,
                };
                session.run(&generation.code, &mut bridge).await?;
            }
            let stdout = session.take_stdout();

            if let Some(value) = session.read_final().await? {
                logger.code_generated(
                    &generation.code,
                    generation.reasoning.as_deref(),
                    &generation.usage,
                )?;
                logger.final_result(&value)?;
                return Ok(value);
            }

            let observed = format_observation(&stdout, self.limits.truncate_len);
            let has_error = stdout.contains("Error");
            logger.execution_result(
                &generation.code,
                &observed,
                has_error,
                generation.reasoning.as_deref(),
                &generation.usage,
            )?;
            ctx.push_user(format!("Output: \n{observed}"));
        }

        Err(DriverError::Runtime(EXHAUSTED_MESSAGE.to_string()))
    }
}

/// Last `n` Unicode scalar values of `text`. Idempotent.
pub fn tail_chars(text: &str, n: usize) -> &str {
    let len = text.chars().count();
    if len <= n {
        return text;
    }
    let (start, _) = text.char_indices().nth(len - n).expect("index in range");
    &text[start..]
}

/// Decorate captured output for the model's observation.
pub fn format_observation(text: &str, limit: usize) -> String {
    let len = text.chars().count();
    if len == 0 {
        "[EMPTY OUTPUT]".to_string()
    } else if len > limit {
        format!(
            "[TRUNCATED: Last {limit} chars shown].. {}",
            tail_chars(text, limit)
        )
    } else {
        format!("[FULL OUTPUT SHOWN]... {text}")
    }
}
