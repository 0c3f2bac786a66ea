//! ouro-driver: the recursive language model driver
//!
//! This crate drives a model against prompts too large for its context
//! window. The prompt is bound to a variable inside a sandboxed Python
//! REPL; the model writes code against it, and can spawn sub-agents whose
//! answers come back as REPL bindings instead of chat text:
//!
//! - Per-agent turn loop with call, depth, and global token budgets
//! - Sandbox contract plus an out-of-process Python evaluator
//! - OpenAI-compatible chat client with model preflight and fallback
//! - Append-only event stream, one record per step, correlated by run id

pub mod budget;
pub mod client;
pub mod engine;
pub mod error;
pub mod extract;
pub mod models;
pub mod prompts;
pub mod py_evaluator;
pub mod run_log;
pub mod sandbox;
pub mod testing;
pub mod usage;

pub use budget::{BudgetCaps, UsageLedger};
pub use client::{ChatBackend, ChatClient, ChatMessage, Generation, Role};
pub use engine::{
    Driver, DriverConfig, DriverDeps, DriverLimits, EXHAUSTED_MESSAGE, RunContext, RunOutcome,
    format_observation, tail_chars,
};
pub use error::{DriverError, Result, redact_secrets};
pub use extract::extract_code;
pub use models::{
    ProxyClientConfig, RequestedModels, RuntimeModels, fetch_available_models,
    resolve_model_names, resolve_proxy_client_config, resolve_runtime_models,
};
pub use prompts::{NO_CODE_MESSAGE, SEED_PROGRAM, SYSTEM_PROMPT, seed_message};
pub use py_evaluator::{PyEvaluator, PyEvaluatorConfig, PyEvaluatorFactory};
pub use run_log::RunLogger;
pub use sandbox::{
    CONTEXT_GLOBAL, EvalOutcome, Evaluator, EvaluatorFactory, FINAL_RESULT_GLOBAL, HostBridge,
    SandboxSession,
};
pub use usage::{Usage, normalize_usage};
