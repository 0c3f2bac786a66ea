//! Sandbox contract and the adapter the turn loop drives.
//!
//! The driver does not build an interpreter; it requires one through the
//! [`Evaluator`] trait: execute Python source against a persistent global
//! namespace, capture prints, surface in-code exceptions as a single
//! message, and dispatch host calls (`llm_query`) made by the running code
//! back to the supplied [`HostBridge`].
//!
//! [`SandboxSession`] layers the turn loop's operations on top of an
//! evaluator: `run` never propagates in-code errors (they become `Error:`
//! lines in the owned stdout buffer), `take_stdout` drains the buffer, and
//! `read_final` fetches the designated result global.

use async_trait::async_trait;

use crate::error::Result;

/// Name of the global the sandboxed code assigns its final value to.
pub const FINAL_RESULT_GLOBAL: &str = "__final_result__";

/// Name of the global holding the input under analysis.
pub const CONTEXT_GLOBAL: &str = "context";

/// Receiver for calls the sandboxed code makes back into the host.
///
/// An `Err` is raised inside the interpreter as an exception carrying the
/// message, so the calling code observes it like any other Python error.
#[async_trait]
pub trait HostBridge: Send {
    async fn llm_query(
        &mut self,
        context: String,
    ) -> std::result::Result<serde_json::Value, String>;
}

/// Result of one execution.
#[derive(Debug, Clone, Default)]
pub struct EvalOutcome {
    /// Everything the code printed, in order.
    pub stdout: String,
    /// Exception message if the code raised, already formatted for humans.
    pub error: Option<String>,
}

/// A Python-capable evaluator with a persistent, host-visible namespace.
///
/// Errors returned from these methods are transport failures (the
/// interpreter died, the protocol broke); errors *inside* evaluated code
/// come back through [`EvalOutcome::error`].
#[async_trait]
pub trait Evaluator: Send {
    /// Execute `code` in the persistent namespace. Host calls made by the
    /// code are dispatched through `host` while the execution is suspended.
    async fn eval(&mut self, code: &str, host: &mut dyn HostBridge) -> Result<EvalOutcome>;

    /// Install a value into the global namespace.
    async fn set_global(&mut self, name: &str, value: &serde_json::Value) -> Result<()>;

    /// Read a global, converted to JSON. `None` when the name is unbound.
    async fn get_global(&mut self, name: &str) -> Result<Option<serde_json::Value>>;

    /// Tear the evaluator down. Must be safe to call more than once.
    async fn shutdown(&mut self);
}

/// Spawns one evaluator per agent.
#[async_trait]
pub trait EvaluatorFactory: Send + Sync {
    async fn spawn(&self) -> Result<Box<dyn Evaluator>>;
}

/// One agent's sandbox: an evaluator plus the stdout buffer the turn loop
/// observes.
pub struct SandboxSession {
    evaluator: Box<dyn Evaluator>,
    stdout: String,
}

impl SandboxSession {
    pub fn new(evaluator: Box<dyn Evaluator>) -> Self {
        Self {
            evaluator,
            stdout: String::new(),
        }
    }

    /// Install a host value into the Python globals.
    pub async fn bind(&mut self, name: &str, value: &serde_json::Value) -> Result<()> {
        self.evaluator.set_global(name, value).await
    }

    /// Execute code. In-code exceptions are appended to the stdout buffer
    /// as an `Error:` line instead of propagating; only transport failures
    /// return `Err`.
    pub async fn run(&mut self, code: &str, host: &mut dyn HostBridge) -> Result<()> {
        let outcome = self.evaluator.eval(code, host).await?;
        self.stdout.push_str(&outcome.stdout);
        if let Some(message) = outcome.error {
            self.stdout.push_str("\nError: ");
            self.stdout.push_str(&message);
        }
        Ok(())
    }

    /// Return and clear the accumulated stdout.
    pub fn take_stdout(&mut self) -> String {
        std::mem::take(&mut self.stdout)
    }

    /// Read the final-result global. Unbound and Python `None` both mean
    /// "no result yet": the global is seeded to `None`, so a `None` value
    /// is indistinguishable from untouched.
    pub async fn read_final(&mut self) -> Result<Option<serde_json::Value>> {
        Ok(self
            .evaluator
            .get_global(FINAL_RESULT_GLOBAL)
            .await?
            .filter(|value| !value.is_null()))
    }

    /// Release the evaluator.
    pub async fn close(&mut self) {
        self.evaluator.shutdown().await;
    }
}
