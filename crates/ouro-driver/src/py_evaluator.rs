//! Out-of-process Python evaluator.
//!
//! A single long-lived `python3` child runs a small harness that keeps one
//! globals dict across executions and speaks a JSON-lines protocol on
//! stdin/stdout. The child's real stdout carries only protocol records;
//! user `print` output is captured into a buffer per execution and shipped
//! back in the `result` record.
//!
//! Host calls are the synchronous bridge: when sandboxed code invokes
//! `llm_query`, the harness emits a `host_call` record and blocks reading
//! until the host answers. On the host side that read happens inside
//! `eval`, which is exactly where the parent agent is suspended while a
//! child agent runs.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::{Duration, timeout};

use crate::error::{DriverError, Result};
use crate::sandbox::{EvalOutcome, Evaluator, EvaluatorFactory, HostBridge};

/// The harness executed via `python3 -u -c`.
///
/// Namespace layout: one `_GLOBALS` dict shared by every `exec`, pre-seeded
/// with `llm_query`, `FINAL`, and `FINAL_VAR`. `FINAL`/`FINAL_VAR` assign
/// their argument to `__final_result__`; `llm_query` round-trips through the
/// host and raises `RuntimeError` when the host reports a failure, so the
/// failure surfaces in the captured output of the code that called it.
const PY_HARNESS: &str = r#"
import io
import json
import sys
import traceback


def _send(obj):
    sys.__stdout__.write(json.dumps(obj) + "\n")
    sys.__stdout__.flush()


def _recv():
    line = sys.stdin.readline()
    if not line:
        sys.exit(0)
    return json.loads(line)


def _host_call(name, arg):
    _send({"ev": "host_call", "name": name, "arg": arg})
    reply = _recv()
    if reply.get("ok"):
        return reply.get("value")
    raise RuntimeError(reply.get("error", "host call failed"))


def llm_query(context):
    return _host_call("llm_query", "" if context is None else str(context))


_GLOBALS = {"__name__": "__rlm__", "__final_result__": None}


def FINAL(value):
    _GLOBALS["__final_result__"] = value
    return value


def FINAL_VAR(value):
    _GLOBALS["__final_result__"] = value
    return value


_GLOBALS["llm_query"] = llm_query
_GLOBALS["FINAL"] = FINAL
_GLOBALS["FINAL_VAR"] = FINAL_VAR


def _jsonable(value):
    try:
        return json.loads(json.dumps(value, default=str))
    except (TypeError, ValueError):
        return str(value)


while True:
    msg = _recv()
    op = msg.get("op")
    if op == "exec":
        buf = io.StringIO()
        prev = sys.stdout
        sys.stdout = buf
        error = None
        try:
            exec(compile(msg["code"], "<repl>", "exec"), _GLOBALS)
        except BaseException as exc:
            error = "".join(
                traceback.format_exception_only(type(exc), exc)
            ).strip()
        finally:
            sys.stdout = prev
        _send({"ev": "result", "stdout": buf.getvalue(), "error": error})
    elif op == "set":
        _GLOBALS[msg["name"]] = msg["value"]
        _send({"ev": "value", "found": True, "value": None})
    elif op == "get":
        name = msg["name"]
        if name in _GLOBALS:
            _send({"ev": "value", "found": True, "value": _jsonable(_GLOBALS[name])})
        else:
            _send({"ev": "value", "found": False, "value": None})
    elif op == "exit":
        break
    else:
        _send({"ev": "result", "stdout": "", "error": "unknown op: %s" % op})
"#;

/// Configuration for the Python evaluator.
#[derive(Debug, Clone)]
pub struct PyEvaluatorConfig {
    /// Interpreter binary.
    pub interpreter: String,
}

impl Default for PyEvaluatorConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
        }
    }
}

impl PyEvaluatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    /// Probe whether the interpreter can be launched at all.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.interpreter)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

/// A persistent Python child speaking the harness protocol.
pub struct PyEvaluator {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
}

impl PyEvaluator {
    /// Spawn the interpreter. The child is killed if the evaluator is
    /// dropped without an explicit shutdown (e.g. a cancelled run).
    pub async fn spawn(config: &PyEvaluatorConfig) -> Result<Self> {
        let mut child = Command::new(&config.interpreter)
            .arg("-u")
            .arg("-c")
            .arg(PY_HARNESS)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DriverError::Runtime(format!(
                    "failed to spawn sandbox interpreter '{}': {e}",
                    config.interpreter
                ))
            })?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");

        Ok(Self {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
        })
    }

    async fn send(&mut self, message: &serde_json::Value) -> Result<()> {
        let mut line = serde_json::to_string(message)
            .map_err(|e| DriverError::Runtime(format!("sandbox protocol encode: {e}")))?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<serde_json::Value> {
        let line = self
            .lines
            .next_line()
            .await?
            .ok_or_else(|| DriverError::Runtime("sandbox interpreter exited".to_string()))?;
        serde_json::from_str(&line)
            .map_err(|e| DriverError::Runtime(format!("sandbox protocol decode: {e}")))
    }

    async fn recv_value(&mut self) -> Result<Option<serde_json::Value>> {
        let reply = self.recv().await?;
        if reply["ev"] != "value" {
            return Err(DriverError::Runtime(format!(
                "sandbox protocol: expected value record, got {reply}"
            )));
        }
        if reply["found"].as_bool().unwrap_or(false) {
            Ok(Some(reply["value"].clone()))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl Evaluator for PyEvaluator {
    async fn eval(&mut self, code: &str, host: &mut dyn HostBridge) -> Result<EvalOutcome> {
        self.send(&serde_json::json!({"op": "exec", "code": code}))
            .await?;

        loop {
            let reply = self.recv().await?;
            match reply["ev"].as_str() {
                Some("host_call") => {
                    let arg = reply["arg"].as_str().unwrap_or_default().to_string();
                    let answer = match reply["name"].as_str() {
                        Some("llm_query") => host.llm_query(arg).await,
                        other => Err(format!("unknown host call: {other:?}")),
                    };
                    let response = match answer {
                        Ok(value) => serde_json::json!({"ok": true, "value": value}),
                        Err(message) => serde_json::json!({"ok": false, "error": message}),
                    };
                    self.send(&response).await?;
                }
                Some("result") => {
                    return Ok(EvalOutcome {
                        stdout: reply["stdout"].as_str().unwrap_or_default().to_string(),
                        error: reply["error"].as_str().map(str::to_string),
                    });
                }
                _ => {
                    return Err(DriverError::Runtime(format!(
                        "sandbox protocol: unexpected record {reply}"
                    )));
                }
            }
        }
    }

    async fn set_global(&mut self, name: &str, value: &serde_json::Value) -> Result<()> {
        self.send(&serde_json::json!({"op": "set", "name": name, "value": value}))
            .await?;
        self.recv_value().await?;
        Ok(())
    }

    async fn get_global(&mut self, name: &str) -> Result<Option<serde_json::Value>> {
        self.send(&serde_json::json!({"op": "get", "name": name}))
            .await?;
        self.recv_value().await
    }

    async fn shutdown(&mut self) {
        let _ = self.send(&serde_json::json!({"op": "exit"})).await;
        if timeout(Duration::from_secs(2), self.child.wait())
            .await
            .is_err()
        {
            let _ = self.child.kill().await;
        }
    }
}

/// Factory spawning one interpreter per agent.
pub struct PyEvaluatorFactory {
    config: PyEvaluatorConfig,
}

impl PyEvaluatorFactory {
    pub fn new(config: PyEvaluatorConfig) -> Self {
        Self { config }
    }
}

impl Default for PyEvaluatorFactory {
    fn default() -> Self {
        Self::new(PyEvaluatorConfig::default())
    }
}

#[async_trait]
impl EvaluatorFactory for PyEvaluatorFactory {
    async fn spawn(&self) -> Result<Box<dyn Evaluator>> {
        Ok(Box::new(PyEvaluator::spawn(&self.config).await?))
    }
}
