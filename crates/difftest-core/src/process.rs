//! Subprocess-backed compiler and execution engine.
//!
//! [`VyperCli`] runs one `vyper` binary per compile on a scratch file.
//! [`ProcessExecutor`] keeps one long-lived engine process and talks to it in
//! JSON lines, one request and one response per line. Every request runs
//! under a timeout; a timed-out or broken engine is killed and respawned on
//! the next request.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use difftest_types::{AbiEntry, Address, CompileOutcome, HexBytes};

use crate::backend::{CallRequest, CallTrace, Compiler, ExecutionBackend, ExecutionError};

/// Longest persisted compiler error message.
const MAX_ERROR_LEN: usize = 200;

/// Failure kind recorded when a compile exceeds its deadline.
pub const TIMEOUT_ERROR_KIND: &str = "Timeout";

pub fn truncate_error(msg: &str) -> String {
    match msg.char_indices().nth(MAX_ERROR_LEN) {
        Some((end, _)) => format!("{}...", &msg[..end]),
        None => msg.to_string(),
    }
}

/// Pull `(kind, message)` out of compiler stderr.
///
/// The compiler reports errors as `vyper.exceptions.TypeMismatch: message`;
/// the first line of that shape wins. Anything else is `CompilerError` with
/// the raw output.
pub fn classify_compiler_error(stderr: &str) -> (String, String) {
    for line in stderr.lines().map(str::trim) {
        let Some((head, message)) = line.split_once(':') else {
            continue;
        };
        let name = head.rsplit('.').next().unwrap_or(head);
        let is_exception_name = !head.is_empty()
            && !head.contains(char::is_whitespace)
            && name.starts_with(|c: char| c.is_ascii_uppercase())
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if is_exception_name {
            return (name.to_string(), truncate_error(message.trim()));
        }
    }
    ("CompilerError".to_string(), truncate_error(stderr.trim()))
}

/// Parse `-f bytecode,abi` output: the bytecode line, then ABI JSON.
pub fn parse_compiler_output(stdout: &str) -> Result<(HexBytes, Vec<AbiEntry>)> {
    let stdout = stdout.trim();
    let (bytecode, abi) = stdout
        .split_once('\n')
        .ok_or_else(|| anyhow!("compiler output has no ABI section"))?;
    let bytecode: HexBytes = bytecode
        .trim()
        .parse()
        .with_context(|| format!("invalid bytecode line `{}`", truncate_error(bytecode)))?;
    let abi: Vec<AbiEntry> =
        serde_json::from_str(abi.trim()).context("invalid ABI JSON in compiler output")?;
    Ok((bytecode, abi))
}

/// A `vyper` executable plus the flags that select one target.
#[derive(Debug, Clone)]
pub struct VyperCli {
    name: String,
    binary: PathBuf,
    extra_args: Vec<String>,
    timeout: Duration,
}

impl VyperCli {
    pub fn new(
        name: impl Into<String>,
        binary: impl Into<PathBuf>,
        extra_args: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            binary: binary.into(),
            extra_args,
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl Compiler for VyperCli {
    fn name(&self) -> &str {
        &self.name
    }

    async fn compile(&self, source: &str) -> Result<CompileOutcome> {
        let file = tempfile::Builder::new()
            .prefix("difftest_")
            .suffix(".vy")
            .tempfile()
            .context("failed to create scratch source file")?;
        std::fs::write(file.path(), source)
            .with_context(|| format!("failed to write {}", file.path().display()))?;

        let mut command = TokioCommand::new(&self.binary);
        command
            .args(&self.extra_args)
            .arg("-f")
            .arg("bytecode,abi")
            .arg(file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.binary.display()))?;

        let mut stdout_reader = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture compiler stdout"))?;
        let mut stderr_reader = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("failed to capture compiler stderr"))?;
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stdout_reader.read_to_end(&mut buf).await;
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr_reader.read_to_end(&mut buf).await;
            buf
        });

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status.with_context(|| format!("failed while waiting for {}", self.name))?,
            Err(_) => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                warn!(compiler = %self.name, timeout = ?self.timeout, "compile timed out");
                return Ok(CompileOutcome::Failure {
                    error_type: TIMEOUT_ERROR_KIND.to_string(),
                    error_message: format!("compile exceeded {:?}", self.timeout),
                });
            }
        };

        let stdout_bytes = stdout_task.await.unwrap_or_default();
        let stderr_bytes = stderr_task.await.unwrap_or_default();
        let stdout = String::from_utf8_lossy(&stdout_bytes);
        let stderr = String::from_utf8_lossy(&stderr_bytes);

        if !status.success() {
            let (error_type, error_message) = classify_compiler_error(&stderr);
            debug!(compiler = %self.name, %error_type, "source rejected");
            return Ok(CompileOutcome::Failure {
                error_type,
                error_message,
            });
        }
        let (bytecode, abi) = parse_compiler_output(&stdout)
            .with_context(|| format!("unreadable output from {}", self.name))?;
        Ok(CompileOutcome::Success { bytecode, abi })
    }
}

// ---- Execution engine ----

/// Deadlines applied to engine requests.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorTimeouts {
    pub deploy: Duration,
    pub call: Duration,
}

/// A running engine. Spawned with `kill_on_drop`, so dropping it ends the
/// process.
struct Session {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Session {
    async fn exchange(&mut self, line: &str) -> std::io::Result<String> {
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        let mut response = String::new();
        if self.stdout.read_line(&mut response).await? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "engine closed its output",
            ));
        }
        Ok(response)
    }

    async fn retire(mut self) {
        let _ = self.child.kill().await;
    }
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    id: Option<u64>,
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    revert: bool,
    #[serde(flatten)]
    payload: serde_json::Map<String, serde_json::Value>,
}

/// JSON-lines client for an external execution engine.
pub struct ProcessExecutor {
    command: Vec<String>,
    timeouts: ExecutorTimeouts,
    session: Mutex<Option<Session>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl ProcessExecutor {
    /// `command` is the program followed by its arguments.
    pub fn new(command: Vec<String>, timeouts: ExecutorTimeouts) -> Result<Self> {
        if command.is_empty() {
            return Err(anyhow!("executor command is empty"));
        }
        Ok(Self {
            command,
            timeouts,
            session: Mutex::new(None),
            next_id: std::sync::atomic::AtomicU64::new(1),
        })
    }

    fn spawn(&self) -> std::io::Result<Session> {
        let mut child = TokioCommand::new(&self.command[0])
            .args(&self.command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("engine stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("engine stdout not captured"))?;
        debug!(command = ?self.command, "spawned execution engine");
        Ok(Session {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    /// One request/response exchange.
    ///
    /// The session is taken out of the slot for the duration of the exchange
    /// and only put back once a response with the matching `id` was read. A
    /// cancelled, timed-out or desynchronised exchange drops the session,
    /// which kills the engine; the next request spawns a fresh one.
    async fn request(
        &self,
        mut body: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Map<String, serde_json::Value>, ExecutionError> {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        body["id"] = json!(id);
        let mut line = body.to_string();
        line.push('\n');

        let mut slot = self.session.lock().await;
        let mut session = match slot.take() {
            Some(session) => session,
            None => self
                .spawn()
                .map_err(|e| ExecutionError::Backend(format!("failed to spawn engine: {e}")))?,
        };

        let response = match tokio::time::timeout(timeout, session.exchange(&line)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(error = %e, "execution engine pipe broken, restarting");
                session.retire().await;
                return Err(ExecutionError::Backend(e.to_string()));
            }
            Err(_) => {
                warn!(timeout = ?timeout, "execution engine request timed out, restarting");
                session.retire().await;
                return Err(ExecutionError::Timeout(timeout));
            }
        };

        let parsed: Response = match serde_json::from_str(response.trim()) {
            Ok(parsed) => parsed,
            Err(e) => {
                session.retire().await;
                return Err(ExecutionError::Backend(format!(
                    "malformed engine response: {e}"
                )));
            }
        };
        if parsed.id != Some(id) {
            warn!(expected = id, got = ?parsed.id, "engine response out of step, restarting");
            session.retire().await;
            return Err(ExecutionError::Backend(format!(
                "engine answered request {:?} while {id} was pending",
                parsed.id
            )));
        }
        *slot = Some(session);

        if parsed.ok {
            Ok(parsed.payload)
        } else {
            let message = parsed.error.unwrap_or_else(|| "unknown engine error".into());
            if parsed.revert {
                Err(ExecutionError::Revert(message))
            } else {
                Err(ExecutionError::Backend(message))
            }
        }
    }
}

#[async_trait::async_trait]
impl ExecutionBackend for ProcessExecutor {
    async fn deploy(
        &self,
        bytecode: &HexBytes,
        ctor_args: &[u8],
    ) -> Result<Address, ExecutionError> {
        let body = json!({
            "method": "deploy",
            "bytecode": bytecode.to_string(),
            "ctor_args": HexBytes(ctor_args.to_vec()).to_string(),
        });
        let payload = self.request(body, self.timeouts.deploy).await?;
        let address = payload
            .get("address")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ExecutionError::Backend("deploy response has no address".into()))?;
        address
            .parse()
            .map_err(|e| ExecutionError::Backend(format!("bad deployed address: {e}")))
    }

    async fn call(
        &self,
        address: &Address,
        request: &CallRequest,
    ) -> Result<CallTrace, ExecutionError> {
        let body = json!({
            "method": "call",
            "address": address.to_string(),
            "function": request.function,
            "calldata": request.calldata.to_string(),
            "args": request.args,
        });
        let payload = self.request(body, self.timeouts.call).await?;
        serde_json::from_value(serde_json::Value::Object(payload))
            .map_err(|e| ExecutionError::Backend(format!("malformed call trace: {e}")))
    }
}

/// Shell-script engines and compilers for subprocess tests.
#[cfg(all(test, unix))]
pub(crate) mod scripted {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Engine that echoes request ids and returns the called function's name.
    /// Calls to `stalled` sleep for `stall_secs` before answering.
    pub(crate) fn echo_engine(dir: &Path, stalled: &str, stall_secs: u32) -> PathBuf {
        let body = format!(
            r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed 's/.*"id":\([0-9]*\).*/\1/')
  fn=$(printf '%s\n' "$line" | sed -n 's/.*"function":"\([^"]*\)".*/\1/p')
  case "$line" in
    *'"method":"deploy"'*)
      echo "{{\"id\":$id,\"ok\":true,\"address\":\"0x00000000000000000000000000000000000000aa\"}}" ;;
    *)
      if [ "$fn" = "{stalled}" ]; then sleep {stall_secs}; fi
      echo "{{\"id\":$id,\"ok\":true,\"storage\":[\"$id\"],\"gas_used\":$id,\"return_value\":\"$fn\"}}" ;;
  esac
done
"#
        );
        write_script(dir, "engine", &body)
    }
}
