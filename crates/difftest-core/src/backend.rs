//! Seams to the compiler and execution engine under test.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use difftest_types::{Address, CompileOutcome, HexBytes, Value};

/// Slack between a backend's own deadline and the caller's bound on the same
/// call. The backend's timeout fires first and tears down its subprocess.
pub const DEADLINE_SLACK: Duration = Duration::from_millis(500);

/// Caller-side bound for a call the backend itself limits to `inner`.
pub fn caller_deadline(inner: Duration) -> Duration {
    inner.saturating_add(DEADLINE_SLACK)
}

/// A compiler-version target.
///
/// `Ok(CompileOutcome::Failure)` is the expected "source rejected" outcome;
/// `Err` means the compiler could not be run at all.
#[async_trait::async_trait]
pub trait Compiler: Send + Sync {
    /// Target name, e.g. `0.3.10_default`.
    fn name(&self) -> &str;

    async fn compile(&self, source: &str) -> anyhow::Result<CompileOutcome>;
}

/// Failure reported by the execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("reverted: {0}")]
    Revert(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("execution backend failure: {0}")]
    Backend(String),
}

/// One invocation of a deployed contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    pub function: String,
    /// Selector plus ABI-encoded arguments.
    pub calldata: HexBytes,
    /// Decoded arguments, for engines that take them directly.
    pub args: Vec<Value>,
}

/// Observed effects of a successful call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallTrace {
    /// Storage slots from slot 0, decimal.
    #[serde(default)]
    pub storage: Vec<String>,
    #[serde(default)]
    pub memory: HexBytes,
    #[serde(default)]
    pub gas_used: u64,
    #[serde(default)]
    pub return_value: serde_json::Value,
}

#[async_trait::async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Deploy `bytecode` with ABI-encoded constructor arguments appended.
    async fn deploy(&self, bytecode: &HexBytes, ctor_args: &[u8])
        -> Result<Address, ExecutionError>;

    async fn call(&self, address: &Address, request: &CallRequest)
        -> Result<CallTrace, ExecutionError>;
}
