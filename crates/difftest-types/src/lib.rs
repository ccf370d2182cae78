//! Shared types for the vyper-difftest workspace.
//!
//! This crate holds the data model every pipeline stage agrees on:
//!
//! - [`VyperType`] / [`TypeMap`] - the finite parameter-type taxonomy and its
//!   versioned wire form
//! - [`Value`] - concrete argument values, with [`Word`] for 256-bit integers
//! - [`AbiEntry`] - ABI JSON entries as emitted by the compiler
//! - [`records`] - persisted documents joined by generation id

pub mod abi;
pub mod env_utils;
pub mod records;
pub mod ty;
pub mod value;
pub mod word;

pub use abi::{AbiEntry, AbiParam, StateMutability};
pub use records::{
    CompileFailure, CompileOutcome, CompiledArtifact, DeploymentOutcome, Divergence,
    DivergenceKind, DivergenceReport, ExecutionSnapshot, FunctionInputs, GenerationId,
    GenerationRecord, HarnessFailure, InputSet, InputStrategy, QueueMessage, RunEntry, RunResult,
    RunState, RunnerReport, SnapshotOutcome, VersionResult,
};
pub use ty::{TypeMap, TypeMapError, UnsupportedTypeError, VyperType, DECIMAL_PLACES};
pub use value::{Address, Decimal, HexBytes, Value, ValueParseError};
pub use word::{Word, WordParseError};

/// Name of the constructor in source and in ABI-derived type maps.
pub const CONSTRUCTOR_NAME: &str = "__init__";
