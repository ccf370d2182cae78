//! Difftest Core
//!
//! Synthesis, input generation and differential execution for Vyper
//! compiler fuzzing.
//!
//! A structured contract description flows through the pipeline as:
//!
//! 1. [`generator`]: synthesize source ([`synth`], ordered by
//!    [`call_graph`]), generate inputs ([`input_gen`]), compile with the
//!    reference target and store the record,
//! 2. [`distributor`]: write the run marker and hand the generation to every
//!    compiler target ([`queue`] or store polling),
//! 3. [`compile_worker`]: compile per target into an artifact collection,
//! 4. [`runner`]: claim artifacts, deploy, invoke and report,
//! 5. [`aggregator`]: join reports per generation and flag divergence
//!    ([`divergence`]).
//!
//! # Core Modules
//!
//! - [`ast`]: the structured contract description
//! - [`errors`]: harness defects
//! - [`backend`]: compiler and execution-engine seams, with subprocess
//!   implementations in [`process`]
//! - [`store`]: durable records with atomic claims
//! - [`config`]: static pipeline configuration
//! - [`metrics`]: prometheus counters

#![allow(clippy::too_many_arguments)]

pub mod abi;
pub mod aggregator;
pub mod ast;
pub mod backend;
pub mod call_graph;
pub mod compile_worker;
pub mod config;
pub mod distributor;
pub mod divergence;
pub mod errors;
pub mod generator;
pub mod input_gen;
pub mod metrics;
pub mod process;
pub mod queue;
pub mod runner;
pub mod store;
pub mod synth;

pub use errors::{ConversionError, ConversionFault, DependencyError, HarnessError};
pub use synth::{synthesize, Synthesis};
