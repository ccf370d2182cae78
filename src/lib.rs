//! Vyper Difftest
//!
//! Process-level glue for the `vyper-difftest` binary:
//!
//! - [`logging`]: tracing subscriber setup
//! - [`inputs`]: structured-input loading from files, directories and stdin
//! - [`wiring`]: pipeline components built from a [`difftest_core::config::Config`]
//!
//! The pipeline itself lives in [`difftest_core`]; the shared data model in
//! [`difftest_types`].

#![allow(clippy::too_many_arguments)]

pub mod inputs;
pub mod logging;
pub mod wiring;

pub use wiring::Pipeline;
