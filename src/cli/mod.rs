//! Command-line interface for pipeline-forge.
//!
//! Provides commands for running build sessions and inspecting the session
//! store.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
