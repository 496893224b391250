//! Command-line interface for queue-forge.
//!
//! Provides commands for running workers, dispatching jobs and inspecting
//! or maintaining queues.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
