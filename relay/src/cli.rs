// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # CLI Interface
//!
//! Defines the command-line argument structure for `beam-relay` using
//! `clap` derive. Supports three subcommands: `run`, `demo`, and
//! `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Beam relay daemon.
///
/// The receiving end of the Beam offline payment transport: admits
/// peer devices, executes or queues their payments, and exposes a thin
/// HTTP administration surface.
#[derive(Parser, Debug)]
#[command(
    name = "beam-relay",
    about = "Beam payment relay daemon",
    version,
    propagate_version = true
)]
pub struct BeamRelayCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the relay binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the relay daemon.
    Run(RunArgs),
    /// Run a self-contained two-device payment demo over an in-memory
    /// link and print the result.
    Demo(DemoArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the relay data directory where the device identity and
    /// the offline queue are stored.
    ///
    /// Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "BEAM_DATA_DIR", default_value = ".beam")]
    pub data_dir: PathBuf,

    /// Port for the HTTP administration API.
    #[arg(long, env = "BEAM_API_PORT", default_value_t = 8931)]
    pub api_port: u16,

    /// Log format: "pretty" or "json".
    #[arg(long, env = "BEAM_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `demo` subcommand.
#[derive(Parser, Debug)]
pub struct DemoArgs {
    /// Payment amount, as a decimal string.
    #[arg(long, default_value = "5.0")]
    pub amount: String,

    /// Frame ceiling for the in-memory link, in bytes. Small values
    /// force heavy chunking, which is the point of the demo.
    #[arg(long, default_value_t = 20)]
    pub frame_ceiling: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        BeamRelayCli::command().debug_assert();
    }
}
