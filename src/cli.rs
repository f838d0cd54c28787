//! Command-line interface. The controller is configured entirely from the
//! environment; the only flag exists for CI and operators to check a
//! configuration without starting anything.

use clap::Parser;

/// Per-node S3 volume controller
#[derive(Parser, Debug)]
#[command(name = "volume-s3-controller")]
#[command(about = "Keeps an rclone FUSE mount healthy and provisions label-declared prefixes", long_about = None)]
pub struct Cli {
    /// Print the configuration validation report as JSON and exit 0 (valid)
    /// or 1 (invalid)
    #[arg(long)]
    pub validate_config: bool,
}
