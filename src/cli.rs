//! Command-line interface for loopcraft.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use loopcraft_platforms::Platform;

#[derive(Parser)]
#[command(name = "loopcraft")]
#[command(about = "Schedule loop-nest kernels with semantics-preserving rewrites", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Parse a kernel file and print it back in canonical form
    Print {
        kernel: PathBuf,
        /// Only print this procedure
        #[arg(long)]
        name: Option<String>,
    },

    /// Apply a schedule script and print the scheduled kernel
    Schedule {
        kernel: PathBuf,
        script: PathBuf,
        #[command(flatten)]
        target: Target,
        /// Print the kernel after every step
        #[arg(long)]
        trace: bool,
        /// Emit the outcome as JSON
        #[arg(long, conflicts_with = "trace")]
        json: bool,
    },

    /// Apply a schedule script and compare the result against the reference kernel
    Verify {
        kernel: PathBuf,
        script: PathBuf,
        #[command(flatten)]
        target: Target,
        /// Size binding, e.g. `--size K=4`
        #[arg(long = "size", value_name = "NAME=VALUE", value_parser = parse_size)]
        sizes: Vec<(String, i64)>,
        /// Seed for the random inputs
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Largest accepted elementwise difference
        #[arg(long, default_value_t = 0.0)]
        tolerance: f64,
    },
}

/// Which kernel to schedule and which templates to use.
#[derive(clap::Args)]
pub struct Target {
    /// Kernel to schedule when the file defines several
    #[arg(long)]
    pub name: Option<String>,
    /// Template catalog to load
    #[arg(long, default_value = "avx2", value_parser = parse_platform)]
    pub platform: Platform,
}

fn parse_size(arg: &str) -> Result<(String, i64), String> {
    let (name, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got `{arg}`"))?;
    let value = value
        .trim()
        .parse::<i64>()
        .map_err(|e| format!("invalid value for `{name}`: {e}"))?;
    Ok((name.trim().to_owned(), value))
}

fn parse_platform(arg: &str) -> Result<Platform, String> {
    Platform::from_name(arg).ok_or_else(|| {
        let known: Vec<_> = Platform::ALL.iter().map(|p| p.name()).collect();
        format!("unknown platform `{arg}` (known: {})", known.join(", "))
    })
}
