use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "tether")]
#[command(author = env!("CARGO_PKG_AUTHORS"))]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(arg_required_else_help = true)]
#[command(about = "Drive a Tether storage proxy from the command line")]
pub struct Cli {
    /// Settings file (TOML); `TETHER__*` environment variables override it
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Raise the log verbosity above the configured one (repeatable)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Open, write, size, read back and close one file under the backend root
    Check {
        /// Backend root directory (defaults to the configured one)
        #[arg(short, long)]
        root: Option<PathBuf>,
        /// Bytes to write and read back
        #[arg(short, long, default_value_t = 512)]
        size: usize,
    },
    /// Repeat lock/write/read/unlock cycles, then dump metrics
    Soak {
        /// Backend root directory (defaults to the configured one)
        #[arg(short, long)]
        root: Option<PathBuf>,
        /// Number of cycles
        #[arg(short = 'n', long, default_value_t = 1000)]
        iterations: u32,
        /// Bytes per write
        #[arg(short, long, default_value_t = 4096)]
        size: usize,
        /// Number of files the cycles rotate over
        #[arg(short, long, default_value_t = 4)]
        files: u32,
        /// Serve from an in-memory store instead of the filesystem
        #[arg(long)]
        memory: bool,
    },
}
