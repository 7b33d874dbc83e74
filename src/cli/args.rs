//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

use crate::monitor::PathMode;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Directory monitor server
#[derive(Parser)]
#[command(
    name = "fsmonitor",
    version = env!("CARGO_PKG_VERSION"),
    about = "Watch directories for newly completed files",
    long_about = "Watch directories for newly completed files and inspect them by reference.",
    styles = clap_cargo_style()
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true, env = "FSMONITOR_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize project
    #[command(about = "Set up .fsmonitor directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration settings
    #[command(about = "Display active settings from .fsmonitor/settings.toml")]
    Config,

    /// Watch a directory and print every new file
    #[command(
        about = "Watch a directory until interrupted",
        after_help = "Examples:\n  fsmonitor watch /data/incoming\n  fsmonitor watch /data/incoming --mode follow --whitelist .tif --whitelist .dv\n  fsmonitor watch /mnt/share --poll --timeout-ms 2000 --json"
    )]
    Watch(WatchArgs),

    /// List a directory the way remote clients see it
    #[command(about = "List directories (with trailing /) then files")]
    Ls {
        path: PathBuf,

        /// Glob pattern applied to entry names
        #[arg(long, default_value = "")]
        filter: String,
    },

    /// Show file statistics
    #[command(about = "Show name, owner, size, times and type of a path")]
    Stat {
        path: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Compute the content hash of a file
    #[command(about = "Print the SHA-256 digest of a file")]
    Hash { path: PathBuf },

    /// Read a block of bytes from a file
    #[command(about = "Write a block of a file to stdout")]
    Read {
        path: PathBuf,

        /// Byte offset to start reading at
        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Maximum number of bytes to read
        #[arg(long)]
        size: usize,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct WatchArgs {
    /// Directory to watch (defaults to the working directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// flat, recurse or follow
    #[arg(long, default_value = "flat")]
    pub mode: PathMode,

    /// Extension (.tif) or file name to report; repeatable
    #[arg(long, value_name = "ENTRY")]
    pub whitelist: Vec<String>,

    /// Subdirectory name to skip in recursive modes; repeatable
    #[arg(long, value_name = "NAME")]
    pub blacklist: Vec<String>,

    /// Also report hidden and system files
    #[arg(long)]
    pub include_sys_files: bool,

    /// Also report new directories
    #[arg(long)]
    pub include_dir_events: bool,

    /// Use the polling backend instead of native notifications
    #[arg(long)]
    pub poll: bool,

    /// Settle window (native) or poll interval (polling) in milliseconds
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Maximum events per batch (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    pub block_size: usize,

    /// Print events as JSON lines
    #[arg(long)]
    pub json: bool,
}
