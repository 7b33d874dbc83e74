//! Command-line interface of the `fsmonitor` binary.

pub mod args;
pub mod commands;

pub use args::{Cli, Commands, WatchArgs};
