//! One-shot file commands: `ls`, `stat`, `hash` and `read`.
//!
//! These go through the same [`MonitorServer`] operations remote clients use.

use std::io::Write;
use std::path::Path;
use std::time::SystemTime;

use anyhow::Result;
use chrono::{DateTime, Local};

use crate::config::Settings;
use crate::server::{DirectoryTarget, MonitorServer};

fn absolute(path: &Path) -> Result<std::path::PathBuf> {
    Ok(std::path::absolute(path)?)
}

pub fn run_ls(path: &Path, filter: &str, settings: Settings) -> Result<()> {
    let server = MonitorServer::new(settings);
    let target = DirectoryTarget::Absolute(absolute(path)?);
    for name in server.list_directory(&target, "", filter)? {
        println!("{name}");
    }
    Ok(())
}

fn format_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

pub fn run_stat(path: &Path, json: bool, settings: Settings) -> Result<()> {
    let server = MonitorServer::new(settings);
    let reference = server.file_reference(absolute(path)?);
    let stats = server.get_stats(&reference)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("  Name: {}", stats.base_name);
    println!("  Type: {:?}", stats.file_type);
    println!(" Owner: {}", stats.owner);
    println!("  Size: {}", stats.size);
    println!("Modify: {}", format_time(stats.m_time));
    println!("Change: {}", format_time(stats.c_time));
    println!("Access: {}", format_time(stats.a_time));
    println!("   Ref: {reference}");
    Ok(())
}

pub async fn run_hash(path: &Path, settings: Settings) -> Result<()> {
    let server = MonitorServer::new(settings);
    let reference = server.file_reference(absolute(path)?);
    let digest = server.get_content_hash(&reference).await?;
    println!("{digest}  {}", path.display());
    Ok(())
}

pub async fn run_read(path: &Path, offset: u64, size: usize, settings: Settings) -> Result<()> {
    let server = MonitorServer::new(settings);
    let reference = server.file_reference(absolute(path)?);
    let block = server.read_block(&reference, offset, size).await?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&block)?;
    stdout.flush()?;
    Ok(())
}
