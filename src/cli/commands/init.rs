//! `init` and `config` commands.

use anyhow::{Result, anyhow};

use crate::config::Settings;

/// Write a default `.fsmonitor/settings.toml` in the working directory.
pub fn run_init(force: bool) -> Result<()> {
    let path = Settings::init_config_file(force).map_err(|e| anyhow!("{e}"))?;
    println!("Created configuration file at: {}", path.display());
    println!(
        "Transient names, the hidden-file prefix and timing defaults can be tuned there."
    );
    Ok(())
}

/// Print the effective settings after all layers are merged.
pub fn run_config(settings: &Settings) -> Result<()> {
    let rendered = toml::to_string_pretty(settings)?;
    println!("# Effective configuration (defaults < settings.toml < FSM_* environment)");
    println!("{rendered}");
    Ok(())
}
