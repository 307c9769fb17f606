//! `sluice init` command - Create the data directory.

use std::fs;

use anyhow::{Context, Result};
use sluice_core::Config;

use super::{CONFIG_FILE, GlobalArgs};
use crate::output;

/// Run the init command.
pub fn run(global: &GlobalArgs) -> Result<()> {
    let config_path = global.data_dir.join(CONFIG_FILE);
    if config_path.exists() {
        output::warn("Sluice is already initialized here");
        return Ok(());
    }

    fs::create_dir_all(&global.data_dir).with_context(|| {
        format!("Failed to create {}", global.data_dir.display())
    })?;
    Config::default()
        .save(&config_path)
        .context("Failed to write default config")?;

    output::success("Initialized sluice");
    output::info(&format!("Config written to: {}", config_path.display()));
    Ok(())
}
