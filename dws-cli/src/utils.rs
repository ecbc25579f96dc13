use anyhow::{Context, Result};
use std::path::PathBuf;

pub fn get_default_config_path() -> Result<PathBuf> {
    let dir = dirs::config_dir().context("could not determine config directory")?;
    Ok(dir.join("dws").join("cli.toml"))
}
