//! `toolloop init`: write a default config file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;

use toolloop_core::config::{get_config_path, load_config, save_config};

/// Run the init command.
pub fn run(config_path: Option<PathBuf>, force: bool) -> Result<()> {
    let config_path = config_path.unwrap_or_else(get_config_path);

    println!();
    println!("{}", "toolloop setup".cyan().bold());
    println!();

    if write_config(&config_path, force)? {
        println!("  {} created config at {}", "✓".green(), config_path.display());
    } else {
        println!(
            "  {} config already exists at {} (use --force to overwrite)",
            "✓".green(),
            config_path.display()
        );
    }
    println!();
    Ok(())
}

/// Write the effective config to `path`. An existing file is re-read first,
/// so `--force` keeps its values and fills in missing fields.
/// Returns `false` when a file exists and `force` is not set.
fn write_config(path: &Path, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    let config = load_config(Some(path));
    save_config(&config, Some(path))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}
