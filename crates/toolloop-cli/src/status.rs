//! `toolloop status`: show configuration and provider status.

use std::path::PathBuf;

use anyhow::Result;
use colored::Colorize;

use toolloop_core::config::{get_config_path, load_config};

/// Run the status command.
pub fn run(config_path: Option<PathBuf>) -> Result<()> {
    let config_path = config_path.unwrap_or_else(get_config_path);
    let config = load_config(Some(config_path.as_path()));

    println!();
    println!("{}", "toolloop status".cyan().bold());
    println!();

    println!(
        "  {:<14} {} {}",
        "Config:".bold(),
        config_path.display(),
        if config_path.exists() {
            "✓".green().to_string()
        } else {
            "(not found, using defaults)".red().to_string()
        }
    );
    println!("  {:<14} {}", "Model:".bold(), config.agent.model);
    println!(
        "  {:<14} {}",
        "Agent:".bold(),
        format!(
            "max_steps: {} | max_tokens: {} | verbose: {}",
            config.agent.max_steps, config.agent.max_tokens, config.agent.verbose
        )
        .dimmed()
    );
    println!(
        "  {:<14} {}",
        "Eval:".bold(),
        format!("runs: {} | max_steps: {}", config.eval.runs, config.eval.max_steps).dimmed()
    );

    println!();
    let key_status = if config.provider.is_configured() {
        format!("{} (key set)", "✓".green())
    } else {
        format!("{}", "· not configured".dimmed())
    };
    println!("  {:<14} {}", "Anthropic:".bold(), key_status);
    println!("  {:<14} {}", "API base:".bold(), config.provider.api_base);
    println!();

    Ok(())
}
