//! toolloop CLI: entry point.
//!
//! # Commands
//!
//! - `toolloop run <PROMPT>`: one agent run, prints the outcome
//! - `toolloop eval [--case NAME] [--runs N]`: pass-rate evaluation
//! - `toolloop cases`: list built-in evaluation cases
//! - `toolloop status`: show configuration and key status
//! - `toolloop init [--force]`: write a default config file

mod eval_cmd;
mod helpers;
mod init;
mod status;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use toolloop_agent::{AgentLoop, ToolRegistry};
use toolloop_core::config::{load_config, Config};
use toolloop_core::interrupt::Interrupt;
use toolloop_providers::{create_provider, LlmProvider};

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// toolloop: a minimal tool-calling agent loop with a pass-rate harness
#[derive(Parser)]
#[command(name = "toolloop", version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.toolloop/config.json)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent loop once on a prompt
    Run {
        /// The prompt sent as the first user turn
        prompt: String,

        /// Step budget (default: agent.maxSteps from config)
        #[arg(long)]
        max_steps: Option<u32>,

        /// Model identifier (default: agent.model from config)
        #[arg(long)]
        model: Option<String>,

        /// Do not print the transcript while running
        #[arg(short, long, default_value_t = false)]
        quiet: bool,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Run the built-in evaluation suite
    Eval {
        /// Only run the named case
        #[arg(long)]
        case: Option<String>,

        /// Runs per case (default: eval.runs from config)
        #[arg(long)]
        runs: Option<u32>,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// List built-in evaluation cases
    Cases,

    /// Show configuration and provider status
    Status,

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref().map(helpers::expand_tilde);

    match cli.command {
        Commands::Run {
            prompt,
            max_steps,
            model,
            quiet,
            logs,
        } => {
            init_logging(logs);
            let config = load_config(config_path.as_deref());
            run_prompt(&config, &prompt, max_steps, model, quiet).await
        }
        Commands::Eval { case, runs, logs } => {
            init_logging(logs);
            let config = load_config(config_path.as_deref());
            eval_cmd::run(&config, case.as_deref(), runs).await
        }
        Commands::Cases => eval_cmd::list_cases(),
        Commands::Status => status::run(config_path),
        Commands::Init { force } => init::run(config_path, force),
    }
}

// ─────────────────────────────────────────────
// Run command
// ─────────────────────────────────────────────

async fn run_prompt(
    config: &Config,
    prompt: &str,
    max_steps: Option<u32>,
    model: Option<String>,
    quiet: bool,
) -> Result<()> {
    let interrupt = Interrupt::new();
    helpers::trigger_on_ctrl_c(interrupt.clone());

    let provider = build_provider(config)?;
    let tools = build_tools(&interrupt)?;
    let model = model.unwrap_or_else(|| config.agent.model.clone());

    info!(model = %model, "running single prompt");
    let agent = AgentLoop::new(provider, tools, model)
        .with_max_steps(max_steps.unwrap_or(config.agent.max_steps))
        .with_max_tokens(config.agent.max_tokens)
        .with_verbose(config.agent.verbose && !quiet)
        .with_interrupt(interrupt);

    let report = agent.run(prompt).await.context("agent run failed")?;
    helpers::print_report(&report);
    Ok(())
}

/// The process-wide backend client.
pub fn build_provider(config: &Config) -> Result<Arc<dyn LlmProvider>> {
    let provider = create_provider(&config.provider).context("failed to create model provider")?;
    Ok(Arc::new(provider))
}

/// The fixed tool set, wired to `interrupt`.
pub fn build_tools(interrupt: &Interrupt) -> Result<Arc<ToolRegistry>> {
    let tools = ToolRegistry::with_default_tools(interrupt.clone())
        .context("failed to register tools")?;
    Ok(Arc::new(tools))
}

/// Initialize tracing/logging.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("toolloop=debug,info")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "toolloop",
            "run",
            "what is 2+2?",
            "--max-steps",
            "3",
            "--quiet",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                prompt,
                max_steps,
                model,
                quiet,
                logs,
            } => {
                assert_eq!(prompt, "what is 2+2?");
                assert_eq!(max_steps, Some(3));
                assert!(model.is_none());
                assert!(quiet);
                assert!(!logs);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_eval_with_global_config() {
        let cli = Cli::try_parse_from([
            "toolloop",
            "eval",
            "--case",
            "arithmetic",
            "--runs",
            "2",
            "--config",
            "/tmp/c.json",
        ])
        .unwrap();
        assert_eq!(cli.config.as_deref(), Some("/tmp/c.json"));
        assert!(matches!(
            cli.command,
            Commands::Eval { case: Some(ref c), runs: Some(2), .. } if c == "arithmetic"
        ));
    }

    #[test]
    fn test_run_requires_prompt() {
        assert!(Cli::try_parse_from(["toolloop", "run"]).is_err());
    }

    #[test]
    fn test_parse_init() {
        let cli = Cli::try_parse_from(["toolloop", "init", "--force"]).unwrap();
        assert!(matches!(cli.command, Commands::Init { force: true }));
    }

    #[test]
    fn test_build_tools() {
        let tools = build_tools(&Interrupt::new()).unwrap();
        assert_eq!(tools.names(), vec!["python_expression", "submit_answer"]);
    }

    #[test]
    fn test_build_provider_needs_key() {
        let config = Config::default();
        assert!(build_provider(&config).is_err());
    }
}
