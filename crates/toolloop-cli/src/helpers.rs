//! Shared CLI helpers: path expansion, Ctrl-C wiring, outcome printing.

use std::path::PathBuf;

use colored::Colorize;

use toolloop_agent::LoopReport;
use toolloop_core::interrupt::Interrupt;
use toolloop_core::types::{LoopOutcome, StopReason};
use toolloop_eval::normalize_answer;

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    let rest = match path {
        "~" => "",
        p => match p.strip_prefix("~/") {
            Some(rest) => rest,
            None => return PathBuf::from(p),
        },
    };
    match dirs_next::home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => PathBuf::from(path),
    }
}

/// Raise `interrupt` when the user presses Ctrl-C.
pub fn trigger_on_ctrl_c(interrupt: Interrupt) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{}", "interrupted".yellow());
            interrupt.trigger();
        }
    });
}

/// One-line label for a stop reason.
pub fn stop_label(reason: StopReason) -> colored::ColoredString {
    match reason {
        StopReason::Submitted => reason.to_string().green(),
        StopReason::NaturalStop => reason.to_string().yellow(),
        StopReason::BudgetExhausted => reason.to_string().red(),
    }
}

/// Print the result of a single run.
pub fn print_report(report: &LoopReport) {
    println!();
    match &report.outcome {
        LoopOutcome::Submitted(answer) => {
            println!("{} {}", "Answer:".cyan().bold(), normalize_answer(answer));
        }
        LoopOutcome::NotSubmitted => {
            println!("{}", "No answer submitted".dimmed());
        }
    }
    println!(
        "  {} after {} step(s), {} in / {} out tokens",
        stop_label(report.stop_reason),
        report.steps,
        report.usage.input_tokens,
        report.usage.output_tokens,
    );
    println!();
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_tilde_home() {
        let result = expand_tilde("~/.toolloop/config.json");
        assert!(result.ends_with(".toolloop/config.json"));
        assert!(!result.starts_with("~"));
    }

    #[test]
    fn expand_tilde_bare() {
        let result = expand_tilde("~");
        assert!(!result.to_string_lossy().contains('~'));
    }

    #[test]
    fn expand_tilde_untouched() {
        assert_eq!(expand_tilde("/etc/toolloop.json"), PathBuf::from("/etc/toolloop.json"));
        assert_eq!(expand_tilde("rel/~/x"), PathBuf::from("rel/~/x"));
    }

    #[test]
    fn stop_labels_render() {
        colored::control::set_override(false);
        assert_eq!(stop_label(StopReason::NaturalStop).to_string(), "natural stop");
        assert_eq!(stop_label(StopReason::BudgetExhausted).to_string(), "budget exhausted");
    }
}
