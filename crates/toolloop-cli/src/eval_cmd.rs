//! `toolloop eval` and `toolloop cases`: the pass-rate harness from the CLI.

use anyhow::{bail, Context, Result};
use colored::Colorize;

use toolloop_core::config::Config;
use toolloop_core::interrupt::Interrupt;
use toolloop_core::utils::truncate_string;
use toolloop_eval::{builtin_cases, find_case, EvalCase, EvalReport, Harness, RunRecord, RunStatus};

/// Run one case, or the whole suite.
pub async fn run(config: &Config, case: Option<&str>, runs: Option<u32>) -> Result<()> {
    let cases = select_cases(case)?;
    let runs = runs.unwrap_or(config.eval.runs);

    let interrupt = Interrupt::new();
    crate::helpers::trigger_on_ctrl_c(interrupt.clone());

    let provider = crate::build_provider(config)?;
    let tools = crate::build_tools(&interrupt)?;
    let harness = Harness::from_config(provider, tools, config).with_interrupt(interrupt);

    let mut reports = Vec::with_capacity(cases.len());
    for case in &cases {
        println!();
        println!("{} {} ({} runs)", "▶".cyan(), case.name.bold(), runs);
        println!("{}", "─".repeat(60).dimmed());

        let report = harness
            .evaluate_with(case, runs, |record| print_run(record, runs, &case.expected))
            .await
            .with_context(|| format!("evaluation of '{}' aborted", case.name))?;

        print_summary(&report);
        reports.push(report);
    }

    if reports.len() > 1 {
        print_overview(&reports);
    }
    Ok(())
}

/// `toolloop cases`.
pub fn list_cases() -> Result<()> {
    println!();
    println!("{}", "Built-in evaluation cases".cyan().bold());
    println!();
    for case in builtin_cases() {
        let first_line = case.prompt.lines().next().unwrap_or_default();
        println!(
            "  {:<24} {}",
            case.name.bold(),
            truncate_string(first_line, 60).dimmed()
        );
        println!("  {:<24} expects {}", "", case.expected.green());
    }
    println!();
    Ok(())
}

fn select_cases(name: Option<&str>) -> Result<Vec<EvalCase>> {
    match name {
        None => Ok(builtin_cases()),
        Some(name) => match find_case(name) {
            Some(case) => Ok(vec![case]),
            None => {
                let known: Vec<String> = builtin_cases().into_iter().map(|c| c.name).collect();
                bail!("unknown case '{name}' (known: {})", known.join(", "))
            }
        },
    }
}

fn print_run(record: &RunRecord, runs: u32, expected: &str) {
    let got = truncate_string(&record.got, 120);
    match record.status {
        RunStatus::Passed => println!(
            "{} Run {}/{}: SUCCESS - Got {}",
            "✓".green(),
            record.index,
            runs,
            got
        ),
        RunStatus::Failed => println!(
            "{} Run {}/{}: FAILURE - Got {}, expected {}",
            "✗".red(),
            record.index,
            runs,
            got,
            expected
        ),
        RunStatus::Errored => println!(
            "{} Run {}/{}: ERROR - {}",
            "✗".red().bold(),
            record.index,
            runs,
            got
        ),
    }
}

fn print_summary(report: &EvalReport) {
    println!("{}", "─".repeat(60).dimmed());
    println!("Test Results:");
    println!("  Passed:    {}/{}", report.passed, report.runs);
    println!("  Failed:    {}/{}", report.failed, report.runs);
    if report.errored > 0 {
        println!("  Errored:   {}/{}", report.errored, report.runs);
    }
    println!("  Pass Rate: {}", format_rate(report.pass_rate()));
    println!(
        "  Duration:  {:.1}s",
        report.duration().num_milliseconds() as f64 / 1000.0
    );
}

fn print_overview(reports: &[EvalReport]) {
    println!();
    println!("{}", "Summary".cyan().bold());
    for report in reports {
        println!(
            "  {:<24} {:>3}/{:<3} {}",
            report.case,
            report.passed,
            report.runs,
            format_rate(report.pass_rate())
        );
    }
    println!();
}

fn format_rate(rate: f64) -> String {
    let text = format!("{rate:.1}%");
    if rate >= 80.0 {
        text.green().to_string()
    } else if rate >= 50.0 {
        text.yellow().to_string()
    } else {
        text.red().to_string()
    }
}
