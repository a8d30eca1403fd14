//! Evaluation harness: run one case N times and measure the pass rate.
//!
//! Runs are strictly sequential and share nothing but the backend client and
//! the tool registry. A run that fails with a fatal error is recorded as
//! errored and counted as a failure; an interrupt aborts the whole
//! evaluation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use toolloop_agent::agent_loop::AgentLoop;
use toolloop_agent::tools::registry::ToolRegistry;
use toolloop_core::config::schema::Config;
use toolloop_core::error::AgentError;
use toolloop_core::interrupt::Interrupt;
use toolloop_providers::traits::LlmProvider;

use crate::normalize::normalize_outcome;
use crate::suite::EvalCase;

// ─────────────────────────────────────────────
// Report
// ─────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Passed,
    Failed,
    /// The run ended with a fatal error.
    Errored,
}

/// One run of one case.
#[derive(Clone, Debug, Serialize)]
pub struct RunRecord {
    /// 1-based.
    pub index: u32,
    pub status: RunStatus,
    /// Normalised answer, or the error message for errored runs.
    pub got: String,
    /// Steps taken; `None` for errored runs.
    pub steps: Option<u32>,
}

#[derive(Clone, Debug, Serialize)]
pub struct EvalReport {
    pub case: String,
    pub expected: String,
    pub runs: u32,
    pub passed: u32,
    /// Includes errored runs.
    pub failed: u32,
    pub errored: u32,
    pub records: Vec<RunRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl EvalReport {
    /// Percentage of passing runs; 0 when no runs were made.
    pub fn pass_rate(&self) -> f64 {
        if self.runs == 0 {
            0.0
        } else {
            f64::from(self.passed) / f64::from(self.runs) * 100.0
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

// ─────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────

pub struct Harness {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    model: String,
    max_steps: u32,
    max_tokens: u32,
    interrupt: Interrupt,
}

impl Harness {
    pub fn new(provider: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>, model: impl Into<String>) -> Self {
        let defaults = Config::default();
        Self {
            provider,
            tools,
            model: model.into(),
            max_steps: defaults.eval.max_steps,
            max_tokens: defaults.agent.max_tokens,
            interrupt: Interrupt::new(),
        }
    }

    /// Build from loaded config: model and token limit from `agent`, step
    /// budget from `eval`.
    pub fn from_config(provider: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>, config: &Config) -> Self {
        Self::new(provider, tools, config.agent.model.clone())
            .with_max_steps(config.eval.max_steps)
            .with_max_tokens(config.agent.max_tokens)
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Run `case` `runs` times.
    pub async fn evaluate(&self, case: &EvalCase, runs: u32) -> Result<EvalReport, AgentError> {
        self.evaluate_with(case, runs, |_| {}).await
    }

    /// Like [`evaluate`](Self::evaluate), calling `on_run` after every run.
    pub async fn evaluate_with<F>(
        &self,
        case: &EvalCase,
        runs: u32,
        mut on_run: F,
    ) -> Result<EvalReport, AgentError>
    where
        F: FnMut(&RunRecord),
    {
        let started_at = Utc::now();
        let agent = AgentLoop::new(self.provider.clone(), self.tools.clone(), self.model.clone())
            .with_max_steps(self.max_steps)
            .with_max_tokens(self.max_tokens)
            .with_verbose(false)
            .with_interrupt(self.interrupt.clone());

        info!(case = %case.name, runs, max_steps = self.max_steps, "starting evaluation");

        let mut records = Vec::with_capacity(runs as usize);
        for index in 1..=runs {
            let record = match agent.run(&case.prompt).await {
                Ok(report) => {
                    let got = normalize_outcome(&report.outcome);
                    let status = if got == case.expected {
                        RunStatus::Passed
                    } else {
                        RunStatus::Failed
                    };
                    RunRecord {
                        index,
                        status,
                        got,
                        steps: Some(report.steps),
                    }
                }
                Err(e) if e.is_interrupt() => {
                    warn!(case = %case.name, run = index, "evaluation interrupted");
                    return Err(e);
                }
                Err(e) => {
                    warn!(case = %case.name, run = index, error = %e, "run failed");
                    RunRecord {
                        index,
                        status: RunStatus::Errored,
                        got: e.to_string(),
                        steps: None,
                    }
                }
            };
            on_run(&record);
            records.push(record);
        }

        let count = |status: RunStatus| records.iter().filter(|r| r.status == status).count() as u32;
        let passed = count(RunStatus::Passed);
        let errored = count(RunStatus::Errored);
        let report = EvalReport {
            case: case.name.clone(),
            expected: case.expected.clone(),
            runs,
            passed,
            failed: runs - passed,
            errored,
            records,
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            case = %report.case,
            passed = report.passed,
            failed = report.failed,
            errored = report.errored,
            pass_rate = report.pass_rate(),
            "evaluation finished"
        );
        Ok(report)
    }
}
