//! Agent loop: the model ↔ tool step loop.
//!
//! One step is one backend call. Each step sends the whole transcript plus
//! the tool definitions, appends the reply, runs every tool-use block in
//! arrival order and appends their results as one user turn. The run ends
//! when a submission tool has been called (after the whole turn is
//! processed), when a reply contains no tool use, or when the step budget
//! runs out.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info};

use toolloop_core::error::AgentError;
use toolloop_core::interrupt::Interrupt;
use toolloop_core::types::{
    Block, LlmResponse, LoopOutcome, StopReason, ToolResult, Turn, UsageInfo,
};
use toolloop_core::utils::truncate_string;
use toolloop_providers::traits::{LlmProvider, LlmRequestConfig};

use crate::conversation::Conversation;
use crate::invoker::{ToolInvoker, UnknownToolPolicy};
use crate::tools::registry::ToolRegistry;

/// Step budget when none is given.
pub const DEFAULT_MAX_STEPS: u32 = 5;

/// Longest payload echoed by verbose printing.
const VERBOSE_PREVIEW_LEN: usize = 500;

/// Everything known about a finished run.
#[derive(Clone, Debug)]
pub struct LoopReport {
    /// Caller-visible outcome.
    pub outcome: LoopOutcome,
    pub stop_reason: StopReason,
    /// Backend calls made.
    pub steps: u32,
    pub transcript: Vec<Turn>,
    /// Token totals over all steps that reported usage.
    pub usage: UsageInfo,
}

impl LoopReport {
    pub fn into_outcome(self) -> LoopOutcome {
        self.outcome
    }
}

// ─────────────────────────────────────────────
// AgentLoop
// ─────────────────────────────────────────────

pub struct AgentLoop {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    /// Passed through to the backend untouched.
    model: String,
    max_steps: u32,
    request_config: LlmRequestConfig,
    verbose: bool,
    interrupt: Interrupt,
    unknown_tool: UnknownToolPolicy,
}

impl AgentLoop {
    pub fn new(provider: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>, model: impl Into<String>) -> Self {
        Self {
            provider,
            tools,
            model: model.into(),
            max_steps: DEFAULT_MAX_STEPS,
            request_config: LlmRequestConfig::default(),
            verbose: false,
            interrupt: Interrupt::new(),
            unknown_tool: UnknownToolPolicy::default(),
        }
    }

    /// Set the step budget. Zero is treated as one.
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.request_config.max_tokens = max_tokens;
        self
    }

    /// Print the transcript to stdout as it grows. Does not affect control flow.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Use a shared interrupt, typically the one the tools were built with.
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn with_unknown_tool_policy(mut self, policy: UnknownToolPolicy) -> Self {
        self.unknown_tool = policy;
        self
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    /// Run the loop for one prompt.
    ///
    /// Transport failures, precondition failures and interrupts end the run
    /// with an error and no outcome.
    pub async fn run(&self, prompt: &str) -> Result<LoopReport, AgentError> {
        let mut conversation = Conversation::new(prompt);
        let definitions = self.tools.definitions();
        let invoker = ToolInvoker::new(&self.tools, self.interrupt.clone())
            .with_unknown_tool_policy(self.unknown_tool);
        let mut usage = UsageInfo::default();

        info!(
            provider = self.provider.display_name(),
            model = %self.model,
            max_steps = self.max_steps,
            tools = definitions.len(),
            "starting run"
        );
        if self.verbose {
            println!("[user] {prompt}");
        }

        for step in 1..=self.max_steps {
            self.interrupt.check()?;
            debug!(step, turns = conversation.len(), "calling model");

            let response = tokio::select! {
                biased;
                _ = self.interrupt.cancelled() => return Err(AgentError::Interrupted),
                response = self.provider.chat(
                    conversation.turns(),
                    &definitions,
                    &self.model,
                    &self.request_config,
                ) => response,
            };
            let response = response.map_err(|e| {
                error!(step, error = %e, "backend call failed");
                AgentError::from(e)
            })?;

            if let Some(step_usage) = response.usage {
                usage += step_usage;
            }
            if self.verbose {
                print_response(step, &response);
            }

            let calls = response.tool_calls();
            let text = if calls.is_empty() { response.text() } else { None };
            conversation.push_assistant(response.content)?;

            if calls.is_empty() {
                let text = text.unwrap_or_default();
                info!(step, text = %truncate_string(&text, VERBOSE_PREVIEW_LEN), "model replied without tool use");
                return Ok(report(
                    LoopOutcome::NotSubmitted,
                    StopReason::NaturalStop,
                    step,
                    conversation,
                    usage,
                ));
            }

            let mut results = Vec::with_capacity(calls.len());
            let mut submitted: Option<Value> = None;
            for call in &calls {
                let invocation = invoker.invoke(call).await?;
                debug!(step, tool = %call.name, id = %call.id, "tool finished");
                if self.verbose {
                    print_result(&call.name, &invocation.result);
                }
                if let Some(answer) = invocation.submitted {
                    submitted = Some(answer);
                }
                results.push(invocation.result);
            }
            conversation.push_tool_results(results)?;

            if let Some(answer) = submitted {
                info!(step, answer = %answer, "answer submitted");
                return Ok(report(
                    LoopOutcome::Submitted(answer),
                    StopReason::Submitted,
                    step,
                    conversation,
                    usage,
                ));
            }
        }

        info!(steps = self.max_steps, "step budget exhausted");
        Ok(report(
            LoopOutcome::NotSubmitted,
            StopReason::BudgetExhausted,
            self.max_steps,
            conversation,
            usage,
        ))
    }
}

/// Run one prompt and return only the caller-visible outcome.
pub async fn run_loop(
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    prompt: &str,
    max_steps: u32,
    model: &str,
    verbose: bool,
) -> Result<LoopOutcome, AgentError> {
    let report = AgentLoop::new(provider, tools, model)
        .with_max_steps(max_steps)
        .with_verbose(verbose)
        .run(prompt)
        .await?;
    Ok(report.into_outcome())
}

fn report(
    outcome: LoopOutcome,
    stop_reason: StopReason,
    steps: u32,
    conversation: Conversation,
    usage: UsageInfo,
) -> LoopReport {
    LoopReport {
        outcome,
        stop_reason,
        steps,
        transcript: conversation.into_turns(),
        usage,
    }
}

// ── Verbose printing ──

fn print_response(step: u32, response: &LlmResponse) {
    println!("── step {step} ──");
    for block in &response.content {
        match block {
            Block::Text { text } => println!("[assistant] {text}"),
            Block::ToolUse { name, input, .. } => {
                let input = truncate_string(&input.to_string(), VERBOSE_PREVIEW_LEN);
                println!("[tool_use] {name} {input}");
            }
        }
    }
}

fn print_result(name: &str, result: &ToolResult) {
    let payload = truncate_string(&result.payload.to_string(), VERBOSE_PREVIEW_LEN);
    println!("[tool_result] {name} {payload}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Map};
    use toolloop_core::error::{ProviderError, ToolError};
    use toolloop_core::schema::InputSchema;
    use toolloop_core::types::{ToolSpec, UserContent};

    use crate::tools::base::Tool;

    /// Replays canned replies; optionally repeats one reply forever.
    struct ScriptedProvider {
        script: Mutex<VecDeque<LlmResponse>>,
        repeat: Option<LlmResponse>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(script: Vec<LlmResponse>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                repeat: None,
                calls: AtomicUsize::new(0),
            })
        }

        fn repeating(response: LlmResponse) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(VecDeque::new()),
                repeat: Some(response),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn chat(
            &self,
            _turns: &[Turn],
            _tools: &[ToolSpec],
            _model: &str,
            _config: &LlmRequestConfig,
        ) -> Result<LlmResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(next) = self.script.lock().unwrap().pop_front() {
                return Ok(next);
            }
            self.repeat
                .clone()
                .ok_or_else(|| ProviderError::Request("script exhausted".into()))
        }

        fn display_name(&self) -> &str {
            "scripted"
        }
    }

    /// Never answers.
    struct StalledProvider;

    #[async_trait]
    impl LlmProvider for StalledProvider {
        async fn chat(
            &self,
            _turns: &[Turn],
            _tools: &[ToolSpec],
            _model: &str,
            _config: &LlmRequestConfig,
        ) -> Result<LlmResponse, ProviderError> {
            std::future::pending().await
        }

        fn display_name(&self) -> &str {
            "stalled"
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        async fn execute(&self, _args: &Map<String, Value>) -> Result<Value, ToolError> {
            Err(ToolError::failed("disk on fire"))
        }
    }

    struct InterruptingTool;

    #[async_trait]
    impl Tool for InterruptingTool {
        async fn execute(&self, _args: &Map<String, Value>) -> Result<Value, ToolError> {
            Err(ToolError::Interrupted)
        }
    }

    fn reply(blocks: Vec<Block>) -> LlmResponse {
        LlmResponse {
            content: blocks,
            stop_reason: Some("tool_use".into()),
            usage: Some(UsageInfo {
                input_tokens: 10,
                output_tokens: 5,
            }),
        }
    }

    fn expression(id: &str, code: &str) -> Block {
        Block::tool_use(id, "python_expression", json!({ "expression": code }))
    }

    fn submit(id: &str, answer: Value) -> Block {
        Block::tool_use(id, "submit_answer", json!({ "answer": answer }))
    }

    fn default_tools() -> Arc<ToolRegistry> {
        Arc::new(ToolRegistry::with_default_tools(Interrupt::new()).unwrap())
    }

    fn tool_results(turn: &Turn) -> &[ToolResult] {
        match turn {
            Turn::User {
                content: UserContent::ToolResults(results),
            } => results,
            other => panic!("expected tool results, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_budget_exhaustion_takes_exactly_b_steps() {
        for budget in 1..=4u32 {
            let provider = ScriptedProvider::repeating(reply(vec![expression("t1", "print(1)")]));
            let report = AgentLoop::new(provider.clone(), default_tools(), "m")
                .with_max_steps(budget)
                .run("loop forever")
                .await
                .unwrap();
            assert_eq!(report.outcome, LoopOutcome::NotSubmitted);
            assert_eq!(report.stop_reason, StopReason::BudgetExhausted);
            assert_eq!(report.steps, budget);
            assert_eq!(provider.calls(), budget as usize);
            assert_eq!(report.transcript.len(), 1 + 2 * budget as usize);
        }
    }

    #[tokio::test]
    async fn test_max_steps_three_transcript_length_seven() {
        let provider = ScriptedProvider::repeating(reply(vec![expression("t1", "print(2 + 2)")]));
        let outcome = run_loop(provider.clone(), default_tools(), "never submit", 3, "m", false)
            .await
            .unwrap();
        assert_eq!(outcome, LoopOutcome::NotSubmitted);
        assert_eq!(provider.calls(), 3);

        let report = AgentLoop::new(provider, default_tools(), "m")
            .with_max_steps(3)
            .run("never submit")
            .await
            .unwrap();
        assert_eq!(report.transcript.len(), 7);
    }

    #[tokio::test]
    async fn test_submission_at_step_k_stops_immediately() {
        for k in 1..=4usize {
            let mut script: Vec<LlmResponse> = (1..k)
                .map(|i| reply(vec![expression(&format!("e{i}"), "print(1)")]))
                .collect();
            script.push(reply(vec![submit("s", json!("done"))]));
            // Replies past step k must never be requested.
            script.push(reply(vec![expression("late", "print(0)")]));

            let provider = ScriptedProvider::new(script);
            let report = AgentLoop::new(provider.clone(), default_tools(), "m")
                .with_max_steps(6)
                .run("submit eventually")
                .await
                .unwrap();
            assert_eq!(report.outcome, LoopOutcome::Submitted(json!("done")));
            assert_eq!(report.stop_reason, StopReason::Submitted);
            assert_eq!(report.steps as usize, k);
            assert_eq!(provider.calls(), k);
            assert_eq!(report.transcript.len(), 1 + 2 * k);
        }
    }

    #[tokio::test]
    async fn test_tool_results_keep_request_order() {
        let provider = ScriptedProvider::new(vec![
            reply(vec![
                expression("t1", "print(1)"),
                Block::text("and"),
                expression("t2", "print(2)"),
                expression("t3", "print(3)"),
            ]),
            reply(vec![Block::text("done")]),
        ]);
        let report = AgentLoop::new(provider, default_tools(), "m")
            .run("three calls")
            .await
            .unwrap();

        let results = tool_results(&report.transcript[2]);
        let ids: Vec<&str> = results.iter().map(|r| r.tool_use_id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
        assert_eq!(results[1].payload["result"], "2\n");
        assert_eq!(report.stop_reason, StopReason::NaturalStop);
    }

    #[tokio::test]
    async fn test_no_tool_use_stops_after_one_step() {
        let provider = ScriptedProvider::new(vec![
            reply(vec![Block::text("The answer is 4.")]),
            reply(vec![expression("t1", "print(1)")]),
        ]);
        let report = AgentLoop::new(provider.clone(), default_tools(), "m")
            .run("what is 2+2?")
            .await
            .unwrap();
        assert_eq!(report.outcome, LoopOutcome::NotSubmitted);
        assert_eq!(report.stop_reason, StopReason::NaturalStop);
        assert_eq!(report.steps, 1);
        assert_eq!(report.transcript.len(), 2);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_end_to_end_eighty_nine() {
        let provider = ScriptedProvider::new(vec![
            reply(vec![expression("t1", "print((2**3 + 3**4) * 1)")]),
            reply(vec![submit("t2", json!(89))]),
        ]);
        let report = AgentLoop::new(provider, default_tools(), "m")
            .run("Compute (2^3 + 3^4) * 1")
            .await
            .unwrap();
        assert_eq!(report.outcome, LoopOutcome::Submitted(json!(89)));
        assert!(report.steps <= 2);
        let results = tool_results(&report.transcript[2]);
        assert_eq!(results[0].payload, json!({"result": "89\n", "error": null}));
    }

    #[tokio::test]
    async fn test_evaluator_error_is_reported_and_run_continues() {
        let provider = ScriptedProvider::new(vec![
            reply(vec![expression("t1", "print(1/0)")]),
            reply(vec![submit("t2", json!(0))]),
        ]);
        let report = AgentLoop::new(provider, default_tools(), "m")
            .run("divide")
            .await
            .unwrap();
        let results = tool_results(&report.transcript[2]);
        assert_eq!(results[0].payload["result"], Value::Null);
        assert!(results[0].payload["error"].as_str().unwrap().contains("division by zero"));
        assert!(report.outcome.is_submitted());
    }

    #[tokio::test]
    async fn test_handler_fault_continues_run() {
        let mut tools = ToolRegistry::with_default_tools(Interrupt::new()).unwrap();
        tools
            .register(ToolSpec::new("flaky", "", InputSchema::new()), Arc::new(FailingTool))
            .unwrap();

        let provider = ScriptedProvider::new(vec![
            reply(vec![
                Block::tool_use("t1", "flaky", json!({})),
                expression("t2", "print('still here')"),
            ]),
            reply(vec![Block::text("giving up")]),
        ]);
        let report = AgentLoop::new(provider, Arc::new(tools), "m")
            .run("try it")
            .await
            .unwrap();
        let results = tool_results(&report.transcript[2]);
        assert_eq!(results[0].payload, json!({"error": "disk on fire"}));
        assert_eq!(results[1].payload["result"], "still here\n");
        assert_eq!(report.steps, 2);
    }

    #[tokio::test]
    async fn test_interrupt_fault_aborts_run() {
        let mut tools = ToolRegistry::with_default_tools(Interrupt::new()).unwrap();
        tools
            .register(ToolSpec::new("halt", "", InputSchema::new()), Arc::new(InterruptingTool))
            .unwrap();

        let provider = ScriptedProvider::new(vec![
            reply(vec![Block::tool_use("t1", "halt", json!({})), submit("t2", json!(1))]),
            reply(vec![Block::text("unreachable")]),
        ]);
        let err = AgentLoop::new(provider.clone(), Arc::new(tools), "m")
            .run("stop")
            .await
            .unwrap_err();
        assert!(err.is_interrupt());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_raised_interrupt_prevents_backend_call() {
        let interrupt = Interrupt::new();
        interrupt.trigger();
        let provider = ScriptedProvider::new(vec![reply(vec![Block::text("hi")])]);
        let err = AgentLoop::new(provider.clone(), default_tools(), "m")
            .with_interrupt(interrupt)
            .run("p")
            .await
            .unwrap_err();
        assert!(err.is_interrupt());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_interrupt_cancels_pending_backend_call() {
        let interrupt = Interrupt::new();
        let trigger = interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.trigger();
        });

        let agent = AgentLoop::new(Arc::new(StalledProvider), default_tools(), "m")
            .with_interrupt(interrupt);
        let err = tokio::time::timeout(Duration::from_secs(5), agent.run("p"))
            .await
            .expect("interrupt should cancel the backend call")
            .unwrap_err();
        assert!(err.is_interrupt());
    }

    #[tokio::test]
    async fn test_transport_error_is_fatal() {
        let provider = ScriptedProvider::new(vec![]);
        let err = AgentLoop::new(provider.clone(), default_tools(), "m")
            .run("p")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Transport(_)));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_answer_is_fatal() {
        let provider = ScriptedProvider::new(vec![reply(vec![Block::tool_use(
            "t1",
            "submit_answer",
            json!({}),
        )])]);
        let err = AgentLoop::new(provider, default_tools(), "m")
            .run("p")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolPrecondition { tool, .. } if tool == "submit_answer"));
    }

    #[tokio::test]
    async fn test_unknown_tool_policies() {
        let script = || {
            vec![
                reply(vec![Block::tool_use("t1", "web_search", json!({"q": "x"}))]),
                reply(vec![Block::text("ok")]),
            ]
        };

        let report = AgentLoop::new(ScriptedProvider::new(script()), default_tools(), "m")
            .run("p")
            .await
            .unwrap();
        let results = tool_results(&report.transcript[2]);
        assert_eq!(results[0].payload, json!({"error": "Unknown tool: web_search"}));
        assert_eq!(report.stop_reason, StopReason::NaturalStop);

        let err = AgentLoop::new(ScriptedProvider::new(script()), default_tools(), "m")
            .with_unknown_tool_policy(UnknownToolPolicy::Abort)
            .run("p")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::UnknownTool(name) if name == "web_search"));
    }

    #[tokio::test]
    async fn test_whole_turn_processed_and_last_submission_wins() {
        let provider = ScriptedProvider::new(vec![reply(vec![
            submit("s1", json!("first")),
            expression("e1", "print('after')"),
            submit("s2", json!("second")),
        ])]);
        let report = AgentLoop::new(provider, default_tools(), "m")
            .run("p")
            .await
            .unwrap();
        assert_eq!(report.outcome, LoopOutcome::Submitted(json!("second")));
        let results = tool_results(&report.transcript[2]);
        assert_eq!(results.len(), 3);
        assert_eq!(results[1].payload["result"], "after\n");
    }

    #[tokio::test]
    async fn test_null_answer_counts_as_submission() {
        let provider = ScriptedProvider::new(vec![reply(vec![submit("s", Value::Null)])]);
        let report = AgentLoop::new(provider, default_tools(), "m")
            .run("p")
            .await
            .unwrap();
        assert_eq!(report.outcome, LoopOutcome::Submitted(Value::Null));
    }

    #[tokio::test]
    async fn test_verbose_does_not_change_outcome() {
        let script = || {
            vec![
                reply(vec![expression("t1", "print(6 * 7)")]),
                reply(vec![submit("t2", json!(42))]),
            ]
        };
        let quiet = run_loop(ScriptedProvider::new(script()), default_tools(), "p", 5, "m", false)
            .await
            .unwrap();
        let loud = run_loop(ScriptedProvider::new(script()), default_tools(), "p", 5, "m", true)
            .await
            .unwrap();
        assert_eq!(quiet, loud);
        assert_eq!(loud, LoopOutcome::Submitted(json!(42)));
    }

    #[tokio::test]
    async fn test_usage_accumulates_across_steps() {
        let provider = ScriptedProvider::repeating(reply(vec![expression("t1", "print(1)")]));
        let report = AgentLoop::new(provider, default_tools(), "m")
            .with_max_steps(3)
            .run("p")
            .await
            .unwrap();
        assert_eq!(
            report.usage,
            UsageInfo {
                input_tokens: 30,
                output_tokens: 15
            }
        );
    }

    #[tokio::test]
    async fn test_zero_step_budget_runs_once() {
        let provider = ScriptedProvider::repeating(reply(vec![expression("t1", "print(1)")]));
        let agent = AgentLoop::new(provider.clone(), default_tools(), "m").with_max_steps(0);
        assert_eq!(agent.max_steps(), 1);
        let report = agent.run("p").await.unwrap();
        assert_eq!(report.steps, 1);
        assert_eq!(provider.calls(), 1);
    }
}
