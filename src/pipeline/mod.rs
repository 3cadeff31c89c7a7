//! Drives the Planner → Reviewer → Verifier → Reporter chain.
//!
//! Two modes:
//! - server: one conversation with the Planner, handoffs executed by the
//!   platform; only function calls come back to us
//! - sequential: agents without handoffs, one conversation per stage, each
//!   fed with the previous stage's final text
//!
//! A failed server run falls back to sequential (when enabled) with a fresh
//! chain. Agents are torn down after every attempt.

mod event;

pub use event::{PipelineEvent, PipelineState};

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agents::types::{
    AppendConversationRequest, ConversationEntry, ConversationResponse, FunctionCall,
    HandoffExecution, InputEntry, StartConversationRequest, Usage,
};
use crate::agents::{
    build_chain, teardown_chain, AgentChain, AgentRole, AgentsApi, ApiError, PromptLoader,
};
use crate::config::{Config, HandoffMode};
use crate::diff::parse_unified_diff;
use crate::github::PrRef;
use crate::report::{parse_report, ReportError, ReviewReport};
use crate::session::{ReviewSession, ReviewStore};
use crate::text::truncate_str;
use crate::tools::{ToolExecutor, FETCH_PR_DIFF};

/// Tool arguments and results are cut to this many chars in events
const MAX_EVENT_TEXT: usize = 200;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("{stage} timed out after {secs} seconds")]
    Timeout { stage: String, secs: u64 },

    #[error("{stage} exceeded {max} tool-call rounds")]
    ToolLoopExceeded { stage: String, max: u32 },

    #[error("{0} produced no output")]
    EmptyStage(String),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("Review cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Whether a sequential re-run could succeed where the server chain failed.
    /// Cancellation and rejected credentials are final.
    pub fn allows_fallback(&self) -> bool {
        !matches!(
            self,
            PipelineError::Cancelled
                | PipelineError::Api(ApiError::InvalidApiKey)
                | PipelineError::Api(ApiError::Status {
                    status: 401 | 403,
                    ..
                })
        )
    }
}

#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    pub report: ReviewReport,
    /// Mode that produced the report
    pub mode: HandoffMode,
    /// False when the Verifier did not complete
    pub verified: bool,
    pub usage: Usage,
    /// Normalization corrections and location mismatches
    pub warnings: Vec<String>,
}

struct ModeOutput {
    report: ReviewReport,
    verified: bool,
}

/// Result of one conversation: its final text and the roles that spoke.
struct Turn {
    text: String,
    visited: Vec<AgentRole>,
}

pub struct Pipeline {
    api: Arc<dyn AgentsApi>,
    tools: Arc<dyn ToolExecutor>,
    config: Config,
    prompts: PromptLoader,
    events: mpsc::Sender<PipelineEvent>,
    cancel: CancellationToken,
    store: Option<ReviewStore>,
    session: Mutex<Option<ReviewSession>>,
}

impl Pipeline {
    pub fn new(
        api: Arc<dyn AgentsApi>,
        tools: Arc<dyn ToolExecutor>,
        config: Config,
        prompts: PromptLoader,
        events: mpsc::Sender<PipelineEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            tools,
            config,
            prompts,
            events,
            cancel,
            store: None,
            session: Mutex::new(None),
        }
    }

    /// Persist session state, stage outputs and the final report.
    pub fn with_store(mut self, store: ReviewStore) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn run(&self, pr: &PrRef) -> Result<ReviewOutcome, PipelineError> {
        let mode = self.config.pipeline.handoff_mode;
        self.begin_session(pr, mode);
        self.set_state(PipelineState::Initializing).await;
        info!(pr = %pr, %mode, "starting review");

        let mut usage = Usage::default();
        match self.run_with_fallback(pr, mode, &mut usage).await {
            Ok((output, used)) => Ok(self.finish(pr, output, used, usage).await),
            Err(e) => {
                let state = if matches!(e, PipelineError::Cancelled) {
                    PipelineState::Cancelled
                } else {
                    PipelineState::Failed
                };
                warn!(error = %e, "review failed");
                self.emit(PipelineEvent::Failed(e.to_string())).await;
                self.set_state(state).await;
                Err(e)
            }
        }
    }

    async fn run_with_fallback(
        &self,
        pr: &PrRef,
        mode: HandoffMode,
        usage: &mut Usage,
    ) -> Result<(ModeOutput, HandoffMode), PipelineError> {
        if mode == HandoffMode::Sequential {
            let output = self.run_mode(pr, mode, usage).await?;
            return Ok((output, mode));
        }

        match self.run_mode(pr, HandoffMode::Server, usage).await {
            Ok(output) => Ok((output, HandoffMode::Server)),
            Err(e) if self.config.pipeline.fallback_to_sequential && e.allows_fallback() => {
                warn!(error = %e, "server-side chain failed, falling back to sequential stages");
                self.log(format!(
                    "Server-side chain failed ({}), retrying stage by stage",
                    e
                ))
                .await;
                self.set_mode(HandoffMode::Sequential);
                self.set_state(PipelineState::FallingBack).await;
                let output = self.run_mode(pr, HandoffMode::Sequential, usage).await?;
                Ok((output, HandoffMode::Sequential))
            }
            Err(e) => Err(e),
        }
    }

    /// One attempt: create a chain, run it, tear it down.
    async fn run_mode(
        &self,
        pr: &PrRef,
        mode: HandoffMode,
        usage: &mut Usage,
    ) -> Result<ModeOutput, PipelineError> {
        self.set_state(PipelineState::CreatingAgents).await;
        let chain = build_chain(
            self.api.as_ref(),
            &self.config,
            &self.prompts,
            mode == HandoffMode::Server,
        )
        .await?;

        let result = if self.cancel.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            match mode {
                HandoffMode::Server => self.run_server(pr, &chain, usage).await,
                HandoffMode::Sequential => self.run_sequential(pr, &chain, usage).await,
            }
        };

        self.release(&chain).await;
        result
    }

    async fn run_server(
        &self,
        pr: &PrRef,
        chain: &AgentChain,
        usage: &mut Usage,
    ) -> Result<ModeOutput, PipelineError> {
        self.set_state(PipelineState::Reviewing).await;
        let secs = self.config.pipeline.stage_timeout_secs.saturating_mul(4);
        let stage = "Review chain";
        let entry = chain.entry_agent_id();

        self.emit(PipelineEvent::AgentStarted {
            role: AgentRole::Planner,
            agent_id: entry.to_string(),
        })
        .await;
        let input = self.prompts.load_request_prompt(pr);
        let turn = self
            .guarded(
                stage,
                secs,
                self.converse(chain, entry, input, HandoffExecution::Server, stage, usage),
            )
            .await?;

        let last_role = turn.visited.last().copied().unwrap_or(AgentRole::Reporter);
        self.record_stage(pr, last_role, &turn.text);

        let mut report = parse_report(&turn.text)?;
        let verified = turn.visited.contains(&AgentRole::Verifier);
        if !verified {
            warn!("chain finished without reaching the verifier");
            report.mark_unverified();
        }
        Ok(ModeOutput { report, verified })
    }

    async fn run_sequential(
        &self,
        pr: &PrRef,
        chain: &AgentChain,
        usage: &mut Usage,
    ) -> Result<ModeOutput, PipelineError> {
        self.set_state(PipelineState::Reviewing).await;
        let secs = self.config.pipeline.stage_timeout_secs;
        let mut previous: Option<(AgentRole, String)> = None;
        let mut note: Option<String> = None;
        let mut verified = true;

        for role in AgentRole::ALL {
            if role == AgentRole::Reporter {
                self.set_state(PipelineState::Reporting).await;
            }
            let input = match &previous {
                None => self.prompts.load_request_prompt(pr),
                Some((prev_role, text)) => {
                    self.prompts
                        .load_stage_prompt(pr, *prev_role, text, note.as_deref())
                }
            };

            let agent_id = chain.id(role);
            let stage = role.to_string();
            self.emit(PipelineEvent::AgentStarted {
                role,
                agent_id: agent_id.to_string(),
            })
            .await;

            let result = self
                .guarded(
                    &stage,
                    secs,
                    self.converse(chain, agent_id, input, HandoffExecution::Client, &stage, usage),
                )
                .await;

            match result {
                Ok(turn) => {
                    self.record_stage(pr, role, &turn.text);
                    previous = Some((role, turn.text));
                }
                Err(e) if role == AgentRole::Verifier && !matches!(e, PipelineError::Cancelled) => {
                    warn!(error = %e, "verifier stage failed, findings will be unverified");
                    self.log(format!(
                        "Verifier failed ({}), continuing without verification",
                        e
                    ))
                    .await;
                    note = Some(format!(
                        "The Verifier stage failed ({}). Treat every finding below as unverified.",
                        e
                    ));
                    verified = false;
                }
                Err(e) => return Err(e),
            }
        }

        let (_, text) = previous.ok_or_else(|| PipelineError::EmptyStage("Reporter".into()))?;
        let mut report = parse_report(&text)?;
        if !verified {
            report.mark_unverified();
        }
        Ok(ModeOutput { report, verified })
    }

    /// Run one conversation to completion, answering every function call.
    async fn converse(
        &self,
        chain: &AgentChain,
        agent_id: &str,
        input: String,
        execution: HandoffExecution,
        stage: &str,
        usage: &mut Usage,
    ) -> Result<Turn, PipelineError> {
        let request = StartConversationRequest::new(agent_id, input, execution);
        let mut response = self.api.start_conversation(&request).await?;
        debug!(conversation_id = %response.conversation_id, stage, "conversation started");

        let mut current = chain.role_of(agent_id);
        let mut visited: Vec<AgentRole> = current.into_iter().collect();
        let mut last_text: Option<String> = None;
        let mut rounds: u32 = 0;

        loop {
            usage.add(&response.usage);
            current = self
                .follow_handoffs(chain, &response, current, &mut visited)
                .await;
            if let Some(text) = response.last_message() {
                last_text = Some(text);
            }

            let calls = response.function_calls();
            if calls.is_empty() {
                break;
            }
            let max = self.config.pipeline.max_tool_rounds;
            if rounds >= max {
                return Err(PipelineError::ToolLoopExceeded {
                    stage: stage.to_string(),
                    max,
                });
            }
            rounds += 1;

            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                let role = call
                    .agent_id
                    .as_deref()
                    .and_then(|id| chain.role_of(id))
                    .or(current);
                results.push(self.execute(role, call).await);
            }

            let append = AppendConversationRequest::function_results(results, execution);
            response = self
                .api
                .append_conversation(&response.conversation_id, &append)
                .await?;
        }

        let text = last_text.ok_or_else(|| PipelineError::EmptyStage(stage.to_string()))?;
        Ok(Turn { text, visited })
    }

    async fn execute(&self, role: Option<AgentRole>, call: FunctionCall) -> InputEntry {
        debug!(tool = %call.name, role = ?role, "tool call");
        self.emit(PipelineEvent::ToolCalled {
            role,
            name: call.name.clone(),
            arguments: truncate_str(&call.arguments, MAX_EVENT_TEXT),
        })
        .await;

        let output = self.tools.call(&call.name, &call.arguments).await;

        self.emit(PipelineEvent::ToolCompleted {
            name: call.name,
            is_error: output.is_error,
            summary: truncate_str(&output.content, MAX_EVENT_TEXT),
        })
        .await;
        InputEntry::FunctionResult {
            tool_call_id: call.tool_call_id,
            result: output.content,
        }
    }

    /// Emit events for server-side handoffs and return the active role.
    async fn follow_handoffs(
        &self,
        chain: &AgentChain,
        response: &ConversationResponse,
        mut current: Option<AgentRole>,
        visited: &mut Vec<AgentRole>,
    ) -> Option<AgentRole> {
        for entry in &response.outputs {
            let ConversationEntry::AgentHandoff {
                previous_agent_id,
                next_agent_id,
                ..
            } = entry
            else {
                continue;
            };
            let from = chain.role_of(previous_agent_id);
            let Some(to) = chain.role_of(next_agent_id) else {
                warn!(agent_id = %next_agent_id, "handoff to an agent outside the chain");
                continue;
            };
            debug!(from = ?from, to = %to, "handoff");

            self.emit(PipelineEvent::AgentHandoff { from, to }).await;
            self.emit(PipelineEvent::AgentStarted {
                role: to,
                agent_id: next_agent_id.clone(),
            })
            .await;
            if to == AgentRole::Reporter {
                self.set_state(PipelineState::Reporting).await;
            }
            if !visited.contains(&to) {
                visited.push(to);
            }
            current = Some(to);
        }
        current
    }

    async fn guarded<T>(
        &self,
        stage: &str,
        secs: u64,
        work: impl Future<Output = Result<T, PipelineError>>,
    ) -> Result<T, PipelineError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(PipelineError::Cancelled),
            result = tokio::time::timeout(Duration::from_secs(secs), work) => {
                result.unwrap_or_else(|_| Err(PipelineError::Timeout {
                    stage: stage.to_string(),
                    secs,
                }))
            }
        }
    }

    async fn release(&self, chain: &AgentChain) {
        if self.config.pipeline.keep_agents {
            let ids = chain
                .iter()
                .map(|(role, id)| format!("{}={}", role.key(), id))
                .collect::<Vec<_>>()
                .join(", ");
            info!(agents = %ids, "keeping agents");
            self.log(format!("Keeping agents: {}", ids)).await;
            return;
        }
        self.set_state(PipelineState::TearingDown).await;
        teardown_chain(self.api.as_ref(), chain).await;
    }

    async fn finish(
        &self,
        pr: &PrRef,
        output: ModeOutput,
        mode: HandoffMode,
        usage: Usage,
    ) -> ReviewOutcome {
        let ModeOutput {
            mut report,
            verified,
        } = output;

        let mut warnings = report.normalize();
        warnings.extend(self.check_locations(pr, &report).await);
        for warning in &warnings {
            warn!(warning = %warning, "report");
            self.log(warning.clone()).await;
        }

        for comment in &report.comments {
            self.emit(PipelineEvent::FindingDetected(comment.clone())).await;
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.write_report(pr, &report) {
                warn!(error = %e, "failed to store report");
            }
        }

        info!(
            recommendation = %report.recommendation,
            score = report.overall_score,
            issues = report.total_issues,
            total_tokens = usage.total_tokens,
            "review completed"
        );
        self.emit(PipelineEvent::Completed {
            mode,
            recommendation: report.recommendation,
            overall_score: report.overall_score,
            total_issues: report.total_issues,
            verified,
        })
        .await;
        self.set_state(PipelineState::Completed).await;

        ReviewOutcome {
            report,
            mode,
            verified,
            usage,
            warnings,
        }
    }

    /// Warn about comments pointing outside the PR's changed hunks.
    async fn check_locations(&self, pr: &PrRef, report: &ReviewReport) -> Vec<String> {
        if report.comments.is_empty() {
            return vec![];
        }
        let args = json!({
            "owner": pr.owner,
            "repo": pr.repo,
            "pr_number": pr.number,
        })
        .to_string();
        let diff = self.tools.call(FETCH_PR_DIFF, &args).await;
        if diff.is_error {
            debug!(error = %diff.content, "diff unavailable, skipping location check");
            return vec![];
        }
        if diff.content.contains("[diff truncated at") {
            debug!("diff truncated, skipping location check");
            return vec![];
        }
        report.check_against_diff(&parse_unified_diff(&diff.content))
    }

    async fn emit(&self, event: PipelineEvent) {
        // receiver gone means nobody is rendering progress
        let _ = self.events.send(event).await;
    }

    async fn log(&self, message: String) {
        self.emit(PipelineEvent::Log(message)).await;
    }

    async fn set_state(&self, state: PipelineState) {
        debug!(state = state.as_str(), "pipeline state");
        self.update_session(|session| session.update_state(state));
        self.emit(PipelineEvent::StateChanged(state)).await;
    }

    fn set_mode(&self, mode: HandoffMode) {
        self.update_session(|session| session.set_mode(mode));
    }

    fn begin_session(&self, pr: &PrRef, mode: HandoffMode) {
        let Some(store) = &self.store else { return };
        if let Err(e) = store.clear(pr) {
            warn!(error = %e, "failed to clear previous review");
        }
        if let Ok(mut guard) = self.session.lock() {
            *guard = Some(ReviewSession::new(pr, mode));
        }
    }

    fn update_session(&self, update: impl FnOnce(&mut ReviewSession)) {
        let Some(store) = &self.store else { return };
        let Ok(mut guard) = self.session.lock() else {
            return;
        };
        let Some(session) = guard.as_mut() else { return };
        update(session);
        if let Err(e) = store.write_session(session) {
            warn!(error = %e, "failed to persist review session");
        }
    }

    fn record_stage(&self, pr: &PrRef, role: AgentRole, text: &str) {
        let Some(store) = &self.store else { return };
        let index = AgentRole::ALL
            .iter()
            .position(|r| *r == role)
            .unwrap_or_default();
        if let Err(e) = store.write_stage(pr, index, role, text) {
            warn!(error = %e, role = role.key(), "failed to store stage output");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::fake::{call, handoff, message, response, server_error, FakeApi};
    use crate::agents::types::ConversationInputs;
    use crate::report::{Recommendation, Severity};
    use crate::tools::{ToolOutput, READ_FILE};
    use async_trait::async_trait;
    use tempfile::TempDir;

    const REPORT: &str = r#"{
        "summary": "One bug and one leak",
        "comments": [
            {"file": "src/lib.rs", "line": 2, "severity": "warning", "category": "correctness",
             "message": "off by one", "suggestion": "use <=", "verified": true},
            {"file": "src/other.rs", "line": null, "severity": "critical", "category": "security",
             "message": "token is logged", "verified": true}
        ],
        "overall_score": 70,
        "recommendation": "approve",
        "files_reviewed": 1,
        "total_issues": 1
    }"#;

    const DIFF: &str = "\
diff --git a/src/lib.rs b/src/lib.rs
index 1111111..2222222 100644
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1,2 +1,3 @@
 a
+b
 c
";

    #[derive(Default)]
    struct FakeTools {
        calls: Mutex<Vec<String>>,
    }

    impl FakeTools {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ToolExecutor for FakeTools {
        async fn call(&self, name: &str, _arguments: &str) -> ToolOutput {
            self.calls.lock().unwrap().push(name.to_string());
            match name {
                FETCH_PR_DIFF => ToolOutput::ok(DIFF),
                READ_FILE => ToolOutput::ok("fn main() {}"),
                other => ToolOutput::error(format!("Unknown tool: {}", other)),
            }
        }
    }

    struct Harness {
        api: Arc<FakeApi>,
        tools: Arc<FakeTools>,
        pipeline: Pipeline,
        events: mpsc::Receiver<PipelineEvent>,
        cancel: CancellationToken,
    }

    fn harness(api: FakeApi, config: Config) -> Harness {
        let api = Arc::new(api);
        let tools = Arc::new(FakeTools::default());
        let (tx, rx) = mpsc::channel(1024);
        let cancel = CancellationToken::new();
        let pipeline = Pipeline::new(
            api.clone(),
            tools.clone(),
            config,
            PromptLoader::embedded_only(),
            tx,
            cancel.clone(),
        );
        Harness {
            api,
            tools,
            pipeline,
            events: rx,
            cancel,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn pr() -> PrRef {
        PrRef::new("octo", "widgets", 7)
    }

    fn sequential_config() -> Config {
        let mut config = Config::default();
        config.pipeline.handoff_mode = HandoffMode::Sequential;
        config
    }

    fn input_text(request: &StartConversationRequest) -> &str {
        match &request.inputs {
            ConversationInputs::Text(text) => text,
            ConversationInputs::Entries(_) => panic!("expected text input"),
        }
    }

    fn server_script() -> Vec<Result<ConversationResponse, ApiError>> {
        vec![
            Ok(response(
                "conv_1",
                vec![call("c1", FETCH_PR_DIFF, r#"{"owner":"octo","repo":"widgets","pr_number":7}"#)],
            )),
            Ok(response(
                "conv_1",
                vec![
                    handoff("ag_1", "ag_2", "MergeGuard-Reviewer"),
                    call("c2", READ_FILE, r#"{"owner":"octo","repo":"widgets","path":"src/lib.rs"}"#),
                ],
            )),
            Ok(response(
                "conv_1",
                vec![
                    handoff("ag_2", "ag_3", "MergeGuard-Verifier"),
                    handoff("ag_3", "ag_4", "MergeGuard-Reporter"),
                    message(REPORT),
                ],
            )),
        ]
    }

    #[tokio::test]
    async fn test_server_mode_runs_whole_chain() {
        let mut h = harness(FakeApi::with_responses(server_script()), Config::default());
        let outcome = h.pipeline.run(&pr()).await.unwrap();

        assert_eq!(outcome.mode, HandoffMode::Server);
        assert!(outcome.verified);
        assert_eq!(outcome.usage.total_tokens, 45);

        let report = &outcome.report;
        assert_eq!(report.comments[0].severity, Severity::Critical);
        assert_eq!(report.total_issues, 2);
        assert_eq!(report.recommendation, Recommendation::RequestChanges);
        assert!(report.comments.iter().all(|c| c.verified));
        assert!(outcome
            .warnings
            .contains(&"src/other.rs is not part of this pull request".to_string()));
        assert_eq!(outcome.warnings.len(), 3);

        assert_eq!(h.tools.calls(), vec![FETCH_PR_DIFF, READ_FILE, FETCH_PR_DIFF]);

        let log = h.api.log();
        assert!(log.contains(&"handoffs ag_3 -> ag_4".to_string()));
        assert_eq!(&log[log.len() - 4..], ["delete ag_1", "delete ag_2", "delete ag_3", "delete ag_4"]);

        let appended = h.api.appended();
        assert_eq!(appended.len(), 2);
        match &appended[0].inputs {
            ConversationInputs::Entries(entries) => assert_eq!(
                entries[0],
                InputEntry::FunctionResult {
                    tool_call_id: "c1".into(),
                    result: DIFF.into()
                }
            ),
            ConversationInputs::Text(_) => panic!("expected function results"),
        }

        let events = drain(&mut h.events);
        assert!(events.contains(&PipelineEvent::AgentHandoff {
            from: Some(AgentRole::Verifier),
            to: AgentRole::Reporter
        }));
        assert!(events.contains(&PipelineEvent::ToolCalled {
            role: Some(AgentRole::Reviewer),
            name: READ_FILE.into(),
            arguments: r#"{"owner":"octo","repo":"widgets","path":"src/lib.rs"}"#.into(),
        }));
        let findings = events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::FindingDetected(_)))
            .count();
        assert_eq!(findings, 2);
        assert_eq!(
            events.last(),
            Some(&PipelineEvent::StateChanged(PipelineState::Completed))
        );
    }

    #[tokio::test]
    async fn test_server_failure_falls_back_to_sequential() {
        let api = FakeApi::with_responses(vec![
            Err(server_error("start_conversation")),
            Ok(response("conv_p", vec![message("plan")])),
            Ok(response("conv_r", vec![message("findings")])),
            Ok(response("conv_v", vec![message("verified findings")])),
            Ok(response("conv_x", vec![message(REPORT)])),
        ]);
        let mut h = harness(api, Config::default());
        let outcome = h.pipeline.run(&pr()).await.unwrap();

        assert_eq!(outcome.mode, HandoffMode::Sequential);
        assert!(outcome.verified);

        let log = h.api.log();
        let handoffs = log.iter().filter(|l| l.starts_with("handoffs")).count();
        assert_eq!(handoffs, 3);
        assert!(log.contains(&"delete ag_4".to_string()));
        assert!(log.contains(&"create MergeGuard-Planner".to_string()));
        assert_eq!(log.last().map(String::as_str), Some("delete ag_8"));

        let started = h.api.started();
        assert_eq!(started.len(), 5);
        assert_eq!(started[1].agent_id, "ag_5");
        assert_eq!(started[1].handoff_execution, HandoffExecution::Client);
        assert!(input_text(&started[3]).contains("findings"));

        let events = drain(&mut h.events);
        assert!(events.contains(&PipelineEvent::StateChanged(PipelineState::FallingBack)));
    }

    #[tokio::test]
    async fn test_no_fallback_when_disabled() {
        let mut config = Config::default();
        config.pipeline.fallback_to_sequential = false;
        let mut h = harness(
            FakeApi::with_responses(vec![Err(server_error("start_conversation"))]),
            config,
        );
        let err = h.pipeline.run(&pr()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Api(ApiError::Status { status: 500, .. })));

        let deletes = h.api.log().iter().filter(|l| l.starts_with("delete")).count();
        assert_eq!(deletes, 4);
        let events = drain(&mut h.events);
        assert_eq!(
            events.last(),
            Some(&PipelineEvent::StateChanged(PipelineState::Failed))
        );
    }

    #[tokio::test]
    async fn test_unauthorized_does_not_fall_back() {
        let api = FakeApi::with_responses(vec![Err(ApiError::Status {
            operation: "start_conversation",
            status: 401,
            body: "Unauthorized".into(),
        })]);
        let h = harness(api, Config::default());
        assert!(h.pipeline.run(&pr()).await.is_err());
        assert_eq!(h.api.started().len(), 1);
    }

    #[tokio::test]
    async fn test_verifier_failure_marks_report_unverified() {
        let api = FakeApi::with_responses(vec![
            Ok(response("conv_p", vec![message("plan")])),
            Ok(response("conv_r", vec![message("reviewer findings")])),
            Err(server_error("start_conversation")),
            Ok(response("conv_x", vec![message(REPORT)])),
        ]);
        let h = harness(api, sequential_config());
        let outcome = h.pipeline.run(&pr()).await.unwrap();

        assert!(!outcome.verified);
        assert!(outcome.report.comments.iter().all(|c| !c.verified));

        let started = h.api.started();
        let reporter_input = input_text(&started[3]);
        assert!(reporter_input.contains("reviewer findings"));
        assert!(reporter_input.contains("Note: The Verifier stage failed"));
    }

    #[tokio::test]
    async fn test_reporter_failure_is_fatal() {
        let api = FakeApi::with_responses(vec![
            Ok(response("conv_p", vec![message("plan")])),
            Ok(response("conv_r", vec![message("findings")])),
            Ok(response("conv_v", vec![message("verified")])),
            Ok(response("conv_x", vec![message("not a report")])),
        ]);
        let h = harness(api, sequential_config());
        let err = h.pipeline.run(&pr()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Report(_)));
    }

    #[tokio::test]
    async fn test_tool_loop_is_bounded() {
        let mut config = sequential_config();
        config.pipeline.max_tool_rounds = 1;
        let api = FakeApi::with_responses(vec![
            Ok(response("conv_p", vec![call("c1", FETCH_PR_DIFF, "{}")])),
            Ok(response("conv_p", vec![call("c2", FETCH_PR_DIFF, "{}")])),
        ]);
        let h = harness(api, config);
        let err = h.pipeline.run(&pr()).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ToolLoopExceeded { ref stage, max: 1 } if stage == "Planner"
        ));
    }

    #[tokio::test]
    async fn test_empty_stage_is_an_error() {
        let api = FakeApi::with_responses(vec![Ok(response("conv_p", vec![]))]);
        let h = harness(api, sequential_config());
        let err = h.pipeline.run(&pr()).await.unwrap_err();
        assert_eq!(err.to_string(), "Planner produced no output");
    }

    #[tokio::test]
    async fn test_stage_timeout() {
        let mut config = sequential_config();
        config.pipeline.stage_timeout_secs = 1;
        let api = FakeApi::default().with_delay(Duration::from_millis(1500));
        let h = harness(api, config);
        let err = h.pipeline.run(&pr()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { secs: 1, .. }));
        assert_eq!(err.to_string(), "Planner timed out after 1 seconds");
    }

    #[tokio::test]
    async fn test_cancellation_tears_down_agents() {
        let mut h = harness(FakeApi::default(), sequential_config());
        h.cancel.cancel();
        let err = h.pipeline.run(&pr()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert!(!err.allows_fallback());

        let deletes = h.api.log().iter().filter(|l| l.starts_with("delete")).count();
        assert_eq!(deletes, 4);
        let events = drain(&mut h.events);
        assert_eq!(
            events.last(),
            Some(&PipelineEvent::StateChanged(PipelineState::Cancelled))
        );
    }

    #[tokio::test]
    async fn test_keep_agents_skips_teardown() {
        let mut config = sequential_config();
        config.pipeline.keep_agents = true;
        let api = FakeApi::with_responses(vec![
            Ok(response("conv_p", vec![message("plan")])),
            Ok(response("conv_r", vec![message("findings")])),
            Ok(response("conv_v", vec![message("verified")])),
            Ok(response("conv_x", vec![message(REPORT)])),
        ]);
        let mut h = harness(api, config);
        h.pipeline.run(&pr()).await.unwrap();
        assert!(h.api.log().iter().all(|l| !l.starts_with("delete")));

        let events = drain(&mut h.events);
        assert!(events.contains(&PipelineEvent::Log(
            "Keeping agents: planner=ag_1, reviewer=ag_2, verifier=ag_3, reporter=ag_4".into()
        )));
    }

    #[tokio::test]
    async fn test_store_records_session_stages_and_report() {
        let tmp = TempDir::new().unwrap();
        let store = ReviewStore::at(tmp.path());
        let api = FakeApi::with_responses(vec![
            Ok(response("conv_p", vec![message("plan")])),
            Ok(response("conv_r", vec![message("findings")])),
            Ok(response("conv_v", vec![message("verified")])),
            Ok(response("conv_x", vec![message(REPORT)])),
        ]);
        let mut h = harness(api, sequential_config());
        h.pipeline = h.pipeline.with_store(store.clone());
        let outcome = h.pipeline.run(&pr()).await.unwrap();

        let session = store.read_session(&pr()).unwrap().unwrap();
        assert_eq!(session.state, PipelineState::Completed);
        assert_eq!(session.mode, HandoffMode::Sequential);
        assert_eq!(store.read_stages(&pr()).unwrap().len(), 4);
        assert_eq!(store.read_report(&pr()).unwrap(), Some(outcome.report));
    }

    #[test]
    fn test_allows_fallback() {
        assert!(PipelineError::EmptyStage("Planner".into()).allows_fallback());
        assert!(PipelineError::Timeout {
            stage: "Review chain".into(),
            secs: 1200
        }
        .allows_fallback());
        assert!(!PipelineError::Api(ApiError::InvalidApiKey).allows_fallback());
        assert!(!PipelineError::Api(ApiError::Status {
            operation: "start_conversation",
            status: 403,
            body: String::new()
        })
        .allows_fallback());
    }
}
