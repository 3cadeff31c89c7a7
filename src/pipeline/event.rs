use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::agents::AgentRole;
use crate::config::HandoffMode;
use crate::report::{Recommendation, ReviewComment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Initializing,
    CreatingAgents,
    Reviewing,
    /// Server-side chain failed; re-running stage by stage
    FallingBack,
    Reporting,
    TearingDown,
    Completed,
    Failed,
    Cancelled,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Initializing => "initializing",
            PipelineState::CreatingAgents => "creating_agents",
            PipelineState::Reviewing => "reviewing",
            PipelineState::FallingBack => "falling_back",
            PipelineState::Reporting => "reporting",
            PipelineState::TearingDown => "tearing_down",
            PipelineState::Completed => "completed",
            PipelineState::Failed => "failed",
            PipelineState::Cancelled => "cancelled",
        }
    }
}

/// Progress of a review run, sent to whoever renders it.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StateChanged(PipelineState),
    AgentStarted {
        role: AgentRole,
        agent_id: String,
    },
    AgentHandoff {
        from: Option<AgentRole>,
        to: AgentRole,
    },
    ToolCalled {
        role: Option<AgentRole>,
        name: String,
        arguments: String,
    },
    ToolCompleted {
        name: String,
        is_error: bool,
        summary: String,
    },
    FindingDetected(ReviewComment),
    Log(String),
    Completed {
        mode: HandoffMode,
        recommendation: Recommendation,
        overall_score: u32,
        total_issues: u32,
        verified: bool,
    },
    Failed(String),
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::StateChanged(_) => "pipeline.state",
            PipelineEvent::AgentStarted { .. } => "agent.started",
            PipelineEvent::AgentHandoff { .. } => "agent.handoff",
            PipelineEvent::ToolCalled { .. } => "tool.called",
            PipelineEvent::ToolCompleted { .. } => "tool.completed",
            PipelineEvent::FindingDetected(_) => "finding.detected",
            PipelineEvent::Log(_) => "pipeline.log",
            PipelineEvent::Completed { .. } => "pipeline.completed",
            PipelineEvent::Failed(_) => "pipeline.failed",
        }
    }

    pub fn data(&self) -> Value {
        match self {
            PipelineEvent::StateChanged(state) => json!({ "state": state }),
            PipelineEvent::AgentStarted { role, agent_id } => {
                json!({ "role": role, "agent_id": agent_id })
            }
            PipelineEvent::AgentHandoff { from, to } => json!({ "from": from, "to": to }),
            PipelineEvent::ToolCalled {
                role,
                name,
                arguments,
            } => json!({ "role": role, "name": name, "arguments": arguments }),
            PipelineEvent::ToolCompleted {
                name,
                is_error,
                summary,
            } => json!({ "name": name, "is_error": is_error, "summary": summary }),
            PipelineEvent::FindingDetected(comment) => json!(comment),
            PipelineEvent::Log(message) => json!({ "message": message }),
            PipelineEvent::Completed {
                mode,
                recommendation,
                overall_score,
                total_issues,
                verified,
            } => json!({
                "mode": mode,
                "recommendation": recommendation,
                "overall_score": overall_score,
                "total_issues": total_issues,
                "verified": verified,
            }),
            PipelineEvent::Failed(error) => json!({ "error": error }),
        }
    }

    /// `{"event", "timestamp", "data"}` envelope.
    pub fn to_json(&self, timestamp: &str) -> Value {
        json!({
            "event": self.name(),
            "timestamp": timestamp,
            "data": self.data(),
        })
    }

    /// One NDJSON line stamped with the current time.
    pub fn to_json_line(&self) -> String {
        self.to_json(&chrono::Utc::now().to_rfc3339()).to_string()
    }
}
