use std::fmt;

use serde::{Deserialize, Serialize};

/// The four agents of the review chain, in handoff order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Planner,
    Reviewer,
    Verifier,
    Reporter,
}

impl AgentRole {
    pub const ALL: [AgentRole; 4] = [
        AgentRole::Planner,
        AgentRole::Reviewer,
        AgentRole::Verifier,
        AgentRole::Reporter,
    ];

    /// Lowercase key used in config tables, file names and events
    pub fn key(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Reviewer => "reviewer",
            Self::Verifier => "verifier",
            Self::Reporter => "reporter",
        }
    }

    /// Agent name as registered on the platform
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Planner => "MergeGuard-Planner",
            Self::Reviewer => "MergeGuard-Reviewer",
            Self::Verifier => "MergeGuard-Verifier",
            Self::Reporter => "MergeGuard-Reporter",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Planner => "Analyzes PR diffs and creates a structured review plan.",
            Self::Reviewer => "Reviews code changes and produces detailed comments.",
            Self::Verifier => "Validates review comments using code execution.",
            Self::Reporter => "Aggregates findings into a structured review report.",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Planner | Self::Reporter => "mistral-large-latest",
            Self::Reviewer | Self::Verifier => "devstral-latest",
        }
    }

    pub fn default_temperature(&self) -> f32 {
        match self {
            Self::Planner => 0.2,
            Self::Reviewer => 0.3,
            Self::Verifier | Self::Reporter => 0.1,
        }
    }

    /// Next agent in the chain; `None` for the Reporter.
    pub fn next(&self) -> Option<AgentRole> {
        match self {
            Self::Planner => Some(Self::Reviewer),
            Self::Reviewer => Some(Self::Verifier),
            Self::Verifier => Some(Self::Reporter),
            Self::Reporter => None,
        }
    }

    pub fn prompt_file(&self) -> &'static str {
        match self {
            Self::Planner => "planner.md",
            Self::Reviewer => "reviewer.md",
            Self::Verifier => "verifier.md",
            Self::Reporter => "reporter.md",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Planner => f.write_str("Planner"),
            Self::Reviewer => f.write_str("Reviewer"),
            Self::Verifier => f.write_str("Verifier"),
            Self::Reporter => f.write_str("Reporter"),
        }
    }
}
