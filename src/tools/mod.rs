//! Function tools exposed to the agents.
//!
//! Definitions are sent to the platform when an agent is created; calls come
//! back as `function.call` entries and are dispatched through a
//! [`ToolExecutor`].

mod executor;

pub use executor::{ToolBox, ToolError};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agents::AgentRole;

pub const FETCH_PR_DIFF: &str = "fetch_pr_diff";
pub const LIST_CHANGED_FILES: &str = "list_changed_files";
pub const READ_FILE: &str = "read_file";
pub const CHECK_STYLE: &str = "check_style";
pub const GET_FILE_CONTEXT: &str = "get_file_context";
pub const GET_PR_COMMENTS: &str = "get_pr_comments";

/// Tool entry in an agent definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolDefinition {
    Function { function: FunctionSpec },
    /// Platform-hosted sandbox, executed server side
    CodeInterpreter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    fn function<T: JsonSchema>(name: &str, description: &str) -> Self {
        Self::Function {
            function: FunctionSpec {
                name: name.to_string(),
                description: description.to_string(),
                parameters: parameters_for::<T>(),
            },
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Function { function } => &function.name,
            Self::CodeInterpreter => "code_interpreter",
        }
    }
}

/// Parameters schema for `T`, without the root `$schema`/`title` keys the
/// function-calling API does not expect.
pub fn parameters_for<T: JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    let mut value = serde_json::to_value(schema).unwrap_or_default();
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PrArgs {
    #[schemars(description = "GitHub repository owner (user or organization)")]
    pub owner: String,
    #[schemars(description = "GitHub repository name")]
    pub repo: String,
    #[schemars(description = "Pull request number")]
    pub pr_number: u64,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ReadFileArgs {
    #[schemars(description = "GitHub repository owner")]
    pub owner: String,
    #[schemars(description = "GitHub repository name")]
    pub repo: String,
    #[schemars(description = "File path relative to repository root")]
    pub path: String,
    #[serde(rename = "ref", default)]
    #[schemars(
        description = "Git ref (branch, tag, or SHA) to read from. Defaults to the default branch."
    )]
    pub git_ref: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CheckStyleArgs {
    #[schemars(description = "The code snippet to check")]
    pub code: String,
    #[serde(default)]
    #[schemars(
        description = "Programming language of the snippet (e.g., 'python', 'javascript', 'rust')"
    )]
    pub language: Option<String>,
    #[serde(default)]
    #[schemars(description = "Original filename (used to infer language if not specified)")]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetFileContextArgs {
    #[schemars(description = "GitHub repository owner")]
    pub owner: String,
    #[schemars(description = "GitHub repository name")]
    pub repo: String,
    #[schemars(description = "File path relative to repository root")]
    pub path: String,
    #[schemars(description = "1-based line number to center the window on")]
    pub line: u32,
    #[serde(default)]
    #[schemars(description = "Lines of context on each side (default: 20)")]
    pub radius: Option<u32>,
    #[serde(rename = "ref", default)]
    #[schemars(description = "Git ref (branch, tag, or SHA). Defaults to the default branch.")]
    pub git_ref: Option<String>,
}

/// Tools attached to each agent.
pub fn tools_for(role: AgentRole) -> Vec<ToolDefinition> {
    match role {
        AgentRole::Planner => vec![
            ToolDefinition::function::<PrArgs>(
                FETCH_PR_DIFF,
                "Fetch the unified diff for a GitHub pull request. Returns the raw diff text \
                 including all file changes, hunks, and context lines.",
            ),
            ToolDefinition::function::<PrArgs>(
                LIST_CHANGED_FILES,
                "List all files changed in a pull request with metadata: path, change type \
                 (added, modified, removed, renamed), additions, deletions and a patch excerpt.",
            ),
        ],
        AgentRole::Reviewer => vec![
            ToolDefinition::function::<ReadFileArgs>(
                READ_FILE,
                "Read the full content of a file from the repository. Use this to get \
                 surrounding context beyond what the diff shows.",
            ),
            ToolDefinition::function::<CheckStyleArgs>(
                CHECK_STYLE,
                "Run basic style and lint checks on a code snippet. Returns style violations \
                 with line numbers and descriptions.",
            ),
            ToolDefinition::function::<GetFileContextArgs>(
                GET_FILE_CONTEXT,
                "Read a numbered window of lines around a specific line of a file.",
            ),
            ToolDefinition::function::<PrArgs>(
                GET_PR_COMMENTS,
                "List existing review and discussion comments on the pull request, so \
                 findings already raised by humans or bots are not repeated.",
            ),
        ],
        AgentRole::Verifier => vec![ToolDefinition::CodeInterpreter],
        AgentRole::Reporter => Vec::new(),
    }
}

/// Result of one tool call, sent back to the conversation as `function.result`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    /// `{"error": "..."}` so the agent can read and react to the failure
    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            content: serde_json::json!({ "error": message.to_string() }).to_string(),
            is_error: true,
        }
    }
}

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute `name` with JSON-encoded `arguments`. Never fails; failures are
    /// reported inside the output.
    async fn call(&self, name: &str, arguments: &str) -> ToolOutput;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tools_per_role() {
        let names = |role| {
            tools_for(role)
                .iter()
                .map(|t| t.name().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(
            names(AgentRole::Planner),
            vec![FETCH_PR_DIFF, LIST_CHANGED_FILES]
        );
        assert_eq!(
            names(AgentRole::Reviewer),
            vec![READ_FILE, CHECK_STYLE, GET_FILE_CONTEXT, GET_PR_COMMENTS]
        );
        assert_eq!(names(AgentRole::Verifier), vec!["code_interpreter"]);
        assert!(tools_for(AgentRole::Reporter).is_empty());
    }

    #[test]
    fn test_function_definition_wire_shape() {
        let tools = tools_for(AgentRole::Planner);
        let value = serde_json::to_value(&tools[0]).unwrap();
        assert_eq!(value["type"], "function");
        assert_eq!(value["function"]["name"], "fetch_pr_diff");
        let params = &value["function"]["parameters"];
        assert_eq!(params["type"], "object");
        assert!(params.get("$schema").is_none());
        assert!(params.get("title").is_none());
        let required: Vec<&str> = params["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert_eq!(required.len(), 3);
        assert!(required.contains(&"pr_number"));
    }

    #[test]
    fn test_code_interpreter_wire_shape() {
        let value = serde_json::to_value(ToolDefinition::CodeInterpreter).unwrap();
        assert_eq!(value, serde_json::json!({"type": "code_interpreter"}));
    }

    #[test]
    fn test_read_file_ref_is_optional_and_renamed() {
        let params = parameters_for::<ReadFileArgs>();
        assert!(params["properties"].get("ref").is_some());
        let required = params["required"].as_array().unwrap();
        assert!(!required.iter().any(|v| v == "ref"));

        let args: ReadFileArgs =
            serde_json::from_str(r#"{"owner":"o","repo":"r","path":"a.rs","ref":"main"}"#)
                .unwrap();
        assert_eq!(args.git_ref.as_deref(), Some("main"));
    }

    #[test]
    fn test_tool_output_error_is_json() {
        let out = ToolOutput::error("GitHub API returned 404: Not Found");
        assert!(out.is_error);
        let value: Value = serde_json::from_str(&out.content).unwrap();
        assert_eq!(value["error"], "GitHub API returned 404: Not Found");
    }
}
