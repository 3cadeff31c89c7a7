use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use super::{
    CheckStyleArgs, GetFileContextArgs, PrArgs, ReadFileArgs, ToolExecutor, ToolOutput,
    CHECK_STYLE, FETCH_PR_DIFF, GET_FILE_CONTEXT, GET_PR_COMMENTS, LIST_CHANGED_FILES, READ_FILE,
};
use crate::github::{GitHubClient, GitHubError, DEFAULT_CONTEXT_RADIUS};
use crate::style::check_style;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {source}")]
    InvalidArguments {
        tool: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error("Failed to serialize tool result: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Executes the GitHub-backed and local tools.
pub struct ToolBox {
    github: GitHubClient,
}

fn parse_args<T: DeserializeOwned>(tool: &str, arguments: &str) -> Result<T, ToolError> {
    // some models send "" for argument-less calls
    let arguments = if arguments.trim().is_empty() {
        "{}"
    } else {
        arguments
    };
    serde_json::from_str(arguments).map_err(|source| ToolError::InvalidArguments {
        tool: tool.to_string(),
        source,
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, ToolError> {
    serde_json::to_string(value).map_err(ToolError::Serialize)
}

impl ToolBox {
    pub fn new(github: GitHubClient) -> Self {
        Self { github }
    }

    pub async fn dispatch(&self, name: &str, arguments: &str) -> Result<String, ToolError> {
        match name {
            FETCH_PR_DIFF => {
                let args: PrArgs = parse_args(name, arguments)?;
                Ok(self
                    .github
                    .fetch_pr_diff(&args.owner, &args.repo, args.pr_number)
                    .await?)
            }
            LIST_CHANGED_FILES => {
                let args: PrArgs = parse_args(name, arguments)?;
                let files = self
                    .github
                    .list_changed_files(&args.owner, &args.repo, args.pr_number)
                    .await?;
                to_json(&files)
            }
            READ_FILE => {
                let args: ReadFileArgs = parse_args(name, arguments)?;
                Ok(self
                    .github
                    .read_file(&args.owner, &args.repo, &args.path, args.git_ref.as_deref())
                    .await?)
            }
            GET_FILE_CONTEXT => {
                let args: GetFileContextArgs = parse_args(name, arguments)?;
                Ok(self
                    .github
                    .get_file_context(
                        &args.owner,
                        &args.repo,
                        &args.path,
                        args.git_ref.as_deref(),
                        args.line,
                        args.radius.unwrap_or(DEFAULT_CONTEXT_RADIUS),
                    )
                    .await?)
            }
            GET_PR_COMMENTS => {
                let args: PrArgs = parse_args(name, arguments)?;
                let comments = self
                    .github
                    .get_pr_comments(&args.owner, &args.repo, args.pr_number)
                    .await?;
                to_json(&comments)
            }
            CHECK_STYLE => {
                let args: CheckStyleArgs = parse_args(name, arguments)?;
                let report = check_style(
                    &args.code,
                    args.language.as_deref(),
                    args.filename.as_deref(),
                );
                to_json(&report)
            }
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}

#[async_trait]
impl ToolExecutor for ToolBox {
    async fn call(&self, name: &str, arguments: &str) -> ToolOutput {
        debug!(tool = name, "executing tool");
        match self.dispatch(name, arguments).await {
            Ok(content) => ToolOutput::ok(content),
            Err(e) => {
                warn!(tool = name, error = %e, "tool call failed");
                ToolOutput::error(e)
            }
        }
    }
}
