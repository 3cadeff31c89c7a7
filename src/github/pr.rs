use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::client::{GitHubClient, GitHubError, DIFF_MEDIA_TYPE, RAW_MEDIA_TYPE};
use crate::text::{truncate_str, truncate_with_notice};

/// Diffs beyond this are cut before they reach the agent
pub const MAX_DIFF_CHARS: usize = 120_000;
pub const MAX_FILE_CHARS: usize = 80_000;
pub const MAX_PATCH_EXCERPT: usize = 500;
pub const DEFAULT_CONTEXT_RADIUS: u32 = 20;

static PR_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"github\.com/([^/]+)/([^/]+)/pull/(\d+)").expect("PR URL pattern is valid")
});

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid GitHub PR URL: {0}")]
pub struct PrRefError(pub String);

/// A pull request identified by owner, repository and number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrRef {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl PrRef {
    pub fn new(owner: &str, repo: &str, number: u64) -> Self {
        Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            number,
        }
    }

    /// `owner/repo`
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    pub fn html_url(&self) -> String {
        format!(
            "https://github.com/{}/{}/pull/{}",
            self.owner, self.repo, self.number
        )
    }
}

impl FromStr for PrRef {
    type Err = PrRefError;

    /// Accepts any string containing `github.com/{owner}/{repo}/pull/{n}`,
    /// so links to `/files` or `/commits` tabs work too.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = PR_URL_RE
            .captures(s)
            .ok_or_else(|| PrRefError(s.to_string()))?;
        let number = caps[3]
            .parse()
            .map_err(|_| PrRefError(s.to_string()))?;
        Ok(Self::new(&caps[1], &caps[2], number))
    }
}

impl fmt::Display for PrRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub filename: String,
    pub status: String,
    pub additions: u32,
    pub deletions: u32,
    pub changes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
}

impl GitHubClient {
    /// Unified diff of a pull request, truncated to [`MAX_DIFF_CHARS`].
    pub async fn fetch_pr_diff(
        &self,
        owner: &str,
        repo: &str,
        pr_number: u64,
    ) -> Result<String, GitHubError> {
        let endpoint = format!("repos/{}/{}/pulls/{}", owner, repo, pr_number);
        let diff = self.get_text(&endpoint, DIFF_MEDIA_TYPE, &[]).await?;
        Ok(truncate_with_notice(&diff, MAX_DIFF_CHARS, "diff"))
    }

    /// Changed files with per-file stats and a short patch excerpt.
    pub async fn list_changed_files(
        &self,
        owner: &str,
        repo: &str,
        pr_number: u64,
    ) -> Result<Vec<ChangedFile>, GitHubError> {
        let endpoint = format!("repos/{}/{}/pulls/{}/files", owner, repo, pr_number);
        let mut files: Vec<ChangedFile> = self.get_json(&endpoint, &[("per_page", "100")]).await?;
        for file in &mut files {
            if let Some(patch) = file.patch.take() {
                file.patch = Some(truncate_str(&patch, MAX_PATCH_EXCERPT));
            }
        }
        Ok(files)
    }

    async fn read_file_raw(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<String, GitHubError> {
        let endpoint = format!(
            "repos/{}/{}/contents/{}",
            owner,
            repo,
            path.trim_start_matches('/')
        );
        let query: Vec<(&str, &str)> = git_ref.map(|r| ("ref", r)).into_iter().collect();
        self.get_text(&endpoint, RAW_MEDIA_TYPE, &query).await
    }

    /// Full file content at `git_ref` (default branch when `None`).
    pub async fn read_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<String, GitHubError> {
        let content = self.read_file_raw(owner, repo, path, git_ref).await?;
        Ok(truncate_with_notice(&content, MAX_FILE_CHARS, "file"))
    }

    /// Numbered window of `radius` lines around `line`.
    pub async fn get_file_context(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: Option<&str>,
        line: u32,
        radius: u32,
    ) -> Result<String, GitHubError> {
        let content = self.read_file_raw(owner, repo, path, git_ref).await?;
        file_context(&content, path, line, radius)
    }
}

/// Render lines `line-radius ..= line+radius` (1-based, clamped) with a
/// `>` marker on the focus line.
pub fn file_context(
    content: &str,
    path: &str,
    line: u32,
    radius: u32,
) -> Result<String, GitHubError> {
    let lines: Vec<&str> = content.lines().collect();
    let total = lines.len();
    let focus = line as usize;
    if focus == 0 || focus > total {
        return Err(GitHubError::LineOutOfRange {
            path: path.to_string(),
            line,
            total,
        });
    }

    let start = focus.saturating_sub(radius as usize).max(1);
    let end = (focus + radius as usize).min(total);
    let width = end.to_string().len();

    let mut out = format!("{} (lines {}-{} of {})\n", path, start, end, total);
    for n in start..=end {
        let marker = if n == focus { '>' } else { ' ' };
        out.push_str(&format!("{}{:>width$} | {}\n", marker, n, lines[n - 1], width = width));
    }
    Ok(out)
}
