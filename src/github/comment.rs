use serde::{Deserialize, Serialize};

use super::client::{GitHubClient, GitHubError};
use crate::text::truncate_str;

/// Bot suffixes to identify bot users
const BOT_SUFFIXES: &[&str] = &["[bot]"];
/// Exact bot user names
const BOT_EXACT_MATCHES: &[&str] = &["github-actions", "dependabot"];
/// Comment bodies handed to the agent are capped at this many chars
const MAX_COMMENT_BODY: usize = 500;
/// Only the most recent comments are kept
const MAX_COMMENTS: usize = 50;

#[derive(Debug, Clone, Deserialize)]
struct User {
    login: String,
}

/// Inline comment on the diff (`/pulls/{n}/comments`)
#[derive(Debug, Deserialize)]
struct RawReviewComment {
    user: Option<User>,
    body: String,
    path: Option<String>,
    line: Option<u32>,
    created_at: String,
}

/// Conversation-tab comment (`/issues/{n}/comments`)
#[derive(Debug, Deserialize)]
struct RawDiscussionComment {
    user: Option<User>,
    body: String,
    created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentKind {
    Review,
    Discussion,
}

/// Existing PR comment as presented to the Reviewer agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrComment {
    pub kind: CommentKind,
    pub author: String,
    pub is_bot: bool,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub created_at: String,
}

pub fn is_bot_user(login: &str) -> bool {
    BOT_SUFFIXES.iter().any(|suffix| login.ends_with(suffix))
        || BOT_EXACT_MATCHES.contains(&login)
}

fn author_of(user: Option<User>) -> String {
    user.map(|u| u.login).unwrap_or_else(|| "ghost".to_string())
}

impl From<RawReviewComment> for PrComment {
    fn from(raw: RawReviewComment) -> Self {
        let author = author_of(raw.user);
        Self {
            kind: CommentKind::Review,
            is_bot: is_bot_user(&author),
            author,
            body: truncate_str(&raw.body, MAX_COMMENT_BODY),
            path: raw.path,
            line: raw.line,
            created_at: raw.created_at,
        }
    }
}

impl From<RawDiscussionComment> for PrComment {
    fn from(raw: RawDiscussionComment) -> Self {
        let author = author_of(raw.user);
        Self {
            kind: CommentKind::Discussion,
            is_bot: is_bot_user(&author),
            author,
            body: truncate_str(&raw.body, MAX_COMMENT_BODY),
            path: None,
            line: None,
            created_at: raw.created_at,
        }
    }
}

/// Merge both comment streams, oldest first, keeping the newest [`MAX_COMMENTS`].
fn merge_comments(
    review: Vec<RawReviewComment>,
    discussion: Vec<RawDiscussionComment>,
) -> Vec<PrComment> {
    let mut comments: Vec<PrComment> = review
        .into_iter()
        .map(PrComment::from)
        .chain(discussion.into_iter().map(PrComment::from))
        .collect();
    // RFC 3339 timestamps from GitHub sort lexicographically
    comments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    let skip = comments.len().saturating_sub(MAX_COMMENTS);
    comments.split_off(skip)
}

impl GitHubClient {
    pub async fn get_pr_comments(
        &self,
        owner: &str,
        repo: &str,
        pr_number: u64,
    ) -> Result<Vec<PrComment>, GitHubError> {
        let query = [("per_page", "100")];
        let review: Vec<RawReviewComment> = self
            .get_json(
                &format!("repos/{}/{}/pulls/{}/comments", owner, repo, pr_number),
                &query,
            )
            .await?;
        let discussion: Vec<RawDiscussionComment> = self
            .get_json(
                &format!("repos/{}/{}/issues/{}/comments", owner, repo, pr_number),
                &query,
            )
            .await?;
        Ok(merge_comments(review, discussion))
    }
}
