use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::config::GitHubConfig;
use crate::http::send_with_retry;
use crate::text::truncate_str;

pub(crate) const JSON_MEDIA_TYPE: &str = "application/vnd.github.v3+json";
pub(crate) const DIFF_MEDIA_TYPE: &str = "application/vnd.github.v3.diff";
pub(crate) const RAW_MEDIA_TYPE: &str = "application/vnd.github.v3.raw";
const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("MergeGuard/", env!("CARGO_PKG_VERSION"));
/// Error bodies are only kept for diagnostics
const MAX_ERROR_BODY: usize = 500;

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("GitHub request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("GitHub API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("GITHUB_TOKEN contains characters that are not valid in an HTTP header")]
    InvalidToken,

    #[error("Failed to parse GitHub response for {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Line {line} is outside {path} ({total} lines)")]
    LineOutOfRange { path: String, line: u32, total: usize },
}

/// Thin async client for the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    max_retries: u32,
}

impl GitHubClient {
    pub fn new(
        config: &GitHubConfig,
        token: Option<&str>,
        max_retries: u32,
    ) -> Result<Self, GitHubError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(JSON_MEDIA_TYPE));
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static(API_VERSION));
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| GitHubError::InvalidToken)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            max_retries,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.api_url, endpoint.trim_start_matches('/'))
    }

    /// GET an endpoint with a specific media type and return the body as text.
    pub(crate) async fn get_text(
        &self,
        endpoint: &str,
        accept: &str,
        query: &[(&str, &str)],
    ) -> Result<String, GitHubError> {
        debug!(endpoint, accept, "GitHub GET");
        let request = self
            .http
            .get(self.url(endpoint))
            .header(ACCEPT, accept)
            .query(query);
        let resp = send_with_retry(request, self.max_retries).await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(GitHubError::Status {
                status: status.as_u16(),
                body: truncate_str(&body, MAX_ERROR_BODY),
            });
        }
        Ok(body)
    }

    /// GET a JSON endpoint and deserialize it.
    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T, GitHubError> {
        let body = self.get_text(endpoint, JSON_MEDIA_TYPE, query).await?;
        serde_json::from_str(&body).map_err(|source| GitHubError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })
    }
}
