use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use super::types::{
    Agent, AppendConversationRequest, ConversationResponse, CreateAgentRequest,
    StartConversationRequest, UpdateHandoffsRequest,
};
use crate::config::MistralConfig;
use crate::http::send_with_retry;
use crate::text::truncate_str;

const USER_AGENT: &str = concat!("mergeguard/", env!("CARGO_PKG_VERSION"));
const MAX_ERROR_BODY: usize = 500;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Agents API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Agents API returned {status} for {operation}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("MISTRAL_API_KEY contains characters that are not valid in an HTTP header")]
    InvalidApiKey,

    #[error("Failed to parse {operation} response: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Operations the review chain needs from the hosted agents platform.
#[async_trait]
pub trait AgentsApi: Send + Sync {
    async fn create_agent(&self, request: &CreateAgentRequest) -> Result<Agent, ApiError>;

    /// Replace the handoff targets of `agent_id`.
    async fn update_handoffs(&self, agent_id: &str, handoffs: &[String]) -> Result<(), ApiError>;

    async fn delete_agent(&self, agent_id: &str) -> Result<(), ApiError>;

    async fn start_conversation(
        &self,
        request: &StartConversationRequest,
    ) -> Result<ConversationResponse, ApiError>;

    async fn append_conversation(
        &self,
        conversation_id: &str,
        request: &AppendConversationRequest,
    ) -> Result<ConversationResponse, ApiError>;
}

/// HTTPS client for the Mistral Agents and Conversations endpoints.
#[derive(Debug, Clone)]
pub struct MistralClient {
    http: reqwest::Client,
    base_url: String,
    max_retries: u32,
}

impl MistralClient {
    pub fn new(config: &MistralConfig, api_key: &str, max_retries: u32) -> Result<Self, ApiError> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|_| ApiError::InvalidApiKey)?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send_raw(
        &self,
        request: RequestBuilder,
        operation: &'static str,
    ) -> Result<String, ApiError> {
        debug!(operation, "agents API call");
        let resp = send_with_retry(request, self.max_retries).await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ApiError::Status {
                operation,
                status: status.as_u16(),
                body: truncate_str(&body, MAX_ERROR_BODY),
            });
        }
        Ok(body)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        operation: &'static str,
    ) -> Result<T, ApiError> {
        let body = self.send_raw(request, operation).await?;
        serde_json::from_str(&body).map_err(|source| ApiError::Decode { operation, source })
    }
}

#[async_trait]
impl AgentsApi for MistralClient {
    async fn create_agent(&self, request: &CreateAgentRequest) -> Result<Agent, ApiError> {
        let req = self.http.post(self.url("agents")).json(request);
        self.send(req, "create_agent").await
    }

    async fn update_handoffs(&self, agent_id: &str, handoffs: &[String]) -> Result<(), ApiError> {
        let req = self
            .http
            .patch(self.url(&format!("agents/{}", agent_id)))
            .json(&UpdateHandoffsRequest { handoffs });
        self.send_raw(req, "update_agent").await.map(|_| ())
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<(), ApiError> {
        let req = self.http.delete(self.url(&format!("agents/{}", agent_id)));
        self.send_raw(req, "delete_agent").await.map(|_| ())
    }

    async fn start_conversation(
        &self,
        request: &StartConversationRequest,
    ) -> Result<ConversationResponse, ApiError> {
        let req = self.http.post(self.url("conversations")).json(request);
        self.send(req, "start_conversation").await
    }

    async fn append_conversation(
        &self,
        conversation_id: &str,
        request: &AppendConversationRequest,
    ) -> Result<ConversationResponse, ApiError> {
        let req = self
            .http
            .post(self.url(&format!("conversations/{}", conversation_id)))
            .json(request);
        self.send(req, "append_conversation").await
    }
}
