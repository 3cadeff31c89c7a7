//! Scripted in-memory [`AgentsApi`] for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::api::{AgentsApi, ApiError};
use super::types::{
    Agent, AppendConversationRequest, ContentChunk, ConversationEntry, ConversationResponse,
    CreateAgentRequest, MessageContent, StartConversationRequest, Usage,
};

#[derive(Default)]
pub(crate) struct FakeApi {
    /// Index of the `create_agent` call that fails with a 500
    pub fail_create_at: Option<usize>,
    pub fail_handoffs: bool,
    /// Delay applied to every conversation call
    pub delay: Option<Duration>,
    /// Conversation responses, consumed in call order by start/append
    pub responses: Mutex<VecDeque<Result<ConversationResponse, ApiError>>>,
    fail_delete: AtomicBool,
    log: Mutex<Vec<String>>,
    created: Mutex<Vec<CreateAgentRequest>>,
    started: Mutex<Vec<StartConversationRequest>>,
    appended: Mutex<Vec<AppendConversationRequest>>,
    create_calls: AtomicUsize,
    next_id: AtomicUsize,
}

pub(crate) fn server_error(operation: &'static str) -> ApiError {
    ApiError::Status {
        operation,
        status: 500,
        body: "internal error".to_string(),
    }
}

impl FakeApi {
    pub fn with_responses(responses: Vec<Result<ConversationResponse, ApiError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    pub fn failing_create_at(index: usize) -> Self {
        Self {
            fail_create_at: Some(index),
            ..Self::default()
        }
    }

    pub fn failing_handoffs() -> Self {
        Self {
            fail_handoffs: true,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn created(&self) -> Vec<CreateAgentRequest> {
        self.created.lock().unwrap().clone()
    }

    pub fn started(&self) -> Vec<StartConversationRequest> {
        self.started.lock().unwrap().clone()
    }

    pub fn appended(&self) -> Vec<AppendConversationRequest> {
        self.appended.lock().unwrap().clone()
    }

    pub fn set_fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    async fn next_response(&self) -> Result<ConversationResponse, ApiError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(server_error("start_conversation")))
    }
}

#[async_trait]
impl AgentsApi for FakeApi {
    async fn create_agent(&self, request: &CreateAgentRequest) -> Result<Agent, ApiError> {
        self.record(format!("create {}", request.name));
        let call = self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_create_at == Some(call) {
            return Err(server_error("create_agent"));
        }
        self.created.lock().unwrap().push(request.clone());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Agent {
            id: format!("ag_{}", id),
            name: request.name.clone(),
            model: request.model.clone(),
        })
    }

    async fn update_handoffs(&self, agent_id: &str, handoffs: &[String]) -> Result<(), ApiError> {
        self.record(format!("handoffs {} -> {}", agent_id, handoffs.join(",")));
        if self.fail_handoffs {
            return Err(server_error("update_agent"));
        }
        Ok(())
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<(), ApiError> {
        self.record(format!("delete {}", agent_id));
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(server_error("delete_agent"));
        }
        Ok(())
    }

    async fn start_conversation(
        &self,
        request: &StartConversationRequest,
    ) -> Result<ConversationResponse, ApiError> {
        self.record(format!("start {}", request.agent_id));
        self.started.lock().unwrap().push(request.clone());
        self.next_response().await
    }

    async fn append_conversation(
        &self,
        conversation_id: &str,
        request: &AppendConversationRequest,
    ) -> Result<ConversationResponse, ApiError> {
        self.record(format!("append {}", conversation_id));
        self.appended.lock().unwrap().push(request.clone());
        self.next_response().await
    }
}

pub(crate) fn response(conversation_id: &str, outputs: Vec<ConversationEntry>) -> ConversationResponse {
    ConversationResponse {
        conversation_id: conversation_id.to_string(),
        outputs,
        usage: Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        },
    }
}

pub(crate) fn message(text: &str) -> ConversationEntry {
    ConversationEntry::MessageOutput {
        agent_id: None,
        content: MessageContent::Chunks(vec![ContentChunk {
            kind: "text".to_string(),
            text: Some(text.to_string()),
        }]),
    }
}

pub(crate) fn call(id: &str, name: &str, arguments: &str) -> ConversationEntry {
    ConversationEntry::FunctionCall {
        tool_call_id: id.to_string(),
        name: name.to_string(),
        arguments: arguments.to_string(),
        agent_id: None,
    }
}

pub(crate) fn handoff(from: &str, to: &str, to_name: &str) -> ConversationEntry {
    ConversationEntry::AgentHandoff {
        previous_agent_id: from.to_string(),
        next_agent_id: to.to_string(),
        next_agent_name: Some(to_name.to_string()),
    }
}
