//! Wire types for the Agents and Conversations endpoints.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::tools::ToolDefinition;

#[derive(Debug, Clone, Serialize)]
pub struct CreateAgentRequest {
    pub model: String,
    pub name: String,
    pub description: String,
    pub instructions: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    pub completion_args: CompletionArgs,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionArgs {
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    JsonSchema { json_schema: JsonSchemaFormat },
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonSchemaFormat {
    pub name: String,
    pub schema: Value,
    pub strict: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Agent {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub model: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateHandoffsRequest<'a> {
    pub handoffs: &'a [String],
}

/// Who executes handoffs between agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HandoffExecution {
    Server,
    Client,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ConversationInputs {
    Text(String),
    Entries(Vec<InputEntry>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum InputEntry {
    #[serde(rename = "function.result")]
    FunctionResult { tool_call_id: String, result: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct StartConversationRequest {
    pub agent_id: String,
    pub inputs: ConversationInputs,
    pub stream: bool,
    pub store: bool,
    pub handoff_execution: HandoffExecution,
}

impl StartConversationRequest {
    pub fn new(agent_id: &str, text: String, handoff_execution: HandoffExecution) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            inputs: ConversationInputs::Text(text),
            stream: false,
            store: true,
            handoff_execution,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AppendConversationRequest {
    pub inputs: ConversationInputs,
    pub stream: bool,
    pub store: bool,
    pub handoff_execution: HandoffExecution,
}

impl AppendConversationRequest {
    pub fn function_results(
        results: Vec<InputEntry>,
        handoff_execution: HandoffExecution,
    ) -> Self {
        Self {
            inputs: ConversationInputs::Entries(results),
            stream: false,
            store: true,
            handoff_execution,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationResponse {
    pub conversation_id: String,
    #[serde(default)]
    pub outputs: Vec<ConversationEntry>,
    #[serde(default)]
    pub usage: Usage,
}

/// A pending `function.call` the client must answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    pub tool_call_id: String,
    pub name: String,
    pub arguments: String,
    pub agent_id: Option<String>,
}

impl ConversationResponse {
    pub fn function_calls(&self) -> Vec<FunctionCall> {
        self.outputs
            .iter()
            .filter_map(|entry| match entry {
                ConversationEntry::FunctionCall {
                    tool_call_id,
                    name,
                    arguments,
                    agent_id,
                } => Some(FunctionCall {
                    tool_call_id: tool_call_id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                    agent_id: agent_id.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Text of the last non-empty `message.output` entry.
    pub fn last_message(&self) -> Option<String> {
        self.outputs.iter().rev().find_map(|entry| match entry {
            ConversationEntry::MessageOutput { content, .. } => {
                let text = content.text();
                (!text.trim().is_empty()).then_some(text)
            }
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ConversationEntry {
    #[serde(rename = "message.output")]
    MessageOutput {
        #[serde(default)]
        agent_id: Option<String>,
        content: MessageContent,
    },
    #[serde(rename = "function.call")]
    FunctionCall {
        tool_call_id: String,
        name: String,
        #[serde(deserialize_with = "arguments_as_string")]
        arguments: String,
        #[serde(default)]
        agent_id: Option<String>,
    },
    #[serde(rename = "agent.handoff")]
    AgentHandoff {
        previous_agent_id: String,
        next_agent_id: String,
        #[serde(default)]
        next_agent_name: Option<String>,
    },
    #[serde(rename = "tool.execution")]
    ToolExecution {
        name: String,
        #[serde(default)]
        agent_id: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// Arguments arrive either as a JSON-encoded string or as an object.
fn arguments_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Chunks(Vec<ContentChunk>),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContentChunk {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl MessageContent {
    /// Concatenated text; non-text chunks (tool references, images) are skipped.
    pub fn text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Chunks(chunks) => chunks
                .iter()
                .filter(|c| c.kind == "text")
                .filter_map(|c| c.text.as_deref())
                .collect(),
        }
    }
}
