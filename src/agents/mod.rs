mod api;
mod chain;
#[cfg(test)]
pub(crate) mod fake;
pub mod prompt_loader;
mod role;
pub mod types;

pub use api::{AgentsApi, ApiError, MistralClient};
pub use chain::{agent_request, build_chain, teardown_chain, AgentChain};
pub use prompt_loader::{PromptLoader, PromptSource, DEFAULT_PROMPTS};
pub use role::AgentRole;
pub use types::{ConversationResponse, FunctionCall, HandoffExecution, Usage};
