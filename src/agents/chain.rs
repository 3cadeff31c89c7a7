use tracing::{debug, info, warn};

use super::api::{AgentsApi, ApiError};
use super::prompt_loader::PromptLoader;
use super::types::{CompletionArgs, CreateAgentRequest, JsonSchemaFormat, ResponseFormat};
use super::AgentRole;
use crate::config::Config;
use crate::report::{ReviewReport, REPORT_SCHEMA_NAME};
use crate::tools::tools_for;

/// Platform ids of the four created agents, indexed by role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentChain {
    /// One id per role, in chain order
    ids: Vec<String>,
}

fn index(role: AgentRole) -> usize {
    match role {
        AgentRole::Planner => 0,
        AgentRole::Reviewer => 1,
        AgentRole::Verifier => 2,
        AgentRole::Reporter => 3,
    }
}

impl AgentChain {
    pub fn id(&self, role: AgentRole) -> &str {
        &self.ids[index(role)]
    }

    /// Where user input goes
    pub fn entry_agent_id(&self) -> &str {
        self.id(AgentRole::Planner)
    }

    pub fn role_of(&self, agent_id: &str) -> Option<AgentRole> {
        AgentRole::ALL
            .into_iter()
            .find(|role| self.id(*role) == agent_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (AgentRole, &str)> {
        AgentRole::ALL.into_iter().map(|role| (role, self.id(role)))
    }
}

/// Agent definition for `role` with the configured model and temperature.
pub fn agent_request(role: AgentRole, config: &Config, prompts: &PromptLoader) -> CreateAgentRequest {
    let response_format = (role == AgentRole::Reporter).then(|| ResponseFormat::JsonSchema {
        json_schema: JsonSchemaFormat {
            name: REPORT_SCHEMA_NAME.to_string(),
            schema: ReviewReport::json_schema(),
            // optional fields (line, suggestion) are not strict-mode compatible
            strict: false,
        },
    });

    CreateAgentRequest {
        model: config.agents.model_for(role),
        name: role.display_name().to_string(),
        description: role.description().to_string(),
        instructions: prompts.load_instructions(role),
        tools: tools_for(role),
        completion_args: CompletionArgs {
            temperature: config.agents.temperature_for(role),
            response_format,
        },
    }
}

/// Create the four agents and, when `wire_handoffs` is set, chain them
/// Planner → Reviewer → Verifier → Reporter.
///
/// If any step fails, agents created so far are deleted before returning.
pub async fn build_chain(
    api: &dyn AgentsApi,
    config: &Config,
    prompts: &PromptLoader,
    wire_handoffs: bool,
) -> Result<AgentChain, ApiError> {
    let mut created: Vec<String> = Vec::with_capacity(AgentRole::ALL.len());

    for role in AgentRole::ALL {
        let request = agent_request(role, config, prompts);
        match api.create_agent(&request).await {
            Ok(agent) => {
                debug!(role = role.key(), agent_id = %agent.id, model = %request.model, "agent created");
                created.push(agent.id);
            }
            Err(e) => {
                delete_all(api, &created).await;
                return Err(e);
            }
        }
    }

    if wire_handoffs {
        for role in AgentRole::ALL {
            let Some(next) = role.next() else { continue };
            let targets = [created[index(next)].clone()];
            if let Err(e) = api.update_handoffs(&created[index(role)], &targets).await {
                delete_all(api, &created).await;
                return Err(e);
            }
        }
    }

    let chain = AgentChain { ids: created };
    info!(
        planner = chain.id(AgentRole::Planner),
        reviewer = chain.id(AgentRole::Reviewer),
        verifier = chain.id(AgentRole::Verifier),
        reporter = chain.id(AgentRole::Reporter),
        handoffs = wire_handoffs,
        "agent chain ready"
    );
    Ok(chain)
}

async fn delete_all(api: &dyn AgentsApi, ids: &[String]) {
    for id in ids {
        if let Err(e) = api.delete_agent(id).await {
            warn!(agent_id = %id, error = %e, "failed to delete agent");
        }
    }
}

/// Delete every agent of the chain. Failures are logged, never returned.
pub async fn teardown_chain(api: &dyn AgentsApi, chain: &AgentChain) {
    debug!("tearing down agent chain");
    delete_all(api, &chain.ids).await;
}
