//! Top-level agent that delegates work to named sub-agents.
//!
//! The coordinator sees a single `task` tool. Each call names a sub-agent and
//! a self-contained task description; the sub-agent runs on that description
//! alone and its final answer becomes the tool result.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::agent::Agent;
use crate::config::CoordinatorConfig;
use crate::error::{MathGraphError, Result};
use crate::llm::LanguageModel;
use crate::memory::ConversationState;
use crate::message::Message;
use crate::tool::{Tool, ToolRegistry};

pub const TASK_TOOL: &str = "task";

/// A named agent the coordinator may delegate to.
pub struct SubAgent<M: LanguageModel> {
    pub name: String,
    pub description: String,
    pub agent: Arc<Agent<M>>,
}

impl<M: LanguageModel> SubAgent<M> {
    pub fn new(name: impl Into<String>, description: impl Into<String>, agent: Arc<Agent<M>>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            agent,
        }
    }
}

pub struct Coordinator<M: LanguageModel> {
    agent: Agent<M>,
    members: Vec<String>,
}

impl<M: LanguageModel + 'static> Coordinator<M> {
    pub fn new(
        model: Arc<M>,
        system_prompt: impl Into<String>,
        subagents: Vec<SubAgent<M>>,
    ) -> Result<Self> {
        let mut members = BTreeMap::new();
        for sub in subagents {
            if members.contains_key(&sub.name) {
                return Err(MathGraphError::Config(format!(
                    "duplicate sub-agent `{}`",
                    sub.name
                )));
            }
            members.insert(sub.name.clone(), sub);
        }
        let names: Vec<String> = members.keys().cloned().collect();

        let mut tools = ToolRegistry::new();
        tools.register(TaskTool { members });

        let agent = Agent::new(model)
            .with_name("coordinator")
            .with_system_prompt(system_prompt)
            .with_tools(tools);

        Ok(Self {
            agent,
            members: names,
        })
    }

    /// Build a coordinator over the solver and reviewer using the configured prompts.
    pub fn from_config(
        model: Arc<M>,
        cfg: &CoordinatorConfig,
        solver: Arc<Agent<M>>,
        reviewer: Arc<Agent<M>>,
    ) -> Result<Self> {
        let subagents = vec![
            SubAgent::new(&cfg.solver.name, &cfg.solver.description, solver),
            SubAgent::new(&cfg.reviewer.name, &cfg.reviewer.description, reviewer),
        ];
        Ok(Self::new(model, &cfg.system_prompt, subagents)?.with_max_steps(cfg.max_steps))
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.agent = self.agent.with_max_steps(max_steps);
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn crate::hooks::AgentHook>) -> Self {
        self.agent = self.agent.with_hook(hook);
        self
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    /// Answer one question; the returned state ends with the coordinator's reply.
    pub async fn run(&self, question: impl Into<String>) -> Result<ConversationState> {
        let mut state = ConversationState::from_question(question);
        let reply = self.agent.invoke(state.messages()).await?;
        state.push_assistant(reply);
        Ok(state)
    }
}

struct TaskTool<M: LanguageModel> {
    members: BTreeMap<String, SubAgent<M>>,
}

#[async_trait]
impl<M: LanguageModel + 'static> Tool for TaskTool<M> {
    fn name(&self) -> &str {
        TASK_TOOL
    }

    fn description(&self) -> &str {
        "Delegate a self-contained task to a sub-agent and receive its final answer. \
         Expects {\"subagent_type\": string, \"description\": string}."
    }

    fn parameters(&self) -> Option<Value> {
        let roster: Vec<String> = self
            .members
            .values()
            .map(|sub| format!("{}: {}", sub.name, sub.description))
            .collect();
        Some(json!({
            "type": "object",
            "properties": {
                "subagent_type": {
                    "type": "string",
                    "enum": self.members.keys().collect::<Vec<_>>(),
                    "description": format!("Sub-agent to run. Available: {}", roster.join("; "))
                },
                "description": {
                    "type": "string",
                    "description": "Everything the sub-agent needs to complete the task"
                }
            },
            "required": ["subagent_type", "description"]
        }))
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let task = input
            .get("description")
            .and_then(Value::as_str)
            .ok_or_else(|| MathGraphError::InvalidArguments {
                tool: TASK_TOOL.into(),
                reason: "missing `description`".into(),
            })?;
        let requested = input
            .get("subagent_type")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let Some(sub) = self.members.get(requested) else {
            let allowed: Vec<&str> = self.members.keys().map(String::as_str).collect();
            return Ok(json!({
                "error": format!(
                    "unknown sub-agent `{requested}`; allowed types are: {}",
                    allowed.join(", ")
                )
            }));
        };

        info!(subagent = %sub.name, "delegating task");
        let reply = sub.agent.invoke(&[Message::user(task)]).await?;
        Ok(json!({ "subagent": sub.name, "result": reply }))
    }
}
