use std::sync::Arc;

use tracing::info;

use crate::agent::Agent;
use crate::config::AgentProfile;
use crate::error::Result;
use crate::hooks::AgentHook;
use crate::llm::LanguageModel;
use crate::tool::ToolRegistry;

/// Builds agents that share one model and draw their tools from one registry.
pub struct AgentFactory<M: LanguageModel> {
    model: Arc<M>,
    tools: ToolRegistry,
    streaming: bool,
    hooks: Vec<Arc<dyn AgentHook>>,
}

impl<M: LanguageModel> AgentFactory<M> {
    pub fn new(model: Arc<M>, tools: ToolRegistry) -> Self {
        Self {
            model,
            tools,
            streaming: false,
            hooks: Vec::new(),
        }
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Attach a hook to every agent built from now on.
    pub fn with_hook(mut self, hook: Arc<dyn AgentHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn model(&self) -> Arc<M> {
        Arc::clone(&self.model)
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Build one agent. A profile without a tool list gets every tool; a name
    /// the registry does not provide is rejected.
    pub fn build(&self, profile: &AgentProfile) -> Result<Agent<M>> {
        let tools = match &profile.tools {
            Some(names) => self.tools.subset(&profile.name, names)?,
            None => self.tools.clone(),
        };
        info!(agent = %profile.name, tools = ?tools.names(), "built agent");

        let mut agent = Agent::new(Arc::clone(&self.model))
            .with_name(&profile.name)
            .with_system_prompt(&profile.system_prompt)
            .with_tools(tools)
            .with_max_steps(profile.max_steps)
            .with_streaming(self.streaming);
        for hook in &self.hooks {
            agent = agent.with_hook(Arc::clone(hook));
        }
        Ok(agent)
    }

    /// Build the solver and reviewer agents of the pipeline.
    pub fn build_pair(
        &self,
        solver: &AgentProfile,
        reviewer: &AgentProfile,
    ) -> Result<(Arc<Agent<M>>, Arc<Agent<M>>)> {
        Ok((Arc::new(self.build(solver)?), Arc::new(self.build(reviewer)?)))
    }
}
