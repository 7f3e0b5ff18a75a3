use std::sync::Arc;

use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

use crate::error::{MathGraphError, Result};
use crate::hooks::AgentHook;
use crate::llm::LanguageModel;
use crate::memory::ConversationMemory;
use crate::message::Message;
use crate::tool::ToolRegistry;

/// A tool-calling agent bound to a model and a fixed set of tools.
///
/// Agents hold no conversation of their own: every [`Agent::invoke`] starts
/// from the history it is given, so one agent can be shared by reference for
/// the lifetime of the process.
pub struct Agent<M: LanguageModel> {
    name: String,
    system_prompt: String,
    model: Arc<M>,
    tools: ToolRegistry,
    max_steps: usize,
    streaming: bool,
    hooks: Vec<Arc<dyn AgentHook>>,
}

impl<M: LanguageModel> Agent<M> {
    pub fn new(model: Arc<M>) -> Self {
        Self {
            name: "agent".to_string(),
            system_prompt: "You are a helpful agent.".to_string(),
            model,
            tools: ToolRegistry::new(),
            max_steps: 6,
            streaming: false,
            hooks: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn AgentHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Run the agent over `history` and return its final textual answer.
    ///
    /// The model is consulted until it answers without requesting tools;
    /// every requested tool is executed in order and its result fed back.
    pub async fn invoke(&self, history: &[Message]) -> Result<String> {
        let span = info_span!("agent", name = %self.name);
        self.run_loop(history).instrument(span).await
    }

    /// Convenience wrapper for a single user question.
    pub async fn respond(&self, user_input: impl Into<String>) -> Result<String> {
        self.invoke(&[Message::user(user_input)]).await
    }

    async fn run_loop(&self, history: &[Message]) -> Result<String> {
        let mut memory = ConversationMemory::with_messages(history.to_vec());
        let tools = self.tools.describe();

        for step in 0..self.max_steps {
            let mut request = vec![Message::system(&self.system_prompt)];
            request.extend(memory.iter().cloned());
            for hook in &self.hooks {
                hook.before_model(&self.name, &request).await?;
            }

            debug!(step, messages = request.len(), "requesting completion");
            let completion = self
                .model
                .complete_chat(&request, &tools, self.streaming)
                .await?;

            if completion.tool_calls.is_empty() {
                let content = completion.content.ok_or_else(|| {
                    MathGraphError::Protocol(format!(
                        "model response for `{}` is missing content and tool calls",
                        self.name
                    ))
                })?;
                debug!(step, "agent produced final answer");
                return Ok(content);
            }

            for mut call in completion.tool_calls {
                if call.id.is_none() {
                    call.id = Some(format!("call_{}", Uuid::new_v4().simple()));
                }
                for hook in &self.hooks {
                    hook.before_tool_call(&self.name, &call).await?;
                }
                let call_id = call.id.clone();
                let name = call.name.clone();
                let arguments = call.arguments.clone();
                memory.push(Message::tool_request(call));

                let output = self.tools.call(&name, arguments).await?;
                debug!(tool = %name, output = %output, "tool returned");
                let result = Message::tool_with_call(&name, output, call_id);
                if let Some(tool_result) = &result.tool_result {
                    for hook in &self.hooks {
                        hook.after_tool_result(&self.name, tool_result).await?;
                    }
                }
                memory.push(result);
            }
        }

        Err(MathGraphError::StepLimit {
            agent: self.name.clone(),
            max_steps: self.max_steps,
        })
    }
}
