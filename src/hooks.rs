use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::message::{Message, ToolCall, ToolResult};

/// Observation points inside an agent invocation. An error aborts the run.
#[async_trait]
pub trait AgentHook: Send + Sync {
    async fn before_model(&self, _agent: &str, _messages: &[Message]) -> Result<()> {
        Ok(())
    }

    async fn before_tool_call(&self, _agent: &str, _call: &ToolCall) -> Result<()> {
        Ok(())
    }

    async fn after_tool_result(&self, _agent: &str, _result: &ToolResult) -> Result<()> {
        Ok(())
    }
}

/// Prints a line to the console whenever a tool starts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolTraceHook;

#[async_trait]
impl AgentHook for ToolTraceHook {
    async fn before_tool_call(&self, agent: &str, call: &ToolCall) -> Result<()> {
        info!(agent, tool = %call.name, arguments = %call.arguments, "tool started");
        println!("    🔧 Tool started → {}", call.name);
        Ok(())
    }
}
