//! Two-stage tool-calling agent pipeline for arithmetic questions.
//!
//! The crate provides:
//! - A language model abstraction (`LanguageModel`) with an OpenAI-compatible client.
//! - A tool interface (`Tool` and `ToolRegistry`) and an MCP stdio client/server pair.
//! - An `Agent` that loops between the model and its tools, and an `AgentFactory`
//!   that binds agents to named tool subsets.
//! - A `StateGraph` executor, the solver → reviewer pipeline built on it, and a
//!   `Coordinator` that delegates to sub-agents.

mod agent;
mod config;
mod coordinator;
mod error;
mod factory;
mod graph;
mod hooks;
mod llm;
mod memory;
mod message;
mod pipeline;
mod tool;

pub mod console;
pub mod mcp;
pub mod telemetry;
pub mod tools;

pub use agent::Agent;
pub use config::{
    AgentProfile, AgentsConfig, AppConfig, CoordinatorConfig, LoggingConfig, McpServerConfig,
    ModelConfig, SubAgentConfig,
};
pub use coordinator::{Coordinator, SubAgent, TASK_TOOL};
pub use error::{MathGraphError, Result};
pub use factory::AgentFactory;
pub use graph::{AgentNode, CompiledGraph, FunctionNode, GraphNode, NodeFuture, StateGraph, END};
pub use hooks::{AgentHook, ToolTraceHook};
pub use llm::{LanguageModel, ModelCompletion, OpenAIClient, StubModel};
pub use memory::{ConversationMemory, ConversationState};
pub use message::{Message, Role, ToolCall, ToolResult};
pub use pipeline::{build_pipeline, REVIEWER_NODE, SOLVER_NODE};
pub use tool::{Tool, ToolDescription, ToolRegistry};
