use thiserror::Error;

pub type Result<T> = std::result::Result<T, MathGraphError>;

#[derive(Debug, Error)]
pub enum MathGraphError {
    #[error("tool `{0}` not found")]
    ToolNotFound(String),

    #[error("tool `{name}` requested by `{agent}` is not provided by any tool server (available: {available})")]
    UnknownTool {
        agent: String,
        name: String,
        available: String,
    },

    #[error("invalid arguments for `{tool}`: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("tool `{name}` invocation failed: {source}")]
    ToolInvocation {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("language model error: {0}")]
    LanguageModel(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("MCP error: {0}")]
    Mcp(String),

    #[error("agent `{agent}` reached the step limit of {max_steps} without returning a response")]
    StepLimit { agent: String, max_steps: usize },

    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}
