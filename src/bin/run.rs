//! Runs the fixed demo question through the solver → reviewer pipeline once.

use std::sync::Arc;

use mathgraph::console::{run_once, DEFAULT_QUESTION};
use mathgraph::mcp::McpToolbox;
use mathgraph::telemetry::init_tracing;
use mathgraph::{build_pipeline, AgentFactory, AppConfig, OpenAIClient, ToolTraceHook};

#[tokio::main]
async fn main() -> mathgraph::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.logging)?;

    let question = std::env::args()
        .skip(1)
        .collect::<Vec<_>>()
        .join(" ");
    let question = if question.trim().is_empty() {
        DEFAULT_QUESTION.to_string()
    } else {
        question
    };

    let model = Arc::new(OpenAIClient::from_config(&config.model)?);
    let toolbox = McpToolbox::connect(&config.mcp).await?;
    let outcome = async {
        let factory = AgentFactory::new(model, toolbox.tools().clone())
            .with_streaming(config.model.stream)
            .with_hook(Arc::new(ToolTraceHook));
        let (solver, reviewer) = factory.build_pair(&config.agents.solver, &config.agents.reviewer)?;
        let graph = build_pipeline(solver, reviewer)?;
        run_once(&graph, &question, &mut tokio::io::stdout()).await
    }
    .await;

    toolbox.finish(outcome).await.map(|_| ())
}
