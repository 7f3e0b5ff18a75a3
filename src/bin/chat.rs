//! Interactive solver → reviewer conversation over the MCP math tools.

use std::sync::Arc;

use mathgraph::console::run_interactive;
use mathgraph::mcp::McpToolbox;
use mathgraph::telemetry::init_tracing;
use mathgraph::{build_pipeline, AgentFactory, AppConfig, OpenAIClient, ToolTraceHook};
use tokio::io::BufReader;

#[tokio::main]
async fn main() -> mathgraph::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.logging)?;

    let model = Arc::new(OpenAIClient::from_config(&config.model)?);
    tracing::info!(model = %model.model(), "language model ready");

    let toolbox = McpToolbox::connect(&config.mcp).await?;
    let outcome = async {
        let factory = AgentFactory::new(model, toolbox.tools().clone())
            .with_streaming(config.model.stream)
            .with_hook(Arc::new(ToolTraceHook));
        let (solver, reviewer) = factory.build_pair(&config.agents.solver, &config.agents.reviewer)?;
        let graph = build_pipeline(solver, reviewer)?;

        let mut stdout = tokio::io::stdout();
        run_interactive(&graph, BufReader::new(tokio::io::stdin()), &mut stdout).await
    }
    .await;

    toolbox.finish(outcome).await.map(|_| ())
}
