//! Coordinator agent that delegates the demo question to solver and reviewer sub-agents.

use std::sync::Arc;

use mathgraph::console::DEFAULT_QUESTION;
use mathgraph::mcp::McpToolbox;
use mathgraph::telemetry::init_tracing;
use mathgraph::{AgentFactory, AppConfig, Coordinator, OpenAIClient, ToolTraceHook};

#[tokio::main]
async fn main() -> mathgraph::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.logging)?;

    let model = Arc::new(OpenAIClient::from_config(&config.model)?);
    let toolbox = McpToolbox::connect(&config.mcp).await?;
    let outcome = async {
        let hook = Arc::new(ToolTraceHook);
        let factory = AgentFactory::new(Arc::clone(&model), toolbox.tools().clone())
            .with_streaming(config.model.stream)
            .with_hook(hook.clone());
        let (solver, reviewer) = factory.build_pair(&config.agents.solver, &config.agents.reviewer)?;
        let coordinator =
            Coordinator::from_config(model, &config.coordinator, solver, reviewer)?.with_hook(hook);

        println!("\n🚀 Starting Multi-Agent Workflow\n{}", "=".repeat(60));
        println!("🧑 {DEFAULT_QUESTION}");
        let state = coordinator.run(DEFAULT_QUESTION).await?;

        println!("\n🧠 Final Output\n{}", "=".repeat(60));
        println!("{}", state.last_reply().unwrap_or_default());
        println!("\n✅ Workflow Completed");
        Ok::<(), mathgraph::MathGraphError>(())
    }
    .await;

    toolbox.finish(outcome).await
}
