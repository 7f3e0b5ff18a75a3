//! Math tool server speaking MCP over stdin/stdout.

use mathgraph::mcp::McpServer;
use mathgraph::telemetry::init_tracing;
use mathgraph::tools::calculator_toolkit;
use mathgraph::LoggingConfig;
use tokio::io::BufReader;

#[tokio::main]
async fn main() -> mathgraph::Result<()> {
    // The parent's config applies to the client; the server only honours RUST_LOG.
    init_tracing(&LoggingConfig::default())?;

    let tools = calculator_toolkit();
    tracing::info!(tools = ?tools.names(), "serving MCP over stdio");
    McpServer::new("math", tools)
        .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await
}
