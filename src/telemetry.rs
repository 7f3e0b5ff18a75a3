use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{MathGraphError, Result};

/// Install the global tracing subscriber.
///
/// Events go to stderr: stdout belongs to the console conversation or, for
/// the tool server, to protocol frames. `RUST_LOG` takes precedence over the
/// configured filter.
pub fn init_tracing(cfg: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.filter))
        .map_err(|err| MathGraphError::Config(format!("invalid log filter `{}`: {err}", cfg.filter)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if cfg.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };

    installed.map_err(|err| MathGraphError::Config(format!("tracing already initialized: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_filter() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let cfg = LoggingConfig {
            filter: "mathgraph=[".into(),
            json: false,
        };
        assert!(matches!(init_tracing(&cfg), Err(MathGraphError::Config(_))));
    }
}
