//! Console front ends for the pipeline graph.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{error, info};

use crate::error::{MathGraphError, Result};
use crate::graph::CompiledGraph;
use crate::memory::ConversationState;

pub const DEFAULT_QUESTION: &str = "Add 3 and 5, then multiply by 12";

const RULE_WIDTH: usize = 60;

/// `exit` or `quit`, ignoring case and surrounding whitespace.
pub fn is_exit_command(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.eq_ignore_ascii_case("exit") || trimmed.eq_ignore_ascii_case("quit")
}

async fn write_text<W: AsyncWrite + Unpin>(writer: &mut W, text: &str) -> Result<()> {
    writer.write_all(text.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Interactive loop: one graph invocation per line until `exit`, `quit` or EOF.
///
/// The conversation carries over between turns. A failed turn is reported
/// and leaves the conversation as it was before that turn.
pub async fn run_interactive<R, W>(
    graph: &CompiledGraph,
    reader: R,
    writer: &mut W,
) -> Result<ConversationState>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let rule = "=".repeat(RULE_WIDTH);
    write_text(
        writer,
        &format!("\n🤖 Multi-Agent Conversational System\nType 'exit' to quit\n{rule}\n"),
    )
    .await?;

    let mut state = ConversationState::new();
    let mut lines = reader.lines();
    loop {
        write_text(writer, "\n🧑 User: ").await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if is_exit_command(&line) {
            break;
        }
        let question = line.trim();
        // Nothing to ask: prompt again without running the graph.
        if question.is_empty() {
            continue;
        }

        let mut turn = state.clone();
        turn.push_user(question);
        match graph.invoke(turn).await {
            Ok(updated) => {
                state = updated;
                let reply = state.last().map(|m| m.content.as_str()).unwrap_or_default();
                write_text(
                    writer,
                    &format!("\n🤖 Assistant:\n{reply}\n{}\n", "-".repeat(RULE_WIDTH)),
                )
                .await?;
            }
            Err(err) => {
                error!(error = %err, "turn failed");
                write_text(writer, &format!("\n⚠️  Turn failed: {err}\n")).await?;
            }
        }
    }

    write_text(writer, "\n👋 Conversation ended\n").await?;
    info!(entries = state.len(), "conversation ended");
    Ok(state)
}

/// Run `question` through the graph once and print the final entry.
pub async fn run_once<W: AsyncWrite + Unpin>(
    graph: &CompiledGraph,
    question: &str,
    writer: &mut W,
) -> Result<String> {
    let rule = "=".repeat(RULE_WIDTH);
    write_text(writer, &format!("\n🚀 Running pipeline\n{rule}\n🧑 {question}\n")).await?;

    let state = graph.invoke(ConversationState::from_question(question)).await?;
    let reply = state
        .last()
        .map(|m| m.content.clone())
        .ok_or_else(|| MathGraphError::Protocol("pipeline produced no messages".into()))?;

    write_text(writer, &format!("\n🧠 Final Output\n{rule}\n{reply}\n")).await?;
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::agent::Agent;
    use crate::pipeline::build_pipeline;
    use crate::StubModel;

    fn graph_with(solver: Vec<&str>, reviewer: Vec<&str>) -> (CompiledGraph, Arc<StubModel>, Arc<StubModel>) {
        let solver_model = StubModel::new(solver.into_iter().map(String::from).collect());
        let reviewer_model = StubModel::new(reviewer.into_iter().map(String::from).collect());
        let graph = build_pipeline(
            Arc::new(Agent::new(solver_model.clone())),
            Arc::new(Agent::new(reviewer_model.clone())),
        )
        .unwrap();
        (graph, solver_model, reviewer_model)
    }

    #[test]
    fn recognizes_exit_commands() {
        assert!(is_exit_command("exit"));
        assert!(is_exit_command("  QUIT \n"));
        assert!(is_exit_command("Exit"));
        assert!(!is_exit_command("exit now"));
        assert!(!is_exit_command(""));
    }

    #[tokio::test]
    async fn exit_first_never_invokes_the_graph() {
        let (graph, solver, reviewer) = graph_with(vec!["s"], vec!["r"]);
        let mut out = Vec::new();

        let state = run_interactive(&graph, "exit\nAdd 1 and 1\n".as_bytes(), &mut out)
            .await
            .unwrap();

        assert!(state.is_empty());
        assert_eq!(solver.remaining(), 1);
        assert_eq!(reviewer.remaining(), 1);
        assert!(String::from_utf8(out).unwrap().contains("Conversation ended"));
    }

    #[tokio::test]
    async fn blank_lines_are_not_turns() {
        let (graph, solver, _) = graph_with(vec!["s"], vec!["r"]);
        let mut out = Vec::new();

        let state = run_interactive(&graph, "   \n\t\nexit\n".as_bytes(), &mut out)
            .await
            .unwrap();

        assert!(state.is_empty());
        assert_eq!(solver.remaining(), 1);
        assert_eq!(String::from_utf8(out).unwrap().matches("🧑 User: ").count(), 3);
    }

    #[tokio::test]
    async fn prints_latest_reply_each_turn() {
        let (graph, _, _) = graph_with(vec!["eight", "twenty"], vec!["96", "100"]);
        let mut out = Vec::new();

        let state = run_interactive(&graph, "first\n\nsecond\nquit\n".as_bytes(), &mut out)
            .await
            .unwrap();

        assert_eq!(state.len(), 6);
        assert_eq!(state.last_reply(), Some("100"));
        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("🤖 Assistant:\n96\n"));
        assert!(printed.contains("🤖 Assistant:\n100\n"));
    }

    #[tokio::test]
    async fn failed_turn_keeps_previous_state() {
        // The reviewer has one scripted answer, so the second turn fails.
        let (graph, _, _) = graph_with(vec!["a", "b"], vec!["done"]);
        let mut out = Vec::new();

        let state = run_interactive(&graph, "one\ntwo\n".as_bytes(), &mut out)
            .await
            .unwrap();

        assert_eq!(state.len(), 3);
        assert_eq!(state.last_reply(), Some("done"));
        assert!(String::from_utf8(out).unwrap().contains("Turn failed"));
    }

    #[tokio::test]
    async fn run_once_returns_final_entry() {
        let (graph, _, _) = graph_with(vec!["8"], vec!["96"]);
        let mut out = Vec::new();

        let reply = run_once(&graph, DEFAULT_QUESTION, &mut out).await.unwrap();

        assert_eq!(reply, "96");
        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains(DEFAULT_QUESTION));
        assert!(printed.ends_with("96\n"));
    }
}
