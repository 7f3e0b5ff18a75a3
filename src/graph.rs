use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, info_span, Instrument};

use crate::agent::Agent;
use crate::error::{MathGraphError, Result};
use crate::llm::LanguageModel;
use crate::memory::ConversationState;

/// Terminal marker for [`StateGraph::add_edge`].
pub const END: &str = "__end__";

/// One step of a graph. Receives the whole shared state and may append to it.
#[async_trait]
pub trait GraphNode: Send + Sync {
    async fn run(&self, state: &mut ConversationState) -> Result<()>;
}

/// Runs an agent over the full conversation and appends its answer.
pub struct AgentNode<M: LanguageModel> {
    agent: Arc<Agent<M>>,
}

impl<M: LanguageModel> AgentNode<M> {
    pub fn new(agent: Arc<Agent<M>>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl<M: LanguageModel> GraphNode for AgentNode<M> {
    async fn run(&self, state: &mut ConversationState) -> Result<()> {
        let reply = self.agent.invoke(state.messages()).await?;
        state.push_assistant(reply);
        Ok(())
    }
}

pub type NodeFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Wrap a plain async function as a graph node.
pub struct FunctionNode<F>
where
    F: for<'a> Fn(&'a mut ConversationState) -> NodeFuture<'a> + Send + Sync,
{
    func: F,
}

impl<F> FunctionNode<F>
where
    F: for<'a> Fn(&'a mut ConversationState) -> NodeFuture<'a> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> GraphNode for FunctionNode<F>
where
    F: for<'a> Fn(&'a mut ConversationState) -> NodeFuture<'a> + Send + Sync,
{
    async fn run(&self, state: &mut ConversationState) -> Result<()> {
        (self.func)(state).await
    }
}

/// Builder for a graph of named nodes joined by unconditional edges.
#[derive(Default)]
pub struct StateGraph {
    nodes: Vec<(String, Arc<dyn GraphNode>)>,
    entry: Option<String>,
    edges: Vec<(String, String)>,
}

impl StateGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(mut self, name: impl Into<String>, node: impl GraphNode + 'static) -> Self {
        self.nodes.push((name.into(), Arc::new(node)));
        self
    }

    pub fn set_entry_point(mut self, name: impl Into<String>) -> Self {
        self.entry = Some(name.into());
        self
    }

    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    /// Validate the graph and fix its execution order.
    ///
    /// Every node needs exactly one outgoing edge, the walk from the entry
    /// point must reach [`END`] without revisiting a node, and every node
    /// must lie on that walk.
    pub fn compile(self) -> Result<CompiledGraph> {
        let mut nodes = HashMap::new();
        for (name, node) in self.nodes {
            if name == END {
                return Err(invalid(format!("`{END}` is reserved")));
            }
            if nodes.insert(name.clone(), node).is_some() {
                return Err(invalid(format!("node `{name}` is defined twice")));
            }
        }

        let entry = self
            .entry
            .ok_or_else(|| invalid("no entry point set".into()))?;
        if !nodes.contains_key(&entry) {
            return Err(invalid(format!("entry point `{entry}` is not a node")));
        }

        let mut next: HashMap<String, String> = HashMap::new();
        for (from, to) in self.edges {
            if !nodes.contains_key(&from) {
                return Err(invalid(format!("edge starts at unknown node `{from}`")));
            }
            if to != END && !nodes.contains_key(&to) {
                return Err(invalid(format!("edge `{from}` -> `{to}` targets an unknown node")));
            }
            if next.contains_key(&from) {
                return Err(invalid(format!("node `{from}` has more than one outgoing edge")));
            }
            next.insert(from, to);
        }

        let mut order = Vec::with_capacity(nodes.len());
        let mut seen = HashSet::new();
        let mut current = entry;
        while current != END {
            if !seen.insert(current.clone()) {
                return Err(invalid(format!("cycle through node `{current}`")));
            }
            let following = next
                .get(&current)
                .cloned()
                .ok_or_else(|| invalid(format!("node `{current}` has no outgoing edge")))?;
            order.push(current);
            current = following;
        }

        if let Some(orphan) = nodes.keys().find(|name| !seen.contains(*name)) {
            return Err(invalid(format!("node `{orphan}` is unreachable from the entry point")));
        }

        Ok(CompiledGraph { nodes, order })
    }
}

fn invalid(message: String) -> MathGraphError {
    MathGraphError::InvalidGraph(message)
}

/// A validated graph, immutable and reusable across invocations.
pub struct CompiledGraph {
    nodes: HashMap<String, Arc<dyn GraphNode>>,
    order: Vec<String>,
}

impl CompiledGraph {
    /// Node names in the order every invocation visits them.
    pub fn execution_order(&self) -> &[String] {
        &self.order
    }

    /// Thread `state` through every node in order. The first failing node
    /// aborts the run and its error is returned.
    pub async fn invoke(&self, mut state: ConversationState) -> Result<ConversationState> {
        for name in &self.order {
            let node = self
                .nodes
                .get(name)
                .ok_or_else(|| invalid(format!("node `{name}` disappeared")))?;
            let before = state.len();
            node.run(&mut state)
                .instrument(info_span!("node", name = %name))
                .await?;
            info!(node = %name, appended = state.len() - before, "node finished");
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Append(&'static str);

    #[async_trait]
    impl GraphNode for Append {
        async fn run(&self, state: &mut ConversationState) -> Result<()> {
            state.push_assistant(self.0);
            Ok(())
        }
    }

    fn appending(label: &'static str) -> Append {
        Append(label)
    }

    #[tokio::test]
    async fn runs_nodes_along_edges() {
        let graph = StateGraph::new()
            .add_node("second", appending("b"))
            .add_node("first", appending("a"))
            .set_entry_point("first")
            .add_edge("first", "second")
            .add_edge("second", END)
            .compile()
            .unwrap();

        assert_eq!(graph.execution_order(), ["first", "second"]);
        let state = graph
            .invoke(ConversationState::from_question("go"))
            .await
            .unwrap();
        let contents: Vec<&str> = state.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["go", "a", "b"]);
    }

    #[tokio::test]
    async fn failing_node_aborts_the_run() {
        let reached = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&reached);
        let graph = StateGraph::new()
            .add_node(
                "broken",
                FunctionNode::new(|_state: &mut ConversationState| {
                    Box::pin(async { Err::<(), _>(MathGraphError::Protocol("boom".into())) })
                }),
            )
            .add_node(
                "after",
                FunctionNode::new(move |_state: &mut ConversationState| {
                    let flag = Arc::clone(&flag);
                    Box::pin(async move {
                        *flag.lock().unwrap() = true;
                        Ok(())
                    })
                }),
            )
            .set_entry_point("broken")
            .add_edge("broken", "after")
            .add_edge("after", END)
            .compile()
            .unwrap();

        let err = graph.invoke(ConversationState::new()).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert!(!*reached.lock().unwrap());
    }

    fn compile_error(graph: StateGraph) -> String {
        match graph.compile() {
            Err(MathGraphError::InvalidGraph(message)) => message,
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("graph unexpectedly compiled"),
        }
    }

    #[test]
    fn rejects_malformed_graphs() {
        let missing_entry = StateGraph::new()
            .add_node("a", appending("a"))
            .add_edge("a", END);
        assert!(compile_error(missing_entry).contains("no entry point"));

        let cycle = StateGraph::new()
            .add_node("a", appending("a"))
            .add_node("b", appending("b"))
            .set_entry_point("a")
            .add_edge("a", "b")
            .add_edge("b", "a");
        assert!(compile_error(cycle).contains("cycle"));

        let dangling = StateGraph::new()
            .add_node("a", appending("a"))
            .set_entry_point("a");
        assert!(compile_error(dangling).contains("no outgoing edge"));

        let branching = StateGraph::new()
            .add_node("a", appending("a"))
            .add_node("b", appending("b"))
            .set_entry_point("a")
            .add_edge("a", "b")
            .add_edge("a", END)
            .add_edge("b", END);
        assert!(compile_error(branching).contains("more than one outgoing edge"));

        let orphan = StateGraph::new()
            .add_node("a", appending("a"))
            .add_node("b", appending("b"))
            .set_entry_point("a")
            .add_edge("a", END)
            .add_edge("b", END);
        assert!(compile_error(orphan).contains("unreachable"));

        let unknown_target = StateGraph::new()
            .add_node("a", appending("a"))
            .set_entry_point("a")
            .add_edge("a", "z");
        assert!(compile_error(unknown_target).contains("unknown node"));

        let duplicate = StateGraph::new()
            .add_node("a", appending("a"))
            .add_node("a", appending("b"))
            .set_entry_point("a")
            .add_edge("a", END);
        assert!(compile_error(duplicate).contains("defined twice"));
    }
}
