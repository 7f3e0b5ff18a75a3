use std::sync::Arc;

use crate::agent::Agent;
use crate::error::Result;
use crate::graph::{AgentNode, CompiledGraph, StateGraph, END};
use crate::llm::LanguageModel;

pub const SOLVER_NODE: &str = "agent1";
pub const REVIEWER_NODE: &str = "agent2";

/// The two-stage pipeline: `agent1 -> agent2 -> END`.
pub fn build_pipeline<M: LanguageModel + 'static>(
    solver: Arc<Agent<M>>,
    reviewer: Arc<Agent<M>>,
) -> Result<CompiledGraph> {
    StateGraph::new()
        .add_node(SOLVER_NODE, AgentNode::new(solver))
        .add_node(REVIEWER_NODE, AgentNode::new(reviewer))
        .set_entry_point(SOLVER_NODE)
        .add_edge(SOLVER_NODE, REVIEWER_NODE)
        .add_edge(REVIEWER_NODE, END)
        .compile()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ConversationState;
    use crate::message::Role;
    use crate::StubModel;

    #[tokio::test]
    async fn appends_one_reply_per_agent() {
        let solver = Arc::new(Agent::new(StubModel::new(vec!["first".into()])));
        let reviewer = Arc::new(Agent::new(StubModel::new(vec!["second".into()])));
        let graph = build_pipeline(solver, reviewer).unwrap();

        assert_eq!(graph.execution_order(), [SOLVER_NODE, REVIEWER_NODE]);

        let state = graph
            .invoke(ConversationState::from_question("q"))
            .await
            .unwrap();
        assert_eq!(state.len(), 3);
        assert_eq!(state.messages()[1].role, Role::Assistant);
        assert_eq!(state.messages()[1].content, "first");
        assert_eq!(state.last().unwrap().content, "second");
    }
}
