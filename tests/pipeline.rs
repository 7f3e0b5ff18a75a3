use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mathgraph::console::DEFAULT_QUESTION;
use mathgraph::tools::calculator_toolkit;
use mathgraph::{
    build_pipeline, Agent, AgentFactory, AgentHook, AgentProfile, ConversationState,
    LanguageModel, MathGraphError, Message, ModelCompletion, Role, StubModel, ToolDescription,
    ToolResult, REVIEWER_NODE, SOLVER_NODE,
};
use serde_json::{json, Value};

#[derive(Default)]
struct ResultLog {
    results: Mutex<Vec<(String, String, Value)>>,
}

#[async_trait]
impl AgentHook for ResultLog {
    async fn after_tool_result(&self, agent: &str, result: &ToolResult) -> mathgraph::Result<()> {
        self.results
            .lock()
            .unwrap()
            .push((agent.to_string(), result.name.clone(), result.output.clone()));
        Ok(())
    }
}

fn call(name: &str, a: i64, b: i64) -> String {
    json!({"action": "call_tool", "name": name, "arguments": {"a": a, "b": b}}).to_string()
}

fn respond(content: &str) -> String {
    json!({"action": "respond", "content": content}).to_string()
}

#[tokio::test]
async fn solver_adds_and_reviewer_multiplies() {
    let model = StubModel::new(vec![
        call("add", 3, 5),
        respond("3 + 5 = 8"),
        call("multiply", 8, 12),
        respond("(3 + 5) × 12 = 96"),
    ]);
    let log = Arc::new(ResultLog::default());
    let factory = AgentFactory::new(Arc::clone(&model), calculator_toolkit()).with_hook(log.clone());
    let (solver, reviewer) = factory
        .build_pair(&AgentProfile::solver(), &AgentProfile::reviewer())
        .unwrap();
    let graph = build_pipeline(solver, reviewer).unwrap();
    assert_eq!(graph.execution_order(), [SOLVER_NODE, REVIEWER_NODE]);

    let state = graph
        .invoke(ConversationState::from_question(DEFAULT_QUESTION))
        .await
        .unwrap();

    let entries = state.messages();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].role, Role::User);
    assert_eq!(entries[0].content, DEFAULT_QUESTION);
    assert_eq!(entries[1].role, Role::Assistant);
    assert!(!entries[1].content.contains("96"));
    assert!(entries[2].content.contains("96"));
    assert_eq!(model.remaining(), 0);

    let results = log.results.lock().unwrap().clone();
    assert_eq!(
        results,
        vec![
            ("solver".to_string(), "add".to_string(), json!({"operation": "addition", "result": 8})),
            (
                "reviewer".to_string(),
                "multiply".to_string(),
                json!({"operation": "multiplication", "result": 96})
            ),
        ]
    );
}

#[tokio::test]
async fn solver_cannot_reach_multiply() {
    let model = StubModel::new(vec![call("multiply", 3, 5), respond("unreachable")]);
    let factory = AgentFactory::new(model, calculator_toolkit());
    let (solver, reviewer) = factory
        .build_pair(&AgentProfile::solver(), &AgentProfile::reviewer())
        .unwrap();
    let graph = build_pipeline(solver, reviewer).unwrap();

    let err = graph
        .invoke(ConversationState::from_question("Multiply 3 and 5"))
        .await
        .unwrap_err();
    assert!(matches!(err, MathGraphError::ToolNotFound(name) if name == "multiply"));
}

#[test]
fn unknown_tool_in_profile_fails_at_build_time() {
    let factory = AgentFactory::new(StubModel::new(Vec::new()), calculator_toolkit());
    let profile = AgentProfile {
        tools: Some(vec!["add".into(), "divide".into()]),
        ..AgentProfile::solver()
    };
    let err = factory.build(&profile).err().unwrap();
    assert!(matches!(err, MathGraphError::UnknownTool { name, .. } if name == "divide"));
}

/// Answers with a fixed reply and keeps every request it receives.
struct TranscriptModel {
    reply: &'static str,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl TranscriptModel {
    fn replying(reply: &'static str) -> Arc<Self> {
        Arc::new(Self {
            reply,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<Vec<(Role, String)>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.iter().map(|m| (m.role, m.content.clone())).collect())
            .collect()
    }
}

#[async_trait]
impl LanguageModel for TranscriptModel {
    async fn complete_chat(
        &self,
        messages: &[Message],
        _tools: &[ToolDescription],
        _stream: bool,
    ) -> mathgraph::Result<ModelCompletion> {
        self.requests.lock().unwrap().push(messages.to_vec());
        Ok(ModelCompletion {
            content: Some(self.reply.to_string()),
            tool_calls: Vec::new(),
        })
    }
}

#[tokio::test]
async fn reviewer_receives_solver_reply() {
    let solver_model = TranscriptModel::replying("8");
    let reviewer_model = TranscriptModel::replying("96");
    let solver = Arc::new(Agent::new(Arc::clone(&solver_model)).with_system_prompt("solve"));
    let reviewer = Arc::new(Agent::new(Arc::clone(&reviewer_model)).with_system_prompt("review"));
    let graph = build_pipeline(solver, reviewer).unwrap();

    let state = graph
        .invoke(ConversationState::from_question("q"))
        .await
        .unwrap();

    assert_eq!(
        solver_model.seen(),
        vec![vec![(Role::System, "solve".to_string()), (Role::User, "q".to_string())]]
    );
    assert_eq!(
        reviewer_model.seen(),
        vec![vec![
            (Role::System, "review".to_string()),
            (Role::User, "q".to_string()),
            (Role::Assistant, "8".to_string()),
        ]]
    );
    assert_eq!(state.len(), 3);
    assert_eq!(state.last_reply(), Some("96"));
}
