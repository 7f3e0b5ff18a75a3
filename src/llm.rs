//! Language model implementations and abstractions.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::ModelConfig;
use crate::error::{MathGraphError, Result};
use crate::message::{Message, Role, ToolCall};
use crate::tool::ToolDescription;

/// Result of a chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// Minimal abstraction around a chat completion provider.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
        stream: bool,
    ) -> Result<ModelCompletion>;
}

fn coalesce_error(status: reqwest::StatusCode, body: &str, provider: &str) -> MathGraphError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return MathGraphError::LanguageModel(format!("{provider} rate limit exceeded: {body}"));
    }
    MathGraphError::LanguageModel(format!("{provider} request failed with {status}: {body}"))
}

fn serialize_tool_arguments(args: &Value) -> String {
    serde_json::to_string(args).unwrap_or_else(|_| args.to_string())
}

fn parse_tool_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Client for OpenAI-compatible `/chat/completions` endpoints.
#[derive(Clone)]
pub struct OpenAIClient {
    http: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
    organization: Option<String>,
}

impl OpenAIClient {
    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        let api_key = cfg.api_key.clone().ok_or_else(|| {
            MathGraphError::LanguageModel(
                "missing OpenAI API key (set OPENAI_API_KEY or model.api_key)".into(),
            )
        })?;
        let base_url = cfg
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(cfg.timeout_secs))
                .build()
                .map_err(|err| MathGraphError::LanguageModel(format!("http client error: {err}")))?,
            model: cfg.model.clone(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            organization: cfg.organization.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn to_openai_messages(&self, messages: &[Message]) -> Vec<OpenAiMessage> {
        messages
            .iter()
            .map(|message| {
                let role = match message.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                }
                .to_string();

                let tool_calls = message.tool_call.as_ref().map(|call| {
                    vec![OpenAiToolCall {
                        id: call.id.clone(),
                        r#type: "function".to_string(),
                        function: OpenAiFunctionCall {
                            name: call.name.clone(),
                            arguments: serialize_tool_arguments(&call.arguments),
                        },
                    }]
                });

                let content = match (&message.tool_result, &message.tool_call) {
                    (Some(result), _) if message.role == Role::Tool => {
                        Some(serialize_tool_arguments(&result.output))
                    }
                    (_, Some(_)) if message.content.is_empty() => None,
                    _ => Some(message.content.clone()),
                };

                OpenAiMessage {
                    role,
                    content,
                    tool_call_id: message
                        .tool_result
                        .as_ref()
                        .and_then(|result| result.tool_call_id.clone()),
                    tool_calls,
                }
            })
            .collect()
    }

    fn to_openai_tools(&self, tools: &[ToolDescription]) -> Option<Vec<OpenAiTool>> {
        if tools.is_empty() {
            return None;
        }

        Some(
            tools
                .iter()
                .map(|tool| OpenAiTool {
                    r#type: "function".to_string(),
                    function: OpenAiFunction {
                        name: tool.name.clone(),
                        description: Some(tool.description.clone()),
                        parameters: tool.parameters.clone(),
                    },
                })
                .collect(),
        )
    }

    fn build_payload(&self, messages: &[Message], tools: &[ToolDescription], stream: bool) -> Value {
        let mut payload = json!({
            "model": self.model,
            "messages": self.to_openai_messages(messages),
            "stream": stream,
        });
        if let Some(tools) = self.to_openai_tools(tools) {
            payload["tools"] = json!(tools);
            payload["tool_choice"] = json!("auto");
        }
        payload
    }
}

#[async_trait]
impl LanguageModel for OpenAIClient {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
        stream: bool,
    ) -> Result<ModelCompletion> {
        let payload = self.build_payload(messages, tools, stream);
        debug!(
            model = %self.model,
            messages = messages.len(),
            tools = tools.len(),
            stream,
            "sending chat completion"
        );

        let mut builder = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            );
        if let Some(org) = &self.organization {
            builder = builder.header("OpenAI-Organization", org);
        }
        let resp = builder
            .json(&payload)
            .send()
            .await
            .map_err(|err| MathGraphError::LanguageModel(format!("OpenAI request error: {err}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, "openai"));
        }

        if stream {
            let mut aggregator = StreamAggregator::default();
            // Buffer raw bytes so multi-byte characters split across chunks survive.
            let mut pending: Vec<u8> = Vec::new();
            let mut bytes = resp.bytes_stream();
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|err| {
                    MathGraphError::LanguageModel(format!("OpenAI stream error: {err}"))
                })?;
                pending.extend_from_slice(&chunk);
                while let Some(newline) = pending.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=newline).collect();
                    aggregator.feed_line(&String::from_utf8_lossy(&line))?;
                }
            }
            aggregator.feed_line(&String::from_utf8_lossy(&pending))?;
            return Ok(aggregator.finish());
        }

        let body: OpenAiResponse = resp.json().await.map_err(|err| {
            MathGraphError::LanguageModel(format!("OpenAI response parse error: {err}"))
        })?;
        body.into_completion()
    }
}

/// Folds server-sent `chat.completion.chunk` events into one completion.
#[derive(Default)]
struct StreamAggregator {
    content: String,
    tool_calls: BTreeMap<usize, OpenAiToolCallState>,
}

impl StreamAggregator {
    fn feed_line(&mut self, line: &str) -> Result<()> {
        let line = line.trim();
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(());
        };
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            return Ok(());
        }
        let parsed: OpenAiStreamChunk = serde_json::from_str(data).map_err(|err| {
            MathGraphError::LanguageModel(format!("OpenAI stream parse error `{data}`: {err}"))
        })?;

        for choice in parsed.choices {
            if let Some(delta_content) = choice.delta.content {
                self.content.push_str(&delta_content);
            }
            for delta_call in choice.delta.tool_calls.unwrap_or_default() {
                let state = self.tool_calls.entry(delta_call.index).or_default();
                if let Some(id) = delta_call.id {
                    state.id = Some(id);
                }
                if let Some(function) = delta_call.function {
                    if let Some(name) = function.name {
                        state.name = Some(name);
                    }
                    if let Some(args) = function.arguments {
                        state.arguments.push_str(&args);
                    }
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> ModelCompletion {
        let tool_calls = self
            .tool_calls
            .into_values()
            .filter_map(|state| {
                let name = state.name?;
                Some(ToolCall {
                    id: state.id,
                    name,
                    arguments: parse_tool_arguments(&state.arguments),
                })
            })
            .collect();

        ModelCompletion {
            content: if self.content.is_empty() {
                None
            } else {
                Some(self.content)
            },
            tool_calls,
        }
    }
}

/// A deterministic model used for tests and demos.
///
/// Each scripted response is either a directive such as
/// `{"action":"call_tool","name":"add","arguments":{"a":1,"b":2}}` /
/// `{"action":"respond","content":"3"}` or plain text.
pub struct StubModel {
    responses: Mutex<VecDeque<String>>,
}

impl StubModel {
    pub fn new(responses: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
        })
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum StubDirective {
    Respond { content: String },
    CallTool { name: String, arguments: Value },
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn complete_chat(
        &self,
        _messages: &[Message],
        _tools: &[ToolDescription],
        _stream: bool,
    ) -> Result<ModelCompletion> {
        let raw = self
            .responses
            .lock()
            .map_err(|_| MathGraphError::LanguageModel("StubModel lock poisoned".into()))?
            .pop_front()
            .ok_or_else(|| {
                MathGraphError::LanguageModel("StubModel ran out of scripted responses".into())
            })?;

        Ok(match serde_json::from_str::<StubDirective>(&raw) {
            Ok(StubDirective::Respond { content }) => ModelCompletion {
                content: Some(content),
                tool_calls: Vec::new(),
            },
            Ok(StubDirective::CallTool { name, arguments }) => ModelCompletion {
                content: None,
                tool_calls: vec![ToolCall {
                    id: None,
                    name,
                    arguments,
                }],
            },
            Err(_) => ModelCompletion {
                content: Some(raw),
                tool_calls: Vec::new(),
            },
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    r#type: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiTool {
    r#type: String,
    function: OpenAiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

impl OpenAiResponse {
    fn into_completion(self) -> Result<ModelCompletion> {
        let first = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| MathGraphError::LanguageModel("OpenAI returned no choices".into()))?;

        let tool_calls = first
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: parse_tool_arguments(&call.function.arguments),
            })
            .collect();

        Ok(ModelCompletion {
            content: first.message.content,
            tool_calls,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Default)]
struct OpenAiToolCallState {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    choices: Vec<OpenAiDeltaChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiDeltaChoice {
    delta: OpenAiDelta,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    #[serde(default)]
    function: Option<OpenAiFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
