//! OpenAI-compatible chat-completions backend
//!
//! Speaks the `/chat/completions` protocol with function-style tool calls, so
//! it works against OpenAI, OpenRouter and self-hosted compatible servers.

use crate::LlmError;
use crate::http_client::HttpClient;
use crate::types::{LlmBackend, LlmInvocation, LlmResult, Message, Role, ToolCall, ToolSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// Default chat-completions endpoint
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Default environment variable holding the API key
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

const PROVIDER: &str = "openai";

/// OpenAI-compatible backend
#[derive(Clone)]
pub(crate) struct OpenAiBackend {
    client: Arc<HttpClient>,
    base_url: String,
    api_key: String,
    default_model: String,
    default_params: HttpParams,
}

/// HTTP request parameters
#[derive(Debug, Clone)]
pub(crate) struct HttpParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for HttpParams {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.0,
        }
    }
}

impl OpenAiBackend {
    /// Create a new backend
    ///
    /// # Errors
    ///
    /// Returns `LlmError::Misconfiguration` if the HTTP client cannot be constructed
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        default_model: String,
        default_params: HttpParams,
    ) -> Result<Self, LlmError> {
        let client = HttpClient::new()?;

        Ok(Self {
            client: Arc::new(client),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            default_model,
            default_params,
        })
    }

    /// Create a backend from the `[llm.openai]` configuration section
    ///
    /// # Errors
    ///
    /// Returns `LlmError::Misconfiguration` if the API key variable is unset or
    /// no model is configured.
    pub fn new_from_config(config: &crate::config::Config) -> Result<Self, LlmError> {
        let section = config.llm.openai.clone().unwrap_or_default();

        let api_key_env = section.api_key_env.as_deref().unwrap_or(DEFAULT_API_KEY_ENV);
        let api_key = std::env::var(api_key_env).map_err(|_| {
            LlmError::Misconfiguration(format!(
                "API key not found in environment variable '{api_key_env}'. \
                 Set this variable or configure a different api_key_env in [llm.openai]."
            ))
        })?;

        let default_model = section.model.clone().ok_or_else(|| {
            LlmError::Misconfiguration(
                "Model not specified in configuration. \
                 Set [llm.openai] model = \"model-name\" or pass --model."
                    .to_string(),
            )
        })?;

        let defaults = HttpParams::default();
        let default_params = HttpParams {
            max_tokens: section.max_tokens.unwrap_or(defaults.max_tokens),
            temperature: section.temperature.unwrap_or(defaults.temperature),
        };

        Self::new(api_key, section.base_url, default_model, default_params)
    }

    /// Resolve parameters for this invocation
    ///
    /// `inv.model` overrides the default model; `max_tokens` and `temperature`
    /// in `inv.metadata` override the configured values.
    fn resolve_params(&self, inv: &LlmInvocation) -> (String, HttpParams) {
        let model = if inv.model.is_empty() {
            self.default_model.clone()
        } else {
            inv.model.clone()
        };

        let max_tokens = inv
            .metadata
            .get("max_tokens")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(self.default_params.max_tokens);

        let temperature = inv
            .metadata
            .get("temperature")
            .and_then(|v| v.as_f64())
            .map(|v| v as f32)
            .unwrap_or(self.default_params.temperature);

        (
            model,
            HttpParams {
                max_tokens,
                temperature,
            },
        )
    }

    /// Convert messages to the wire format
    fn convert_messages(messages: &[Message]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|msg| WireMessage {
                role: match msg.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                }
                .to_string(),
                content: msg.content.clone(),
                tool_calls: msg
                    .tool_calls
                    .iter()
                    .map(|call| WireToolCall {
                        id: call.id.clone(),
                        kind: "function".to_string(),
                        function: WireFunctionCall {
                            name: call.name.clone(),
                            arguments: call.arguments.to_string(),
                        },
                    })
                    .collect(),
                tool_call_id: msg.tool_call_id.clone(),
            })
            .collect()
    }

    fn convert_tools(tools: &[ToolSpec]) -> Vec<WireTool> {
        tools
            .iter()
            .map(|tool| WireTool {
                kind: "function".to_string(),
                function: WireFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                },
            })
            .collect()
    }

    /// Decode tool calls; unparseable argument strings become `{"_raw": ...}`
    /// so the engine can report them back as invalid arguments.
    fn decode_tool_calls(calls: Vec<WireToolCall>) -> Vec<ToolCall> {
        calls
            .into_iter()
            .map(|call| {
                let arguments = serde_json::from_str(&call.function.arguments)
                    .unwrap_or_else(|_| serde_json::json!({ "_raw": call.function.arguments }));
                ToolCall::new(call.id, call.function.name, arguments)
            })
            .collect()
    }

    fn build_request(&self, inv: &LlmInvocation, stream: bool) -> (String, reqwest::RequestBuilder) {
        let (model, params) = self.resolve_params(inv);

        debug!(
            provider = PROVIDER,
            run_id = %inv.run_id,
            stage = %inv.stage,
            model = %model,
            tools = inv.tools.len(),
            stream = stream,
            "Invoking reasoning backend"
        );

        let body = ChatRequest {
            model: model.clone(),
            messages: Self::convert_messages(&inv.messages),
            tools: Self::convert_tools(&inv.tools),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            stream,
        };

        let request = self
            .client
            .inner()
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(&body);

        (model, request)
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn invoke(&self, inv: LlmInvocation) -> Result<LlmResult, LlmError> {
        let (model, request) = self.build_request(&inv, false);

        let response = self
            .client
            .execute_with_retry(request, inv.timeout, PROVIDER)
            .await?;

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(format!("Failed to parse chat response: {e}")))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Transport("chat response missing choices[0]".to_string()))?;

        let calls = Self::decode_tool_calls(choice.message.tool_calls.unwrap_or_default());
        let content = choice.message.content.unwrap_or_default();
        if content.is_empty() && calls.is_empty() {
            return Err(LlmError::Transport(
                "chat response has neither content nor tool calls".to_string(),
            ));
        }

        let mut result = LlmResult::new(content, PROVIDER, model).with_tool_calls(calls);
        if let Some(usage) = body.usage {
            result = result.with_tokens(usage.prompt_tokens, usage.completion_tokens);
        }
        if let Some(reason) = choice.finish_reason {
            result = result.with_extension("finish_reason", serde_json::json!(reason));
        }

        debug!(
            provider = PROVIDER,
            tokens_input = ?result.tokens_input,
            tokens_output = ?result.tokens_output,
            tool_calls = result.tool_calls.len(),
            "Reasoning invocation completed"
        );

        Ok(result)
    }

    async fn invoke_streaming(
        &self,
        inv: LlmInvocation,
        chunks: &UnboundedSender<String>,
    ) -> Result<LlmResult, LlmError> {
        let (model, request) = self.build_request(&inv, true);

        let mut response = self
            .client
            .execute_with_retry(request, inv.timeout, PROVIDER)
            .await?;

        let mut pending = SseLineBuffer::default();
        let mut text = String::new();

        'read: loop {
            let next = tokio::time::timeout(inv.timeout, response.chunk())
                .await
                .map_err(|_| LlmError::Timeout {
                    duration: inv.timeout,
                })?
                .map_err(|e| LlmError::Transport(format!("stream read failed: {e}")))?;

            let Some(bytes) = next else { break };
            pending.extend(&bytes);

            while let Some(line) = pending.next_line() {
                match parse_sse_line(line.trim()) {
                    SseLine::Delta(delta) => {
                        text.push_str(&delta);
                        let _ = chunks.send(delta);
                    }
                    SseLine::Done => break 'read,
                    SseLine::Ignore => {}
                }
            }
        }

        if text.is_empty() {
            return Err(LlmError::Transport("stream produced no content".to_string()));
        }

        Ok(LlmResult::new(text, PROVIDER, model).with_extension("streamed", serde_json::json!(true)))
    }
}

/// Raw stream bytes awaiting a line terminator.
///
/// Chunk boundaries can fall inside a multi-byte character, so bytes are
/// only decoded once their whole line has arrived.
#[derive(Debug, Default)]
struct SseLineBuffer {
    bytes: Vec<u8>,
}

impl SseLineBuffer {
    fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    fn next_line(&mut self) -> Option<String> {
        let newline = self.bytes.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.bytes.drain(..=newline).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Delta(String),
    Done,
    Ignore,
}

fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Ignore;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|s| !s.is_empty())
            .map_or(SseLine::Ignore, SseLine::Delta),
        Err(_) => SseLine::Ignore,
    }
}

#[derive(Debug, Clone, Serialize)]
struct WireMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Clone, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: String,
    function: WireFunction,
}

#[derive(Debug, Clone, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Clone, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}
