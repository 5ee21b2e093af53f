use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use arbor_core::config::ModelConfig;
use arbor_core::error::{ArborError, Result};
use arbor_core::traits::LlmClient;
use arbor_core::types::*;

use super::presets::{build_extra_headers, endpoint, get_preset};

/// OpenAI-compatible client. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
///
/// Structured output is requested through forced function calling: the
/// schema is offered as a single tool the model must call, and that call's
/// arguments become `ModelResponse::structured`.
pub struct OpenAiClient {
    http: Client,
}

impl OpenAiClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
}

#[derive(Serialize, Debug)]
pub(crate) struct OaiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OaiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl OaiMessage {
    fn text(role: &str, content: String) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct OaiToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default = "function_type")]
    r#type: String,
    function: OaiFunction,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct OaiFunction {
    name: String,
    /// Usually a JSON string; some servers send an object instead.
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Serialize)]
pub(crate) struct OaiTool {
    r#type: String,
    function: OaiToolDef,
}

#[derive(Serialize)]
pub(crate) struct OaiToolDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OaiToolCall>>,
}

#[derive(Deserialize, Debug)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

pub(crate) fn convert_tools(tools: &[ToolDefinition]) -> Vec<OaiTool> {
    tools
        .iter()
        .map(|t| OaiTool {
            r#type: "function".to_string(),
            function: OaiToolDef {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

pub(crate) fn convert_messages(system_prompt: &str, messages: Vec<ChatMessage>) -> Vec<OaiMessage> {
    let mut oai_msgs = Vec::with_capacity(messages.len() + 1);

    if !system_prompt.trim().is_empty() {
        oai_msgs.push(OaiMessage::text("system", system_prompt.to_string()));
    }

    for msg in messages {
        match msg.role {
            Role::Human => oai_msgs.push(OaiMessage::text("user", msg.text())),
            Role::Assistant => {
                let calls = msg.tool_calls();
                let text = msg.text();
                if calls.is_empty() {
                    oai_msgs.push(OaiMessage::text("assistant", text));
                } else {
                    let calls: Vec<OaiToolCall> = calls
                        .into_iter()
                        .map(|c| OaiToolCall {
                            id: Some(c.id),
                            r#type: function_type(),
                            function: OaiFunction {
                                name: c.name,
                                arguments: serde_json::Value::String(c.arguments.to_string()),
                            },
                        })
                        .collect();
                    oai_msgs.push(OaiMessage {
                        role: "assistant".to_string(),
                        content: if text.is_empty() { None } else { Some(text) },
                        tool_calls: Some(calls),
                        tool_call_id: None,
                    });
                }
            }
            Role::Tool => {
                for block in msg.content {
                    if let ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } = block
                    {
                        oai_msgs.push(OaiMessage {
                            role: "tool".to_string(),
                            content: Some(content),
                            tool_calls: None,
                            tool_call_id: Some(tool_use_id),
                        });
                    }
                }
            }
        }
    }

    oai_msgs
}

/// Turn raw provider tool calls into `ToolCall`s.
///
/// String arguments are parsed as JSON (unparseable becomes `{}`) and calls
/// without an id get `<name>-<n>`.
pub(crate) fn normalize_calls(raw: Vec<OaiToolCall>) -> Vec<ToolCall> {
    raw.into_iter()
        .enumerate()
        .map(|(i, tc)| {
            let arguments = match tc.function.arguments {
                serde_json::Value::String(s) if s.trim().is_empty() => serde_json::json!({}),
                serde_json::Value::String(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
                    warn!(tool = %tc.function.name, error = %e, "Unparseable tool arguments");
                    serde_json::json!({})
                }),
                serde_json::Value::Null => serde_json::json!({}),
                other => other,
            };
            let id = tc
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("{}-{}", tc.function.name, i + 1));
            ToolCall::new(id, tc.function.name, arguments)
        })
        .collect()
}

fn build_body(config: &ModelConfig, request: ModelRequest) -> ChatRequest {
    let mut tools = convert_tools(&request.tools);
    let mut tool_choice = if tools.is_empty() {
        None
    } else {
        Some(serde_json::Value::String(request.tool_choice.as_str().to_string()))
    };

    if let Some(structured) = &request.structured {
        tools = vec![OaiTool {
            r#type: "function".to_string(),
            function: OaiToolDef {
                name: structured.name.clone(),
                description: format!("Respond with a {} object.", structured.name),
                parameters: structured.schema.clone(),
            },
        }];
        tool_choice = Some(serde_json::json!({
            "type": "function",
            "function": { "name": structured.name }
        }));
    }

    ChatRequest {
        model: config.model_id.clone(),
        messages: convert_messages(&request.system_prompt, request.messages),
        max_tokens: config.max_tokens,
        temperature: Some(config.temperature),
        stream: false,
        tools,
        tool_choice,
    }
}

fn parse_response(body: ChatResponse, structured: Option<&StructuredOutput>) -> Result<ModelResponse> {
    let usage = body
        .usage
        .map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    let message = body
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| ArborError::ModelParse("response has no choices".into()))?;

    let content = message.content.unwrap_or_default();
    let calls = normalize_calls(message.tool_calls.unwrap_or_default());

    let Some(structured) = structured else {
        return Ok(ModelResponse {
            content,
            structured: None,
            tool_calls: calls,
            usage,
        });
    };

    // Forced call first; some servers ignore tool_choice and answer in JSON text.
    let value = match calls.into_iter().find(|c| c.name == structured.name) {
        Some(call) => call.arguments,
        None => serde_json::from_str(strip_fences(&content)).map_err(|e| {
            ArborError::ModelParse(format!("expected {} output: {}", structured.name, e))
        })?,
    };

    Ok(ModelResponse {
        content,
        structured: Some(value),
        tool_calls: Vec::new(),
        usage,
    })
}

fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|t| t.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

impl LlmClient for OpenAiClient {
    fn invoke(
        &self,
        config: &ModelConfig,
        request: ModelRequest,
    ) -> BoxFuture<'_, Result<ModelResponse>> {
        let config = config.clone();

        Box::pin(async move {
            let url = endpoint(&config.provider, config.base_url.as_deref());
            let structured = request.structured.clone();
            let body = build_body(&config, request);

            debug!(
                model = %config.model_id,
                messages = body.messages.len(),
                tools = body.tools.len(),
                "Sending model request"
            );

            let mut req = self
                .http
                .post(&url)
                .timeout(Duration::from_secs(config.timeout_secs))
                .json(&body);

            if let Some(api_key) = &config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            // Apply extra headers from preset and user config
            let preset = get_preset(&config.provider);
            for (k, v) in build_extra_headers(preset.as_ref(), &config.extra_headers) {
                req = req.header(k, v);
            }

            let response = req.send().await.map_err(|e| {
                if e.is_timeout() {
                    ArborError::ModelTimeout(config.timeout_secs)
                } else {
                    ArborError::ModelRequest(e.to_string())
                }
            })?;

            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                if status == StatusCode::TOO_MANY_REQUESTS {
                    return Err(ArborError::RateLimited(body));
                }
                return Err(ArborError::ModelRequest(format!("HTTP {}: {}", status, body)));
            }

            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|e| ArborError::ModelParse(e.to_string()))?;

            parse_response(parsed, structured.as_ref())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(message: serde_json::Value) -> ChatResponse {
        serde_json::from_value(json!({
            "choices": [{ "message": message }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 5 }
        }))
        .unwrap()
    }

    #[test]
    fn test_convert_messages_maps_roles() {
        let call = ToolCall::new("c1", "add", json!({"a": 2, "b": 2}));
        let msgs = convert_messages(
            "be brief",
            vec![
                ChatMessage::human("2+2"),
                ChatMessage::assistant_with_calls("", &[call]),
                ChatMessage::tool_results(vec![ContentBlock::ToolResult {
                    tool_use_id: "c1".into(),
                    content: "4".into(),
                    is_error: false,
                }]),
            ],
        );
        let roles: Vec<&str> = msgs.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["system", "user", "assistant", "tool"]);
        assert!(msgs[2].content.is_none());
        assert_eq!(msgs[3].tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_normalize_calls() {
        let raw: Vec<OaiToolCall> = serde_json::from_value(json!([
            { "id": "call_1", "function": { "name": "add", "arguments": "{\"a\":1,\"b\":2}" } },
            { "function": { "name": "prod", "arguments": "not json" } },
            { "id": "", "function": { "name": "add", "arguments": { "a": 3, "b": 4 } } }
        ]))
        .unwrap();
        let calls = normalize_calls(raw);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].arguments, json!({"a": 1, "b": 2}));
        assert_eq!(calls[1].id, "prod-2");
        assert_eq!(calls[1].arguments, json!({}));
        assert_eq!(calls[2].id, "add-3");
        assert_eq!(calls[2].arguments, json!({"a": 3, "b": 4}));
    }

    #[test]
    fn test_structured_request_forces_function() {
        let request = ModelRequest::new("sys", vec![ChatMessage::human("x")])
            .with_structured("plan", json!({"type": "object"}));
        let body = build_body(&ModelConfig::new("openai", "gpt-4o-mini"), request);
        assert_eq!(body.tools.len(), 1);
        assert_eq!(body.tool_choice.unwrap()["function"]["name"], "plan");
        assert!(!body.stream);
    }

    #[test]
    fn test_tool_choice_only_with_tools() {
        let request = ModelRequest::new("sys", vec![]);
        let body = build_body(&ModelConfig::new("openai", "m"), request);
        assert!(body.tool_choice.is_none());

        let request = ModelRequest::new("sys", vec![]).with_tools(
            vec![ToolDefinition {
                name: "add".into(),
                description: "Add".into(),
                input_schema: json!({"type": "object"}),
            }],
            ToolChoice::Required,
        );
        let body = build_body(&ModelConfig::new("openai", "m"), request);
        assert_eq!(body.tool_choice, Some(json!("required")));
    }

    #[test]
    fn test_parse_structured_from_forced_call() {
        let body = response(json!({
            "content": null,
            "tool_calls": [{ "id": "c", "function": { "name": "plan", "arguments": "{\"goal\":\"g\"}" } }]
        }));
        let structured = StructuredOutput { name: "plan".into(), schema: json!({}) };
        let parsed = parse_response(body, Some(&structured)).unwrap();
        assert_eq!(parsed.structured, Some(json!({"goal": "g"})));
        assert!(parsed.tool_calls.is_empty());
        assert_eq!(parsed.usage.total(), 17);
    }

    #[test]
    fn test_parse_structured_from_fenced_text() {
        let body = response(json!({ "content": "```json\n{\"goal\":\"g\"}\n```" }));
        let structured = StructuredOutput { name: "plan".into(), schema: json!({}) };
        let parsed = parse_response(body, Some(&structured)).unwrap();
        assert_eq!(parsed.structured, Some(json!({"goal": "g"})));
    }

    #[test]
    fn test_parse_structured_garbage_is_parse_error() {
        let body = response(json!({ "content": "sure thing" }));
        let structured = StructuredOutput { name: "plan".into(), schema: json!({}) };
        let err = parse_response(body, Some(&structured)).unwrap_err();
        assert!(matches!(err, ArborError::ModelParse(_)));
    }

    #[test]
    fn test_empty_choices_is_parse_error() {
        let body: ChatResponse = serde_json::from_value(json!({ "choices": [] })).unwrap();
        assert!(parse_response(body, None).is_err());
    }
}
