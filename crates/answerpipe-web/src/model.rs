use answerpipe_core::{Error, Result, ToolCall, ToolSchema};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Model used for answer generation and summarization.
    pub model: String,
    /// Model used for the tool-necessity check. Falls back to `model`.
    pub tool_model: String,
    pub request_timeout: Duration,
}

impl ModelConfig {
    pub fn new(base_url: String, api_key: Option<String>, model: String) -> Self {
        Self {
            base_url,
            api_key,
            tool_model: model.clone(),
            model,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Client for an OpenAI-compatible chat-completions service. One instance is
/// shared by the orchestrator (tool check + answer stream) and the fetch
/// engine (summarization fallback).
#[derive(Debug, Clone)]
pub struct ModelClient {
    client: reqwest::Client,
    config: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

impl ModelClient {
    pub fn new(client: reqwest::Client, config: ModelConfig) -> Self {
        Self { client, config }
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let base_url = env("ANSWERPIPE_MODEL_BASE_URL")
            .ok_or_else(|| Error::NotConfigured("missing ANSWERPIPE_MODEL_BASE_URL".to_string()))?;
        let model = env("ANSWERPIPE_MODEL")
            .ok_or_else(|| Error::NotConfigured("missing ANSWERPIPE_MODEL".to_string()))?;
        let mut config = ModelConfig::new(base_url, env("ANSWERPIPE_MODEL_API_KEY"), model);
        if let Some(tool_model) = env("ANSWERPIPE_TOOL_MODEL") {
            config.tool_model = tool_model;
        }
        Ok(Self::new(client, config))
    }

    fn endpoint_chat_completions(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn request_builder(&self) -> reqwest::RequestBuilder {
        let mut rb = self
            .client
            .post(self.endpoint_chat_completions())
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(k) = &self.config.api_key {
            rb = rb.header(reqwest::header::AUTHORIZATION, format!("Bearer {k}"));
        }
        rb
    }

    /// Non-streaming tool-necessity probe: sends the conversation plus the
    /// active tool schemas with `tool_choice: "auto"`. Returns the requested
    /// calls when the service finishes with `tool_calls`, `None` when it
    /// would rather answer directly.
    pub async fn check_tool_calls(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
    ) -> Result<Option<Vec<ToolCall>>> {
        let req = ChatCompletionsRequest {
            model: self.config.tool_model.clone(),
            messages: messages.to_vec(),
            max_tokens: Some(32_000),
            temperature: Some(0.7),
            top_p: Some(0.9),
            stream: Some(false),
            tools: if tools.is_empty() {
                None
            } else {
                Some(function_specs(tools))
            },
            tool_choice: if tools.is_empty() {
                None
            } else {
                Some("auto".to_string())
            },
        };

        let parsed = self.send_chat(&req).await?;
        let Some(choice) = parsed.choices.into_iter().next() else {
            return Ok(None);
        };
        if choice.finish_reason.as_deref() != Some("tool_calls") {
            return Ok(None);
        }
        let calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .into_iter()
            .map(|c| ToolCall {
                id: c.id,
                name: c.function.name,
                arguments: c.function.arguments,
            })
            .collect();
        if calls.is_empty() {
            return Ok(None);
        }
        Ok(Some(calls))
    }

    /// Plain non-streaming completion. Used for summarization.
    pub async fn chat(&self, messages: &[ChatMessage], max_tokens: Option<u64>) -> Result<String> {
        let req = ChatCompletionsRequest {
            model: self.config.model.clone(),
            messages: messages.to_vec(),
            max_tokens,
            temperature: Some(0.7),
            top_p: None,
            stream: Some(false),
            tools: None,
            tool_choice: None,
        };
        let parsed = self.send_chat(&req).await?;
        Ok(parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default())
    }

    /// Ask the service to compress `content` to approximately `max_chars`
    /// characters. Errors here are the caller's cue to hard-truncate.
    pub async fn summarize(&self, content: &str, max_chars: usize) -> Result<String> {
        let system = format!(
            "The following text is too long. Condense it so the output is \
             close to {max_chars} characters. Keep the important facts and \
             drop navigation, boilerplate, and other page-markup noise."
        );
        let messages = [ChatMessage::system(system), ChatMessage::user(content)];
        let out = self.chat(&messages, Some(max_chars as u64)).await?;
        if out.trim().is_empty() {
            return Err(Error::Upstream("empty summary".to_string()));
        }
        Ok(out)
    }

    async fn send_chat(&self, req: &ChatCompletionsRequest) -> Result<ChatCompletionsResponse> {
        let resp = self
            .request_builder()
            .timeout(self.config.request_timeout)
            .json(req)
            .send()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Upstream(format!(
                "model service chat.completions HTTP {status}"
            )));
        }
        resp.json()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))
    }

    /// Streaming completion: each received content delta arrives on the
    /// returned channel in order. The channel closes after the `[DONE]`
    /// sentinel or when the connection ends; a mid-stream transport error
    /// is delivered as a final `Err` item. Dropping the receiver stops the
    /// pump and aborts the upstream request.
    pub async fn chat_stream(
        &self,
        messages: &[ChatMessage],
    ) -> Result<mpsc::Receiver<Result<String>>> {
        let req = ChatCompletionsRequest {
            model: self.config.model.clone(),
            messages: messages.to_vec(),
            max_tokens: Some(32_000),
            temperature: Some(0.7),
            top_p: Some(0.9),
            stream: Some(true),
            tools: None,
            tool_choice: None,
        };

        // No total timeout on the streaming request: tokens may keep
        // arriving for longer than any sensible fixed budget. Connect
        // failures still surface immediately below.
        let resp = self
            .request_builder()
            .json(&req)
            .send()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Upstream(format!(
                "model service chat.completions HTTP {status}"
            )));
        }

        let (tx, rx) = mpsc::channel::<Result<String>>(32);
        tokio::spawn(async move {
            let mut stream = resp.bytes_stream();
            let mut buf: Vec<u8> = Vec::new();
            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(Err(Error::Upstream(e.to_string()))).await;
                        return;
                    }
                };
                buf.extend_from_slice(&chunk);
                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    match parse_sse_line(&line) {
                        SseLine::Done => return,
                        SseLine::Skip => {}
                        SseLine::Data(data) => match serde_json::from_str::<StreamChunk>(data) {
                            Ok(chunk) => {
                                let content = chunk
                                    .choices
                                    .into_iter()
                                    .next()
                                    .and_then(|c| c.delta.content);
                                if let Some(content) = content {
                                    if !content.is_empty()
                                        && tx.send(Ok(content)).await.is_err()
                                    {
                                        return;
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "skipping undecodable stream chunk");
                            }
                        },
                    }
                }
            }
        });
        Ok(rx)
    }
}

enum SseLine<'a> {
    Data(&'a str),
    Done,
    Skip,
}

/// One line of a `text/event-stream` body: `data:` payloads are extracted,
/// the `[DONE]` sentinel terminates, comments and blank lines are skipped.
fn parse_sse_line(line: &str) -> SseLine<'_> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return SseLine::Skip;
    }
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    SseLine::Data(data)
}

fn function_specs(tools: &[ToolSchema]) -> Vec<serde_json::Value> {
    tools
        .iter()
        .map(|t| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                },
            })
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallSpec>,
}

#[derive(Debug, Clone, Deserialize)]
struct ToolCallSpec {
    #[serde(default)]
    id: String,
    function: FunctionSpec,
}

#[derive(Debug, Clone, Deserialize)]
struct FunctionSpec {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}
