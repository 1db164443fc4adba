use anyhow::{anyhow, Result};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::schema::StructuredOutput;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const STRUCTURED_TOOL_NAME: &str = "structured_response";

/// Claude Messages API client. The only capability exposed is structured
/// extraction: every call forces a single tool invocation whose input schema
/// is derived from the target type, so the model cannot reply free-form.
#[derive(Clone)]
pub struct Claude {
    api_key: String,
    model: String,
    base_url: String,
    http: reqwest::Client,
}

impl Claude {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: ANTHROPIC_API_URL.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| anyhow!("ANTHROPIC_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key, model))
    }

    /// Override the API endpoint (test servers, proxies).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Ask the model for a `T`, enforced through a forced tool call whose
    /// input schema is `T`'s. Temperature is pinned to 0 so identical
    /// prompts produce stable output.
    pub async fn extract<T: StructuredOutput>(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<T> {
        let request = ChatRequest {
            model: self.model.clone(),
            max_tokens: 4096,
            temperature: 0.0,
            system: system_prompt.to_string(),
            messages: vec![WireMessage::user(user_prompt)],
            tools: vec![ToolDefinition {
                name: STRUCTURED_TOOL_NAME.to_string(),
                description: "Report the structured result of the task.".to_string(),
                input_schema: T::tool_schema(),
            }],
            tool_choice: serde_json::json!({
                "type": "tool",
                "name": STRUCTURED_TOOL_NAME,
            }),
        };

        let response = self.chat(&request).await?;
        let text = response.text();

        match response.into_tool_input() {
            Some(input) => serde_json::from_value(input)
                .map_err(|e| anyhow!("Failed to deserialize structured response: {}", e)),
            None => Err(anyhow!(
                "No tool call in Claude response (text: {:?})",
                text
            )),
        }
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_str(&self.api_key)?);
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/messages", self.base_url);

        debug!(model = %request.model, "Claude chat request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!("Claude API error ({}): {}", status, error_text));
        }

        Ok(response.json().await?)
    }
}

// --- Wire types ---

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    system: String,
    messages: Vec<WireMessage>,
    tools: Vec<ToolDefinition>,
    tool_choice: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

impl WireMessage {
    fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ToolDefinition {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    ToolUse { input: serde_json::Value },
}

impl ChatResponse {
    fn text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }

    fn into_tool_input(self) -> Option<serde_json::Value> {
        self.content.into_iter().find_map(|b| match b {
            ContentBlock::ToolUse { input } => Some(input),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_parses_forced_tool_call() {
        let raw = r#"{
            "id": "msg_1",
            "content": [
                {"type": "text", "text": "Reporting."},
                {"type": "tool_use", "id": "tu_1", "name": "structured_response", "input": {"answer": 42}}
            ],
            "stop_reason": "tool_use"
        }"#;
        let response: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.text().as_deref(), Some("Reporting."));
        let input = response.into_tool_input().unwrap();
        assert_eq!(input["answer"], 42);
    }

    #[test]
    fn response_without_tool_call_yields_none() {
        let raw = r#"{"content": [{"type": "text", "text": "I refuse."}]}"#;
        let response: ChatResponse = serde_json::from_str(raw).unwrap();
        assert!(response.into_tool_input().is_none());
    }

    #[test]
    fn request_serializes_tool_choice() {
        let request = ChatRequest {
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 4096,
            temperature: 0.0,
            system: "sys".to_string(),
            messages: vec![WireMessage::user("hello")],
            tools: vec![],
            tool_choice: serde_json::json!({"type": "tool", "name": "structured_response"}),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["tool_choice"]["type"], "tool");
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
