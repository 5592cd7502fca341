use crate::error::{AppError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
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

/// JSON schema the provider must constrain its answer to.
#[derive(Debug, Clone)]
pub struct ResponseSchema {
    pub name: String,
    pub schema: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub temperature: Option<f32>,
    pub response_schema: Option<ResponseSchema>,
}

/// A hosted chat-completion endpoint. Returns the raw text content of the first choice.
#[async_trait]
pub trait CompletionApi: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

pub struct LLMClient {
    client: Client,
    api_base: String,
    api_key: String,
}

impl LLMClient {
    pub fn new(api_base: String, api_key: String, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| {
                AppError::Config(format!("Failed to build HTTP client for {}: {}", api_base, e))
            })?;

        Ok(Self {
            client,
            api_base,
            api_key,
        })
    }

    fn build_body(request: &CompletionRequest) -> serde_json::Value {
        let messages = vec![
            ChatMessage::system(request.system.clone()),
            ChatMessage::user(request.prompt.clone()),
        ];

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "stream": false,
        });

        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }

        if let Some(schema) = &request.response_schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "strict": true,
                    "schema": schema.schema,
                }
            });
        }

        body
    }
}

#[async_trait]
impl CompletionApi for LLMClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));
        let request_body = Self::build_body(request);

        tracing::debug!("Calling completion API: {} with model: {}", url, request.model);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Transport(format!(
                "Completion API request failed with status {}: {}",
                status,
                error_text.trim()
            )));
        }

        let v: serde_json::Value = response.json().await.map_err(|e| {
            AppError::Schema(format!("Completion API returned a non-JSON body: {}", e))
        })?;

        if let Some(content) = extract_content(&v) {
            return Ok(content);
        }

        if let Some(err_msg) = detect_provider_error(&v) {
            return Err(AppError::Transport(format!(
                "Completion provider {} (model {}) returned error: {}",
                self.api_base, request.model, err_msg
            )));
        }

        Err(AppError::Schema(format!(
            "Completion response missing content field: {}",
            v
        )))
    }
}

fn extract_content(v: &serde_json::Value) -> Option<String> {
    let message = v
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c0| c0.get("message"))?;

    match message.get("content") {
        Some(serde_json::Value::String(s)) => Some(s.to_string()),
        // Some providers return content as array of parts
        Some(serde_json::Value::Array(parts)) => {
            let mut out = String::new();
            for p in parts {
                if let Some(s) = p.as_str() {
                    out.push_str(s);
                } else if let Some(t) = p.get("text").and_then(|t| t.as_str()) {
                    out.push_str(t);
                }
            }
            if out.is_empty() {
                None
            } else {
                Some(out)
            }
        }
        _ => None,
    }
}

fn detect_provider_error(value: &serde_json::Value) -> Option<String> {
    if let Some(error_val) = value.get("error") {
        if let Some(obj) = error_val.as_object() {
            let message = ["message", "msg", "error_message", "detail"]
                .iter()
                .filter_map(|key| obj.get(*key))
                .filter_map(json_value_to_string)
                .map(|s| s.trim().to_string())
                .find(|s| !s.is_empty());
            let code = ["code", "status", "type"]
                .iter()
                .filter_map(|key| obj.get(*key))
                .filter_map(json_value_to_string)
                .map(|s| s.trim().to_string())
                .find(|s| !s.is_empty());
            return match (message, code) {
                (Some(msg), Some(code_str)) => Some(format!("{}: {}", code_str, msg)),
                (Some(msg), None) => Some(msg),
                _ => Some(error_val.to_string()),
            };
        } else if let Some(text) = json_value_to_string(error_val) {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }

    if let Some(success) = value.get("success").and_then(|v| v.as_bool()) {
        if !success {
            return Some(
                ["message", "msg", "error"]
                    .iter()
                    .filter_map(|key| value.get(*key))
                    .filter_map(json_value_to_string)
                    .find(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| "success flag was false".to_string()),
            );
        }
    }

    None
}

fn json_value_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        serde_json::Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(json_value_to_string)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(" "))
            }
        }
        serde_json::Value::Object(map) => ["message", "msg", "detail", "description"]
            .iter()
            .filter_map(|key| map.get(*key))
            .filter_map(json_value_to_string)
            .map(|s| s.trim().to_string())
            .find(|s| !s.is_empty())
            .or_else(|| Some(value.to_string())),
    }
}
