//! Turns a free-text description of a website into a structured URL guess.

use crate::error::{AppError, Result};
use crate::llm::{CompletionApi, CompletionRequest, ResponseSchema};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use url::Url;

pub const DEFAULT_MODEL: &str = "llama-4-scout-17b-16e-instruct";

pub const SYSTEM_PROMPT: &str = r#"You are a "URL Decipherer" specialized in interpreting human descriptions of websites to generate probable URLs. Your goal is to transform vague, fragmented, or contextual hints into actionable links.

**Core Instructions:**

1. **Input Handling:**
   - Accept text where a URL is implied but not explicit
   - Detect keywords: "site," "webpage," "URL," "domain," or contextual phrases

2. **Decipher Logic:**
   - **Explicit Mentions** (e.g., "example.com"): Output with high confidence
   - **Keyword Guessing**: Extract core terms and generate domain candidates
   - **Contextual Search**: Use semantic clues to combine keywords
   - **Domain Confusion**: List alternatives when TLD is uncertain
   - **Vague Descriptions**: Propose 1-3 best guesses
   - **No Match**: Use empty string "" for url field when no match found

3. **Domain Strategies:**
   - Prioritize .com, then .org/.net/.io
   - Consider known sites first (e.g., "video site" → youtube.com)
   - Combine keywords creatively into a single lowercase word (e.g., "cats sailboat" → catsailing.com)
4. **Output Requirements:**
   - Always include https:// protocol when URL is found
   - Use empty string "" for url field when no match
   - Set confidence based on match certainty
   - Provide clear explanation of reasoning
   - List alternatives as comma-separated string (e.g., "https://example.org,https://example.io")
   - Set needs_verification to true when confidence < high"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuessResult {
    pub url: String,
    pub confidence: Confidence,
    pub explanation: String,
    #[serde(rename = "alternatives_list")]
    pub alternatives: String,
    pub needs_verification: bool,
}

impl GuessResult {
    pub fn has_url(&self) -> bool {
        !self.url.trim().is_empty()
    }

    /// The comma-joined alternatives, trimmed, with blanks dropped.
    pub fn alternatives(&self) -> Vec<String> {
        self.alternatives
            .split(',')
            .map(str::trim)
            .filter(|alt| !alt.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Parses the completion text and checks it against the guess contract.
    pub fn from_completion(content: &str) -> Result<Self> {
        let body = strip_code_fence(content);
        let mut guess: GuessResult = serde_json::from_str(body).map_err(|e| {
            AppError::Schema(format!("Completion did not match the guess shape: {}", e))
        })?;

        guess.url = guess.url.trim().to_string();
        if guess.has_url() {
            let parsed = Url::parse(&guess.url).map_err(|e| {
                AppError::Schema(format!("Guessed url {:?} is not absolute: {}", guess.url, e))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(AppError::Schema(format!(
                    "Guessed url {:?} uses unsupported scheme {}",
                    guess.url,
                    parsed.scheme()
                )));
            }
        }

        Ok(guess)
    }
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

pub fn response_schema() -> ResponseSchema {
    ResponseSchema {
        name: "url_result".to_string(),
        schema: json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "Best guess URL or empty string if no match"
                },
                "confidence": {
                    "type": "string",
                    "enum": ["high", "medium", "low"],
                    "description": "Confidence level of the URL guess"
                },
                "explanation": {
                    "type": "string",
                    "description": "Brief rationale for the URL guess"
                },
                "alternatives_list": {
                    "type": "string",
                    "description": "Comma-separated list of alternative URL possibilities"
                },
                "needs_verification": {
                    "type": "boolean",
                    "description": "Whether the URL needs verification"
                }
            },
            "required": ["url", "confidence", "explanation", "alternatives_list", "needs_verification"],
            "additionalProperties": false
        }),
    }
}

pub struct GuessRequestor {
    api: Arc<dyn CompletionApi>,
    model: String,
    temperature: Option<f32>,
}

impl GuessRequestor {
    pub fn new(api: Arc<dyn CompletionApi>, model: impl Into<String>) -> Self {
        Self {
            api,
            model: model.into(),
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub async fn request_guess(&self, description: &str) -> Result<GuessResult> {
        let description = description.trim();
        if description.is_empty() {
            return Err(AppError::InvalidRequest(
                "description must not be empty".to_string(),
            ));
        }

        let request = CompletionRequest {
            model: self.model.clone(),
            system: SYSTEM_PROMPT.to_string(),
            prompt: description.to_string(),
            temperature: self.temperature,
            response_schema: Some(response_schema()),
        };

        let content = self.api.complete(&request).await?;
        let guess = GuessResult::from_completion(&content)?;

        tracing::info!(
            url = %guess.url,
            confidence = %guess.confidence,
            "Received URL guess"
        );

        Ok(guess)
    }
}
