use crate::config::Config;
use crate::error::Result;
use crate::guess::{Confidence, GuessRequestor, GuessResult};
use crate::llm::{CompletionApi, LLMClient};
use crate::metadata::{check_max_attempts, MetadataClient, PreviewData, ValidationOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecipherOptions {
    /// Probe URL variations after guessing.
    #[serde(default)]
    pub validate: bool,
    #[serde(default)]
    pub max_attempts: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecipherReport {
    pub request_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub description: String,
    pub guess: GuessResult,
    pub alternatives: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<PreviewData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationOutcome>,
}

/// Whether a guess earns a preview lookup: only confident, non-empty guesses do.
pub fn should_fetch_preview(guess: &GuessResult) -> bool {
    guess.confidence == Confidence::High && guess.has_url()
}

pub struct Decipherer {
    requestor: GuessRequestor,
    metadata: MetadataClient,
    max_attempts: usize,
}

impl Decipherer {
    pub fn new(requestor: GuessRequestor, metadata: MetadataClient, max_attempts: usize) -> Self {
        Self {
            requestor,
            metadata,
            max_attempts,
        }
    }

    /// Wires both API clients from configuration. Reads the completion API key
    /// from the environment.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.completion_api_key()?;
        let llm: Arc<dyn CompletionApi> = Arc::new(LLMClient::new(
            config.completion.api_base.clone(),
            api_key,
            config.completion.timeout_secs,
        )?);
        let requestor = GuessRequestor::new(llm, config.completion.model.clone())
            .with_temperature(config.completion.temperature);

        let metadata = MetadataClient::from_config(config)?;

        Ok(Self::new(requestor, metadata, config.metadata.max_attempts))
    }

    pub fn metadata(&self) -> &MetadataClient {
        &self.metadata
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Runs one full cycle. Guess failures abort it; preview and validation
    /// problems only leave their fields empty or unvalidated.
    pub async fn decipher(
        &self,
        description: &str,
        options: &DecipherOptions,
    ) -> Result<DecipherReport> {
        if let Some(max_attempts) = options.max_attempts {
            check_max_attempts(max_attempts)?;
        }

        let request_id = Uuid::new_v4();
        tracing::info!(%request_id, "Deciphering description");

        let guess = self.requestor.request_guess(description).await?;

        let preview = if should_fetch_preview(&guess) {
            self.metadata.fetch_preview(&guess.url).await
        } else {
            None
        };

        let validation = if options.validate && guess.has_url() {
            let attempts = options.max_attempts.unwrap_or(self.max_attempts);
            Some(self.metadata.find_valid_url(&guess.url, attempts).await?)
        } else {
            None
        };

        Ok(DecipherReport {
            request_id,
            generated_at: Utc::now(),
            description: description.trim().to_string(),
            alternatives: guess.alternatives(),
            guess,
            preview,
            validation,
        })
    }
}

impl fmt::Display for DecipherReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.guess.has_url() {
            writeln!(f, "Found URL: {}", self.guess.url)?;
            write!(f, "  {} confidence", self.guess.confidence)?;
            if self.guess.needs_verification {
                write!(f, " (needs verification)")?;
            }
            writeln!(f)?;
        } else {
            writeln!(f, "No match found. Try adding the site's purpose, visual elements you remember, or keywords from the domain.")?;
        }

        if let Some(preview) = &self.preview {
            if let Some(title) = &preview.title {
                writeln!(f, "  Title: {}", title)?;
            }
            if let Some(shot) = &preview.screenshot {
                writeln!(f, "  Preview: {}", shot.url)?;
            }
        }

        writeln!(f, "How I figured it out: {}", self.guess.explanation)?;

        if !self.alternatives.is_empty() {
            writeln!(f, "Other possibilities:")?;
            for alt in &self.alternatives {
                writeln!(f, "  - {}", alt)?;
            }
        }

        if let Some(validation) = &self.validation {
            if validation.validated {
                writeln!(f, "Validated: {}", validation.url)?;
            } else {
                writeln!(
                    f,
                    "Could not validate after {} attempt(s)",
                    validation.attempts.len()
                )?;
            }
        }
        Ok(())
    }
}

/// Marks one user-initiated request. Later generations supersede earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Generation(u64);

struct SessionState<T> {
    current: u64,
    latest: Option<T>,
}

/// Keeps only the result of the most recent request, whatever order the
/// responses arrive in.
pub struct Session<T> {
    state: Mutex<SessionState<T>>,
}

impl<T> Default for Session<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(SessionState {
                current: 0,
                latest: None,
            }),
        }
    }
}

impl<T> Session<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new request and clears whatever was displayed.
    pub async fn begin(&self) -> Generation {
        let mut state = self.state.lock().await;
        state.current += 1;
        state.latest = None;
        Generation(state.current)
    }

    /// Stores `value` if `generation` is still current. Returns whether it was kept.
    pub async fn complete(&self, generation: Generation, value: T) -> bool {
        self.complete_with(generation, value, |_| ()).await
    }

    /// Like [`Session::complete`], but also runs `show` on the stored value
    /// before the lock is released, so no newer request can start in between.
    pub async fn complete_with<F>(&self, generation: Generation, value: T, show: F) -> bool
    where
        F: FnOnce(&T),
    {
        let mut state = self.state.lock().await;
        if generation.0 != state.current {
            tracing::debug!(
                stale = generation.0,
                current = state.current,
                "Discarding stale result"
            );
            return false;
        }
        let stored = state.latest.insert(value);
        show(&*stored);
        true
    }

    pub async fn is_current(&self, generation: Generation) -> bool {
        self.state.lock().await.current == generation.0
    }

    /// Runs `f` only if `generation` is still current, holding the lock while it runs.
    pub async fn if_current<R>(&self, generation: Generation, f: impl FnOnce() -> R) -> Option<R> {
        let state = self.state.lock().await;
        (state.current == generation.0).then(f)
    }

    pub async fn latest(&self) -> Option<T>
    where
        T: Clone,
    {
        self.state.lock().await.latest.clone()
    }
}
