//! Client for the metadata-lookup API, plus the validation prober built on it.

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::variations::generate_url_variations;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Screenshot {
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreviewData {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub screenshot: Option<Screenshot>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataResponse {
    pub status: String,
    #[serde(default)]
    pub data: Option<PreviewData>,
}

impl MetadataResponse {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Optional lookup flags. Unset flags are left off the query string.
#[derive(Debug, Clone, Default)]
pub struct LookupOptions {
    pub screenshot: Option<bool>,
    pub meta: Option<bool>,
    pub embed: Option<String>,
}

impl LookupOptions {
    fn query_pairs(&self, target: &str) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("url", target.to_string())];
        if let Some(screenshot) = self.screenshot {
            pairs.push(("screenshot", screenshot.to_string()));
        }
        if let Some(meta) = self.meta {
            pairs.push(("meta", meta.to_string()));
        }
        if let Some(embed) = &self.embed {
            pairs.push(("embed", embed.clone()));
        }
        pairs
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationAttempt {
    pub url: String,
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub url: String,
    pub validated: bool,
    pub attempts: Vec<ValidationAttempt>,
}

pub fn check_max_attempts(max_attempts: usize) -> Result<usize> {
    if max_attempts == 0 {
        return Err(AppError::InvalidRequest(
            "max_attempts must be at least 1".to_string(),
        ));
    }
    Ok(max_attempts)
}

pub struct MetadataClient {
    client: Client,
    api_base: String,
    api_key: Option<String>,
    probe_timeout: Duration,
    preview_options: LookupOptions,
}

impl MetadataClient {
    pub fn new(api_base: String, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("url-decipher/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                AppError::Config(format!("Failed to build HTTP client for {}: {}", api_base, e))
            })?;

        Ok(Self {
            client,
            api_base,
            api_key,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            preview_options: LookupOptions {
                screenshot: Some(true),
                meta: Some(false),
                embed: None,
            },
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(
            Self::new(config.metadata.api_base.clone(), config.metadata_api_key()?)?
                .with_probe_timeout(config.metadata.probe_timeout())
                .with_preview_options(LookupOptions {
                    screenshot: Some(config.metadata.preview_screenshot),
                    meta: Some(config.metadata.preview_meta),
                    embed: config.metadata.preview_embed.clone(),
                }),
        )
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_preview_options(mut self, options: LookupOptions) -> Self {
        self.preview_options = options;
        self
    }

    async fn send_lookup(
        &self,
        target: &str,
        options: &LookupOptions,
        timeout: Duration,
    ) -> Result<reqwest::Response> {
        let endpoint = format!("{}/", self.api_base.trim_end_matches('/'));
        let mut request = self
            .client
            .get(&endpoint)
            .query(&options.query_pairs(target));
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }
        Ok(request.timeout(timeout).send().await?)
    }

    /// One metadata lookup, bounded by the probe timeout. Non-success HTTP
    /// statuses are reported as transport errors.
    pub async fn lookup(&self, target: &str, options: &LookupOptions) -> Result<MetadataResponse> {
        let response = self
            .send_lookup(target, options, self.probe_timeout)
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Transport(format!(
                "Metadata lookup for {} failed with status {}",
                target, status
            )));
        }
        response.json::<MetadataResponse>().await.map_err(|e| {
            AppError::Schema(format!("Metadata response for {} was malformed: {}", target, e))
        })
    }

    /// Best-effort preview. Failures are logged and swallowed.
    pub async fn fetch_preview(&self, target: &str) -> Option<PreviewData> {
        match self.lookup(target, &self.preview_options).await {
            Ok(body) if body.is_success() => body.data,
            Ok(body) => {
                tracing::debug!(url = %target, status = %body.status, "Preview lookup unsuccessful");
                None
            }
            Err(e) => {
                tracing::warn!(url = %target, error = %e, "Error fetching preview");
                None
            }
        }
    }

    /// A single probe. Never fails; problems are recorded on the attempt.
    pub async fn validate_url(&self, target: &str) -> ValidationAttempt {
        let response = match self
            .send_lookup(target, &LookupOptions::default(), self.probe_timeout)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return ValidationAttempt {
                    url: target.to_string(),
                    valid: false,
                    status: None,
                    error: Some(e.to_string()),
                }
            }
        };

        let status = response.status();
        if !status.is_success() {
            return ValidationAttempt {
                url: target.to_string(),
                valid: false,
                status: Some(status.as_u16()),
                error: None,
            };
        }

        match response.json::<MetadataResponse>().await {
            Ok(body) => ValidationAttempt {
                url: target.to_string(),
                valid: body.is_success(),
                status: Some(status.as_u16()),
                error: None,
            },
            Err(e) => ValidationAttempt {
                url: target.to_string(),
                valid: false,
                status: Some(status.as_u16()),
                error: Some(AppError::from(e).to_string()),
            },
        }
    }

    /// Probes the first `max_attempts` variations of `base_url` in order and
    /// stops at the first valid one.
    pub async fn find_valid_url(
        &self,
        base_url: &str,
        max_attempts: usize,
    ) -> Result<ValidationOutcome> {
        check_max_attempts(max_attempts)?;
        let variations = generate_url_variations(base_url)?;
        let mut attempts = Vec::new();

        for candidate in variations.into_iter().take(max_attempts) {
            let attempt = self.validate_url(&candidate).await;
            tracing::debug!(
                url = %attempt.url,
                valid = attempt.valid,
                status = ?attempt.status,
                error = ?attempt.error,
                "Probe finished"
            );
            let valid = attempt.valid;
            attempts.push(attempt);

            if valid {
                tracing::info!(url = %candidate, probes = attempts.len(), "Validated URL");
                return Ok(ValidationOutcome {
                    url: candidate,
                    validated: true,
                    attempts,
                });
            }
        }

        tracing::info!(url = %base_url, probes = attempts.len(), "No variation validated");
        Ok(ValidationOutcome {
            url: base_url.to_string(),
            validated: false,
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use tokio::net::TcpListener;

    const OK_BODY: &str = r#"{"status":"success","data":{"title":"Cat Sailing"}}"#;
    const FAIL_BODY: &str = r#"{"status":"fail","data":null}"#;

    fn for_target(target: &str) -> Matcher {
        Matcher::UrlEncoded("url".into(), target.into())
    }

    #[tokio::test]
    async fn stops_at_first_valid_probe() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/")
            .match_query(for_target("https://catsailing.com"))
            .with_status(200)
            .with_body(FAIL_BODY)
            .expect(1)
            .create_async()
            .await;
        let second = server
            .mock("GET", "/")
            .match_query(for_target("https://catsailing.org"))
            .with_status(200)
            .with_body(OK_BODY)
            .expect(1)
            .create_async()
            .await;
        let third = server
            .mock("GET", "/")
            .match_query(for_target("https://catsailing.net"))
            .expect(0)
            .create_async()
            .await;

        let client = MetadataClient::new(server.url(), None).unwrap();
        let outcome = client
            .find_valid_url("https://catsailing.com", DEFAULT_MAX_ATTEMPTS)
            .await
            .unwrap();

        assert!(outcome.validated);
        assert_eq!(outcome.url, "https://catsailing.org");
        assert_eq!(outcome.attempts.len(), 2);
        assert!(!outcome.attempts[0].valid);
        assert_eq!(outcome.attempts[0].status, Some(200));
        assert!(outcome.attempts[1].valid);

        first.assert_async().await;
        second.assert_async().await;
        third.assert_async().await;
    }

    #[tokio::test]
    async fn first_probe_success_issues_one_call() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(OK_BODY)
            .expect(1)
            .create_async()
            .await;

        let client = MetadataClient::new(server.url(), None).unwrap();
        let outcome = client.find_valid_url("https://my-example.com", 3).await.unwrap();
        assert!(outcome.validated);
        assert_eq!(outcome.url, "https://my-example.com");
        assert_eq!(outcome.attempts.len(), 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn exhausted_attempts_fall_back_to_base_url() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/")
            .match_query(Matcher::Any)
            .with_status(404)
            .expect(3)
            .create_async()
            .await;

        let client = MetadataClient::new(server.url(), None).unwrap();
        let outcome = client.find_valid_url("https://catsailing.com", 3).await.unwrap();

        assert!(!outcome.validated);
        assert_eq!(outcome.url, "https://catsailing.com");
        assert_eq!(outcome.attempts.len(), 3);
        assert!(outcome.attempts.iter().all(|a| a.status == Some(404) && !a.valid));
        assert_eq!(
            outcome.attempts.iter().map(|a| a.url.as_str()).collect::<Vec<_>>(),
            vec![
                "https://catsailing.com",
                "https://catsailing.org",
                "https://catsailing.net"
            ]
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn short_variation_list_limits_probes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(FAIL_BODY)
            .expect(2)
            .create_async()
            .await;

        let client = MetadataClient::new(server.url(), None).unwrap();
        let outcome = client.find_valid_url("https://catsailing.io", 5).await.unwrap();
        assert!(!outcome.validated);
        assert_eq!(outcome.attempts.len(), 2);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn timed_out_probe_is_recorded_not_thrown() {
        // Accepts connections but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hold = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = MetadataClient::new(format!("http://{}", addr), None)
            .unwrap()
            .with_probe_timeout(Duration::from_millis(200));
        let attempt = client.validate_url("https://catsailing.com").await;

        assert!(!attempt.valid);
        assert_eq!(attempt.status, None);
        assert!(attempt.error.is_some());
        hold.abort();
    }

    #[tokio::test]
    async fn unreachable_service_is_recorded_per_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = MetadataClient::new(format!("http://{}", addr), None).unwrap();
        let outcome = client.find_valid_url("https://catsailing.com", 2).await.unwrap();
        assert!(!outcome.validated);
        assert_eq!(outcome.attempts.len(), 2);
        assert!(outcome.attempts.iter().all(|a| a.error.is_some()));
    }

    #[tokio::test]
    async fn malformed_base_url_is_an_error() {
        let client = MetadataClient::new("http://127.0.0.1:9".to_string(), None).unwrap();
        let err = client.find_valid_url("catsailing", 3).await.unwrap_err();
        assert!(matches!(err, AppError::MalformedInput(_)));
    }

    #[tokio::test]
    async fn preview_sends_flags_and_api_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/")
            .match_header("x-api-key", "mk-test")
            .match_query(Matcher::AllOf(vec![
                for_target("https://catsailing.com"),
                Matcher::UrlEncoded("screenshot".into(), "true".into()),
                Matcher::UrlEncoded("meta".into(), "false".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"status":"success","data":{"screenshot":{"url":"https://cdn.example/shot.png"}}}"#)
            .expect(1)
            .create_async()
            .await;

        let client = MetadataClient::new(server.url(), Some("mk-test".to_string())).unwrap();
        let preview = client.fetch_preview("https://catsailing.com").await.unwrap();
        assert_eq!(
            preview.screenshot.map(|s| s.url).as_deref(),
            Some("https://cdn.example/shot.png")
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn stalled_preview_gives_up_after_the_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hold = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = MetadataClient::new(format!("http://{}", addr), None)
            .unwrap()
            .with_probe_timeout(Duration::from_millis(200));
        let preview = tokio::time::timeout(
            Duration::from_secs(3),
            client.fetch_preview("https://catsailing.com"),
        )
        .await
        .expect("preview should finish within the timeout");

        assert!(preview.is_none());
        hold.abort();
    }

    #[tokio::test]
    async fn preview_forwards_embed_flag() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/")
            .match_query(Matcher::AllOf(vec![
                for_target("https://catsailing.com"),
                Matcher::UrlEncoded("embed".into(), "screenshot.url".into()),
            ]))
            .with_status(200)
            .with_body(OK_BODY)
            .expect(1)
            .create_async()
            .await;

        let client = MetadataClient::new(server.url(), None)
            .unwrap()
            .with_preview_options(LookupOptions {
                screenshot: Some(true),
                meta: None,
                embed: Some("screenshot.url".to_string()),
            });
        let preview = client.fetch_preview("https://catsailing.com").await.unwrap();
        assert_eq!(preview.title.as_deref(), Some("Cat Sailing"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn zero_attempts_is_rejected() {
        let client = MetadataClient::new("http://127.0.0.1:9".to_string(), None).unwrap();
        let err = client.find_valid_url("https://catsailing.com", 0).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn failed_preview_is_absorbed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let client = MetadataClient::new(server.url(), None).unwrap();
        assert!(client.fetch_preview("https://catsailing.com").await.is_none());
    }
}
