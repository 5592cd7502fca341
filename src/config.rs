use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV_VAR: &str = "URL_DECIPHER_CONFIG";

const DEFAULT_CONFIG: &str = r#"# url-decipher default configuration
[server]
host = "127.0.0.1"
port = 11436

[completion]
api_base = "https://api.cerebras.ai/v1"
model = "llama-4-scout-17b-16e-instruct"
# Name of the environment variable holding the API key. The key itself is never stored here.
api_key_env = "CEREBRAS_API_KEY"
timeout_secs = 60

[metadata]
api_base = "https://api.microlink.io"
probe_timeout_secs = 5
max_attempts = 3
preview_screenshot = true
preview_meta = false
"#;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_api_base")]
    pub api_base: String,
    #[serde(default = "default_completion_model")]
    pub model: String,
    #[serde(default = "default_completion_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_base: default_completion_api_base(),
            model: default_completion_model(),
            api_key_env: default_completion_key_env(),
            temperature: None,
            timeout_secs: default_completion_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    #[serde(default = "default_metadata_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_true")]
    pub preview_screenshot: bool,
    #[serde(default)]
    pub preview_meta: bool,
    /// Passed as `embed` on preview lookups. The service then answers with the
    /// embedded field instead of the JSON body, so leave unset unless the
    /// endpoint is a proxy that still returns JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_embed: Option<String>,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            api_base: default_metadata_api_base(),
            api_key_env: None,
            probe_timeout_secs: default_probe_timeout(),
            max_attempts: default_max_attempts(),
            preview_screenshot: true,
            preview_meta: false,
            preview_embed: None,
        }
    }
}

impl MetadataConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    11436
}

fn default_completion_api_base() -> String {
    "https://api.cerebras.ai/v1".to_string()
}

fn default_completion_model() -> String {
    "llama-4-scout-17b-16e-instruct".to_string()
}

fn default_metadata_api_base() -> String {
    "https://api.microlink.io".to_string()
}

fn default_completion_key_env() -> String {
    "CEREBRAS_API_KEY".to_string()
}

fn default_completion_timeout() -> u64 {
    60
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_max_attempts() -> usize {
    3
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Resolves the config file: explicit path, then `URL_DECIPHER_CONFIG`,
    /// then the per-user file (created with defaults when missing).
    pub fn load_auto(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(path) = env::var(CONFIG_ENV_VAR) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Self::load(&path);
            } else {
                tracing::warn!(
                    "{} points to non-existent file: {}",
                    CONFIG_ENV_VAR,
                    path.display()
                );
            }
        }

        Self::load_from_user_config()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let cfg: Config = toml::from_str(&content)?;
        cfg.validate()?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(cfg)
    }

    fn user_config_path() -> Result<PathBuf> {
        let home = env::var("HOME")
            .map_err(|_| AppError::Config("HOME env var not set".to_string()))?;
        Ok(Path::new(&home)
            .join(".config")
            .join("url-decipher")
            .join("config.toml"))
    }

    fn ensure_config_exists(path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }
        if !path.exists() {
            fs::write(path, DEFAULT_CONFIG)?;
            tracing::info!("Wrote default configuration to {}", path.display());
        }
        Ok(())
    }

    pub fn load_from_user_config() -> Result<Self> {
        let path = Self::user_config_path()?;
        Self::ensure_config_exists(&path)?;
        Self::load(&path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.metadata.max_attempts == 0 {
            return Err(AppError::Config(
                "metadata.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.metadata.probe_timeout_secs == 0 {
            return Err(AppError::Config(
                "metadata.probe_timeout_secs must be at least 1".to_string(),
            ));
        }
        for (field, base) in [
            ("completion.api_base", &self.completion.api_base),
            ("metadata.api_base", &self.metadata.api_base),
        ] {
            url::Url::parse(base).map_err(|e| {
                AppError::Config(format!("{} is not a valid URL ({}): {}", field, base, e))
            })?;
        }
        Ok(())
    }

    /// Reads the completion API key from the environment variable named in the config.
    pub fn completion_api_key(&self) -> Result<String> {
        read_secret(&self.completion.api_key_env)?.ok_or_else(|| {
            AppError::Config(format!(
                "Completion API key missing: set the {} environment variable",
                self.completion.api_key_env
            ))
        })
    }

    pub fn metadata_api_key(&self) -> Result<Option<String>> {
        match &self.metadata.api_key_env {
            Some(var) => read_secret(var),
            None => Ok(None),
        }
    }
}

fn read_secret(var: &str) -> Result<Option<String>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(Some(value.trim().to_string())),
        Ok(_) | Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(AppError::Config(format!(
            "{} contains non-unicode data",
            var
        ))),
    }
}

#[cfg(test)]
pub(crate) fn default_config_text() -> &'static str {
    DEFAULT_CONFIG
}

#[cfg(test)]
pub(crate) fn ensure_config_at(path: &Path) -> Result<()> {
    Config::ensure_config_exists(path)
}
