use crate::config::{default_config_text, ensure_config_at, Config};
use crate::error::AppError;
use std::time::Duration;

const CFG_FULL: &str = r#"
[server]
host = "0.0.0.0"
port = 8080

[completion]
api_base = "https://llm.example.com/v1"
model = "tiny-model"
api_key_env = "URL_DECIPHER_TEST_KEY_FULL"
temperature = 0.3
timeout_secs = 15

[metadata]
api_base = "https://meta.example.com"
api_key_env = "URL_DECIPHER_TEST_META_KEY"
probe_timeout_secs = 2
max_attempts = 5
preview_screenshot = false
preview_meta = true
"#;

const CFG_PARTIAL: &str = r#"
[completion]
api_base = "https://llm.example.com/v1"
model = "tiny-model"
"#;

#[test]
fn full_config_parses() {
    let cfg: Config = toml::from_str(CFG_FULL).unwrap();
    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.server.port, 8080);
    assert_eq!(cfg.completion.model, "tiny-model");
    assert_eq!(cfg.completion.temperature, Some(0.3));
    assert_eq!(cfg.completion.timeout_secs, 15);
    assert_eq!(cfg.metadata.max_attempts, 5);
    assert_eq!(cfg.metadata.probe_timeout(), Duration::from_secs(2));
    assert!(!cfg.metadata.preview_screenshot);
    assert!(cfg.metadata.preview_meta);
    cfg.validate().unwrap();
}

#[test]
fn missing_sections_fall_back_to_defaults() {
    let cfg: Config = toml::from_str(CFG_PARTIAL).unwrap();
    assert_eq!(cfg.server.port, 11436);
    assert_eq!(cfg.completion.api_key_env, "CEREBRAS_API_KEY");
    assert_eq!(cfg.completion.timeout_secs, 60);
    assert_eq!(cfg.metadata.api_base, "https://api.microlink.io");
    assert_eq!(cfg.metadata.max_attempts, 3);
    assert_eq!(cfg.metadata.probe_timeout(), Duration::from_secs(5));
    assert!(cfg.metadata.preview_screenshot);
    assert!(!cfg.metadata.preview_meta);
}

#[test]
fn partial_sections_fill_missing_fields() {
    let cfg: Config = toml::from_str(
        "[server]\nport = 9000\n\n[completion]\napi_key_env = \"MY_KEY\"\n\n[metadata]\nmax_attempts = 2\npreview_embed = \"screenshot.url\"\n",
    )
    .unwrap();
    let defaults = Config::default();
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.server.host, defaults.server.host);
    assert_eq!(cfg.completion.api_key_env, "MY_KEY");
    assert_eq!(cfg.completion.api_base, defaults.completion.api_base);
    assert_eq!(cfg.completion.model, defaults.completion.model);
    assert_eq!(cfg.metadata.api_base, defaults.metadata.api_base);
    assert_eq!(cfg.metadata.max_attempts, 2);
    assert_eq!(cfg.metadata.preview_embed.as_deref(), Some("screenshot.url"));
    assert_eq!(defaults.metadata.preview_embed, None);
    cfg.validate().unwrap();
}

#[test]
fn default_config_text_matches_built_in_defaults() {
    let cfg: Config = toml::from_str(default_config_text()).unwrap();
    let defaults = Config::default();
    assert_eq!(cfg.server.port, defaults.server.port);
    assert_eq!(cfg.completion.model, defaults.completion.model);
    assert_eq!(cfg.completion.api_base, defaults.completion.api_base);
    assert_eq!(cfg.metadata.api_base, defaults.metadata.api_base);
    assert_eq!(cfg.metadata.max_attempts, defaults.metadata.max_attempts);
}

#[test]
fn zero_attempts_is_rejected() {
    let mut cfg = Config::default();
    cfg.metadata.max_attempts = 0;
    assert!(matches!(cfg.validate(), Err(AppError::Config(_))));
}

#[test]
fn bad_api_base_is_rejected() {
    let mut cfg = Config::default();
    cfg.completion.api_base = "not a url".to_string();
    let err = cfg.validate().unwrap_err();
    assert!(err.to_string().contains("completion.api_base"));
}

#[test]
fn load_reads_file_and_reports_parse_errors() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.toml");
    std::fs::write(&good, CFG_FULL).unwrap();
    let cfg = Config::load(&good).unwrap();
    assert_eq!(cfg.server.port, 8080);

    let bad = dir.path().join("bad.toml");
    std::fs::write(&bad, "[server\nport = ").unwrap();
    assert!(matches!(Config::load(&bad), Err(AppError::TomlParse(_))));

    let missing = dir.path().join("missing.toml");
    assert!(matches!(Config::load(&missing), Err(AppError::Config(_))));
}

#[test]
fn explicit_path_wins() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("explicit.toml");
    std::fs::write(&path, CFG_FULL).unwrap();
    let cfg = Config::load_auto(Some(&path)).unwrap();
    assert_eq!(cfg.completion.model, "tiny-model");
}

#[test]
fn default_file_is_written_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");
    ensure_config_at(&path).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), default_config_text());

    std::fs::write(&path, CFG_PARTIAL).unwrap();
    ensure_config_at(&path).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), CFG_PARTIAL);
}

#[test]
fn api_key_is_read_from_named_variable() {
    let mut cfg = Config::default();
    cfg.completion.api_key_env = "URL_DECIPHER_TEST_KEY_PRESENT".to_string();
    std::env::set_var("URL_DECIPHER_TEST_KEY_PRESENT", "  sk-live  ");
    assert_eq!(cfg.completion_api_key().unwrap(), "sk-live");

    cfg.completion.api_key_env = "URL_DECIPHER_TEST_KEY_ABSENT".to_string();
    std::env::remove_var("URL_DECIPHER_TEST_KEY_ABSENT");
    let err = cfg.completion_api_key().unwrap_err();
    assert!(err.to_string().contains("URL_DECIPHER_TEST_KEY_ABSENT"));
}

#[test]
fn serialized_config_never_contains_secrets() {
    std::env::set_var("URL_DECIPHER_TEST_KEY_FULL", "sk-should-not-leak");
    let cfg: Config = toml::from_str(CFG_FULL).unwrap();
    let text = toml::to_string(&cfg).unwrap();
    assert!(!text.contains("sk-should-not-leak"));
    assert!(text.contains("URL_DECIPHER_TEST_KEY_FULL"));
}

#[test]
fn metadata_key_is_optional() {
    let cfg = Config::default();
    assert_eq!(cfg.metadata_api_key().unwrap(), None);
}
