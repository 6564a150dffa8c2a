use invorto_domain::config::{Config, ConfigSeverity};

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 8080);
}

#[test]
fn default_admission_budgets() {
    let config = Config::default();
    assert_eq!(config.admission.global_max_concurrency, 100);
    assert_eq!(config.admission.campaign_max_concurrency, 10);
    assert_eq!(config.admission.slot_ttl_secs, 30);
    // Recommended refresh cadence is TTL/3.
    assert_eq!(config.admission.refresh_divisor, 3);
}

#[test]
fn default_jitter_and_endpointing() {
    let config = Config::default();
    assert_eq!(config.session.jitter.min_delay_ms, 20);
    assert_eq!(config.session.jitter.max_delay_ms, 80);
    assert_eq!(config.session.jitter.reorder_window, 10);
    assert_eq!(config.session.jitter.max_concealment_frames, 3);
    assert_eq!(config.session.endpointing.silence_ms, 800);
    assert_eq!(config.session.endpointing.min_words, 1);
}

#[test]
fn empty_config_parses_with_defaults() {
    let config: Config = toml::from_str("").unwrap();
    assert_eq!(config.webhooks.max_attempts, 3);
    assert_eq!(config.tools.default_timeout_secs, 10);
}

#[test]
fn partial_overrides_parse() {
    let toml_str = r#"
[server]
host = "0.0.0.0"
port = 9000

[admission]
global_max_concurrency = 2

[session.endpointing]
silence_ms = 600

[[webhooks.endpoints]]
url = "https://hooks.example.com/voice"
tenant_id = "t1"
secret_env = "TENANT_T1_SECRET"
kinds = ["stt.final", "llm.final"]
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.admission.global_max_concurrency, 2);
    // Untouched siblings keep their defaults.
    assert_eq!(config.admission.campaign_max_concurrency, 10);
    assert_eq!(config.session.endpointing.silence_ms, 600);
    assert_eq!(config.session.endpointing.hard_cap_ms, 3_000);
    assert_eq!(config.webhooks.endpoints.len(), 1);
    assert_eq!(config.webhooks.endpoints[0].kinds.len(), 2);
}

#[test]
fn default_config_validates_clean() {
    let issues = Config::default().validate();
    let errors: Vec<_> = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .collect();
    assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
}

#[test]
fn zero_global_cap_is_error() {
    let mut config = Config::default();
    config.admission.global_max_concurrency = 0;
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|i| i.field == "admission.global_max_concurrency"
            && i.severity == ConfigSeverity::Error));
}

#[test]
fn inverted_jitter_bounds_is_error() {
    let mut config = Config::default();
    config.session.jitter.min_delay_ms = 120;
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|i| i.field == "session.jitter.min_delay_ms"));
}

#[test]
fn vad_hysteresis_must_be_ordered() {
    let mut config = Config::default();
    config.session.vad.speech_off_db = config.session.vad.speech_on_db;
    let issues = config.validate();
    assert!(issues.iter().any(|i| i.field == "session.vad.speech_off_db"));
}

#[test]
fn webhook_endpoint_validation() {
    let toml_str = r#"
[[webhooks.endpoints]]
url = "ftp://bad.example.com"
tenant_id = ""
secret_env = ""
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert!(issues.iter().any(|i| i.field == "webhooks.endpoints[0].url"));
    assert!(issues
        .iter()
        .any(|i| i.field == "webhooks.endpoints[0].secret_env"));
    assert!(issues
        .iter()
        .any(|i| i.field == "webhooks.endpoints[0].tenant_id"));
}

#[test]
fn no_endpoints_is_only_a_warning() {
    let issues = Config::default().validate();
    let webhook_issue = issues
        .iter()
        .find(|i| i.field == "webhooks.endpoints")
        .expect("expected mirror-disabled warning");
    assert_eq!(webhook_issue.severity, ConfigSeverity::Warning);
}
