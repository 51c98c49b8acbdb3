use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub emitter: EmitterConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration for the Provider Manager's ordered fallback chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Per-request timeout passed to `tokio::time::timeout` around each
    /// provider attempt.
    #[serde(default = "d_20000u")]
    pub default_timeout_ms: u64,
    /// How long a provider stays blacked out after all of its keys are
    /// exhausted, in seconds. Matches the 3600s default of the system this
    /// was modeled on.
    #[serde(default = "d_3600")]
    pub blackout_ttl_secs: u64,
    /// Max number of distinct keys tried within a single provider for one
    /// call before giving up on that provider (`M` in the key-rotation
    /// design).
    #[serde(default = "d_3")]
    pub max_key_attempts: u32,
    /// Providers in fallback order: the manager tries `providers[0]` first,
    /// then `providers[1]`, and so on.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 20_000,
            blackout_ttl_secs: 3600,
            max_key_attempts: 3,
            providers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    OpenaiCompat,
    Google,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    /// Header name (e.g. "Authorization", "x-api-key").
    #[serde(default)]
    pub header: Option<String>,
    /// Header value prefix (e.g. "Bearer ").
    #[serde(default)]
    pub prefix: Option<String>,
    /// Env var containing a single key.
    #[serde(default)]
    pub env: Option<String>,
    /// Direct key (for config-only setups; prefer `env` or `keys`).
    #[serde(default)]
    pub key: Option<String>,
    /// Multiple env var names, each resolved at startup into one key in the
    /// provider's key pool. Non-empty `keys` takes precedence over `env`/`key`.
    #[serde(default)]
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    #[default]
    ApiKey,
    QueryParam,
    None,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Path to the declarative tool metadata JSON document. When `None`,
    /// the registry loads empty and every task referencing a tool fails
    /// validation at plan admission.
    #[serde(default)]
    pub tools_path: Option<PathBuf>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { tools_path: None }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fallback per-task timeout used when a task's own `control.timeout_ms`
    /// is unset.
    #[serde(default = "d_300000")]
    pub default_task_timeout_ms: u64,
    /// How long an approval-gated task waits for a decision before the
    /// approval is treated as denied.
    #[serde(default = "d_900000")]
    pub approval_timeout_ms: u64,
    /// Upper bound on tasks dispatched concurrently within one session.
    /// `None` means unlimited (bounded only by the DAG's own ready set).
    #[serde(default)]
    pub max_concurrent_tasks: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_task_timeout_ms: 300_000,
            approval_timeout_ms: 900_000,
            max_concurrent_tasks: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task Emitter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitterConfig {
    /// Which client sink the engine dispatches client-targeted tasks to.
    /// Selected once at construction, per the dual-executor-addressing
    /// design decision.
    #[serde(default)]
    pub mode: ExecutionMode,
    /// WebSocket transport settings, used only when `mode = hosted`.
    #[serde(default)]
    pub websocket: WebSocketEmitterConfig,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Desktop,
            websocket: WebSocketEmitterConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// In-process sink: the client-side companion runs in the same process.
    #[default]
    Desktop,
    /// Out-of-process sink: a WebSocket-connected client companion.
    Hosted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketEmitterConfig {
    /// The companion process's WebSocket URL. Required when `mode = hosted`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "d_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "d_30")]
    pub heartbeat_interval_secs: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for WebSocketEmitterConfig {
    fn default() -> Self {
        Self {
            url: None,
            node_id: d_node_id(),
            auth_token: None,
            heartbeat_interval_secs: 30,
            reconnect: ReconnectConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "d_1000")]
    pub initial_delay_ms: u64,
    #[serde(default = "d_60000")]
    pub max_delay_ms: u64,
    #[serde(default = "d_2_0")]
    pub backoff_factor: f64,
    /// 0 means unlimited attempts.
    #[serde(default)]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_factor: 2.0,
            max_attempts: 0,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation Memory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Number of most-recent turns always included by the recency tier.
    #[serde(default = "d_20u")]
    pub recency_window: usize,
    /// Max turns retained for the semantic similarity tier before the
    /// oldest are evicted.
    #[serde(default = "d_500")]
    pub semantic_pool_size: usize,
    /// Cosine-similarity threshold below which `is_semantic_needed` decides
    /// the recency tier alone is not a good enough match and the semantic
    /// tier must be queried.
    #[serde(default = "d_035")]
    pub semantic_similarity_threshold: f32,
    /// How many top semantic matches `MemoryContext::render` includes.
    #[serde(default = "d_5u")]
    pub semantic_top_k: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            recency_window: 20,
            semantic_pool_size: 500,
            semantic_similarity_threshold: 0.35,
            semantic_top_k: 5,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good. Errors mean the
    /// engine cannot safely start; warnings are surfaced but non-fatal.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.providers.providers.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "providers.providers".into(),
                message: "no LLM providers configured".into(),
            });
        }
        if self.providers.max_key_attempts == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "providers.max_key_attempts".into(),
                message: "max_key_attempts must be at least 1".into(),
            });
        }
        if self.providers.blackout_ttl_secs == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "providers.blackout_ttl_secs".into(),
                message: "blackout_ttl_secs is 0 — an exhausted provider is probed again immediately"
                    .into(),
            });
        }

        let mut seen_ids = std::collections::HashSet::new();
        for (i, provider) in self.providers.providers.iter().enumerate() {
            if provider.id.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("providers.providers[{i}].id"),
                    message: "provider id must not be empty".into(),
                });
            }
            if !provider.id.is_empty() && !seen_ids.insert(provider.id.as_str()) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: format!("providers.providers[{i}].id"),
                    message: format!(
                        "duplicate provider id \"{}\" — later entry shadows the earlier one in the fallback chain",
                        provider.id
                    ),
                });
            }
            if provider.base_url.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("providers.providers[{i}].base_url"),
                    message: "base_url must not be empty".into(),
                });
            } else if !provider.base_url.starts_with("http://")
                && !provider.base_url.starts_with("https://")
            {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("providers.providers[{i}].base_url"),
                    message: format!(
                        "base_url must start with http:// or https:// (got \"{}\")",
                        provider.base_url
                    ),
                });
            }

            let needs_credentials = matches!(provider.auth.mode, AuthMode::ApiKey | AuthMode::QueryParam);
            if needs_credentials {
                let has_env = provider.auth.env.as_ref().is_some_and(|v| !v.is_empty());
                let has_key = provider.auth.key.as_ref().is_some_and(|v| !v.is_empty());
                let has_keys = !provider.auth.keys.is_empty();
                if !has_env && !has_key && !has_keys {
                    errors.push(ConfigError {
                        severity: ConfigSeverity::Error,
                        field: format!("providers.providers[{i}].auth"),
                        message: format!(
                            "provider \"{}\" uses {:?} auth mode but has no auth.env, auth.key, or auth.keys configured",
                            provider.id, provider.auth.mode
                        ),
                    });
                }
            }
        }

        if self.emitter.mode == ExecutionMode::Hosted {
            match &self.emitter.websocket.url {
                None => errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "emitter.websocket.url".into(),
                    message: "emitter.mode is \"hosted\" but emitter.websocket.url is unset".into(),
                }),
                Some(url) if !url.starts_with("ws://") && !url.starts_with("wss://") => {
                    errors.push(ConfigError {
                        severity: ConfigSeverity::Error,
                        field: "emitter.websocket.url".into(),
                        message: format!("url must start with ws:// or wss:// (got \"{url}\")"),
                    });
                }
                Some(_) => {}
            }
        }

        if !(0.0..=1.0).contains(&self.memory.semantic_similarity_threshold) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "memory.semantic_similarity_threshold".into(),
                message: "must be between 0.0 and 1.0".into(),
            });
        }
        if self.memory.recency_window == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "memory.recency_window".into(),
                message: "recency_window is 0 — every query falls through to the semantic tier".into(),
            });
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Default value helpers (serde)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_20000u() -> u64 {
    20_000
}
fn d_3600() -> u64 {
    3600
}
fn d_3() -> u32 {
    3
}
fn d_300000() -> u64 {
    300_000
}
fn d_900000() -> u64 {
    900_000
}
fn d_node_id() -> String {
    "ao-engine".into()
}
fn d_30() -> u64 {
    30
}
fn d_1000() -> u64 {
    1000
}
fn d_60000() -> u64 {
    60_000
}
fn d_2_0() -> f64 {
    2.0
}
fn d_20u() -> usize {
    20
}
fn d_500() -> usize {
    500
}
fn d_035() -> f32 {
    0.35
}
fn d_5u() -> usize {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            providers: ProvidersConfig {
                providers: vec![ProviderConfig {
                    id: "anthropic".into(),
                    kind: ProviderKind::Anthropic,
                    base_url: "https://api.anthropic.com".into(),
                    auth: AuthConfig {
                        mode: AuthMode::ApiKey,
                        env: Some("ANTHROPIC_API_KEY".into()),
                        ..AuthConfig::default()
                    },
                    default_model: None,
                }],
                ..ProvidersConfig::default()
            },
            ..Config::default()
        }
    }

    fn find_issue<'a>(issues: &'a [ConfigError], field_prefix: &str) -> Option<&'a ConfigError> {
        issues.iter().find(|e| e.field.starts_with(field_prefix))
    }

    #[test]
    fn valid_config_has_no_errors() {
        let issues = valid_config().validate();
        let errors: Vec<_> = issues
            .iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
    }

    #[test]
    fn empty_providers_is_warning() {
        let cfg = Config::default();
        let issues = cfg.validate();
        let issue =
            find_issue(&issues, "providers.providers").expect("expected no-providers warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn duplicate_provider_ids_is_warning() {
        let mut cfg = valid_config();
        let mut second = cfg.providers.providers[0].clone();
        second.auth.env = Some("ANTHROPIC_API_KEY_2".into());
        cfg.providers.providers.push(second);
        let issues = cfg.validate();
        let dup: Vec<_> = issues
            .iter()
            .filter(|e| e.message.contains("duplicate provider id"))
            .collect();
        assert_eq!(dup.len(), 1);
        assert_eq!(dup[0].severity, ConfigSeverity::Warning);
    }

    #[test]
    fn provider_bad_scheme_is_error() {
        let mut cfg = valid_config();
        cfg.providers.providers[0].base_url = "ftp://example.com".into();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "providers.providers[0].base_url").unwrap();
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn api_key_mode_without_credentials_is_error() {
        let mut cfg = valid_config();
        cfg.providers.providers[0].auth = AuthConfig {
            mode: AuthMode::ApiKey,
            ..AuthConfig::default()
        };
        let issues = cfg.validate();
        let issue = find_issue(&issues, "providers.providers[0].auth").unwrap();
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn keys_list_satisfies_credentials_requirement() {
        let mut cfg = valid_config();
        cfg.providers.providers[0].auth = AuthConfig {
            mode: AuthMode::ApiKey,
            keys: vec!["KEY_1".into(), "KEY_2".into()],
            ..AuthConfig::default()
        };
        let issues = cfg.validate();
        assert!(find_issue(&issues, "providers.providers[0].auth").is_none());
    }

    #[test]
    fn max_key_attempts_zero_is_error() {
        let mut cfg = valid_config();
        cfg.providers.max_key_attempts = 0;
        let issues = cfg.validate();
        let issue = find_issue(&issues, "providers.max_key_attempts").unwrap();
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn hosted_mode_requires_websocket_url() {
        let mut cfg = valid_config();
        cfg.emitter.mode = ExecutionMode::Hosted;
        let issues = cfg.validate();
        let issue = find_issue(&issues, "emitter.websocket.url").unwrap();
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn hosted_mode_with_valid_url_is_ok() {
        let mut cfg = valid_config();
        cfg.emitter.mode = ExecutionMode::Hosted;
        cfg.emitter.websocket.url = Some("wss://companion.local/ws".into());
        let issues = cfg.validate();
        assert!(find_issue(&issues, "emitter.websocket").is_none());
    }

    #[test]
    fn desktop_mode_does_not_require_websocket_url() {
        let cfg = valid_config();
        let issues = cfg.validate();
        assert!(find_issue(&issues, "emitter.websocket").is_none());
    }

    #[test]
    fn similarity_threshold_out_of_range_is_error() {
        let mut cfg = valid_config();
        cfg.memory.semantic_similarity_threshold = 1.5;
        let issues = cfg.validate();
        let issue = find_issue(&issues, "memory.semantic_similarity_threshold").unwrap();
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn config_defaults_deserialize_from_empty_toml() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.providers.blackout_ttl_secs, 3600);
        assert_eq!(cfg.providers.max_key_attempts, 3);
        assert_eq!(cfg.engine.default_task_timeout_ms, 300_000);
        assert_eq!(cfg.memory.recency_window, 20);
    }

    #[test]
    fn config_error_display_format() {
        let err = ConfigError {
            severity: ConfigSeverity::Error,
            field: "providers.providers".into(),
            message: "boom".into(),
        };
        assert_eq!(format!("{err}"), "[ERROR] providers.providers: boom");
    }
}
