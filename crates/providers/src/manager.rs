//! Provider Manager: ordered fallback chain with per-key quota rotation.
//!
//! Configured providers are tried in the order they appear in
//! [`ProvidersConfig::providers`]. Within a provider, each configured key
//! resolves to its own adapter instance (a [`KeySlot`]); a quota-class
//! failure on one key rotates to the next key in that provider before the
//! manager gives up on the provider entirely and moves to the next one in
//! the chain. A provider that exhausts all of its keys is blacked out for
//! [`ProvidersConfig::blackout_ttl_secs`] so subsequent calls skip it
//! without re-paying the cost of trying every key again.

use crate::anthropic::AnthropicProvider;
use crate::google::GoogleProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::quota::is_quota_error;
use crate::traits::{ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider};
use ao_domain::config::{AuthConfig, ProviderConfig, ProviderKind, ProvidersConfig};
use ao_domain::error::{Error, Result};
use ao_domain::stream::{BoxStream, StreamEvent};
use ao_domain::trace::TraceEvent;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Key slots
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Health of a single key within a provider's key pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyStatus {
    Active,
    /// Marked out of quota; skipped until the provider is probed again.
    Exhausted,
}

/// One resolved key, with its own adapter instance and health state.
///
/// Building one adapter per key (rather than sharing a single adapter with
/// an internal [`crate::auth::AuthRotator`] pool) keeps quota bookkeeping
/// at the granularity the manager actually reasons about: whole keys
/// succeed or fail, not round-robin slots inside a shared client.
struct KeySlot {
    adapter: Arc<dyn LlmProvider>,
    status: Mutex<KeyStatus>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ManagedProvider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One configured provider entry in the fallback chain: its id plus the
/// key slots resolved from its `auth` config.
struct ManagedProvider {
    id: String,
    keys: Vec<KeySlot>,
    max_key_attempts: usize,
}

impl ManagedProvider {
    /// Construct one adapter per resolved key. Each per-key adapter gets a
    /// single-key [`AuthConfig`] so the underlying provider adapter never
    /// needs to know about the pool above it.
    fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        let resolved_keys = resolve_keys(&cfg.auth)?;

        let mut keys = Vec::with_capacity(resolved_keys.len().max(1));
        for key in &resolved_keys {
            let per_key_cfg = ProviderConfig {
                auth: AuthConfig {
                    key: Some(key.clone()),
                    ..AuthConfig::default()
                },
                ..cfg.clone()
            };
            let adapter = build_adapter(&per_key_cfg)?;
            keys.push(KeySlot {
                adapter,
                status: Mutex::new(KeyStatus::Active),
            });
        }

        if keys.is_empty() {
            // No auth configured at all (e.g. AuthMode::None): still build
            // a single adapter from the original config so keyless backends
            // work.
            let adapter = build_adapter(cfg)?;
            keys.push(KeySlot {
                adapter,
                status: Mutex::new(KeyStatus::Active),
            });
        }

        Ok(Self {
            id: cfg.id.clone(),
            keys,
            max_key_attempts: 0, // set by caller after construction
        })
    }

    fn active_key_indices(&self) -> Vec<usize> {
        self.keys
            .iter()
            .enumerate()
            .filter(|(_, slot)| *slot.status.lock() == KeyStatus::Active)
            .map(|(i, _)| i)
            .collect()
    }

    fn all_exhausted(&self) -> bool {
        self.keys
            .iter()
            .all(|slot| *slot.status.lock() == KeyStatus::Exhausted)
    }

    fn reset_all_keys(&self) {
        for slot in &self.keys {
            *slot.status.lock() = KeyStatus::Active;
        }
    }

    /// Try this provider, rotating through up to `max_key_attempts` active
    /// keys. Returns the last error if every attempted key fails.
    async fn try_chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let attempts = self.active_key_indices();
        let cap = attempts.len().min(self.max_key_attempts.max(1));
        let mut last_err = Error::AllKeysExhausted {
            provider: self.id.clone(),
        };

        for &idx in attempts.iter().take(cap) {
            let slot = &self.keys[idx];
            match slot.adapter.chat(req).await {
                Ok(resp) => return Ok(resp),
                Err(e) if is_quota_error(&e) => {
                    *slot.status.lock() = KeyStatus::Exhausted;
                    TraceEvent::ProviderKeyFailed {
                        provider: self.id.clone(),
                        key_index: idx,
                        reason: e.to_string(),
                    }
                    .emit();
                    last_err = e;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err)
    }

    async fn try_embeddings(&self, req: &EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        let attempts = self.active_key_indices();
        let cap = attempts.len().min(self.max_key_attempts.max(1));
        let mut last_err = Error::AllKeysExhausted {
            provider: self.id.clone(),
        };

        for &idx in attempts.iter().take(cap) {
            let slot = &self.keys[idx];
            match slot.adapter.embeddings(req.clone()).await {
                Ok(resp) => return Ok(resp),
                Err(e) if is_quota_error(&e) => {
                    *slot.status.lock() = KeyStatus::Exhausted;
                    TraceEvent::ProviderKeyFailed {
                        provider: self.id.clone(),
                        key_index: idx,
                        reason: e.to_string(),
                    }
                    .emit();
                    last_err = e;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err)
    }

    async fn try_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let attempts = self.active_key_indices();
        let cap = attempts.len().min(self.max_key_attempts.max(1));
        let mut last_err = Error::AllKeysExhausted {
            provider: self.id.clone(),
        };

        for &idx in attempts.iter().take(cap) {
            let slot = &self.keys[idx];
            match slot.adapter.chat_stream(req).await {
                Ok(stream) => return Ok(stream),
                Err(e) if is_quota_error(&e) => {
                    *slot.status.lock() = KeyStatus::Exhausted;
                    TraceEvent::ProviderKeyFailed {
                        provider: self.id.clone(),
                        key_index: idx,
                        reason: e.to_string(),
                    }
                    .emit();
                    last_err = e;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err)
    }
}

fn resolve_keys(auth: &AuthConfig) -> Result<Vec<String>> {
    if !auth.keys.is_empty() {
        let mut resolved = Vec::with_capacity(auth.keys.len());
        for env_name in &auth.keys {
            match std::env::var(env_name) {
                Ok(val) if !val.is_empty() => resolved.push(val),
                _ => {
                    return Err(Error::Auth(format!(
                        "environment variable '{}' not set or empty (from auth.keys list)",
                        env_name
                    )));
                }
            }
        }
        return Ok(resolved);
    }
    if let Some(ref key) = auth.key {
        return Ok(vec![key.clone()]);
    }
    if let Some(ref env_var) = auth.env {
        let val = std::env::var(env_var).map_err(|_| {
            Error::Auth(format!(
                "environment variable '{}' not set or not valid UTF-8",
                env_var
            ))
        })?;
        return Ok(vec![val]);
    }
    Ok(Vec::new())
}

fn build_adapter(cfg: &ProviderConfig) -> Result<Arc<dyn LlmProvider>> {
    match cfg.kind {
        ProviderKind::Anthropic => {
            AnthropicProvider::from_config(cfg).map(|p| Arc::new(p) as Arc<dyn LlmProvider>)
        }
        ProviderKind::OpenaiCompat => {
            OpenAiCompatProvider::from_config(cfg).map(|p| Arc::new(p) as Arc<dyn LlmProvider>)
        }
        ProviderKind::Google => {
            GoogleProvider::from_config(cfg).map(|p| Arc::new(p) as Arc<dyn LlmProvider>)
        }
    }
}

/// Mask substrings that look like API keys or bearer tokens in an error
/// message before it is logged or surfaced anywhere outside the process.
pub fn mask_secrets(msg: &str) -> String {
    let mut result = msg.to_string();
    for word in msg.split(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == ',') {
        let trimmed = word.trim();
        if trimmed.len() >= 20
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            let masked = if trimmed.len() > 8 {
                format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..])
            } else {
                "***masked***".to_string()
            };
            result = result.replace(trimmed, &masked);
        }
    }
    result
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Records a provider that failed to initialize entirely (bad config,
/// missing env var for every key).
#[derive(Debug, Clone)]
pub struct ProviderInitError {
    pub provider_id: String,
    pub error: String,
}

/// Owns the ordered fallback chain of providers and drives key rotation
/// and provider-level blackout on top of it.
pub struct ProviderManager {
    providers: Vec<ManagedProvider>,
    blackout: Mutex<HashMap<String, Instant>>,
    blackout_ttl: Duration,
    default_timeout: Duration,
    init_errors: Vec<ProviderInitError>,
}

impl ProviderManager {
    /// Build the manager from the orchestrator's [`ProvidersConfig`].
    ///
    /// Providers that fail to construct (e.g. every key's env var is
    /// unset) are recorded in [`Self::init_errors`] and skipped rather
    /// than failing the whole startup, mirroring how a partially
    /// configured fallback chain should degrade: later providers in the
    /// list still work.
    pub fn from_config(cfg: &ProvidersConfig) -> Self {
        let mut providers = Vec::new();
        let mut init_errors = Vec::new();

        for pc in &cfg.providers {
            match ManagedProvider::from_config(pc) {
                Ok(mut mp) => {
                    mp.max_key_attempts = cfg.max_key_attempts as usize;
                    tracing::info!(
                        provider_id = %pc.id,
                        kind = ?pc.kind,
                        key_count = mp.keys.len(),
                        "registered LLM provider"
                    );
                    providers.push(mp);
                }
                Err(e) => {
                    let safe_error = mask_secrets(&e.to_string());
                    tracing::warn!(
                        provider_id = %pc.id,
                        kind = ?pc.kind,
                        error = %safe_error,
                        "failed to initialize LLM provider, skipping"
                    );
                    init_errors.push(ProviderInitError {
                        provider_id: pc.id.clone(),
                        error: safe_error,
                    });
                }
            }
        }

        Self {
            providers,
            blackout: Mutex::new(HashMap::new()),
            blackout_ttl: Duration::from_secs(cfg.blackout_ttl_secs),
            default_timeout: Duration::from_millis(cfg.default_timeout_ms),
            init_errors,
        }
    }

    pub fn init_errors(&self) -> &[ProviderInitError] {
        &self.init_errors
    }

    pub fn provider_ids(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.id.clone()).collect()
    }

    /// Send a chat request, walking the fallback chain.
    ///
    /// Pre-first-chunk fallback applies uniformly here since `chat`
    /// always produces a complete response or an error; there is no
    /// partial-output case to preserve.
    pub async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        self.probe_expired_blackouts();

        let mut attempted_any = false;
        let mut previous_provider: Option<&str> = None;
        for provider in &self.providers {
            if self.is_blacked_out(&provider.id) {
                continue;
            }
            if provider.all_exhausted() {
                self.enter_blackout(&provider.id);
                continue;
            }
            attempted_any = true;

            if let Some(prev) = previous_provider {
                TraceEvent::LlmFallback {
                    from_provider: prev.to_string(),
                    to_provider: provider.id.clone(),
                    reason: "previous provider failed or was unavailable".into(),
                }
                .emit();
            }

            let start = Instant::now();
            let timed = tokio::time::timeout(self.default_timeout, provider.try_chat(req)).await;
            let duration_ms = start.elapsed().as_millis() as u64;
            match timed {
                Ok(Ok(resp)) => {
                    TraceEvent::LlmRequest {
                        provider: provider.id.clone(),
                        model: resp.model.clone(),
                        streaming: false,
                        duration_ms,
                        prompt_tokens: resp.usage.as_ref().map(|u| u.prompt_tokens),
                        completion_tokens: resp.usage.as_ref().map(|u| u.completion_tokens),
                    }
                    .emit();
                    return Ok(resp);
                }
                Ok(Err(_)) => {
                    if provider.all_exhausted() {
                        self.enter_blackout(&provider.id);
                    }
                    previous_provider = Some(&provider.id);
                    continue;
                }
                Err(_) => {
                    tracing::warn!(
                        provider = %provider.id,
                        timeout_ms = self.default_timeout.as_millis(),
                        "provider timed out"
                    );
                    previous_provider = Some(&provider.id);
                    continue;
                }
            }
        }

        if !attempted_any {
            return Err(Error::AllProvidersExhausted);
        }
        Err(Error::AllProvidersExhausted)
    }

    /// Generate embeddings, walking the same fallback chain as `chat`.
    ///
    /// Not every configured provider necessarily serves an embedding
    /// model; a provider whose adapter returns an error for `embeddings`
    /// is treated the same as a quota failure would be for `chat` — the
    /// manager moves on to the next provider in the chain rather than
    /// giving up outright.
    pub async fn embeddings(&self, req: &EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        self.probe_expired_blackouts();

        let mut attempted_any = false;
        for provider in &self.providers {
            if self.is_blacked_out(&provider.id) {
                continue;
            }
            if provider.all_exhausted() {
                self.enter_blackout(&provider.id);
                continue;
            }
            attempted_any = true;

            let timed = tokio::time::timeout(self.default_timeout, provider.try_embeddings(req)).await;
            match timed {
                Ok(Ok(resp)) => return Ok(resp),
                Ok(Err(_)) => {
                    if provider.all_exhausted() {
                        self.enter_blackout(&provider.id);
                    }
                    continue;
                }
                Err(_) => {
                    tracing::warn!(
                        provider = %provider.id,
                        timeout_ms = self.default_timeout.as_millis(),
                        "provider timed out generating embeddings"
                    );
                    continue;
                }
            }
        }

        if !attempted_any {
            return Err(Error::AllProvidersExhausted);
        }
        Err(Error::AllProvidersExhausted)
    }

    /// Stream a chat request. Fallback is only attempted before the first
    /// chunk is produced; once `try_stream` returns a stream, a mid-stream
    /// failure surfaces as a terminated stream rather than retrying on a
    /// different provider, since partial output has already been emitted
    /// to the caller.
    pub async fn stream(&self, req: &ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        self.probe_expired_blackouts();

        let mut attempted_any = false;
        for provider in &self.providers {
            if self.is_blacked_out(&provider.id) {
                continue;
            }
            if provider.all_exhausted() {
                self.enter_blackout(&provider.id);
                continue;
            }
            attempted_any = true;

            let timed = tokio::time::timeout(self.default_timeout, provider.try_stream(req)).await;
            match timed {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(_)) => {
                    if provider.all_exhausted() {
                        self.enter_blackout(&provider.id);
                    }
                    continue;
                }
                Err(_) => {
                    tracing::warn!(
                        provider = %provider.id,
                        timeout_ms = self.default_timeout.as_millis(),
                        "provider timed out opening stream"
                    );
                    continue;
                }
            }
        }

        if !attempted_any {
            return Err(Error::AllProvidersExhausted);
        }
        Err(Error::AllProvidersExhausted)
    }

    // ── Blackout bookkeeping ───────────────────────────────────────

    fn is_blacked_out(&self, provider_id: &str) -> bool {
        self.blackout.lock().contains_key(provider_id)
    }

    fn enter_blackout(&self, provider_id: &str) {
        let mut blackout = self.blackout.lock();
        if blackout.insert(provider_id.to_string(), Instant::now()).is_none() {
            TraceEvent::ProviderBlackedOut {
                provider: provider_id.to_string(),
                ttl_secs: self.blackout_ttl.as_secs(),
            }
            .emit();
        }
    }

    /// Reset every key of any blacked-out provider whose TTL has elapsed,
    /// so the next call probes it again instead of skipping it forever.
    fn probe_expired_blackouts(&self) {
        let mut blackout = self.blackout.lock();
        let now = Instant::now();
        let expired: Vec<String> = blackout
            .iter()
            .filter(|(_, since)| now.duration_since(**since) >= self.blackout_ttl)
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            blackout.remove(&id);
            if let Some(provider) = self.providers.iter().find(|p| p.id == id) {
                provider.reset_all_keys();
                TraceEvent::ProviderProbeSucceeded {
                    provider: id.clone(),
                }
                .emit();
            }
        }
    }
}
