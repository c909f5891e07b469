//! Service configuration.
//!
//! Loaded from TOML (`--config`, `./quizforge.toml` or
//! `~/.quizforge/config.toml`, first hit wins), then overlaid with
//! environment variables. Every section has working defaults; the only
//! hard requirement before serving is the bot token.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Where this config was loaded from - computed, not serialized.
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub quiz: QuizConfig,

    #[serde(default)]
    pub keepalive: KeepAliveConfig,
}

// ── Telegram credentials and public endpoint ─────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot API token; also accepted via TELEGRAM_BOT_TOKEN
    #[serde(default)]
    pub bot_token: Option<String>,
    /// Public base URL of this deployment, e.g. "https://myquiz.onrender.com"
    #[serde(default)]
    pub public_url: Option<String>,
}

// ── HTTP server ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen host (default: 0.0.0.0 - webhook ingress must be reachable)
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen port (default: 8080); PORT env wins on managed hosts
    #[serde(default = "default_port")]
    pub port: u16,
    /// Concurrent dialogue workers (default: 32)
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    /// Request body cap in bytes (default: 1 MiB)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Inbound request timeout in seconds (default: 30)
    #[serde(default = "default_server_timeout")]
    pub request_timeout_secs: u64,
    /// Shutdown drain window for in-flight dialogue work (default: 10)
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8080
}

fn default_worker_pool_size() -> usize {
    32
}

fn default_max_body_bytes() -> usize {
    1_048_576
}

fn default_server_timeout() -> u64 {
    30
}

fn default_drain_timeout() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            worker_pool_size: default_worker_pool_size(),
            max_body_bytes: default_max_body_bytes(),
            request_timeout_secs: default_server_timeout(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

// ── Session storage ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Redis connection URL; unset or empty means file storage only
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Fallback state file (default: ~/.quizforge/sessions.json)
    #[serde(default = "default_state_file")]
    pub file_path: PathBuf,
    /// Budget for the initial Redis connection attempt (default: 3)
    #[serde(default = "default_redis_connect_timeout")]
    pub redis_connect_timeout_secs: u64,
}

fn default_state_file() -> PathBuf {
    UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".quizforge").join("sessions.json"))
        .unwrap_or_else(|| PathBuf::from("quizforge-sessions.json"))
}

fn default_redis_connect_timeout() -> u64 {
    3
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            file_path: default_state_file(),
            redis_connect_timeout_secs: default_redis_connect_timeout(),
        }
    }
}

// ── Outbound HTTP reliability ────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-attempt request timeout in seconds (default: 10)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// TCP connect timeout in seconds (default: 10)
    #[serde(default = "default_request_timeout")]
    pub connect_timeout_secs: u64,
    /// Idle pooled connections kept per host (default: 10)
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,
    /// Concurrent outbound calls across all users (default: 16)
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Sustained outbound call rate (default: 10.0)
    #[serde(default = "default_requests_per_sec")]
    pub requests_per_sec: f64,
    /// Token bucket burst size (default: 1 - strict pacing)
    #[serde(default = "default_burst")]
    pub burst: u32,
    /// Longest a call may queue for a rate token in ms (default: 3000)
    #[serde(default = "default_max_queue_wait")]
    pub max_queue_wait_ms: u64,
    /// Attempts per logical call, first try included (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First retry backoff in ms (default: 4000)
    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,
    /// Backoff ceiling in ms (default: 10000)
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// Consecutive failures that open a host circuit (default: 5)
    #[serde(default = "default_circuit_threshold")]
    pub circuit_threshold: u32,
    /// Open-circuit cooldown in seconds (default: 30)
    #[serde(default = "default_circuit_cooldown")]
    pub circuit_cooldown_secs: u64,
}

fn default_request_timeout() -> u64 {
    10
}

fn default_pool_max_idle() -> usize {
    10
}

fn default_max_in_flight() -> usize {
    16
}

fn default_requests_per_sec() -> f64 {
    10.0
}

fn default_burst() -> u32 {
    1
}

fn default_max_queue_wait() -> u64 {
    3_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff() -> u64 {
    4_000
}

fn default_max_backoff() -> u64 {
    10_000
}

fn default_circuit_threshold() -> u32 {
    5
}

fn default_circuit_cooldown() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_request_timeout(),
            pool_max_idle_per_host: default_pool_max_idle(),
            max_in_flight: default_max_in_flight(),
            requests_per_sec: default_requests_per_sec(),
            burst: default_burst(),
            max_queue_wait_ms: default_max_queue_wait(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff(),
            max_backoff_ms: default_max_backoff(),
            circuit_threshold: default_circuit_threshold(),
            circuit_cooldown_secs: default_circuit_cooldown(),
        }
    }
}

// ── Sessions ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle session lifetime in seconds (default: 3600)
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
    /// Background sweep cadence in seconds (default: 300)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_session_ttl() -> u64 {
    3_600
}

fn default_sweep_interval() -> u64 {
    300
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

// ── Quiz bounds ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizConfig {
    /// Questions delivered per quiz; extras are dropped (default: 25)
    #[serde(default = "default_max_questions")]
    pub max_questions: usize,
}

fn default_max_questions() -> usize {
    25
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            max_questions: default_max_questions(),
        }
    }
}

// ── Keep-alive ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepAliveConfig {
    /// Self-ping on/off (default: true; a missing public_url also disables it)
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Ping period in seconds (default: 780 - under the host's 15 min idle cutoff)
    #[serde(default = "default_keepalive_interval")]
    pub interval_secs: u64,
    /// Extra gap beyond the period that still counts as normal jitter (default: 120)
    #[serde(default = "default_wake_tolerance")]
    pub wake_tolerance_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_keepalive_interval() -> u64 {
    780
}

fn default_wake_tolerance() -> u64 {
    120
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval_secs: default_keepalive_interval(),
            wake_tolerance_secs: default_wake_tolerance(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl Config {
    /// Loads config from `explicit` if given, otherwise from the first
    /// discovered file, otherwise defaults. Env overrides apply last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = explicit {
            let expanded =
                PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned());
            Self::from_file(&expanded)?
        } else if let Some(found) = Self::discover() {
            Self::from_file(&found)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.config_path = path.to_path_buf();
        Ok(config)
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from("quizforge.toml");
        if local.exists() {
            return Some(local);
        }
        let home = UserDirs::new()?
            .home_dir()
            .join(".quizforge")
            .join("config.toml");
        home.exists().then_some(home)
    }

    /// Applies environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// QUIZFORGE_* first, then the conventional deployment names.
    fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let either = |ours: &str, theirs: &str| {
            lookup(ours)
                .filter(|v| !v.is_empty())
                .or_else(|| lookup(theirs).filter(|v| !v.is_empty()))
        };

        if let Some(token) = either("QUIZFORGE_BOT_TOKEN", "TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(token);
        }
        if let Some(url) = either("QUIZFORGE_PUBLIC_URL", "WEBHOOK_URL") {
            self.telegram.public_url = Some(url.trim_end_matches('/').to_string());
        }
        if let Some(port) = either("QUIZFORGE_PORT", "PORT")
            && let Ok(port) = port.parse::<u16>()
        {
            self.server.port = port;
        }
        if let Some(host) = either("QUIZFORGE_HOST", "HOST") {
            self.server.host = host;
        }
        if let Some(url) = either("QUIZFORGE_REDIS_URL", "REDIS_URL") {
            self.storage.redis_url = Some(url);
        }
        if let Some(path) = either("QUIZFORGE_STATE_FILE", "STORAGE_FILE") {
            self.storage.file_path = PathBuf::from(shellexpand::tilde(&path).into_owned());
        }
        if let Some(secs) = lookup("QUIZFORGE_KEEPALIVE_SECS")
            && let Ok(secs) = secs.parse::<u64>()
        {
            self.keepalive.interval_secs = secs;
        }
    }

    /// Refuses configurations the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        let token_set = self
            .telegram
            .bot_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());
        if !token_set {
            anyhow::bail!(
                "bot token is not configured; set TELEGRAM_BOT_TOKEN or telegram.bot_token"
            );
        }
        if let Some(url) = &self.telegram.public_url {
            Url::parse(url).with_context(|| format!("invalid public url {url:?}"))?;
        }
        if let Some(url) = &self.storage.redis_url
            && !url.is_empty()
        {
            Url::parse(url).with_context(|| format!("invalid redis url {url:?}"))?;
        }
        Ok(())
    }

    pub fn bot_token(&self) -> Option<&str> {
        self.telegram.bot_token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn public_url(&self) -> Option<&str> {
        self.telegram
            .public_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .map(|u| u.trim_end_matches('/'))
    }

    /// Full webhook endpoint this deployment expects Telegram to call.
    pub fn webhook_url(&self) -> Option<String> {
        let base = self.public_url()?;
        let token = self.bot_token()?;
        Some(format!("{base}/webhook/{token}"))
    }

    /// Self-ping target for the keep-alive worker.
    pub fn health_url(&self) -> Option<String> {
        Some(format!("{}/health", self.public_url()?))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Config echo for the debug endpoint, with credentials masked.
    pub fn redacted(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(token) = value.pointer_mut("/telegram/bot_token")
            && !token.is_null()
        {
            *token = serde_json::Value::String("***".into());
        }
        if let Some(url) = value.pointer_mut("/storage/redis_url")
            && !url.is_null()
        {
            *url = serde_json::Value::String("***".into());
        }
        value
    }
}
