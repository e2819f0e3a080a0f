//! Client configuration loading and validation.
//!
//! Reads an optional `ollama-chat.yaml` and resolves environment variables.
//! Precedence, lowest first: built-in defaults, config file, `OLLAMA_HOST` /
//! `OLLAMA_MODEL`, command-line flags (applied by the binary).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::capability::DEFAULT_VISION_KEYWORDS;
use super::errors::InferenceError;
use super::think_tags::ThinkTags;

/// File name searched for when no explicit path is given.
pub const CONFIG_FILE_NAME: &str = "ollama-chat.yaml";

/// Env var pointing at a config file.
pub const CONFIG_PATH_ENV: &str = "OLLAMA_CHAT_CONFIG";

pub const DEFAULT_HOST: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "gemma3";

// ─── Public Types ────────────────────────────────────────────────────────────

/// Everything the inference client needs to talk to one server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the Ollama server, without trailing slash.
    pub host: String,
    /// Model used for chat requests.
    pub model: String,
    /// Optional system prompt placed at the top of every conversation.
    pub system_prompt: Option<String>,
    /// Whether the REPL streams replies.
    pub stream: bool,
    /// TCP connect timeout.
    pub connect_timeout_secs: u64,
    /// Total timeout for a buffered request.
    pub request_timeout_secs: u64,
    /// Total timeout for a streamed request. Local models can take a long time
    /// to emit the first token with a large context.
    pub stream_timeout_secs: u64,
    /// Timeout for the first call after a model switch, which may include
    /// loading the new model into memory.
    pub reload_timeout_secs: u64,
    /// Inline thinking delimiters.
    pub think_tags: ThinkTags,
    /// Model-name substrings treated as vision models when the server does
    /// not declare capabilities.
    pub vision_keywords: Vec<String>,
    /// Optional log file; logs go to stderr when absent.
    pub log_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            model: DEFAULT_MODEL.to_string(),
            system_prompt: None,
            stream: true,
            connect_timeout_secs: 5,
            request_timeout_secs: 60,
            stream_timeout_secs: 180,
            reload_timeout_secs: 300,
            think_tags: ThinkTags::default(),
            vision_keywords: DEFAULT_VISION_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            log_file: None,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs)
    }

    pub fn reload_timeout(&self) -> Duration {
        Duration::from_secs(self.reload_timeout_secs)
    }

    /// Apply `OLLAMA_HOST` / `OLLAMA_MODEL` when set and non-empty.
    pub fn apply_env_overrides(&mut self) {
        if let Some(host) = non_empty_env("OLLAMA_HOST") {
            self.host = host;
        }
        if let Some(model) = non_empty_env("OLLAMA_MODEL") {
            self.model = model;
        }
    }

    /// Normalize and check the configuration.
    pub fn validate(mut self) -> Result<Self, InferenceError> {
        self.host = self.host.trim().trim_end_matches('/').to_string();
        if !(self.host.starts_with("http://") || self.host.starts_with("https://")) {
            return Err(InferenceError::ConfigError {
                reason: format!("host '{}' must start with http:// or https://", self.host),
            });
        }
        if self.model.trim().is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "model name is empty".into(),
            });
        }
        if self.think_tags.start.is_empty() || self.think_tags.end.is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "think_tags.start and think_tags.end must be non-empty".into(),
            });
        }
        for (name, secs) in [
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("request_timeout_secs", self.request_timeout_secs),
            ("stream_timeout_secs", self.stream_timeout_secs),
            ("reload_timeout_secs", self.reload_timeout_secs),
        ] {
            if secs == 0 {
                return Err(InferenceError::ConfigError {
                    reason: format!("{name} must be greater than zero"),
                });
            }
        }
        Ok(self)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate a config file.
///
/// Checks `OLLAMA_CHAT_CONFIG` first, then searches upward from `start` for
/// `ollama-chat.yaml`, then the user config directory. Returns `None` when no
/// file exists; running without one is fine.
pub fn find_config_path(start: &Path) -> Option<PathBuf> {
    // 1. Check env var
    if let Some(path) = non_empty_env(CONFIG_PATH_ENV) {
        let candidate = PathBuf::from(expand_tilde(&path));
        if candidate.exists() {
            return Some(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_PATH_ENV} points at a missing file");
    }

    // 2. Walk upward from `start`
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    // 3. Per-user config directory
    dirs::config_dir()
        .map(|d| d.join("ollama-chat").join(CONFIG_FILE_NAME))
        .filter(|p| p.exists())
}

/// Load and parse a configuration file.
///
/// Performs environment-variable interpolation on the raw text for
/// `${VAR_NAME}` and `${VAR_NAME:-default}` before parsing.
pub fn load_config(path: &Path) -> Result<ClientConfig, InferenceError> {
    let raw = std::fs::read_to_string(path).map_err(|e| InferenceError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;
    parse_config(&raw)
}

/// Parse configuration text. An empty document yields the defaults.
pub fn parse_config(raw: &str) -> Result<ClientConfig, InferenceError> {
    let interpolated = interpolate_env_vars(raw);
    if interpolated.trim().is_empty() {
        return Ok(ClientConfig::default());
    }
    serde_yaml::from_str(&interpolated).map_err(|e| InferenceError::ConfigError {
        reason: format!("failed to parse config: {e}"),
    })
}

/// Resolve the effective configuration from an optional explicit path.
///
/// Env overrides are applied on top of the file; the result is validated.
pub fn resolve_config(explicit: Option<&Path>) -> Result<ClientConfig, InferenceError> {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => std::env::current_dir()
            .ok()
            .and_then(|cwd| find_config_path(&cwd)),
    };

    let mut config = match &path {
        Some(p) => {
            tracing::debug!(path = %p.display(), "loading config");
            load_config(p)?
        }
        None => ClientConfig::default(),
    };
    config.apply_env_overrides();
    config.validate()
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((var_name, default)) => non_empty_env(var_name).unwrap_or_else(|| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
///
/// Only `~` alone or `~/…` is expanded; `~user` forms are left as is.
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if rest.is_empty() || rest.starts_with('/') {
            if let Some(home) = dirs::home_dir() {
                return format!("{}{rest}", home.display());
            }
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
