use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Session KV time-to-live (seconds). Refreshed on every save.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 3600;
/// How many archived conversations are kept per user.
pub const DEFAULT_ARCHIVE_KEEP: usize = 50;

/// Top-level config (neuralux.toml + NLX_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NlxConfig {
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl Default for NlxConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            database: DatabaseConfig::default(),
            session: SessionConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// How the engine reaches the message bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// `local` runs services in-process (tests, single binary);
    /// `remote` dials the broker at `url`.
    #[serde(default = "default_bus_mode")]
    pub mode: BusMode,
    #[serde(default = "default_bus_url")]
    pub url: String,
    /// Bounded reconnect attempts before `connect` gives up.
    #[serde(default = "default_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            mode: default_bus_mode(),
            url: default_bus_url(),
            max_reconnect_attempts: default_reconnect_attempts(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BusMode {
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_archive_keep")]
    pub archive_keep: usize,
    /// Path of the user settings JSON blob.
    #[serde(default = "default_settings_path")]
    pub settings_path: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            archive_keep: default_archive_keep(),
            settings_path: default_settings_path(),
        }
    }
}

/// Per-action bus request deadlines, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Planner call into the LLM (small max_tokens — kept tight).
    #[serde(default = "default_llm_plan_secs")]
    pub llm_plan_secs: u64,
    #[serde(default = "default_llm_secs")]
    pub llm_secs: u64,
    #[serde(default = "default_image_secs")]
    pub image_secs: u64,
    #[serde(default = "default_ocr_secs")]
    pub ocr_secs: u64,
    #[serde(default = "default_document_secs")]
    pub document_secs: u64,
    #[serde(default = "default_web_secs")]
    pub web_secs: u64,
    #[serde(default = "default_shell_secs")]
    pub shell_secs: u64,
    #[serde(default = "default_system_secs")]
    pub system_secs: u64,
    /// Asynchronous music result fan-in.
    #[serde(default = "default_music_wait_secs")]
    pub music_wait_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            llm_plan_secs: default_llm_plan_secs(),
            llm_secs: default_llm_secs(),
            image_secs: default_image_secs(),
            ocr_secs: default_ocr_secs(),
            document_secs: default_document_secs(),
            web_secs: default_web_secs(),
            shell_secs: default_shell_secs(),
            system_secs: default_system_secs(),
            music_wait_secs: default_music_wait_secs(),
        }
    }
}

fn default_bus_mode() -> BusMode {
    BusMode::Local
}
fn default_bus_url() -> String {
    "127.0.0.1:4222".to_string()
}
fn default_reconnect_attempts() -> u32 {
    10
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.local/share/neuralux/neuralux.db")
}
fn default_ttl_secs() -> u64 {
    DEFAULT_SESSION_TTL_SECS
}
fn default_archive_keep() -> usize {
    DEFAULT_ARCHIVE_KEEP
}
fn default_settings_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.config/neuralux/settings.json")
}
fn default_llm_plan_secs() -> u64 {
    20
}
fn default_llm_secs() -> u64 {
    30
}
fn default_image_secs() -> u64 {
    60
}
fn default_ocr_secs() -> u64 {
    20
}
fn default_document_secs() -> u64 {
    10
}
fn default_web_secs() -> u64 {
    10
}
fn default_shell_secs() -> u64 {
    30
}
fn default_system_secs() -> u64 {
    10
}
fn default_music_wait_secs() -> u64 {
    300
}

impl NlxConfig {
    /// Load config from a TOML file with NLX_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.config/neuralux/neuralux.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: NlxConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("NLX_").split("_"))
            .extract()
            .map_err(|e| crate::error::NlxError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.config/neuralux/neuralux.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = NlxConfig::default();
        assert_eq!(cfg.bus.mode, BusMode::Local);
        assert_eq!(cfg.session.ttl_secs, 24 * 3600);
        assert_eq!(cfg.session.archive_keep, 50);
        assert_eq!(cfg.timeouts.shell_secs, 30);
        assert_eq!(cfg.timeouts.music_wait_secs, 300);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = NlxConfig::load(Some("/nonexistent/neuralux.toml")).expect("load failed");
        assert_eq!(cfg.timeouts.image_secs, 60);
    }
}
