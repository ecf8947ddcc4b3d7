//! # Worker Configuration
//!
//! Configuration for the background workers, loaded from a TOML file with
//! environment overrides.
//!
//! ## Configuration File Format
//! ```toml
//! # terminal.toml
//! [terminal]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Caixa 1"
//!
//! [emitter]
//! cnpj = "12345678000195"
//! uf_code = "35"
//! name = "Mercado Exemplo LTDA"
//! city = "Sao Paulo"
//!
//! [sync]
//! poll_interval_secs = 5
//! submit_timeout_secs = 10
//! max_attempts = 8
//! initial_backoff_ms = 500
//! max_backoff_secs = 300
//!
//! [fiscal]
//! series = 1
//! contingency_start = 900000001
//! contingency_end = 900000500
//! consultation_base_url = "https://www.fazenda.sp.gov.br/nfce/qrcode"
//! call_timeout_secs = 15
//!
//! [pix]
//! key = "loja@exemplo.com.br"
//! ttl_minutes = 30
//! call_timeout_secs = 15
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Terminal
// =============================================================================

/// Identity of this terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// Unique terminal identifier (UUID v4). Auto-generated on first run.
    #[serde(default = "default_terminal_id")]
    pub id: String,

    /// Human-readable name (e.g., "Caixa 1").
    #[serde(default = "default_terminal_name")]
    pub name: String,
}

fn default_terminal_name() -> String {
    "POS Terminal".to_string()
}

fn default_terminal_id() -> String {
    Uuid::new_v4().to_string()
}

impl Default for TerminalConfig {
    fn default() -> Self {
        TerminalConfig {
            id: default_terminal_id(),
            name: default_terminal_name(),
        }
    }
}

// =============================================================================
// Emitter
// =============================================================================

/// Fiscal identity of the store; feeds the access key and the BR Code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitterConfig {
    /// 14-digit CNPJ, digits only.
    #[serde(default)]
    pub cnpj: String,

    /// Two-digit IBGE state code.
    #[serde(default = "default_uf_code")]
    pub uf_code: String,

    /// Legal name, printed on receipts and in the BR Code.
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub fantasy_name: Option<String>,

    /// City for the BR Code merchant field.
    #[serde(default)]
    pub city: String,
}

fn default_uf_code() -> String {
    "35".to_string()
}

impl Default for EmitterConfig {
    fn default() -> Self {
        EmitterConfig {
            cnpj: String::new(),
            uf_code: default_uf_code(),
            name: String::new(),
            fantasy_name: None,
            city: String::new(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Submission queue behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Interval between queue poll cycles (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Time budget per submission attempt (seconds).
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_secs: u64,

    /// Attempts before a sale is parked as SyncFailed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,

    /// Initial backoff duration (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Backoff cap (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Queue entries processed per poll cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
}

fn default_poll_interval() -> u64 {
    5
}
fn default_submit_timeout() -> u64 {
    10
}
fn default_max_attempts() -> i64 {
    8
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    300
}
fn default_batch_size() -> i64 {
    20
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            poll_interval_secs: default_poll_interval(),
            submit_timeout_secs: default_submit_timeout(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            batch_size: default_batch_size(),
        }
    }
}

// =============================================================================
// Fiscal Settings
// =============================================================================

/// Fiscal issuance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiscalSettings {
    /// Document series for this terminal.
    #[serde(default = "default_series")]
    pub series: i64,

    /// First number of the pre-allocated contingency range.
    #[serde(default = "default_contingency_start")]
    pub contingency_start: i64,

    /// Last number of the pre-allocated contingency range (inclusive).
    #[serde(default = "default_contingency_end")]
    pub contingency_end: i64,

    /// Warn when fewer contingency numbers than this remain.
    #[serde(default = "default_low_pool_threshold")]
    pub low_pool_threshold: i64,

    /// Base URL for the printed consultation QR code.
    #[serde(default = "default_consultation_url")]
    pub consultation_base_url: String,

    /// Time budget per authority call (seconds).
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

fn default_series() -> i64 {
    1
}
fn default_contingency_start() -> i64 {
    900_000_001
}
fn default_contingency_end() -> i64 {
    900_000_500
}
fn default_low_pool_threshold() -> i64 {
    50
}
fn default_consultation_url() -> String {
    "https://www.fazenda.sp.gov.br/nfce/qrcode".to_string()
}
fn default_call_timeout() -> u64 {
    15
}

impl Default for FiscalSettings {
    fn default() -> Self {
        FiscalSettings {
            series: default_series(),
            contingency_start: default_contingency_start(),
            contingency_end: default_contingency_end(),
            low_pool_threshold: default_low_pool_threshold(),
            consultation_base_url: default_consultation_url(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

// =============================================================================
// PIX Settings
// =============================================================================

/// PIX charge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PixSettings {
    /// PIX key of the receiving account.
    #[serde(default)]
    pub key: String,

    /// Charge validity window (minutes).
    #[serde(default = "default_pix_ttl")]
    pub ttl_minutes: i64,

    /// Time budget per payment-network call (seconds).
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

fn default_pix_ttl() -> i64 {
    pos_core::pix::DEFAULT_TTL_MINUTES
}

impl Default for PixSettings {
    fn default() -> Self {
        PixSettings {
            key: String::new(),
            ttl_minutes: default_pix_ttl(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete worker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PosConfig {
    #[serde(default)]
    pub terminal: TerminalConfig,

    #[serde(default)]
    pub emitter: EmitterConfig,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub fiscal: FiscalSettings,

    #[serde(default)]
    pub pix: PixSettings,
}

impl PosConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration: defaults, then the TOML file, then environment
    /// variables (highest priority). The path falls back to `POS_CONFIG`.
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        let path = config_path.or_else(|| std::env::var("POS_CONFIG").ok().map(PathBuf::from));
        if let Some(path) = path {
            if path.exists() {
                info!(?path, "Loading config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or falls back to defaults.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves the configuration to the given path.
    pub fn save(&self, path: &PathBuf) -> SyncResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;

        info!(?path, "Config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.terminal.id.is_empty() {
            return Err(SyncError::InvalidConfig("terminal.id must be set".into()));
        }

        if !self.emitter.cnpj.is_empty()
            && (self.emitter.cnpj.len() != 14
                || !self.emitter.cnpj.bytes().all(|b| b.is_ascii_digit()))
        {
            return Err(SyncError::InvalidConfig(
                "emitter.cnpj must be exactly 14 digits".into(),
            ));
        }

        if self.sync.max_attempts <= 0 {
            return Err(SyncError::InvalidConfig(
                "sync.max_attempts must be greater than 0".into(),
            ));
        }

        if self.fiscal.contingency_end < self.fiscal.contingency_start {
            return Err(SyncError::InvalidConfig(
                "fiscal.contingency_end must be >= contingency_start".into(),
            ));
        }

        if self.pix.ttl_minutes <= 0 {
            return Err(SyncError::InvalidConfig(
                "pix.ttl_minutes must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("POS_TERMINAL_ID") {
            debug!(terminal_id = %id, "Overriding terminal id from environment");
            self.terminal.id = id;
        }

        if let Ok(name) = std::env::var("POS_TERMINAL_NAME") {
            self.terminal.name = name;
        }

        if let Ok(cnpj) = std::env::var("POS_EMITTER_CNPJ") {
            self.emitter.cnpj = cnpj;
        }

        if let Ok(series) = std::env::var("POS_FISCAL_SERIES") {
            if let Ok(s) = series.parse::<i64>() {
                self.fiscal.series = s;
            }
        }

        if let Ok(key) = std::env::var("POS_PIX_KEY") {
            self.pix.key = key;
        }
    }

    /// Fiscal emitter identity in the form pos-core wants it.
    pub fn emitter_info(&self) -> pos_core::fiscal::EmitterInfo {
        pos_core::fiscal::EmitterInfo {
            cnpj: self.emitter.cnpj.clone(),
            uf_code: self.emitter.uf_code.clone(),
            name: self.emitter.name.clone(),
            fantasy_name: self.emitter.fantasy_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PosConfig::default();
        assert!(!config.terminal.id.is_empty()); // Auto-generated
        assert_eq!(config.sync.max_attempts, 8);
        assert_eq!(config.pix.ttl_minutes, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rules() {
        let mut config = PosConfig::default();

        config.emitter.cnpj = "123".into();
        assert!(config.validate().is_err());
        config.emitter.cnpj = "12345678000195".into();
        assert!(config.validate().is_ok());

        config.fiscal.contingency_end = config.fiscal.contingency_start - 1;
        assert!(config.validate().is_err());
        config.fiscal.contingency_end = config.fiscal.contingency_start + 10;

        config.sync.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = PosConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[terminal]"));
        assert!(toml_str.contains("[fiscal]"));

        let parsed: PosConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.terminal.id, config.terminal.id);
        assert_eq!(parsed.fiscal.series, config.fiscal.series);
    }

    #[test]
    fn test_partial_file_gets_defaults() {
        let parsed: PosConfig = toml::from_str(
            r#"
            [emitter]
            cnpj = "12345678000195"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.emitter.cnpj, "12345678000195");
        assert_eq!(parsed.sync.poll_interval_secs, 5);
        assert_eq!(parsed.fiscal.series, 1);
    }
}
