//! Runtime configuration.
//!
//! Sources, lowest precedence first: built-in defaults, `config/procura.toml`
//! (optional), `PROCURA__*` environment variables (`__` separates sections, e.g.
//! `PROCURA__APPROVAL__TOKEN_TTL_MINUTES=30`).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use config::{Config, Environment, File};
use rand::RngCore;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use procura_auth::{ApprovalTokenService, OverridePassword, TOKEN_KEY_LEN};

const CONFIG_FILE: &str = "config/procura";
const ENV_PREFIX: &str = "PROCURA";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("configuration load error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Deserialize)]
pub struct ApprovalSettings {
    pub token_ttl_minutes: i64,
    /// Base64 of a 32-byte key. Absent: a random per-process key is generated.
    #[serde(default)]
    pub token_key: Option<String>,
    #[serde(default)]
    pub override_password: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StoreSettings {
    pub max_conflict_retries: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ReceivingSettings {
    pub default_batch_shelf_life_days: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PurchasingSettings {
    pub po_code_prefix: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    pub approval: ApprovalSettings,
    pub store: StoreSettings,
    pub receiving: ReceivingSettings,
    pub purchasing: PurchasingSettings,
    pub log: LogSettings,
}

fn with_defaults(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
    builder
        .set_default("approval.token_ttl_minutes", 60)?
        .set_default("store.max_conflict_retries", 8)?
        .set_default("receiving.default_batch_shelf_life_days", 365)?
        .set_default("purchasing.po_code_prefix", "PO")?
        .set_default("log.level", "info")?
        .set_default("log.json", true)
}

impl Settings {
    /// Load from defaults, the optional config file and the environment.
    pub fn load() -> Result<Self, SettingsError> {
        let cfg = with_defaults(Config::builder())?
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        let settings = Self::from_config(cfg)?;
        info!(
            token_ttl_minutes = settings.approval.token_ttl_minutes,
            max_conflict_retries = settings.store.max_conflict_retries,
            "configuration loaded"
        );
        Ok(settings)
    }

    /// Built-in defaults only.
    pub fn defaults() -> Result<Self, SettingsError> {
        Self::from_config(with_defaults(Config::builder())?.build()?)
    }

    pub fn from_config(cfg: Config) -> Result<Self, SettingsError> {
        let settings: Settings = cfg.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.approval.token_ttl_minutes <= 0 {
            return Err(SettingsError::Invalid(
                "approval.token_ttl_minutes must be positive".to_string(),
            ));
        }
        if let Some(key) = &self.approval.token_key {
            decode_key(key)?;
        }
        if self.receiving.default_batch_shelf_life_days <= 0 {
            return Err(SettingsError::Invalid(
                "receiving.default_batch_shelf_life_days must be positive".to_string(),
            ));
        }
        if self.purchasing.po_code_prefix.trim().is_empty() {
            return Err(SettingsError::Invalid(
                "purchasing.po_code_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.approval.token_ttl_minutes)
    }

    pub fn batch_shelf_life(&self) -> chrono::Duration {
        chrono::Duration::days(self.receiving.default_batch_shelf_life_days)
    }

    /// Token service from the configured key, or from a fresh random key.
    pub fn token_service(&self) -> Result<ApprovalTokenService, SettingsError> {
        let key = match &self.approval.token_key {
            Some(encoded) => decode_key(encoded)?,
            None => {
                warn!("approval.token_key not set; tokens will not survive a restart");
                let mut key = vec![0u8; TOKEN_KEY_LEN];
                rand::thread_rng().fill_bytes(&mut key);
                key
            }
        };
        ApprovalTokenService::new(&key, self.token_ttl())
            .map_err(|e| SettingsError::Invalid(e.to_string()))
    }

    pub fn override_password(&self) -> OverridePassword {
        OverridePassword::from_config(self.approval.override_password.as_deref())
    }

    /// Install the tracing subscriber described by `log.*`.
    pub fn init_tracing(&self) {
        procura_observability::init_with(&self.log.level, self.log.json);
    }
}

fn decode_key(encoded: &str) -> Result<Vec<u8>, SettingsError> {
    let key = STANDARD
        .decode(encoded.trim())
        .map_err(|e| SettingsError::Invalid(format!("approval.token_key is not base64: {e}")))?;
    if key.len() != TOKEN_KEY_LEN {
        return Err(SettingsError::Invalid(format!(
            "approval.token_key must decode to {TOKEN_KEY_LEN} bytes, got {}",
            key.len()
        )));
    }
    Ok(key)
}
