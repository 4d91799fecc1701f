use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::exchange::{MarginMode, OkxCredentials};
use crate::execution::ExecutionSettings;
use crate::oracle::ChatSettings;
use crate::retry::RetryPolicy;
use crate::risk::RiskLimits;

pub const ENV_PREFIX: &str = "PERPBOT";
pub const DEFAULT_CONFIG_FILE: &str = "perpbot.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variables: {0}")]
    Missing(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
}

/// Trading parameters, fixed for the life of the process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradeConfig {
    pub symbol: String,
    pub inst_id: String,
    pub timeframe: String,
    pub data_points: usize,
    pub target_notional: f64,
    pub leverage: u32,
    pub max_position_value: f64,
    pub min_trade_value: f64,
    pub margin_usage_cap: f64,
    pub margin_mode: MarginMode,
    pub test_mode: bool,
    pub allow_pyramiding: bool,
    pub flatten_on_start: bool,
    pub interval_minutes: u32,
    pub retry_attempts: u32,
    pub retry_delay_secs: u64,
    pub close_settle_secs: u64,
    pub refresh_settle_secs: u64,
    pub cooldown_secs: u64,
    pub signal_history: usize,
    pub default_balance: f64,
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            symbol: "OKB/USDT:USDT".to_string(),
            inst_id: "OKB-USDT-SWAP".to_string(),
            timeframe: "5m".to_string(),
            data_points: 96,               // 8 hours of 5m candles
            target_notional: 5.0,          // USDT per trade
            leverage: 10,
            max_position_value: 100.0,
            min_trade_value: 3.0,
            margin_usage_cap: 0.6,
            margin_mode: MarginMode::Isolated,
            test_mode: false,
            allow_pyramiding: false,
            flatten_on_start: false,
            interval_minutes: 5,
            retry_attempts: 3,
            retry_delay_secs: 2,
            close_settle_secs: 2,
            refresh_settle_secs: 3,
            cooldown_secs: 60,
            signal_history: 30,
            default_balance: 10.0,
        }
    }
}

impl TradeConfig {
    /// Defaults, then the optional TOML file, then `PERPBOT_*` variables
    ///
    /// Fields absent from every source keep their `Default` value.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => ::config::File::from(p).required(true),
            None => ::config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config: TradeConfig = ::config::Config::builder()
            .add_source(file)
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.inst_id.trim().is_empty() {
            return invalid("inst_id is empty".to_string());
        }
        if self.leverage == 0 || self.leverage > 125 {
            return invalid(format!("leverage {} outside 1..=125", self.leverage));
        }
        if !(self.target_notional > 0.0) {
            return invalid(format!("target_notional {} must be positive", self.target_notional));
        }
        if self.max_position_value < self.target_notional {
            return invalid(format!(
                "max_position_value {} below target_notional {}",
                self.max_position_value, self.target_notional
            ));
        }
        if !(self.margin_usage_cap > 0.0 && self.margin_usage_cap <= 1.0) {
            return invalid(format!("margin_usage_cap {} outside (0, 1]", self.margin_usage_cap));
        }
        if self.interval_minutes == 0 || 60 % self.interval_minutes != 0 {
            return invalid(format!(
                "interval_minutes {} must divide an hour",
                self.interval_minutes
            ));
        }
        if self.data_points == 0 {
            return invalid("data_points must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, Duration::from_secs(self.retry_delay_secs))
    }

    pub fn risk_limits(&self) -> RiskLimits {
        RiskLimits {
            margin_usage_cap: self.margin_usage_cap,
            max_position_value: self.max_position_value,
            min_trade_value: self.min_trade_value,
        }
    }

    pub fn execution_settings(&self) -> ExecutionSettings {
        ExecutionSettings {
            inst_id: self.inst_id.clone(),
            margin_mode: self.margin_mode,
            leverage: self.leverage,
            target_notional: self.target_notional,
            test_mode: self.test_mode,
            allow_pyramiding: self.allow_pyramiding,
            close_settle: Duration::from_secs(self.close_settle_secs),
            refresh_settle: Duration::from_secs(self.refresh_settle_secs),
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Secrets read from the environment
#[derive(Clone)]
pub struct Credentials {
    pub okx: OkxCredentials,
    pub oracle_api_key: String,
    pub oracle: ChatSettings,
    pub simulated: bool,
}

impl Credentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reports every missing variable at once
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = ["OKX_API_KEY", "OKX_SECRET", "OKX_PASSWORD", "DEEPSEEK_API_KEY"];
        let values: Vec<Option<String>> = required
            .iter()
            .map(|name| lookup(name).filter(|v| !v.trim().is_empty()))
            .collect();

        let missing: Vec<&str> = required
            .iter()
            .zip(&values)
            .filter(|(_, v)| v.is_none())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing.join(", ")));
        }

        let mut values = values.into_iter().flatten();
        let mut next = || values.next().unwrap_or_default();
        let okx = OkxCredentials {
            api_key: next(),
            secret_key: next(),
            passphrase: next(),
        };
        let oracle_api_key = next();

        let mut oracle = ChatSettings::default();
        if let Some(base_url) = lookup("DEEPSEEK_BASE_URL") {
            oracle.base_url = base_url;
        }
        if let Some(model) = lookup("DEEPSEEK_MODEL") {
            oracle.model = model;
        }

        let simulated = lookup("OKX_SIMULATED")
            .map(|v| matches!(v.trim(), "1" | "true" | "TRUE"))
            .unwrap_or(false);

        Ok(Self {
            okx,
            oracle_api_key,
            oracle,
            simulated,
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("okx", &self.okx)
            .field("oracle_api_key", &"<redacted>")
            .field("oracle", &self.oracle)
            .field("simulated", &self.simulated)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = TradeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.leverage, 10);
        assert_eq!(config.data_points, 96);
        assert_eq!(config.margin_mode, MarginMode::Isolated);
    }

    #[test]
    fn test_rejects_bad_interval() {
        let config = TradeConfig {
            interval_minutes: 7,
            ..TradeConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_zero_leverage() {
        let config = TradeConfig {
            leverage: 0,
            ..TradeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join(format!("perpbot-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("perpbot.toml");
        std::fs::write(&path, "leverage = 5\ntarget_notional = 8.0\ntest_mode = true\n").unwrap();

        let config = TradeConfig::load(Some(&path)).unwrap();

        assert_eq!(config.leverage, 5);
        assert_eq!(config.target_notional, 8.0);
        assert!(config.test_mode);
        assert_eq!(config.inst_id, "OKB-USDT-SWAP");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_credentials_are_all_named() {
        let vars = env(&[("OKX_API_KEY", "k")]);
        let err = Credentials::from_lookup(|name| vars.get(name).cloned()).unwrap_err();

        let message = err.to_string();
        assert!(message.contains("OKX_SECRET"));
        assert!(message.contains("OKX_PASSWORD"));
        assert!(message.contains("DEEPSEEK_API_KEY"));
        assert!(!message.contains("OKX_API_KEY"));
    }

    #[test]
    fn test_credentials_with_overrides() {
        let vars = env(&[
            ("OKX_API_KEY", "k"),
            ("OKX_SECRET", "s"),
            ("OKX_PASSWORD", "p"),
            ("DEEPSEEK_API_KEY", "d"),
            ("DEEPSEEK_MODEL", "deepseek-reasoner"),
            ("OKX_SIMULATED", "1"),
        ]);
        let creds = Credentials::from_lookup(|name| vars.get(name).cloned()).unwrap();

        assert_eq!(creds.oracle_api_key, "d");
        assert_eq!(creds.oracle.model, "deepseek-reasoner");
        assert!(creds.simulated);
        assert!(!format!("{:?}", creds).contains("\"d\""));
    }
}
