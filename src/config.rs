//! Application configuration
//!
//! Loaded from a YAML file with environment overrides. Secrets (database
//! url, Alpaca keys) come only from the environment or mounted files and
//! are never baked into images. A distinct credential set exists per
//! exchange mode so live and paper runs trade concurrently in one process.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use crate::adapter::AlpacaCredentials;
use crate::backtest::{BacktestEngineConfig, CommissionModel, FillPolicy, SlippageModel};
use crate::orders::{OrderManagerConfig, TimeInForce};
use crate::runs::RunManagerConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file unreadable: {0}")]
    Io(String),

    #[error("config parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub event_log: EventLogConfig,
    #[serde(default)]
    pub alpaca: AlpacaConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
    #[serde(default)]
    pub strategies: StrategiesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/weaver".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogBackend {
    #[default]
    Durable,
    InMemory,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EventLogConfig {
    #[serde(default)]
    pub backend: LogBackend,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AlpacaConfig {
    pub live: Option<AlpacaCredentials>,
    pub paper: Option<AlpacaCredentials>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    pub default_time_in_force: TimeInForce,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            default_time_in_force: TimeInForce::Day,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub callback_timeout_seconds: u64,
    pub stop_grace_seconds: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            callback_timeout_seconds: 30,
            stop_grace_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommissionModelKind {
    #[default]
    None,
    Fixed,
    PerShare,
    Percentage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FillModelConfig {
    pub slippage_bps: Decimal,
    pub commission_model: CommissionModelKind,
    pub commission_value: Decimal,
}

impl Default for FillModelConfig {
    fn default() -> Self {
        Self {
            slippage_bps: Decimal::ZERO,
            commission_model: CommissionModelKind::None,
            commission_value: Decimal::ZERO,
        }
    }
}

impl FillModelConfig {
    pub fn to_policy(&self) -> FillPolicy {
        let slippage = if self.slippage_bps.is_zero() {
            SlippageModel::None
        } else {
            SlippageModel::Bps {
                bps: self.slippage_bps,
            }
        };
        let commission = match self.commission_model {
            CommissionModelKind::None => CommissionModel::None,
            CommissionModelKind::Fixed => CommissionModel::Fixed {
                amount: self.commission_value,
            },
            CommissionModelKind::PerShare => CommissionModel::PerShare {
                amount: self.commission_value,
            },
            CommissionModelKind::Percentage => CommissionModel::Percentage {
                pct: self.commission_value,
            },
        };
        FillPolicy {
            slippage,
            commission,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BacktestConfig {
    pub initial_capital: Decimal,
    #[serde(default)]
    pub fill: FillModelConfig,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: Decimal::new(100_000, 0),
            fill: FillModelConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StrategiesConfig {
    /// Plugin metadata directory. Builtins are available regardless.
    pub plugin_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: String,
    pub file: String,
    /// `hourly`, `daily`, or anything else for a single file.
    pub rotation: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: "logs".to_string(),
            file: "weaver.log".to_string(),
            rotation: "daily".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file, then apply environment
    /// overrides.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let mut config: AppConfig =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults plus environment overrides; used when no file is given.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Environment variables win over file values. Secrets are expected to
    /// arrive exclusively this way.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("WEAVER_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(port) = std::env::var("WEAVER_SERVER_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }

        for (mode, slot, default_base) in [
            ("LIVE", &mut self.alpaca.live, "https://api.alpaca.markets"),
            (
                "PAPER",
                &mut self.alpaca.paper,
                "https://paper-api.alpaca.markets",
            ),
        ] {
            let key = std::env::var(format!("WEAVER_ALPACA_{mode}_API_KEY"));
            let secret = std::env::var(format!("WEAVER_ALPACA_{mode}_API_SECRET"));
            let base_url = std::env::var(format!("WEAVER_ALPACA_{mode}_BASE_URL"));
            if let (Ok(api_key), Ok(api_secret)) = (key, secret) {
                let existing_base = slot.as_ref().map(|c| c.base_url.clone());
                *slot = Some(AlpacaCredentials {
                    api_key,
                    api_secret,
                    base_url: base_url
                        .ok()
                        .or(existing_base)
                        .unwrap_or_else(|| default_base.to_string()),
                });
            }
        }
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.run.callback_timeout_seconds)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.run.stop_grace_seconds)
    }

    pub fn run_manager_config(&self) -> RunManagerConfig {
        RunManagerConfig {
            callback_timeout: self.callback_timeout(),
            stop_grace: self.stop_grace(),
            engine: BacktestEngineConfig {
                fill_policy: self.backtest.fill.to_policy(),
                initial_capital: self.backtest.initial_capital,
                preload_margin_bars: BacktestEngineConfig::default().preload_margin_bars,
            },
        }
    }

    pub fn order_manager_config(&self) -> OrderManagerConfig {
        OrderManagerConfig {
            default_time_in_force: self.trading.default_time_in_force,
            ..OrderManagerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.event_log.backend, LogBackend::Durable);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.trading.default_time_in_force, TimeInForce::Day);
        assert_eq!(config.run.callback_timeout_seconds, 30);
        assert_eq!(config.run.stop_grace_seconds, 5);
        assert_eq!(config.backtest.initial_capital, dec!(100000));
    }

    #[test]
    fn test_yaml_deserialization() {
        let yaml = r#"
database:
  url: "postgres://db:5432/weaver"
event_log:
  backend: in_memory
server:
  port: 9000
trading:
  default_time_in_force: gtc
run:
  callback_timeout_seconds: 10
  stop_grace_seconds: 2
backtest:
  initial_capital: "250000"
  fill:
    slippage_bps: "2.5"
    commission_model: per_share
    commission_value: "0.01"
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.event_log.backend, LogBackend::InMemory);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.trading.default_time_in_force, TimeInForce::Gtc);
        assert_eq!(config.backtest.initial_capital, dec!(250000));
        assert_eq!(config.backtest.fill.slippage_bps, dec!(2.5));
        assert_eq!(
            config.backtest.fill.commission_model,
            CommissionModelKind::PerShare
        );
    }

    #[test]
    fn test_fill_model_to_policy() {
        let fill = FillModelConfig {
            slippage_bps: dec!(5),
            commission_model: CommissionModelKind::Percentage,
            commission_value: dec!(0.1),
        };
        assert_eq!(
            fill.to_policy(),
            FillPolicy {
                slippage: SlippageModel::Bps { bps: dec!(5) },
                commission: CommissionModel::Percentage { pct: dec!(0.1) },
            }
        );

        let zero = FillModelConfig::default();
        assert_eq!(zero.to_policy(), FillPolicy::default());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let yaml = "surprise: true\n";
        assert!(serde_yaml::from_str::<AppConfig>(yaml).is_err());
    }
}
