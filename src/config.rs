use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use crate::saga::SagaOptions;
use crate::sequencer::{DEFAULT_EVENT_LIMIT, SequencerConfig};
use crate::substrate::event_log::DEFAULT_SOFT_LIMIT;
use crate::substrate::host::DEFAULT_FINISHED_RETENTION;
use crate::substrate::retry::{ActivityOptions, RetryPolicy};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub saga: SagaConfig,
    /// Simulation switches for the in-memory account executor
    #[serde(default)]
    pub executor: ExecutorConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LedgerConfig {
    pub event_limit: u64,
    pub event_log_soft_limit: u64,
    pub command_buffer: usize,
    pub dispatch_retry_ms: u64,
    /// Checkpoints are kept in memory only when unset
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            event_limit: DEFAULT_EVENT_LIMIT,
            event_log_soft_limit: DEFAULT_SOFT_LIMIT,
            command_buffer: 1024,
            dispatch_retry_ms: 500,
            checkpoint_dir: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SagaConfig {
    pub initial_interval_ms: u64,
    pub backoff_coefficient: f64,
    pub maximum_interval_ms: u64,
    pub maximum_attempts: u32,
    pub start_to_close_ms: u64,
    pub schedule_to_close_ms: u64,
    pub withdraw_heartbeat_ms: u64,
    /// Finished saga processes remembered by the host
    pub finished_retention: usize,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 1_000,
            backoff_coefficient: 2.0,
            maximum_interval_ms: 20_000,
            maximum_attempts: 3,
            start_to_close_ms: 2_000,
            schedule_to_close_ms: 5_000_000,
            withdraw_heartbeat_ms: 5_000,
            finished_retention: DEFAULT_FINISHED_RETENTION,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ExecutorConfig {
    pub fail_withdraw: bool,
    pub fail_deposit: bool,
    pub fail_refund: bool,
    pub withdraw_latency_ms: u64,
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid config: {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(content).context("Failed to parse config yaml")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ledger.command_buffer == 0 {
            bail!("ledger.command_buffer must be positive");
        }
        if self.ledger.event_log_soft_limit == 0 {
            bail!("ledger.event_log_soft_limit must be positive");
        }
        if self.saga.maximum_attempts == 0 {
            bail!("saga.maximum_attempts must be at least 1");
        }
        if !self.saga.backoff_coefficient.is_finite() || self.saga.backoff_coefficient < 1.0 {
            bail!(
                "saga.backoff_coefficient must be a finite number >= 1.0, got {}",
                self.saga.backoff_coefficient
            );
        }
        if self.saga.start_to_close_ms == 0 {
            bail!("saga.start_to_close_ms must be positive");
        }
        if self.saga.finished_retention == 0 {
            bail!("saga.finished_retention must be positive");
        }
        if self.saga.maximum_interval_ms < self.saga.initial_interval_ms {
            bail!("saga.maximum_interval_ms must not be below saga.initial_interval_ms");
        }
        Ok(())
    }

    pub fn sequencer_config(&self) -> SequencerConfig {
        SequencerConfig {
            event_limit: self.ledger.event_limit,
            event_log_soft_limit: self.ledger.event_log_soft_limit,
            command_buffer: self.ledger.command_buffer,
            dispatch_retry_delay: Duration::from_millis(self.ledger.dispatch_retry_ms),
        }
    }

    pub fn saga_options(&self) -> SagaOptions {
        let saga = &self.saga;
        SagaOptions {
            activity: ActivityOptions {
                retry: RetryPolicy {
                    initial_interval: Duration::from_millis(saga.initial_interval_ms),
                    backoff_coefficient: saga.backoff_coefficient,
                    maximum_interval: Duration::from_millis(saga.maximum_interval_ms),
                    maximum_attempts: saga.maximum_attempts,
                },
                start_to_close: Duration::from_millis(saga.start_to_close_ms),
                schedule_to_close: Duration::from_millis(saga.schedule_to_close_ms),
                heartbeat_timeout: None,
            },
            withdraw_heartbeat: Duration::from_millis(saga.withdraw_heartbeat_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
log_level: info
log_dir: ./logs
log_file: ledger.log
use_json: false
rotation: never
gateway:
  host: 127.0.0.1
  port: 8080
"#;

    #[test]
    fn test_defaults_match_saga_defaults() {
        let config = AppConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.ledger.event_limit, 3);
        assert!(config.ledger.checkpoint_dir.is_none());
        assert_eq!(config.saga_options(), SagaOptions::default());
        assert!(!config.executor.fail_deposit);
    }

    #[test]
    fn test_overrides() {
        let yaml = format!(
            "{}ledger:\n  event_limit: 10\n  checkpoint_dir: ./data/ledger\nsaga:\n  maximum_attempts: 5\nexecutor:\n  fail_deposit: true\n",
            MINIMAL
        );
        let config = AppConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config.sequencer_config().event_limit, 10);
        assert_eq!(
            config.ledger.checkpoint_dir,
            Some(PathBuf::from("./data/ledger"))
        );
        assert_eq!(config.saga_options().activity.retry.maximum_attempts, 5);
        // unset fields keep their defaults
        assert_eq!(config.saga.start_to_close_ms, 2_000);
        assert!(config.executor.fail_deposit);
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let yaml = format!("{}saga:\n  maximum_attempts: 0\n", MINIMAL);
        assert!(AppConfig::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_rejects_zero_start_to_close() {
        let yaml = format!("{}saga:\n  start_to_close_ms: 0\n", MINIMAL);
        assert!(AppConfig::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_rejects_non_finite_backoff() {
        let mut config = AppConfig::from_yaml(MINIMAL).unwrap();
        config.saga.backoff_coefficient = f64::NAN;
        assert!(config.validate().is_err());
        config.saga.backoff_coefficient = f64::INFINITY;
        assert!(config.validate().is_err());
        config.saga.backoff_coefficient = 1.5;
        assert!(config.validate().is_ok());
    }
}
