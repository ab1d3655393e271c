//! Configuration module for snt-billing-service.

use crate::services::MatcherConfig;
use rust_decimal::Decimal;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    /// OTLP export is enabled only when set.
    pub otlp_endpoint: Option<String>,
    pub matching: MatcherConfig,
    pub import: ImportConfig,
    pub debt_min_amount: Decimal,
}

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub max_rows: usize,
}

fn parse_env<T: FromStr>(key: &str) -> Result<Option<T>, AppError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AppError::ConfigError(anyhow::anyhow!("{} has an invalid value", key))),
        _ => Ok(None),
    }
}

impl BillingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let defaults = MatcherConfig::default();

        let config = Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "snt-billing-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|e| !e.is_empty()),
            matching: MatcherConfig {
                auto_threshold: parse_env("MATCH_AUTO_THRESHOLD")?
                    .unwrap_or(defaults.auto_threshold),
                candidate_threshold: parse_env("MATCH_CANDIDATE_THRESHOLD")?
                    .unwrap_or(defaults.candidate_threshold),
                ambiguity_margin: parse_env("MATCH_AMBIGUITY_MARGIN")?
                    .unwrap_or(defaults.ambiguity_margin),
                max_candidates: parse_env("MATCH_MAX_CANDIDATES")?
                    .unwrap_or(defaults.max_candidates),
            },
            import: ImportConfig {
                max_rows: parse_env("IMPORT_MAX_ROWS")?.unwrap_or(5000),
            },
            debt_min_amount: parse_env("DEBT_MIN_AMOUNT")?.unwrap_or(Decimal::ZERO),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        let thresholds = [
            ("MATCH_AUTO_THRESHOLD", self.matching.auto_threshold),
            ("MATCH_CANDIDATE_THRESHOLD", self.matching.candidate_threshold),
            ("MATCH_AMBIGUITY_MARGIN", self.matching.ambiguity_margin),
        ];
        for (key, value) in thresholds {
            if !(0.0..=1.0).contains(&value) {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} must be between 0 and 1",
                    key
                )));
            }
        }
        if self.import.max_rows == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "IMPORT_MAX_ROWS must be positive"
            )));
        }
        Ok(())
    }

    /// Settings for tests and local runs: ephemeral port, default matching.
    pub fn for_tests() -> Self {
        Self {
            common: core_config::Config {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            service_name: "snt-billing-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "warn".to_string(),
            otlp_endpoint: None,
            matching: MatcherConfig::default(),
            import: ImportConfig { max_rows: 5000 },
            debt_min_amount: Decimal::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(BillingConfig::for_tests().validate().is_ok());
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let mut config = BillingConfig::for_tests();
        config.matching.auto_threshold = 1.5;
        assert!(matches!(config.validate(), Err(AppError::ConfigError(_))));

        let mut config = BillingConfig::for_tests();
        config.import.max_rows = 0;
        assert!(config.validate().is_err());
    }
}
