use std::time::Duration;

use chrono::NaiveDate;

use crate::core::{
    DEFAULT_CYCLES, DEFAULT_PENSION_TAX_RATE, DEFAULT_SAFE_WITHDRAWAL_RATE, DEFAULT_YEARS,
    MAX_SIMULATION_YEARS, SummaryOptions, default_fallback_start_date, parse_date,
};
use crate::error::{SimError, SimResult};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub default_cycles: u32,
    pub default_years: u32,
    /// A run holds `max_cycles * (max_years * 12 + 1)` f64 path values in
    /// memory at once; the defaults cap that at about 240 MB per request.
    pub max_cycles: u32,
    pub max_years: u32,
    pub fallback_start_date: NaiveDate,
    pub timeout: Duration,
    pub pension_tax_rate: f64,
    pub safe_withdrawal_rate: f64,
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            default_cycles: DEFAULT_CYCLES,
            default_years: DEFAULT_YEARS,
            max_cycles: 50_000,
            max_years: 50,
            fallback_start_date: default_fallback_start_date(),
            timeout: Duration::from_secs(60),
            pension_tax_rate: DEFAULT_PENSION_TAX_RATE,
            safe_withdrawal_rate: DEFAULT_SAFE_WITHDRAWAL_RATE,
            log_filter: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Reads `PROPHET_*` variables, loading a `.env` file first if present.
    pub fn from_env() -> SimResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> SimResult<Self> {
        let defaults = Self::default();

        let fallback_start_date = match lookup("PROPHET_FALLBACK_START_DATE") {
            Some(raw) => parse_date(&raw)
                .map_err(|e| SimError::Config(format!("PROPHET_FALLBACK_START_DATE: {e}")))?,
            None => defaults.fallback_start_date,
        };

        let log_filter = lookup("PROPHET_LOG")
            .or_else(|| lookup("RUST_LOG"))
            .unwrap_or(defaults.log_filter);

        let config = Self {
            port: parse_or(&lookup, "PROPHET_PORT", defaults.port)?,
            default_cycles: parse_or(&lookup, "PROPHET_DEFAULT_CYCLES", defaults.default_cycles)?,
            default_years: parse_or(&lookup, "PROPHET_DEFAULT_YEARS", defaults.default_years)?,
            max_cycles: parse_or(&lookup, "PROPHET_MAX_CYCLES", defaults.max_cycles)?,
            max_years: parse_or(&lookup, "PROPHET_MAX_YEARS", defaults.max_years)?,
            fallback_start_date,
            timeout: Duration::from_secs(parse_or(
                &lookup,
                "PROPHET_TIMEOUT_SECS",
                defaults.timeout.as_secs(),
            )?),
            pension_tax_rate: parse_or(&lookup, "PROPHET_PENSION_TAX_RATE", defaults.pension_tax_rate)?,
            safe_withdrawal_rate: parse_or(
                &lookup,
                "PROPHET_SAFE_WITHDRAWAL_RATE",
                defaults.safe_withdrawal_rate,
            )?,
            log_filter,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.max_cycles == 0 || self.max_years == 0 {
            return Err(SimError::Config(
                "PROPHET_MAX_CYCLES and PROPHET_MAX_YEARS must be > 0".to_string(),
            ));
        }
        if self.max_years > MAX_SIMULATION_YEARS {
            return Err(SimError::Config(format!(
                "PROPHET_MAX_YEARS must be <= {MAX_SIMULATION_YEARS}"
            )));
        }
        if self.default_cycles > self.max_cycles {
            return Err(SimError::Config(
                "PROPHET_DEFAULT_CYCLES must be <= PROPHET_MAX_CYCLES".to_string(),
            ));
        }
        if self.default_years > self.max_years {
            return Err(SimError::Config(
                "PROPHET_DEFAULT_YEARS must be <= PROPHET_MAX_YEARS".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(SimError::Config("PROPHET_TIMEOUT_SECS must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.pension_tax_rate) {
            return Err(SimError::Config(
                "PROPHET_PENSION_TAX_RATE must be between 0 and 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.safe_withdrawal_rate) {
            return Err(SimError::Config(
                "PROPHET_SAFE_WITHDRAWAL_RATE must be between 0 and 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn summary_options(&self) -> SummaryOptions {
        SummaryOptions {
            pension_tax_rate: self.pension_tax_rate,
            safe_withdrawal_rate: self.safe_withdrawal_rate,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> SimResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| SimError::Config(format!("{key}: {e}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> SimResult<AppConfig> {
        let vars = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_from(&[]).expect("defaults are valid");
        assert_eq!(config.port, 3001);
        assert_eq!(config.default_cycles, 15_000);
        assert_eq!(config.default_years, 15);
        assert_eq!(config.fallback_start_date.to_string(), "2025-01-01");
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn default_ceilings_bound_path_memory() {
        let config = AppConfig::default();
        let months = config.max_years as u64 * 12 + 1;
        let path_bytes = config.max_cycles as u64 * months * std::mem::size_of::<f64>() as u64;
        assert!(path_bytes <= 256 * 1024 * 1024, "{path_bytes} bytes");
    }

    #[test]
    fn env_values_override_defaults() {
        let config = config_from(&[
            ("PROPHET_PORT", "8080"),
            ("PROPHET_DEFAULT_CYCLES", "500"),
            ("PROPHET_FALLBACK_START_DATE", "2026-03-01"),
            ("PROPHET_PENSION_TAX_RATE", "0.25"),
            ("RUST_LOG", "debug"),
        ])
        .expect("valid config");
        assert_eq!(config.port, 8080);
        assert_eq!(config.default_cycles, 500);
        assert_eq!(config.fallback_start_date.to_string(), "2026-03-01");
        assert_eq!(config.summary_options().pension_tax_rate, 0.25);
        assert_eq!(config.log_filter, "debug");
    }

    #[test]
    fn malformed_values_are_config_errors() {
        for pairs in [
            [("PROPHET_PORT", "not-a-port")],
            [("PROPHET_FALLBACK_START_DATE", "01/01/2025")],
            [("PROPHET_SAFE_WITHDRAWAL_RATE", "4")],
            [("PROPHET_TIMEOUT_SECS", "0")],
            [("PROPHET_DEFAULT_YEARS", "500")],
            [("PROPHET_MAX_YEARS", "5000")],
        ] {
            let err = config_from(&pairs).expect_err("must reject");
            assert!(matches!(err, SimError::Config(_)), "{pairs:?}: {err}");
        }
    }
}
