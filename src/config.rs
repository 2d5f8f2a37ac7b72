use std::env;
use std::str::FromStr;
use std::time::Duration;

use bigdecimal::BigDecimal;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Conversion and payout limits for the spend/withdrawal gate.
#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawalPolicy {
    /// Points per one unit of the base currency (USD).
    pub points_per_usd: i64,
    pub min_withdrawal_usd: BigDecimal,
    pub fee_rate: BigDecimal,
    pub min_fee_usd: BigDecimal,
}

impl Default for WithdrawalPolicy {
    fn default() -> Self {
        Self {
            points_per_usd: 100,
            min_withdrawal_usd: BigDecimal::from(5),
            fee_rate: BigDecimal::new(2i64.into(), 2),
            min_fee_usd: BigDecimal::new(5i64.into(), 1),
        }
    }
}

/// How hard the dispatcher tries before dead-lettering an award.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AwardPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for AwardPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(2000),
            max_attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_address: String,
    pub database_url: Option<String>,
    pub withdrawal: WithdrawalPolicy,
    pub award: AwardPolicy,
}

impl Settings {
    /// Reads settings from the process environment (after `.env` has been loaded).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let withdrawal_defaults = WithdrawalPolicy::default();
        let award_defaults = AwardPolicy::default();

        let withdrawal = WithdrawalPolicy {
            points_per_usd: parse_or(&lookup, "POINTS_PER_USD", withdrawal_defaults.points_per_usd)?,
            min_withdrawal_usd: parse_or(&lookup, "MIN_WITHDRAWAL_USD", withdrawal_defaults.min_withdrawal_usd)?,
            fee_rate: parse_or(&lookup, "WITHDRAWAL_FEE_RATE", withdrawal_defaults.fee_rate)?,
            min_fee_usd: parse_or(&lookup, "MIN_WITHDRAWAL_FEE_USD", withdrawal_defaults.min_fee_usd)?,
        };
        if withdrawal.points_per_usd <= 0 {
            return Err(ConfigError::Invalid {
                name: "POINTS_PER_USD",
                value: withdrawal.points_per_usd.to_string(),
            });
        }

        let award = AwardPolicy {
            timeout: Duration::from_millis(parse_or(
                &lookup,
                "AWARD_TIMEOUT_MS",
                award_defaults.timeout.as_millis() as u64,
            )?),
            max_attempts: parse_or(&lookup, "AWARD_MAX_ATTEMPTS", award_defaults.max_attempts)?.max(1),
            backoff: Duration::from_millis(parse_or(
                &lookup,
                "AWARD_BACKOFF_MS",
                award_defaults.backoff.as_millis() as u64,
            )?),
        };

        Ok(Self {
            bind_address: lookup("BIND_ADDRESS").unwrap_or_else(|| "127.0.0.1:8080".to_string()),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            withdrawal,
            award,
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings.bind_address, "127.0.0.1:8080");
        assert_eq!(settings.database_url, None);
        assert_eq!(settings.withdrawal, WithdrawalPolicy::default());
        assert_eq!(settings.award, AwardPolicy::default());
    }

    #[test]
    fn overrides_are_parsed() {
        let settings = Settings::from_lookup(lookup(&[
            ("BIND_ADDRESS", "0.0.0.0:9000"),
            ("DATABASE_URL", "postgres://localhost/points"),
            ("MIN_WITHDRAWAL_USD", "10"),
            ("AWARD_MAX_ATTEMPTS", "0"),
            ("AWARD_TIMEOUT_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(settings.bind_address, "0.0.0.0:9000");
        assert_eq!(settings.database_url.as_deref(), Some("postgres://localhost/points"));
        assert_eq!(settings.withdrawal.min_withdrawal_usd, BigDecimal::from(10));
        assert_eq!(settings.award.max_attempts, 1);
        assert_eq!(settings.award.timeout, Duration::from_millis(250));
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = Settings::from_lookup(lookup(&[("POINTS_PER_USD", "lots")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                name: "POINTS_PER_USD",
                value: "lots".to_string()
            }
        );
        assert!(Settings::from_lookup(lookup(&[("POINTS_PER_USD", "0")])).is_err());
        assert!(Settings::from_lookup(lookup(&[("DATABASE_URL", "")])).unwrap().database_url.is_none());
    }
}
