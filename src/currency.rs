use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::{BigDecimal, ToPrimitive};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CurrencyError {
    #[error("unsupported currency: {0}")]
    Unsupported(String),
    #[error("invalid rates table: {0}")]
    InvalidRates(String),
}

/// Fixed-rate converter anchored on a base currency (USD for the points economy).
#[derive(Debug, Clone)]
pub struct CurrencyConverter {
    base_currency: String,
    rates: Arc<HashMap<String, BigDecimal>>,
}

impl CurrencyConverter {
    pub fn new(base_currency: String, rates: HashMap<String, BigDecimal>) -> Self {
        Self {
            base_currency,
            rates: Arc::new(rates),
        }
    }

    pub fn base_currency(&self) -> &str {
        &self.base_currency
    }

    pub fn is_currency_valid(&self, currency: &str) -> bool {
        currency == self.base_currency || self.rates.contains_key(currency)
    }

    fn rate(&self, currency: &str) -> Result<BigDecimal, CurrencyError> {
        if currency == self.base_currency {
            return Ok(BigDecimal::from(1));
        }
        self.rates
            .get(currency)
            .cloned()
            .ok_or_else(|| CurrencyError::Unsupported(currency.to_string()))
    }

    pub fn convert(
        &self,
        from_currency: &str,
        value: &BigDecimal,
        into_currency: &str,
    ) -> Result<BigDecimal, CurrencyError> {
        if from_currency == into_currency {
            return Ok(value.clone());
        }
        let from_rate = self.rate(from_currency)?;
        let into_rate = self.rate(into_currency)?;
        Ok(value * into_rate / from_rate)
    }

    pub fn to_base(&self, from_currency: &str, value: &BigDecimal) -> Result<BigDecimal, CurrencyError> {
        let base = self.base_currency.clone();
        self.convert(from_currency, value, &base)
    }

    pub fn from_base(&self, value: &BigDecimal, into_currency: &str) -> Result<BigDecimal, CurrencyError> {
        let base = self.base_currency.clone();
        self.convert(&base, value, into_currency)
    }
}

/// Rounds half-up to cents. Amounts handled here are never negative.
pub fn round_cents(value: &BigDecimal) -> BigDecimal {
    (value + BigDecimal::new(5i64.into(), 3)).with_scale(2)
}

/// Smallest whole number of points covering `base_value` at `points_per_unit`.
pub fn points_for(base_value: &BigDecimal, points_per_unit: i64) -> Option<i64> {
    let exact = base_value * BigDecimal::from(points_per_unit);
    let truncated = exact.with_scale(0);
    let whole = if truncated < exact {
        truncated + BigDecimal::from(1)
    } else {
        truncated
    };
    whole.to_i64()
}

/// Base-currency value of `points`.
pub fn value_of_points(points: i64, points_per_unit: i64) -> BigDecimal {
    BigDecimal::from(points) / BigDecimal::from(points_per_unit)
}

pub fn create_currency_converter() -> Result<CurrencyConverter, CurrencyError> {
    // TODO: fetch live rates from the exchange-rates provider and refresh them periodically
    parse_rates(STUB_CURRENCY_RATES_JSON)
}

fn parse_rates(json: &str) -> Result<CurrencyConverter, CurrencyError> {
    let json: serde_json::Value =
        serde_json::from_str(json).map_err(|e| CurrencyError::InvalidRates(e.to_string()))?;
    let base_currency = json["base"]
        .as_str()
        .ok_or_else(|| CurrencyError::InvalidRates("missing base".to_string()))?
        .to_string();
    let table = json["rates"]
        .as_object()
        .ok_or_else(|| CurrencyError::InvalidRates("missing rates".to_string()))?;
    let mut rates = HashMap::with_capacity(table.len());
    for (code, rate) in table {
        // go through the textual form so 0.92 stays 0.92
        let rate = BigDecimal::from_str(&rate.to_string())
            .map_err(|e| CurrencyError::InvalidRates(format!("{code}: {e}")))?;
        rates.insert(code.to_string(), rate);
    }
    Ok(CurrencyConverter::new(base_currency, rates))
}

const STUB_CURRENCY_RATES_JSON: &str = r#"{
  "base": "USD",
  "date": "2026-10-01",
  "rates": {
    "CAD": 1.37,
    "EUR": 0.92,
    "GBP": 0.79,
    "GHS": 15.6,
    "KES": 129.2,
    "NGN": 1500,
    "ZAR": 18.1
  }
}"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn converts_through_base() {
        let curr = create_currency_converter().unwrap();
        assert_eq!(curr.base_currency(), "USD");
        assert_eq!(curr.convert("USD", &dec("2"), "NGN").unwrap(), dec("3000"));
        assert_eq!(curr.to_base("NGN", &dec("1500")).unwrap(), dec("1"));
        assert_eq!(curr.convert("USD", &dec("5"), "USD").unwrap(), dec("5"));
        assert_eq!(
            curr.convert("XYZ", &dec("1"), "USD"),
            Err(CurrencyError::Unsupported("XYZ".to_string()))
        );
        assert!(curr.is_currency_valid("EUR"));
        assert!(!curr.is_currency_valid("XYZ"));
    }

    #[test]
    fn points_round_up_to_cover_value() {
        assert_eq!(points_for(&dec("5"), 100), Some(500));
        assert_eq!(points_for(&dec("5.001"), 100), Some(501));
        assert_eq!(points_for(&dec("0"), 100), Some(0));
        assert_eq!(value_of_points(1000, 100), dec("10"));
    }

    #[test]
    fn rounds_cents_half_up() {
        assert_eq!(round_cents(&dec("0.104")), dec("0.10"));
        assert_eq!(round_cents(&dec("0.105")), dec("0.11"));
        assert_eq!(round_cents(&dec("4.5")), dec("4.50"));
    }
}
