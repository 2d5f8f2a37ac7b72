//! Earning rule table.
//!
//! Pure mapping from an activity category and a quantity to a point amount. Nothing here
//! touches storage; once-per-day and once-per-event guarantees belong to the dispatcher.

use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

/// Stamped into the metadata of every earned transaction so a later rate change never
/// reinterprets historical payouts.
pub const RULES_VERSION: u32 = 1;

pub const POINTS_PER_1000_VIEWS: i64 = 5;
pub const POINTS_PER_TIP: i64 = 1;
pub const POINTS_PER_SUBSCRIPTION: i64 = 10;
pub const POINTS_PER_1000_SALES: i64 = 10;
pub const POINTS_PER_REFERRAL: i64 = 50;
pub const POINTS_PER_DAILY_LOGIN: i64 = 5;

/// Wallet bonus paid alongside a referral award, in USD cents.
pub const REFERRAL_WALLET_BONUS_CENTS: i64 = 100;

/// Activity category a ledger row originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Views,
    Tips,
    Subscriptions,
    Sales,
    Referral,
    DailyLogin,
    Bonus,
    Penalty,
    Boost,
    Withdrawal,
    Transfer,
}

impl SourceType {
    pub const ALL: [SourceType; 11] = [
        SourceType::Views,
        SourceType::Tips,
        SourceType::Subscriptions,
        SourceType::Sales,
        SourceType::Referral,
        SourceType::DailyLogin,
        SourceType::Bonus,
        SourceType::Penalty,
        SourceType::Boost,
        SourceType::Withdrawal,
        SourceType::Transfer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Views => "views",
            SourceType::Tips => "tips",
            SourceType::Subscriptions => "subscriptions",
            SourceType::Sales => "sales",
            SourceType::Referral => "referral",
            SourceType::DailyLogin => "daily_login",
            SourceType::Bonus => "bonus",
            SourceType::Penalty => "penalty",
            SourceType::Boost => "boost",
            SourceType::Withdrawal => "withdrawal",
            SourceType::Transfer => "transfer",
        }
    }

    /// Whether activity of this kind earns points through the rule table.
    pub fn is_earning(&self) -> bool {
        matches!(
            self,
            SourceType::Views
                | SourceType::Tips
                | SourceType::Subscriptions
                | SourceType::Sales
                | SourceType::Referral
                | SourceType::DailyLogin
        )
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSourceType(pub String);

impl fmt::Display for UnknownSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown source type: {}", self.0)
    }
}

impl std::error::Error for UnknownSourceType {}

impl FromStr for SourceType {
    type Err = UnknownSourceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownSourceType(s.to_string()))
    }
}

/// Points earned for `quantity` units of `source_type`.
///
/// Views and sales only pay out in whole thousands: 999 views earn nothing, 1999 earn the
/// same as 1000. Sales quantity is the sale value in whole naira. Referral and daily login
/// are flat per occurrence. Non-earning categories always return zero.
pub fn compute_points(source_type: SourceType, quantity: u64) -> i64 {
    let quantity = i64::try_from(quantity).unwrap_or(i64::MAX);
    match source_type {
        SourceType::Views => (quantity / 1000).saturating_mul(POINTS_PER_1000_VIEWS),
        SourceType::Tips => quantity.saturating_mul(POINTS_PER_TIP),
        SourceType::Subscriptions => quantity.saturating_mul(POINTS_PER_SUBSCRIPTION),
        SourceType::Sales => (quantity / 1000).saturating_mul(POINTS_PER_1000_SALES),
        SourceType::Referral => quantity.saturating_mul(POINTS_PER_REFERRAL),
        SourceType::DailyLogin if quantity > 0 => POINTS_PER_DAILY_LOGIN,
        _ => 0,
    }
}

/// Monetary bonus (USD) credited to the main wallet alongside the points, if any.
pub fn wallet_bonus(source_type: SourceType) -> Option<BigDecimal> {
    match source_type {
        SourceType::Referral => Some(BigDecimal::new(REFERRAL_WALLET_BONUS_CENTS.into(), 2)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn views_pay_only_whole_thousands() {
        assert_eq!(compute_points(SourceType::Views, 0), 0);
        assert_eq!(compute_points(SourceType::Views, 999), 0);
        assert_eq!(compute_points(SourceType::Views, 1000), 5);
        assert_eq!(compute_points(SourceType::Views, 1999), 5);
        assert_eq!(compute_points(SourceType::Views, 2000), 10);
    }

    #[test]
    fn sales_pay_only_whole_thousands() {
        assert_eq!(compute_points(SourceType::Sales, 0), 0);
        assert_eq!(compute_points(SourceType::Sales, 999), 0);
        assert_eq!(compute_points(SourceType::Sales, 1000), 10);
        assert_eq!(compute_points(SourceType::Sales, 25_500), 250);
    }

    #[test]
    fn per_event_rules() {
        assert_eq!(compute_points(SourceType::Tips, 1), 1);
        assert_eq!(compute_points(SourceType::Tips, 7), 7);
        assert_eq!(compute_points(SourceType::Subscriptions, 3), 30);
        assert_eq!(compute_points(SourceType::Referral, 1), 50);
        assert_eq!(compute_points(SourceType::DailyLogin, 1), 5);
        assert_eq!(compute_points(SourceType::DailyLogin, 4), 5);
        assert_eq!(compute_points(SourceType::DailyLogin, 0), 0);
    }

    #[test]
    fn non_earning_sources_yield_nothing() {
        for source in SourceType::ALL.iter().filter(|s| !s.is_earning()) {
            assert_eq!(compute_points(*source, 10_000), 0, "{source}");
        }
    }

    #[test]
    fn huge_quantities_saturate() {
        assert_eq!(compute_points(SourceType::Subscriptions, u64::MAX), i64::MAX);
    }

    #[test]
    fn source_type_string_forms() {
        for source in SourceType::ALL {
            assert_eq!(source.as_str().parse::<SourceType>(), Ok(source));
        }
        assert!("likes".parse::<SourceType>().is_err());
    }

    #[test]
    fn only_referral_carries_wallet_bonus() {
        assert_eq!(wallet_bonus(SourceType::Referral), Some(BigDecimal::new(100i64.into(), 2)));
        assert_eq!(wallet_bonus(SourceType::Tips), None);
    }
}
