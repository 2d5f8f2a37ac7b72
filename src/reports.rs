//! Read-only summaries over a user's ledger history.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::currency::{round_cents, value_of_points};
use crate::ledger::{LedgerError, LedgerStore, PointsTransaction, TransactionType};
use crate::rules::SourceType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Day,
    Week,
    #[default]
    Month,
    Year,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::Year => "year",
        }
    }

    /// Trailing window ending at `now`.
    pub fn duration(&self) -> Duration {
        match self {
            Period::Day => Duration::days(1),
            Period::Week => Duration::weeks(1),
            Period::Month => Duration::days(30),
            Period::Year => Duration::days(365),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(Period::Day),
            "week" => Ok(Period::Week),
            "month" => Ok(Period::Month),
            "year" => Ok(Period::Year),
            other => Err(LedgerError::InvalidEntry(format!("unknown period: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsAnalytics {
    pub user_id: String,
    pub period: Period,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub earned: i64,
    pub spent: i64,
    pub net: i64,
    pub transaction_count: usize,
    /// Net amount per source type.
    pub by_source: BTreeMap<SourceType, i64>,
}

pub async fn analytics(
    store: &dyn LedgerStore,
    user_id: &str,
    period: Period,
    now: DateTime<Utc>,
) -> Result<PointsAnalytics, LedgerError> {
    let from = now - period.duration();
    let transactions = store.transactions_between(user_id, from, now + Duration::nanoseconds(1)).await?;

    let mut earned = 0i64;
    let mut spent = 0i64;
    let mut by_source = BTreeMap::new();
    for tx in &transactions {
        if tx.amount > 0 {
            earned += tx.amount;
        } else {
            spent -= tx.amount;
        }
        *by_source.entry(tx.source_type).or_insert(0) += tx.amount;
    }

    Ok(PointsAnalytics {
        user_id: user_id.to_string(),
        period,
        from,
        to: now,
        earned,
        spent,
        net: earned - spent,
        transaction_count: transactions.len(),
        by_source,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxReport {
    pub user_id: String,
    pub year: i32,
    /// Earned and bonus credits; refunds and incoming transfers are not income.
    pub points_earned: i64,
    /// Withdrawal debits net of refunds.
    pub points_withdrawn: i64,
    pub earned_usd: BigDecimal,
    pub withdrawn_usd: BigDecimal,
    pub withdrawals: Vec<PointsTransaction>,
}

pub async fn tax_report(
    store: &dyn LedgerStore,
    user_id: &str,
    year: i32,
    points_per_usd: i64,
) -> Result<TaxReport, LedgerError> {
    let start = Utc
        .with_ymd_and_hms(year, 1, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| LedgerError::InvalidEntry(format!("invalid year: {year}")))?;
    let end = Utc
        .with_ymd_and_hms(year + 1, 1, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| LedgerError::InvalidEntry(format!("invalid year: {year}")))?;
    let transactions = store.transactions_between(user_id, start, end).await?;

    let points_earned = transactions
        .iter()
        .filter(|tx| matches!(tx.transaction_type, TransactionType::Earned | TransactionType::Bonus))
        .map(|tx| tx.amount)
        .sum();
    let points_withdrawn = -transactions
        .iter()
        .filter(|tx| tx.source_type == SourceType::Withdrawal)
        .map(|tx| tx.amount)
        .sum::<i64>();
    let withdrawals = transactions
        .into_iter()
        .filter(|tx| tx.source_type == SourceType::Withdrawal && tx.transaction_type == TransactionType::Spent)
        .collect();

    Ok(TaxReport {
        user_id: user_id.to_string(),
        year,
        points_earned,
        points_withdrawn,
        earned_usd: round_cents(&value_of_points(points_earned, points_per_usd)),
        withdrawn_usd: round_cents(&value_of_points(points_withdrawn.max(0), points_per_usd)),
        withdrawals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{MemoryLedger, NewEntry};
    use chrono::Datelike;

    async fn seed(ledger: &MemoryLedger) {
        let entries = [
            NewEntry::new("kim", TransactionType::Earned, SourceType::Tips, 1).source_id("tip-1"),
            NewEntry::new("kim", TransactionType::Earned, SourceType::Referral, 50).source_id("ref-1"),
            NewEntry::new("kim", TransactionType::Bonus, SourceType::Bonus, 600).source_id("promo"),
            NewEntry::new("kim", TransactionType::Spent, SourceType::Boost, -30).source_id("boost-1"),
            NewEntry::new("kim", TransactionType::Spent, SourceType::Withdrawal, -500).source_id("w-1"),
            NewEntry::new("kim", TransactionType::Refund, SourceType::Withdrawal, 500).source_id("refund:w-1"),
            NewEntry::new("kim", TransactionType::Spent, SourceType::Withdrawal, -500).source_id("w-2"),
        ];
        for entry in entries {
            ledger.append(entry).await.unwrap();
        }
    }

    #[actix_web::test]
    async fn test_analytics_totals() {
        let ledger = MemoryLedger::new();
        seed(&ledger).await;

        let report = analytics(&ledger, "kim", Period::Day, Utc::now()).await.unwrap();

        assert_eq!(report.transaction_count, 7);
        assert_eq!(report.earned, 1151);
        assert_eq!(report.spent, 1030);
        assert_eq!(report.net, 121);
        assert_eq!(report.by_source[&SourceType::Withdrawal], -500);
        assert_eq!(report.by_source[&SourceType::Referral], 50);

        let empty = analytics(&ledger, "nobody", Period::Week, Utc::now()).await.unwrap();
        assert_eq!(empty.transaction_count, 0);
        assert!(empty.by_source.is_empty());
    }

    #[actix_web::test]
    async fn test_analytics_window_excludes_future() {
        let ledger = MemoryLedger::new();
        seed(&ledger).await;

        let last_year = analytics(&ledger, "kim", Period::Year, Utc::now() - Duration::days(400))
            .await
            .unwrap();
        assert_eq!(last_year.transaction_count, 0);
    }

    #[actix_web::test]
    async fn test_tax_report() {
        let ledger = MemoryLedger::new();
        seed(&ledger).await;
        let year = Utc::now().year();

        let report = tax_report(&ledger, "kim", year, 100).await.unwrap();

        assert_eq!(report.points_earned, 651);
        assert_eq!(report.points_withdrawn, 500);
        assert_eq!(report.earned_usd, "6.51".parse::<BigDecimal>().unwrap());
        assert_eq!(report.withdrawn_usd, "5.00".parse::<BigDecimal>().unwrap());
        assert_eq!(report.withdrawals.len(), 2);

        let other = tax_report(&ledger, "kim", year - 1, 100).await.unwrap();
        assert_eq!(other.points_earned, 0);
        assert!(other.withdrawals.is_empty());
    }

    #[test]
    fn period_parsing() {
        assert_eq!("week".parse::<Period>().unwrap(), Period::Week);
        assert!("fortnight".parse::<Period>().is_err());
        assert_eq!(Period::default(), Period::Month);
    }
}
