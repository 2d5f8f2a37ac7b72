//! Append-only points ledger and the balance accessor on top of it.
//!
//! Every balance change is a [`PointsTransaction`] carrying the balance snapshot before and
//! after it. Stores serialize read-modify-write per user and enforce the
//! `(user_id, source_type, source_id)` dedup key themselves, so callers never read a
//! balance and write it back on their own.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::rules::SourceType;

pub mod memory;

pub use memory::MemoryLedger;

pub const MAX_PAGE_LIMIT: u32 = 100;
pub const DEFAULT_PAGE_LIMIT: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Earned,
    Spent,
    Bonus,
    Penalty,
    Transfer,
    Refund,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Earned => "earned",
            TransactionType::Spent => "spent",
            TransactionType::Bonus => "bonus",
            TransactionType::Penalty => "penalty",
            TransactionType::Transfer => "transfer",
            TransactionType::Refund => "refund",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "earned" => TransactionType::Earned,
            "spent" => TransactionType::Spent,
            "bonus" => TransactionType::Bonus,
            "penalty" => TransactionType::Penalty,
            "transfer" => TransactionType::Transfer,
            "refund" => TransactionType::Refund,
            other => return Err(LedgerError::Storage(format!("unknown transaction type: {other}"))),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsTransaction {
    pub id: i64,
    pub user_id: String,
    pub transaction_type: TransactionType,
    pub amount: i64,
    pub source_type: SourceType,
    pub source_id: Option<String>,
    pub content_id: Option<String>,
    pub balance_before: i64,
    pub balance_after: i64,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A balance change waiting to be appended.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub user_id: String,
    pub transaction_type: TransactionType,
    pub amount: i64,
    pub source_type: SourceType,
    pub source_id: Option<String>,
    pub content_id: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
    /// Lets a debit take the balance below zero (penalties).
    pub allow_overdraft: bool,
}

impl NewEntry {
    pub fn new(user_id: &str, transaction_type: TransactionType, source_type: SourceType, amount: i64) -> Self {
        Self {
            user_id: user_id.to_string(),
            transaction_type,
            amount,
            source_type,
            source_id: None,
            content_id: None,
            description: None,
            metadata: None,
            allow_overdraft: false,
        }
    }

    pub fn source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn content_id(mut self, content_id: Option<String>) -> Self {
        self.content_id = content_id;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn allow_overdraft(mut self) -> Self {
        self.allow_overdraft = true;
        self
    }

    /// Checks shape only; balance sufficiency is the store's job under its lock.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.user_id.trim().is_empty() {
            return Err(LedgerError::InvalidEntry("user_id is empty".to_string()));
        }
        if self.amount == 0 {
            return Err(LedgerError::InvalidEntry("amount is zero".to_string()));
        }
        let sign_ok = match self.transaction_type {
            TransactionType::Earned | TransactionType::Bonus | TransactionType::Refund => self.amount > 0,
            TransactionType::Spent | TransactionType::Penalty => self.amount < 0,
            TransactionType::Transfer => true,
        };
        if !sign_ok {
            return Err(LedgerError::InvalidEntry(format!(
                "amount {} has the wrong sign for {}",
                self.amount, self.transaction_type
            )));
        }
        if matches!(&self.source_id, Some(id) if id.is_empty()) {
            return Err(LedgerError::InvalidEntry("source_id is empty".to_string()));
        }
        Ok(())
    }

    /// Accepts `prior`, found under this entry's dedup key, as a re-delivery only when it
    /// records the same change.
    pub(crate) fn check_redelivery(&self, prior: &PointsTransaction) -> Result<(), LedgerError> {
        if prior.user_id == self.user_id
            && prior.transaction_type == self.transaction_type
            && prior.amount == self.amount
        {
            return Ok(());
        }
        Err(LedgerError::InvalidEntry(format!(
            "{} source id {} was already used for a different entry",
            self.source_type,
            self.source_id.as_deref().unwrap_or_default()
        )))
    }

    /// Computes the resulting balance or rejects a debit that cannot be covered.
    pub(crate) fn apply_to(&self, balance_before: i64) -> Result<i64, LedgerError> {
        let balance_after = balance_before
            .checked_add(self.amount)
            .ok_or_else(|| LedgerError::InvalidEntry("balance overflow".to_string()))?;
        if self.amount < 0 && balance_after < 0 && !self.allow_overdraft {
            return Err(LedgerError::InsufficientBalance {
                required: -self.amount,
                available: balance_before,
            });
        }
        Ok(balance_after)
    }
}

/// Points moved from one user to another as two ledger legs.
#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub transfer_id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub points: i64,
    pub description: Option<String>,
}

impl NewTransfer {
    pub(crate) fn legs(&self) -> (NewEntry, NewEntry) {
        let metadata = serde_json::json!({
            "fromUserId": self.from_user_id,
            "toUserId": self.to_user_id,
        });
        let mut debit = NewEntry::new(&self.from_user_id, TransactionType::Transfer, SourceType::Transfer, -self.points)
            .source_id(self.debit_key())
            .metadata(metadata.clone());
        let mut credit = NewEntry::new(&self.to_user_id, TransactionType::Transfer, SourceType::Transfer, self.points)
            .source_id(self.credit_key())
            .metadata(metadata);
        debit.description = self.description.clone();
        credit.description = self.description.clone();
        (debit, credit)
    }

    pub(crate) fn debit_key(&self) -> String {
        format!("{}:out", self.transfer_id)
    }

    pub(crate) fn credit_key(&self) -> String {
        format!("{}:in", self.transfer_id)
    }

    /// Decides what earlier rows under this transfer id mean. Both legs present and matching
    /// is a re-delivery; no legs at all is a fresh transfer. Anything else, including the id
    /// showing up on the opposite side (`crossed`), is a reused id.
    pub(crate) fn resolve_prior(
        &self,
        prior_debit: Option<PointsTransaction>,
        prior_credit: Option<PointsTransaction>,
        crossed: bool,
    ) -> Result<Option<(PointsTransaction, PointsTransaction)>, LedgerError> {
        let reused = || {
            LedgerError::InvalidEntry(format!(
                "transfer id {} was already used for a different transfer",
                self.transfer_id
            ))
        };
        if crossed {
            return Err(reused());
        }
        match (prior_debit, prior_credit) {
            (None, None) => Ok(None),
            (Some(debit), Some(credit)) => {
                let (debit_entry, credit_entry) = self.legs();
                if debit_entry.check_redelivery(&debit).is_err() || credit_entry.check_redelivery(&credit).is_err() {
                    return Err(reused());
                }
                Ok(Some((debit, credit)))
            }
            _ => Err(reused()),
        }
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.points <= 0 {
            return Err(LedgerError::InvalidEntry("transfer points must be positive".to_string()));
        }
        if self.from_user_id == self.to_user_id {
            return Err(LedgerError::InvalidEntry("cannot transfer to self".to_string()));
        }
        if self.transfer_id.is_empty() {
            return Err(LedgerError::InvalidEntry("transfer_id is empty".to_string()));
        }
        Ok(())
    }
}

/// Result of an append: either a fresh row or the row an earlier delivery already wrote.
#[derive(Debug, Clone, PartialEq)]
pub enum Appended {
    New(PointsTransaction),
    Duplicate(PointsTransaction),
}

impl Appended {
    pub fn transaction(&self) -> &PointsTransaction {
        match self {
            Appended::New(tx) | Appended::Duplicate(tx) => tx,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Appended::Duplicate(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_LIMIT
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> Self {
        Self { page, limit }
    }

    pub fn limit(&self) -> u32 {
        self.limit.clamp(1, MAX_PAGE_LIMIT)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.limit())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Processing => "processing",
            WithdrawalStatus::Completed => "completed",
            WithdrawalStatus::Failed => "failed",
        }
    }

    /// pending → processing → completed | failed; pending may also fail directly.
    pub fn can_move_to(&self, next: WithdrawalStatus) -> bool {
        matches!(
            (self, next),
            (WithdrawalStatus::Pending, WithdrawalStatus::Processing)
                | (WithdrawalStatus::Pending, WithdrawalStatus::Failed)
                | (WithdrawalStatus::Processing, WithdrawalStatus::Completed)
                | (WithdrawalStatus::Processing, WithdrawalStatus::Failed)
        )
    }
}

impl FromStr for WithdrawalStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => WithdrawalStatus::Pending,
            "processing" => WithdrawalStatus::Processing,
            "completed" => WithdrawalStatus::Completed,
            "failed" => WithdrawalStatus::Failed,
            other => return Err(LedgerError::Storage(format!("unknown withdrawal status: {other}"))),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRecord {
    pub id: i64,
    pub user_id: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub fee: BigDecimal,
    pub net_amount: BigDecimal,
    pub points: i64,
    pub payout_method: String,
    pub payment_details: serde_json::Value,
    pub status: WithdrawalStatus,
    pub debit_transaction_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    #[error("invalid ledger entry: {0}")]
    InvalidEntry(String),
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: i64, available: i64 },
    #[error("withdrawal {0} not found")]
    WithdrawalNotFound(i64),
    #[error("withdrawal {id} cannot move from {from:?} to {to:?}")]
    InvalidStatusTransition {
        id: i64,
        from: WithdrawalStatus,
        to: WithdrawalStatus,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

/// Shared ledger storage. Only the reward dispatcher and the spend/withdrawal gate write.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Appends one entry atomically with its balance snapshot. Re-delivery of an entry
    /// whose dedup key already exists returns the earlier row untouched.
    async fn append(&self, entry: NewEntry) -> Result<Appended, LedgerError>;

    /// Moves points between two users; both legs land or neither does.
    async fn transfer(&self, transfer: NewTransfer) -> Result<(PointsTransaction, PointsTransaction), LedgerError>;

    /// `balance_after` of the newest transaction, zero for an unknown user.
    async fn balance(&self, user_id: &str) -> Result<i64, LedgerError>;

    /// Sum of every amount ever appended for the user.
    async fn total_amount(&self, user_id: &str) -> Result<i64, LedgerError>;

    async fn find_by_source(
        &self,
        user_id: &str,
        source_type: SourceType,
        source_id: &str,
    ) -> Result<Option<PointsTransaction>, LedgerError>;

    /// Newest first.
    async fn history(&self, user_id: &str, page: PageRequest) -> Result<Page<PointsTransaction>, LedgerError>;

    /// Oldest first, `from` inclusive, `to` exclusive.
    async fn transactions_between(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PointsTransaction>, LedgerError>;

    async fn save_withdrawal(&self, withdrawal: &WithdrawalRecord) -> Result<(), LedgerError>;

    async fn update_withdrawal(
        &self,
        id: i64,
        status: WithdrawalStatus,
        debit_transaction_id: Option<i64>,
    ) -> Result<WithdrawalRecord, LedgerError>;

    async fn withdrawal(&self, id: i64) -> Result<Option<WithdrawalRecord>, LedgerError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceAudit {
    pub user_id: String,
    pub balance: i64,
    pub total_amount: i64,
    pub consistent: bool,
}

/// Compares the snapshot balance with the sum of amounts. A mismatch is a data-integrity
/// bug and is logged as such.
pub async fn verify_balance(store: &dyn LedgerStore, user_id: &str) -> Result<BalanceAudit, LedgerError> {
    let balance = store.balance(user_id).await?;
    let total_amount = store.total_amount(user_id).await?;
    let consistent = balance == total_amount;
    if !consistent {
        error!(user_id, balance, total_amount, "ledger balance diverges from transaction sum");
    }
    Ok(BalanceAudit {
        user_id: user_id.to_string(),
        balance,
        total_amount,
        consistent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_sign_must_match_type() {
        let ok = NewEntry::new("u1", TransactionType::Earned, SourceType::Tips, 1);
        assert_eq!(ok.validate(), Ok(()));

        let bad = NewEntry::new("u1", TransactionType::Spent, SourceType::Boost, 10);
        assert!(matches!(bad.validate(), Err(LedgerError::InvalidEntry(_))));

        let zero = NewEntry::new("u1", TransactionType::Bonus, SourceType::Bonus, 0);
        assert!(zero.validate().is_err());

        let anon = NewEntry::new(" ", TransactionType::Earned, SourceType::Tips, 1);
        assert!(anon.validate().is_err());
    }

    #[test]
    fn debit_cannot_overdraw_unless_allowed() {
        let spend = NewEntry::new("u1", TransactionType::Spent, SourceType::Boost, -50);
        assert_eq!(spend.apply_to(80), Ok(30));
        assert_eq!(
            spend.apply_to(20),
            Err(LedgerError::InsufficientBalance {
                required: 50,
                available: 20
            })
        );

        let penalty = NewEntry::new("u1", TransactionType::Penalty, SourceType::Penalty, -50).allow_overdraft();
        assert_eq!(penalty.apply_to(20), Ok(-30));
    }

    #[test]
    fn page_limit_is_clamped() {
        assert_eq!(PageRequest::new(0, 0).limit(), 1);
        assert_eq!(PageRequest::new(0, 500).limit(), MAX_PAGE_LIMIT);
        assert_eq!(PageRequest::new(3, 10).offset(), 30);
    }

    #[test]
    fn withdrawal_lifecycle_transitions() {
        use WithdrawalStatus::*;
        assert!(Pending.can_move_to(Processing));
        assert!(Processing.can_move_to(Completed));
        assert!(Processing.can_move_to(Failed));
        assert!(!Completed.can_move_to(Failed));
        assert!(!Failed.can_move_to(Completed));
        assert!(!Pending.can_move_to(Completed));
    }

    #[test]
    fn transfer_legs_mirror_each_other() {
        let transfer = NewTransfer {
            transfer_id: "t-1".to_string(),
            from_user_id: "a".to_string(),
            to_user_id: "b".to_string(),
            points: 40,
            description: None,
        };
        let (debit, credit) = transfer.legs();
        assert_eq!(debit.amount, -40);
        assert_eq!(credit.amount, 40);
        assert_eq!(debit.source_id.as_deref(), Some("t-1:out"));
        assert_eq!(credit.source_id.as_deref(), Some("t-1:in"));
        assert_eq!(credit.user_id, "b");
    }

    #[test]
    fn redelivery_must_record_the_same_change() {
        let entry = NewEntry::new("u1", TransactionType::Spent, SourceType::Boost, -50).source_id("boost-1");
        let prior = PointsTransaction {
            id: 1,
            user_id: "u1".to_string(),
            transaction_type: TransactionType::Spent,
            amount: -50,
            source_type: SourceType::Boost,
            source_id: Some("boost-1".to_string()),
            content_id: None,
            balance_before: 100,
            balance_after: 50,
            description: None,
            metadata: None,
            created_at: Utc::now(),
        };
        assert_eq!(entry.check_redelivery(&prior), Ok(()));

        let bigger = NewEntry::new("u1", TransactionType::Spent, SourceType::Boost, -80).source_id("boost-1");
        assert!(matches!(bigger.check_redelivery(&prior), Err(LedgerError::InvalidEntry(_))));
    }
}
