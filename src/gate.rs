//! Spend and withdrawal gate.
//!
//! The only path that debits points on the user's behalf: withdrawals to a payout method,
//! boosts and peer transfers. Every request is risk-checked, then balance-checked, then
//! debited through the ledger, which re-checks the balance under the user's lock.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::{BigDecimal, Signed};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::config::WithdrawalPolicy;
use crate::currency::{points_for, round_cents, value_of_points, CurrencyConverter};
use crate::dispatcher::{spawn_wallet_sync, WalletSync};
use crate::fraud::{assess_risk, BlockedAction, FraudRiskAssessment, RiskSignals, SecurityEvent, SecurityEventKind};
use crate::idgen;
use crate::ledger::{
    Appended, LedgerError, LedgerStore, NewEntry, NewTransfer, PointsTransaction, TransactionType, WithdrawalRecord,
    WithdrawalStatus,
};
use crate::rules::SourceType;

/// Above this USD value a request counts as a large transaction for risk purposes.
pub const LARGE_TRANSACTION_USD: i64 = 100;

const REFUND_ATTEMPTS: u32 = 3;
const REFUND_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRequest {
    pub user_id: String,
    pub amount: BigDecimal,
    pub currency: String,
    #[serde(default)]
    pub payout_method: Option<String>,
    #[serde(default)]
    pub payment_details: Option<serde_json::Value>,
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WithdrawalError {
    #[error("Withdrawal amount must be greater than zero")]
    NonPositiveAmount,
    #[error("Insufficient balance: {available} {currency} available")]
    InsufficientBalance { available: BigDecimal, currency: String },
    #[error("Minimum withdrawal is {minimum} {currency}")]
    BelowMinimum { minimum: BigDecimal, currency: String },
    #[error("Payout method is required")]
    MissingPayoutMethod,
    #[error("Payment details are required")]
    MissingPaymentDetails,
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalResponse {
    pub withdrawal: WithdrawalRecord,
    pub balance: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WithdrawalOutcome {
    Accepted(WithdrawalResponse),
    /// Validation failures in check order; the first one is the primary message.
    Rejected(Vec<WithdrawalError>),
    Restricted(FraudRiskAssessment),
}

/// Final word from the payout provider about an initiated withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PayoutResult {
    Completed,
    Failed { reason: String },
}

/// External payment gateway.
#[async_trait]
pub trait PayoutProvider: Send + Sync {
    async fn initiate(&self, withdrawal: &WithdrawalRecord) -> anyhow::Result<()>;
}

/// Leaves payouts for operators to process by hand and settle later.
#[derive(Debug, Default)]
pub struct ManualPayouts;

#[async_trait]
impl PayoutProvider for ManualPayouts {
    async fn initiate(&self, withdrawal: &WithdrawalRecord) -> anyhow::Result<()> {
        info!(
            withdrawal_id = withdrawal.id,
            user_id = withdrawal.user_id.as_str(),
            payout_method = withdrawal.payout_method.as_str(),
            "withdrawal queued for manual payout"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoostRequest {
    pub user_id: String,
    pub boost_id: String,
    pub content_id: String,
    pub points: i64,
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub transfer_id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub points: i64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpendError {
    #[error("Points must be greater than zero")]
    NonPositivePoints,
    #[error("Insufficient balance: {required} points required, {available} available")]
    InsufficientBalance { required: i64, available: i64 },
    #[error("Cannot transfer points to yourself")]
    SelfTransfer,
    #[error("{0} was already used for a different request")]
    ReusedId(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpendOutcome<T> {
    Completed(T),
    Rejected(SpendError),
    Restricted(FraudRiskAssessment),
}

/// Collects every violation, in the order users should see them.
pub fn validate_withdrawal_request(
    req: &WithdrawalRequest,
    balance_points: i64,
    converter: &CurrencyConverter,
    policy: &WithdrawalPolicy,
) -> Vec<WithdrawalError> {
    let currency = req.currency.as_str();
    if !converter.is_currency_valid(currency) {
        return vec![WithdrawalError::UnsupportedCurrency(req.currency.clone())];
    }

    let mut errors = Vec::new();
    if !req.amount.is_positive() {
        errors.push(WithdrawalError::NonPositiveAmount);
    }

    let balance_usd = value_of_points(balance_points.max(0), policy.points_per_usd);
    if let Ok(available) = converter.from_base(&balance_usd, currency) {
        let available = available.with_scale(2);
        if req.amount > available {
            errors.push(WithdrawalError::InsufficientBalance {
                available,
                currency: req.currency.clone(),
            });
        }
    }

    if let Ok(minimum) = converter.from_base(&policy.min_withdrawal_usd, currency) {
        let minimum = round_cents(&minimum);
        if req.amount.is_positive() && req.amount < minimum {
            errors.push(WithdrawalError::BelowMinimum {
                minimum,
                currency: req.currency.clone(),
            });
        }
    }

    if req.payout_method.as_deref().map_or(true, |m| m.trim().is_empty()) {
        errors.push(WithdrawalError::MissingPayoutMethod);
    }

    let details_missing = match &req.payment_details {
        None | Some(serde_json::Value::Null) => true,
        Some(serde_json::Value::Object(map)) => map.is_empty(),
        Some(serde_json::Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    };
    if details_missing {
        errors.push(WithdrawalError::MissingPaymentDetails);
    }
    errors
}

/// Fee and points for a withdrawal of `amount` in `currency`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalPricing {
    pub fee: BigDecimal,
    pub net_amount: BigDecimal,
    pub points: i64,
}

pub fn price_withdrawal(
    amount: &BigDecimal,
    currency: &str,
    converter: &CurrencyConverter,
    policy: &WithdrawalPolicy,
) -> Result<WithdrawalPricing, WithdrawalError> {
    let unsupported = |_| WithdrawalError::UnsupportedCurrency(currency.to_string());
    let min_fee = round_cents(&converter.from_base(&policy.min_fee_usd, currency).map_err(unsupported)?);
    let fee = round_cents(&(amount * &policy.fee_rate)).max(min_fee);
    let net_amount = amount - &fee;
    let usd = converter.to_base(currency, amount).map_err(unsupported)?;
    let points = points_for(&usd, policy.points_per_usd).ok_or(WithdrawalError::NonPositiveAmount)?;
    Ok(WithdrawalPricing {
        fee,
        net_amount,
        points,
    })
}

/// A withdrawal refund that could not be written; `retry_pending_refunds` picks it up.
#[derive(Debug, Clone)]
pub struct PendingRefund {
    pub withdrawal: WithdrawalRecord,
    pub reason: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

pub struct SpendGate {
    ledger: Arc<dyn LedgerStore>,
    converter: CurrencyConverter,
    signals: Arc<dyn RiskSignals>,
    payouts: Arc<dyn PayoutProvider>,
    wallet: Arc<dyn WalletSync>,
    policy: WithdrawalPolicy,
    pending_refunds: Mutex<Vec<PendingRefund>>,
}

impl SpendGate {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        converter: CurrencyConverter,
        signals: Arc<dyn RiskSignals>,
        payouts: Arc<dyn PayoutProvider>,
        wallet: Arc<dyn WalletSync>,
        policy: WithdrawalPolicy,
    ) -> Self {
        Self {
            ledger,
            converter,
            signals,
            payouts,
            wallet,
            policy,
            pending_refunds: Mutex::new(Vec::new()),
        }
    }

    pub fn policy(&self) -> &WithdrawalPolicy {
        &self.policy
    }

    /// Assesses the user for `action` and records the attempt afterwards, so an attempt
    /// never counts against itself.
    async fn check_risk(
        &self,
        user_id: &str,
        action: BlockedAction,
        kind: SecurityEventKind,
        amount_usd: Option<BigDecimal>,
        country: Option<String>,
    ) -> Option<FraudRiskAssessment> {
        let large = amount_usd
            .as_ref()
            .map_or(false, |usd| usd > &BigDecimal::from(LARGE_TRANSACTION_USD));
        let ctx = self.signals.context(user_id, amount_usd, country.clone()).await;
        let assessment = assess_risk(&ctx, Utc::now());
        self.signals
            .record(SecurityEvent {
                country,
                ..SecurityEvent::now(user_id, kind)
            })
            .await;

        if assessment.blocks(action) || (large && assessment.blocks(BlockedAction::LargeTransaction)) {
            warn!(
                user_id,
                risk_score = assessment.risk_score,
                reasons = ?assessment.reasons,
                "{:?} restricted by risk assessment",
                action
            );
            return Some(assessment);
        }
        None
    }

    #[instrument(skip(self, req), fields(user_id = req.user_id.as_str(), currency = req.currency.as_str()))]
    pub async fn request_withdrawal(&self, req: WithdrawalRequest) -> Result<WithdrawalOutcome, LedgerError> {
        let amount_usd = self.converter.to_base(&req.currency, &req.amount).ok();
        if let Some(assessment) = self
            .check_risk(
                &req.user_id,
                BlockedAction::Withdrawal,
                SecurityEventKind::WithdrawalAttempt,
                amount_usd,
                req.country.clone(),
            )
            .await
        {
            return Ok(WithdrawalOutcome::Restricted(assessment));
        }

        let balance = self.ledger.balance(&req.user_id).await?;
        let errors = validate_withdrawal_request(&req, balance, &self.converter, &self.policy);
        if !errors.is_empty() {
            info!(primary = %errors[0], "withdrawal rejected");
            return Ok(WithdrawalOutcome::Rejected(errors));
        }
        let pricing = match price_withdrawal(&req.amount, &req.currency, &self.converter, &self.policy) {
            Ok(pricing) => pricing,
            Err(e) => return Ok(WithdrawalOutcome::Rejected(vec![e])),
        };

        let now = Utc::now();
        let record = WithdrawalRecord {
            id: idgen::next(),
            user_id: req.user_id.clone(),
            amount: req.amount.clone(),
            currency: req.currency.clone(),
            fee: pricing.fee.clone(),
            net_amount: pricing.net_amount.clone(),
            points: pricing.points,
            payout_method: req.payout_method.clone().unwrap_or_default(),
            payment_details: req.payment_details.clone().unwrap_or_default(),
            status: WithdrawalStatus::Pending,
            debit_transaction_id: None,
            created_at: now,
            updated_at: now,
        };
        self.ledger.save_withdrawal(&record).await?;

        let debit = NewEntry::new(&req.user_id, TransactionType::Spent, SourceType::Withdrawal, -pricing.points)
            .source_id(record.id.to_string())
            .description(format!("Withdrawal of {} {}", req.amount, req.currency))
            .metadata(serde_json::json!({
                "withdrawalId": record.id,
                "amount": req.amount.to_string(),
                "currency": req.currency,
                "fee": pricing.fee.to_string(),
            }));
        let debit = match self.ledger.append(debit).await {
            Ok(appended) => appended.transaction().clone(),
            Err(e) => {
                self.ledger.update_withdrawal(record.id, WithdrawalStatus::Failed, None).await?;
                return match e {
                    LedgerError::InsufficientBalance { available, .. } => {
                        let available = self
                            .converter
                            .from_base(&value_of_points(available.max(0), self.policy.points_per_usd), &req.currency)
                            .map(|v| v.with_scale(2))
                            .unwrap_or_default();
                        Ok(WithdrawalOutcome::Rejected(vec![WithdrawalError::InsufficientBalance {
                            available,
                            currency: req.currency,
                        }]))
                    }
                    other => Err(other),
                };
            }
        };

        let record = match self
            .ledger
            .update_withdrawal(record.id, WithdrawalStatus::Processing, Some(debit.id))
            .await
        {
            Ok(record) => record,
            Err(e) => {
                error!(withdrawal_id = record.id, "withdrawal status update failed after debit: {e}");
                self.abandon(&record, &e.to_string()).await;
                return Err(e);
            }
        };
        info!(
            withdrawal_id = record.id,
            points = record.points,
            fee = %record.fee,
            "withdrawal debited"
        );

        let (record, balance) = match self.payouts.initiate(&record).await {
            Ok(()) => (record, debit.balance_after),
            Err(e) => {
                warn!(withdrawal_id = record.id, "payout initiation failed: {e}");
                self.refund(&record, &e.to_string()).await?
            }
        };
        spawn_wallet_sync(&self.wallet, &req.user_id);

        Ok(WithdrawalOutcome::Accepted(WithdrawalResponse {
            withdrawal: record,
            balance,
        }))
    }

    /// Applies the provider's final result. A failed payout gives the points back.
    #[instrument(skip(self))]
    pub async fn settle_withdrawal(&self, id: i64, result: PayoutResult) -> Result<WithdrawalRecord, LedgerError> {
        let record = self
            .ledger
            .withdrawal(id)
            .await?
            .ok_or(LedgerError::WithdrawalNotFound(id))?;
        let record = match result {
            PayoutResult::Completed => {
                let record = self.ledger.update_withdrawal(id, WithdrawalStatus::Completed, None).await?;
                info!(withdrawal_id = id, "withdrawal completed");
                record
            }
            PayoutResult::Failed { reason } => self.refund(&record, &reason).await?.0,
        };
        spawn_wallet_sync(&self.wallet, &record.user_id);
        Ok(record)
    }

    /// Marks the withdrawal failed and credits its points back. Safe to repeat.
    async fn refund(&self, record: &WithdrawalRecord, reason: &str) -> Result<(WithdrawalRecord, i64), LedgerError> {
        let failed = self
            .ledger
            .update_withdrawal(record.id, WithdrawalStatus::Failed, None)
            .await?;
        let balance = self.credit_back(record, reason).await?;
        Ok((failed, balance))
    }

    // compensation when a step after the debit fails; the status change is best-effort
    async fn abandon(&self, record: &WithdrawalRecord, reason: &str) {
        if let Err(e) = self
            .ledger
            .update_withdrawal(record.id, WithdrawalStatus::Failed, None)
            .await
        {
            warn!(withdrawal_id = record.id, "could not mark withdrawal failed: {e}");
        }
        if self.credit_back(record, reason).await.is_ok() {
            spawn_wallet_sync(&self.wallet, &record.user_id);
        }
    }

    /// Credits back whatever the ledger debited for `record`, found by its dedup key rather
    /// than the record's own link. Storage errors are retried, then the refund is parked in
    /// the pending list.
    async fn credit_back(&self, record: &WithdrawalRecord, reason: &str) -> Result<i64, LedgerError> {
        let mut last_error = LedgerError::Storage("no refund attempt made".to_string());
        for attempt in 1..=REFUND_ATTEMPTS {
            match self.try_credit_back(record, reason).await {
                Ok(balance) => return Ok(balance),
                Err(e @ LedgerError::Storage(_)) => {
                    warn!(withdrawal_id = record.id, attempt, "withdrawal refund attempt failed: {e}");
                    last_error = e;
                }
                Err(e) => {
                    error!(withdrawal_id = record.id, "withdrawal refund rejected: {e}");
                    return Err(e);
                }
            }
            if attempt < REFUND_ATTEMPTS {
                tokio::time::sleep(REFUND_BACKOFF * attempt).await;
            }
        }

        error!(
            withdrawal_id = record.id,
            user_id = record.user_id.as_str(),
            points = record.points,
            "withdrawal refund parked: {last_error}"
        );
        self.pending_refunds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PendingRefund {
                withdrawal: record.clone(),
                reason: reason.to_string(),
                error: last_error.to_string(),
                failed_at: Utc::now(),
            });
        Err(last_error)
    }

    async fn try_credit_back(&self, record: &WithdrawalRecord, reason: &str) -> Result<i64, LedgerError> {
        let debit = self
            .ledger
            .find_by_source(&record.user_id, SourceType::Withdrawal, &record.id.to_string())
            .await?;
        let Some(debit) = debit else {
            return self.ledger.balance(&record.user_id).await;
        };

        let refund = NewEntry::new(&record.user_id, TransactionType::Refund, SourceType::Withdrawal, -debit.amount)
            .source_id(format!("refund:{}", record.id))
            .description(format!("Refund of failed withdrawal: {reason}"))
            .metadata(serde_json::json!({
                "withdrawalId": record.id,
                "debitTransactionId": debit.id,
                "reason": reason,
            }));
        let appended = self.ledger.append(refund).await?;
        if !appended.is_duplicate() {
            info!(withdrawal_id = record.id, points = -debit.amount, "withdrawal refunded");
        }
        Ok(appended.transaction().balance_after)
    }

    pub fn pending_refunds(&self) -> Vec<PendingRefund> {
        self.pending_refunds.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Re-attempts every parked refund; returns how many went through.
    pub async fn retry_pending_refunds(&self) -> usize {
        let pending = std::mem::take(&mut *self.pending_refunds.lock().unwrap_or_else(PoisonError::into_inner));
        let mut refunded = 0;
        for refund in pending {
            if self.credit_back(&refund.withdrawal, &refund.reason).await.is_ok() {
                spawn_wallet_sync(&self.wallet, &refund.withdrawal.user_id);
                refunded += 1;
            }
        }
        refunded
    }

    #[instrument(skip(self, req), fields(user_id = req.user_id.as_str(), points = req.points))]
    pub async fn spend_for_boost(&self, req: BoostRequest) -> Result<SpendOutcome<PointsTransaction>, LedgerError> {
        if req.points <= 0 {
            return Ok(SpendOutcome::Rejected(SpendError::NonPositivePoints));
        }
        let amount_usd = value_of_points(req.points, self.policy.points_per_usd);
        if let Some(assessment) = self
            .check_risk(
                &req.user_id,
                BlockedAction::Spend,
                SecurityEventKind::SpendAttempt,
                Some(amount_usd),
                req.country.clone(),
            )
            .await
        {
            return Ok(SpendOutcome::Restricted(assessment));
        }

        // a re-delivered boost answers with the spend it already made
        if let Some(prior) = self
            .ledger
            .find_by_source(&req.user_id, SourceType::Boost, &req.boost_id)
            .await?
        {
            if prior.amount == -req.points {
                return Ok(SpendOutcome::Completed(prior));
            }
            return Ok(SpendOutcome::Rejected(SpendError::ReusedId(format!("boost id {}", req.boost_id))));
        }

        let available = self.ledger.balance(&req.user_id).await?;
        if available < req.points {
            return Ok(SpendOutcome::Rejected(SpendError::InsufficientBalance {
                required: req.points,
                available,
            }));
        }

        let entry = NewEntry::new(&req.user_id, TransactionType::Spent, SourceType::Boost, -req.points)
            .source_id(req.boost_id.clone())
            .content_id(Some(req.content_id.clone()))
            .description("Content boost");
        let tx = match self.ledger.append(entry).await {
            Ok(Appended::New(tx)) => {
                spawn_wallet_sync(&self.wallet, &req.user_id);
                tx
            }
            Ok(Appended::Duplicate(tx)) => tx,
            Err(LedgerError::InsufficientBalance { required, available }) => {
                return Ok(SpendOutcome::Rejected(SpendError::InsufficientBalance { required, available }))
            }
            Err(LedgerError::InvalidEntry(reason)) => {
                info!("boost spend refused: {reason}");
                return Ok(SpendOutcome::Rejected(SpendError::ReusedId(format!("boost id {}", req.boost_id))));
            }
            Err(e) => return Err(e),
        };
        Ok(SpendOutcome::Completed(tx))
    }

    #[instrument(skip(self, req), fields(from = req.from_user_id.as_str(), to = req.to_user_id.as_str()))]
    pub async fn transfer_points(
        &self,
        req: TransferRequest,
    ) -> Result<SpendOutcome<(PointsTransaction, PointsTransaction)>, LedgerError> {
        if req.points <= 0 {
            return Ok(SpendOutcome::Rejected(SpendError::NonPositivePoints));
        }
        if req.from_user_id == req.to_user_id {
            return Ok(SpendOutcome::Rejected(SpendError::SelfTransfer));
        }
        let amount_usd = value_of_points(req.points, self.policy.points_per_usd);
        if let Some(assessment) = self
            .check_risk(
                &req.from_user_id,
                BlockedAction::Spend,
                SecurityEventKind::SpendAttempt,
                Some(amount_usd),
                None,
            )
            .await
        {
            return Ok(SpendOutcome::Restricted(assessment));
        }

        let transfer_id = req.transfer_id.clone();
        let transfer = NewTransfer {
            transfer_id: req.transfer_id,
            from_user_id: req.from_user_id.clone(),
            to_user_id: req.to_user_id.clone(),
            points: req.points,
            description: req.description,
        };
        match self.ledger.transfer(transfer).await {
            Ok(legs) => {
                spawn_wallet_sync(&self.wallet, &req.from_user_id);
                spawn_wallet_sync(&self.wallet, &req.to_user_id);
                Ok(SpendOutcome::Completed(legs))
            }
            Err(LedgerError::InsufficientBalance { required, available }) => {
                Ok(SpendOutcome::Rejected(SpendError::InsufficientBalance { required, available }))
            }
            Err(LedgerError::InvalidEntry(reason)) => {
                info!("transfer refused: {reason}");
                Ok(SpendOutcome::Rejected(SpendError::ReusedId(format!("transfer id {transfer_id}"))))
            }
            Err(e) => Err(e),
        }
    }
}
