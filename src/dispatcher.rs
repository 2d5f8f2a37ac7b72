//! Reward dispatcher.
//!
//! Turns domain events from feature modules (purchases, views, tips, ...) into ledger
//! entries. Tracking is best-effort: a missing user is a no-op, storage trouble is retried,
//! then logged and dead-lettered, and nothing here ever fails the caller's own action.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bigdecimal::{BigDecimal, Signed, ToPrimitive, Zero};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::config::AwardPolicy;
use crate::currency::CurrencyConverter;
use crate::ledger::{Appended, LedgerError, LedgerStore, NewEntry, TransactionType};
use crate::rules::{self, SourceType};
use crate::session::PointsSession;

/// Currency sale values are measured in for the sales rule.
pub const SALES_CURRENCY: &str = "NGN";

/// A platform activity worth points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Activity {
    #[serde(rename_all = "camelCase")]
    VideoView { event_id: String, video_id: String, views: u64 },
    #[serde(rename_all = "camelCase")]
    Tip { tip_id: String, content_id: Option<String> },
    #[serde(rename_all = "camelCase")]
    Subscription { subscription_id: String, creator_id: Option<String> },
    #[serde(rename_all = "camelCase")]
    Purchase {
        order_id: String,
        amount: BigDecimal,
        currency: String,
    },
    #[serde(rename_all = "camelCase")]
    Referral { referred_user_id: String },
    /// The day is taken from the dispatcher's clock, never from the caller.
    DailyLogin,
}

impl Activity {
    pub fn source_type(&self) -> SourceType {
        match self {
            Activity::VideoView { .. } => SourceType::Views,
            Activity::Tip { .. } => SourceType::Tips,
            Activity::Subscription { .. } => SourceType::Subscriptions,
            Activity::Purchase { .. } => SourceType::Sales,
            Activity::Referral { .. } => SourceType::Referral,
            Activity::DailyLogin => SourceType::DailyLogin,
        }
    }

    /// Dedup key component: re-delivering the same event carries the same id. A daily login
    /// is keyed by the UTC calendar day of `now`.
    pub fn source_id(&self, now: DateTime<Utc>) -> String {
        match self {
            Activity::VideoView { event_id, .. } => event_id.clone(),
            Activity::Tip { tip_id, .. } => tip_id.clone(),
            Activity::Subscription { subscription_id, .. } => subscription_id.clone(),
            Activity::Purchase { order_id, .. } => order_id.clone(),
            Activity::Referral { referred_user_id } => referred_user_id.clone(),
            Activity::DailyLogin => now.date_naive().format("%Y-%m-%d").to_string(),
        }
    }

    pub fn content_id(&self) -> Option<String> {
        match self {
            Activity::VideoView { video_id, .. } => Some(video_id.clone()),
            Activity::Tip { content_id, .. } => content_id.clone(),
            Activity::Subscription { creator_id, .. } => creator_id.clone(),
            _ => None,
        }
    }

    fn quantity(&self, converter: &CurrencyConverter) -> Result<u64, SkipReason> {
        match self {
            Activity::VideoView { views, .. } => Ok(*views),
            Activity::Purchase { amount, currency, .. } => {
                if amount.is_negative() {
                    return Err(SkipReason::InvalidActivity("purchase amount is negative".to_string()));
                }
                let naira = converter
                    .convert(currency, amount, SALES_CURRENCY)
                    .map_err(|e| SkipReason::InvalidActivity(e.to_string()))?;
                Ok(naira.with_scale(0).to_u64().unwrap_or(u64::MAX))
            }
            _ => Ok(1),
        }
    }
}

/// Event as delivered by a feature module; `user_id` is absent for signed-out callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardEvent {
    pub user_id: Option<String>,
    pub activity: Activity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    ZeroPoints,
    InvalidActivity(String),
}

/// What happened to one tracked activity.
#[derive(Debug, Clone, PartialEq)]
pub enum AwardOutcome {
    NotAuthenticated,
    Awarded {
        transaction_id: i64,
        points: i64,
        balance: i64,
        wallet_bonus: Option<BigDecimal>,
    },
    /// Already credited by an earlier delivery; carries that earlier result.
    Duplicate {
        transaction_id: i64,
        points: i64,
        wallet_bonus: Option<BigDecimal>,
    },
    Skipped { reason: SkipReason },
    Failed { reason: String },
}

/// Shape handed back to callers for surfacing a notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AwardResponse {
    pub success: bool,
    pub soft_points: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_bonus: Option<BigDecimal>,
}

impl AwardOutcome {
    pub fn points(&self) -> i64 {
        match self {
            AwardOutcome::Awarded { points, .. } => *points,
            _ => 0,
        }
    }

    pub fn to_response(&self) -> Option<AwardResponse> {
        match self {
            AwardOutcome::NotAuthenticated => None,
            AwardOutcome::Awarded {
                points, wallet_bonus, ..
            } => Some(AwardResponse {
                success: true,
                soft_points: *points,
                wallet_bonus: wallet_bonus.clone(),
            }),
            AwardOutcome::Duplicate {
                points, wallet_bonus, ..
            } => Some(AwardResponse {
                success: true,
                soft_points: *points,
                wallet_bonus: wallet_bonus.clone(),
            }),
            AwardOutcome::Skipped { .. } | AwardOutcome::Failed { .. } => Some(AwardResponse {
                success: false,
                soft_points: 0,
                wallet_bonus: None,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total_points: i64,
    pub total_wallet_bonus: BigDecimal,
    pub awarded: usize,
    pub failed: usize,
    pub results: Vec<Option<AwardResponse>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub user_id: String,
    pub points: i64,
    pub wallet_bonus: Option<BigDecimal>,
    pub message: String,
}

/// User-facing notification channel (toasts).
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        info!(
            user_id = notification.user_id.as_str(),
            points = notification.points,
            "{}",
            notification.message
        );
    }
}

/// Main wallet refresh after a points change. Never on the ledger's critical path.
#[async_trait]
pub trait WalletSync: Send + Sync {
    async fn sync(&self, user_id: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct TracingWalletSync;

#[async_trait]
impl WalletSync for TracingWalletSync {
    async fn sync(&self, user_id: &str) -> anyhow::Result<()> {
        info!(user_id, "wallet sync requested");
        Ok(())
    }
}

/// Spawns a wallet refresh and forgets about it; failures are only logged.
pub fn spawn_wallet_sync(wallet: &Arc<dyn WalletSync>, user_id: &str) {
    let wallet = wallet.clone();
    let user_id = user_id.to_string();
    tokio::spawn(async move {
        if let Err(e) = wallet.sync(&user_id).await {
            warn!(user_id = user_id.as_str(), "wallet sync failed: {e}");
        }
    });
}

/// An award that exhausted its retries.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub entry: NewEntry,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

pub struct RewardDispatcher {
    ledger: Arc<dyn LedgerStore>,
    converter: CurrencyConverter,
    notifier: Arc<dyn Notifier>,
    wallet: Arc<dyn WalletSync>,
    policy: AwardPolicy,
    clock: fn() -> DateTime<Utc>,
    dead_letters: Mutex<Vec<DeadLetter>>,
}

fn authenticated(user_id: Option<&str>) -> Option<&str> {
    user_id.map(str::trim).filter(|id| !id.is_empty())
}

impl RewardDispatcher {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        converter: CurrencyConverter,
        notifier: Arc<dyn Notifier>,
        wallet: Arc<dyn WalletSync>,
        policy: AwardPolicy,
    ) -> Self {
        Self {
            ledger,
            converter,
            notifier,
            wallet,
            policy,
            clock: Utc::now,
            dead_letters: Mutex::new(Vec::new()),
        }
    }

    /// Replaces the wall clock used for day-keyed awards.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    #[instrument(skip(self), fields(source_type = %event.activity.source_type()))]
    pub async fn track(&self, event: RewardEvent) -> AwardOutcome {
        let Some(user_id) = authenticated(event.user_id.as_deref()) else {
            return AwardOutcome::NotAuthenticated;
        };
        let outcome = self.award(user_id, &event.activity).await;
        if let AwardOutcome::Awarded {
            points, wallet_bonus, ..
        } = &outcome
        {
            self.notifier.notify(Notification {
                user_id: user_id.to_string(),
                points: *points,
                wallet_bonus: wallet_bonus.clone(),
                message: award_message(*points, wallet_bonus.as_ref()),
            });
            spawn_wallet_sync(&self.wallet, user_id);
        }
        outcome
    }

    pub async fn track_video_view(&self, user_id: Option<&str>, event_id: &str, video_id: &str, views: u64) -> AwardOutcome {
        self.track_activity(
            user_id,
            Activity::VideoView {
                event_id: event_id.to_string(),
                video_id: video_id.to_string(),
                views,
            },
        )
        .await
    }

    pub async fn track_tip(&self, user_id: Option<&str>, tip_id: &str, content_id: Option<&str>) -> AwardOutcome {
        self.track_activity(
            user_id,
            Activity::Tip {
                tip_id: tip_id.to_string(),
                content_id: content_id.map(str::to_string),
            },
        )
        .await
    }

    pub async fn track_subscription(
        &self,
        user_id: Option<&str>,
        subscription_id: &str,
        creator_id: Option<&str>,
    ) -> AwardOutcome {
        self.track_activity(
            user_id,
            Activity::Subscription {
                subscription_id: subscription_id.to_string(),
                creator_id: creator_id.map(str::to_string),
            },
        )
        .await
    }

    pub async fn track_purchase(
        &self,
        user_id: Option<&str>,
        order_id: &str,
        amount: BigDecimal,
        currency: &str,
    ) -> AwardOutcome {
        self.track_activity(
            user_id,
            Activity::Purchase {
                order_id: order_id.to_string(),
                amount,
                currency: currency.to_string(),
            },
        )
        .await
    }

    pub async fn track_referral(&self, user_id: Option<&str>, referred_user_id: &str) -> AwardOutcome {
        self.track_activity(
            user_id,
            Activity::Referral {
                referred_user_id: referred_user_id.to_string(),
            },
        )
        .await
    }

    /// At most one award per user and UTC calendar day.
    pub async fn track_daily_login(&self, user_id: Option<&str>) -> AwardOutcome {
        self.track_activity(user_id, Activity::DailyLogin).await
    }

    async fn track_activity(&self, user_id: Option<&str>, activity: Activity) -> AwardOutcome {
        self.track(RewardEvent {
            user_id: user_id.map(str::to_string),
            activity,
        })
        .await
    }

    /// Tracks on behalf of the session's user and drops its cached balance on success.
    pub async fn track_for_session(&self, session: &mut PointsSession, activity: Activity) -> AwardOutcome {
        let outcome = self
            .track(RewardEvent {
                user_id: session.user_id().map(str::to_string),
                activity,
            })
            .await;
        if matches!(outcome, AwardOutcome::Awarded { .. }) {
            session.invalidate();
        }
        outcome
    }

    /// Tracks each activity on its own; one failing entry never undoes the others. A single
    /// summary notification covers the whole batch. `None` when signed out.
    pub async fn track_batch(&self, user_id: Option<&str>, activities: Vec<Activity>) -> Option<BatchSummary> {
        let user_id = authenticated(user_id)?;
        let outcomes = join_all(activities.iter().map(|activity| self.award(user_id, activity))).await;

        let mut total_points = 0;
        let mut total_wallet_bonus = BigDecimal::zero();
        let mut awarded = 0;
        let mut failed = 0;
        for outcome in &outcomes {
            match outcome {
                AwardOutcome::Awarded {
                    points, wallet_bonus, ..
                } => {
                    awarded += 1;
                    total_points += points;
                    if let Some(bonus) = wallet_bonus {
                        total_wallet_bonus += bonus;
                    }
                }
                AwardOutcome::Failed { .. } => failed += 1,
                _ => {}
            }
        }

        if total_points > 0 {
            let bonus = (!total_wallet_bonus.is_zero()).then(|| total_wallet_bonus.clone());
            self.notifier.notify(Notification {
                user_id: user_id.to_string(),
                points: total_points,
                message: award_message(total_points, bonus.as_ref()),
                wallet_bonus: bonus,
            });
            spawn_wallet_sync(&self.wallet, user_id);
        }

        Some(BatchSummary {
            total_points,
            total_wallet_bonus,
            awarded,
            failed,
            results: outcomes.iter().map(AwardOutcome::to_response).collect(),
        })
    }

    /// Manual credit, e.g. a promotion. `source_id` makes it idempotent.
    pub async fn grant_bonus(&self, user_id: &str, points: i64, source_id: &str, reason: &str) -> AwardOutcome {
        if points <= 0 {
            return AwardOutcome::Skipped {
                reason: SkipReason::ZeroPoints,
            };
        }
        let entry = NewEntry::new(user_id, TransactionType::Bonus, SourceType::Bonus, points)
            .source_id(source_id)
            .description(reason);
        let outcome = self.append_with_retry(entry, None).await;
        if let AwardOutcome::Awarded { points, .. } = &outcome {
            self.notifier.notify(Notification {
                user_id: user_id.to_string(),
                points: *points,
                wallet_bonus: None,
                message: award_message(*points, None),
            });
        }
        outcome
    }

    /// Debits points as a sanction. Penalties may push the balance below zero.
    pub async fn apply_penalty(
        &self,
        user_id: &str,
        points: i64,
        source_id: &str,
        reason: &str,
    ) -> Result<Appended, LedgerError> {
        if points <= 0 {
            return Err(LedgerError::InvalidEntry("penalty points must be positive".to_string()));
        }
        let entry = NewEntry::new(user_id, TransactionType::Penalty, SourceType::Penalty, -points)
            .source_id(source_id)
            .description(reason)
            .allow_overdraft();
        let appended = self.ledger.append(entry).await?;
        warn!(user_id, points, reason, "points penalty applied");
        Ok(appended)
    }

    async fn award(&self, user_id: &str, activity: &Activity) -> AwardOutcome {
        let source_type = activity.source_type();
        let quantity = match activity.quantity(&self.converter) {
            Ok(quantity) => quantity,
            Err(reason) => return AwardOutcome::Skipped { reason },
        };
        let points = rules::compute_points(source_type, quantity);
        if points <= 0 {
            return AwardOutcome::Skipped {
                reason: SkipReason::ZeroPoints,
            };
        }

        let entry = NewEntry::new(user_id, TransactionType::Earned, source_type, points)
            .source_id(activity.source_id((self.clock)()))
            .content_id(activity.content_id())
            .description(format!("{source_type} reward"))
            .metadata(serde_json::json!({
                "rulesVersion": rules::RULES_VERSION,
                "quantity": quantity,
            }));
        self.append_with_retry(entry, rules::wallet_bonus(source_type)).await
    }

    async fn append_with_retry(&self, entry: NewEntry, wallet_bonus: Option<BigDecimal>) -> AwardOutcome {
        let mut last_error = String::new();
        for attempt in 1..=self.policy.max_attempts {
            match tokio::time::timeout(self.policy.timeout, self.ledger.append(entry.clone())).await {
                Ok(Ok(Appended::New(tx))) => {
                    return AwardOutcome::Awarded {
                        transaction_id: tx.id,
                        points: tx.amount,
                        balance: tx.balance_after,
                        wallet_bonus,
                    }
                }
                Ok(Ok(Appended::Duplicate(prior))) => {
                    info!(
                        user_id = entry.user_id.as_str(),
                        source_type = %entry.source_type,
                        transaction_id = prior.id,
                        "duplicate award dropped"
                    );
                    return AwardOutcome::Duplicate {
                        transaction_id: prior.id,
                        points: prior.amount,
                        wallet_bonus: rules::wallet_bonus(prior.source_type),
                    };
                }
                Ok(Err(e @ LedgerError::Storage(_))) => last_error = e.to_string(),
                Ok(Err(e)) => {
                    warn!(
                        user_id = entry.user_id.as_str(),
                        source_type = %entry.source_type,
                        amount = entry.amount,
                        "award rejected: {e}"
                    );
                    return AwardOutcome::Failed { reason: e.to_string() };
                }
                Err(_) => last_error = format!("ledger append timed out after {:?}", self.policy.timeout),
            }
            warn!(
                user_id = entry.user_id.as_str(),
                source_type = %entry.source_type,
                amount = entry.amount,
                attempt,
                "award attempt failed: {last_error}"
            );
            if attempt < self.policy.max_attempts {
                tokio::time::sleep(self.policy.backoff * attempt).await;
            }
        }

        error!(
            user_id = entry.user_id.as_str(),
            source_type = %entry.source_type,
            amount = entry.amount,
            "award dead-lettered: {last_error}"
        );
        self.dead_letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(DeadLetter {
                entry,
                error: last_error.clone(),
                failed_at: Utc::now(),
            });
        AwardOutcome::Failed { reason: last_error }
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Re-attempts every dead-lettered award once more; returns how many went through.
    pub async fn redeliver_dead_letters(&self) -> usize {
        let pending = std::mem::take(&mut *self.dead_letters.lock().unwrap_or_else(PoisonError::into_inner));
        let mut delivered = 0;
        for letter in pending {
            let bonus = rules::wallet_bonus(letter.entry.source_type);
            match self.append_with_retry(letter.entry, bonus).await {
                AwardOutcome::Awarded { .. } | AwardOutcome::Duplicate { .. } => delivered += 1,
                _ => {}
            }
        }
        delivered
    }
}

fn award_message(points: i64, wallet_bonus: Option<&BigDecimal>) -> String {
    match wallet_bonus {
        Some(bonus) => format!("You earned {points} SoftPoints and a ${bonus} wallet bonus"),
        None => format!("You earned {points} SoftPoints"),
    }
}
