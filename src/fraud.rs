//! Fraud risk and quality-user scoring.
//!
//! Read-only with respect to the ledger: an assessment only tells the spend/withdrawal gate
//! whether to proceed.

use std::collections::HashMap;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

pub const NEW_ACCOUNT_DAYS: i64 = 7;
pub const NEW_ACCOUNT_SCORE: u32 = 20;
pub const AMOUNT_ANOMALY_SCORE: u32 = 25;
pub const GEO_ANOMALY_SCORE: u32 = 15;
pub const REQUEST_RATE_SCORE: u32 = 20;
pub const FAILED_VERIFICATION_SCORE: u32 = 25;
pub const PATTERN_SCORE: u32 = 15;

const AMOUNT_ANOMALY_FACTOR: i64 = 10;
const FIRST_TRANSACTION_LIMIT_USD: i64 = 500;
const MAX_EVENTS_PER_HOUR: usize = 10;
const MAX_FAILED_VERIFICATIONS: usize = 3;
const MAX_WITHDRAWALS_PER_DAY: usize = 3;

pub const PIONEER_MIN_QUALITY: u8 = 70;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: u8) -> Self {
        match score {
            80..=u8::MAX => RiskLevel::Critical,
            60..=79 => RiskLevel::High,
            30..=59 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }

    pub fn blocked_actions(&self) -> Vec<BlockedAction> {
        match self {
            RiskLevel::Low => vec![],
            RiskLevel::Medium => vec![BlockedAction::LargeTransaction],
            RiskLevel::High => vec![BlockedAction::LargeTransaction, BlockedAction::Trading],
            RiskLevel::Critical => vec![
                BlockedAction::Withdrawal,
                BlockedAction::Spend,
                BlockedAction::Trading,
                BlockedAction::LargeTransaction,
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedAction {
    Withdrawal,
    Spend,
    Trading,
    LargeTransaction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    Login,
    Request,
    FailedVerification,
    WithdrawalAttempt,
    SpendAttempt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub user_id: String,
    pub kind: SecurityEventKind,
    pub country: Option<String>,
    pub at: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn now(user_id: &str, kind: SecurityEventKind) -> Self {
        Self {
            user_id: user_id.to_string(),
            kind,
            country: None,
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub known_countries: Vec<String>,
    pub average_transaction_usd: Option<BigDecimal>,
    #[serde(default)]
    pub profile_complete: bool,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub activity_count: u64,
}

/// Everything the scorer looks at for one decision.
#[derive(Debug, Clone, Default)]
pub struct RiskContext {
    pub profile: Option<UserProfile>,
    pub amount_usd: Option<BigDecimal>,
    pub country: Option<String>,
    pub recent_events: Vec<SecurityEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FraudRiskAssessment {
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub reasons: Vec<String>,
    pub blocked_actions: Vec<BlockedAction>,
}

impl FraudRiskAssessment {
    pub fn blocks(&self, action: BlockedAction) -> bool {
        self.blocked_actions.contains(&action)
    }
}

/// Accumulates independent weighted signals into a 0..=100 score.
pub fn assess_risk(ctx: &RiskContext, now: DateTime<Utc>) -> FraudRiskAssessment {
    let mut score: u32 = 0;
    let mut reasons = Vec::new();

    let account_age = ctx.profile.as_ref().map(|p| now - p.created_at);
    match account_age {
        Some(age) if age >= Duration::days(NEW_ACCOUNT_DAYS) => {}
        _ => {
            score += NEW_ACCOUNT_SCORE;
            reasons.push("new account".to_string());
        }
    }

    if let Some(amount) = &ctx.amount_usd {
        let average = ctx
            .profile
            .as_ref()
            .and_then(|p| p.average_transaction_usd.as_ref())
            .filter(|avg| *avg > &BigDecimal::from(0));
        let anomalous = match average {
            Some(avg) => amount > &(avg * BigDecimal::from(AMOUNT_ANOMALY_FACTOR)),
            None => amount > &BigDecimal::from(FIRST_TRANSACTION_LIMIT_USD),
        };
        if anomalous {
            score += AMOUNT_ANOMALY_SCORE;
            reasons.push("transaction size anomaly".to_string());
        }
    }

    if let (Some(country), Some(profile)) = (&ctx.country, &ctx.profile) {
        if !profile.known_countries.is_empty() && !profile.known_countries.contains(country) {
            score += GEO_ANOMALY_SCORE;
            reasons.push(format!("unusual location: {country}"));
        }
    }

    let events = &ctx.recent_events;
    if count_within(events, now, Duration::hours(1), None) > MAX_EVENTS_PER_HOUR {
        score += REQUEST_RATE_SCORE;
        reasons.push("unusual request rate".to_string());
    }

    let failed_verifications = count_within(
        events,
        now,
        Duration::hours(24),
        Some(SecurityEventKind::FailedVerification),
    );
    if failed_verifications >= MAX_FAILED_VERIFICATIONS {
        score += FAILED_VERIFICATION_SCORE;
        reasons.push("recent failed verifications".to_string());
    }

    let withdrawal_attempts = count_within(
        events,
        now,
        Duration::hours(24),
        Some(SecurityEventKind::WithdrawalAttempt),
    );
    if withdrawal_attempts >= MAX_WITHDRAWALS_PER_DAY {
        score += PATTERN_SCORE;
        reasons.push("repeated withdrawal pattern".to_string());
    }

    let risk_score = score.min(100) as u8;
    let risk_level = RiskLevel::from_score(risk_score);
    FraudRiskAssessment {
        risk_score,
        risk_level,
        reasons,
        blocked_actions: risk_level.blocked_actions(),
    }
}

fn count_within(
    events: &[SecurityEvent],
    now: DateTime<Utc>,
    window: Duration,
    kind: Option<SecurityEventKind>,
) -> usize {
    events
        .iter()
        .filter(|e| now - e.at <= window)
        .filter(|e| kind.map_or(true, |kind| e.kind == kind))
        .count()
}

/// 0..=100 score for how established and engaged an account is.
pub fn quality_score(profile: &UserProfile, now: DateTime<Utc>) -> u8 {
    let mut score = 0;
    if profile.profile_complete {
        score += 25;
    }
    if profile.verified {
        score += 25;
    }
    let age = now - profile.created_at;
    if age >= Duration::days(30) {
        score += 20;
    } else if age >= Duration::days(NEW_ACCOUNT_DAYS) {
        score += 10;
    }
    if profile.activity_count >= 50 {
        score += 30;
    } else if profile.activity_count >= 10 {
        score += 15;
    }
    score
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PioneerEligibility {
    pub eligible: bool,
    pub quality_score: u8,
    pub risk_level: RiskLevel,
    pub reasons: Vec<String>,
}

pub fn pioneer_eligibility(
    profile: &UserProfile,
    assessment: &FraudRiskAssessment,
    now: DateTime<Utc>,
) -> PioneerEligibility {
    let quality = quality_score(profile, now);
    let mut reasons = Vec::new();
    if quality < PIONEER_MIN_QUALITY {
        reasons.push(format!("quality score {quality} is below {PIONEER_MIN_QUALITY}"));
    }
    if assessment.risk_level != RiskLevel::Low {
        reasons.push(format!("risk level is {:?}", assessment.risk_level).to_lowercase());
    }
    PioneerEligibility {
        eligible: reasons.is_empty(),
        quality_score: quality,
        risk_level: assessment.risk_level,
        reasons,
    }
}

/// Source of profiles and security history for risk decisions.
#[async_trait]
pub trait RiskSignals: Send + Sync {
    async fn profile(&self, user_id: &str) -> Option<UserProfile>;

    /// Stores the latest account facts pushed by the user service.
    async fn upsert_profile(&self, profile: UserProfile);

    /// Security events for the user within the last 24 hours.
    async fn recent_events(&self, user_id: &str, now: DateTime<Utc>) -> Vec<SecurityEvent>;

    async fn record(&self, event: SecurityEvent);

    async fn context(&self, user_id: &str, amount_usd: Option<BigDecimal>, country: Option<String>) -> RiskContext {
        RiskContext {
            profile: self.profile(user_id).await,
            amount_usd,
            country,
            recent_events: self.recent_events(user_id, Utc::now()).await,
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryRiskSignals {
    profiles: RwLock<HashMap<String, UserProfile>>,
    events: RwLock<HashMap<String, Vec<SecurityEvent>>>,
}

impl MemoryRiskSignals {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RiskSignals for MemoryRiskSignals {
    async fn profile(&self, user_id: &str) -> Option<UserProfile> {
        self.profiles.read().await.get(user_id).cloned()
    }

    async fn upsert_profile(&self, profile: UserProfile) {
        self.profiles.write().await.insert(profile.user_id.clone(), profile);
    }

    async fn recent_events(&self, user_id: &str, now: DateTime<Utc>) -> Vec<SecurityEvent> {
        let events = self.events.read().await;
        events
            .get(user_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| now - e.at <= Duration::hours(24))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn record(&self, event: SecurityEvent) {
        let mut events = self.events.write().await;
        let history = events.entry(event.user_id.clone()).or_default();
        let horizon = event.at - Duration::hours(24);
        history.retain(|e| e.at >= horizon);
        history.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn established(now: DateTime<Utc>) -> UserProfile {
        UserProfile {
            user_id: "u1".to_string(),
            created_at: now - Duration::days(400),
            known_countries: vec!["NG".to_string()],
            average_transaction_usd: Some(BigDecimal::from(20)),
            profile_complete: true,
            verified: true,
            activity_count: 120,
        }
    }

    fn events(kind: SecurityEventKind, count: usize, now: DateTime<Utc>) -> Vec<SecurityEvent> {
        (0..count)
            .map(|i| SecurityEvent {
                user_id: "u1".to_string(),
                kind,
                country: None,
                at: now - Duration::minutes(i as i64),
            })
            .collect()
    }

    #[test]
    fn brand_new_account_adds_twenty() {
        let now = Utc::now();
        let ctx = RiskContext {
            profile: Some(UserProfile {
                created_at: now,
                ..established(now)
            }),
            ..Default::default()
        };
        let assessment = assess_risk(&ctx, now);
        assert_eq!(assessment.risk_score, 20);
        assert!(assessment.reasons.contains(&"new account".to_string()));
        assert_eq!(assessment.risk_level, RiskLevel::Low);
        assert!(assessment.blocked_actions.is_empty());
    }

    #[test]
    fn established_account_is_clean() {
        let now = Utc::now();
        let ctx = RiskContext {
            profile: Some(established(now)),
            amount_usd: Some(BigDecimal::from(50)),
            country: Some("NG".to_string()),
            recent_events: vec![],
        };
        let assessment = assess_risk(&ctx, now);
        assert_eq!(assessment.risk_score, 0);
        assert!(assessment.reasons.is_empty());
    }

    #[test]
    fn signals_accumulate_into_levels() {
        let now = Utc::now();
        let mut ctx = RiskContext {
            profile: Some(established(now)),
            amount_usd: Some(BigDecimal::from(201)),
            country: Some("RU".to_string()),
            recent_events: vec![],
        };
        // 25 + 15
        let medium = assess_risk(&ctx, now);
        assert_eq!(medium.risk_score, 40);
        assert_eq!(medium.risk_level, RiskLevel::Medium);
        assert_eq!(medium.blocked_actions, vec![BlockedAction::LargeTransaction]);

        ctx.recent_events = events(SecurityEventKind::FailedVerification, 3, now);
        let high = assess_risk(&ctx, now);
        assert_eq!(high.risk_score, 65);
        assert_eq!(high.risk_level, RiskLevel::High);
        assert!(!high.blocks(BlockedAction::Withdrawal));

        ctx.recent_events.extend(events(SecurityEventKind::WithdrawalAttempt, 8, now));
        let critical = assess_risk(&ctx, now);
        // 25 + 15 + 20 (11 events in the hour) + 25 + 15
        assert_eq!(critical.risk_score, 100);
        assert_eq!(critical.risk_level, RiskLevel::Critical);
        assert!(critical.blocks(BlockedAction::Withdrawal));
        assert!(critical.blocks(BlockedAction::Spend));
        assert!(critical.blocks(BlockedAction::Trading));
    }

    #[test]
    fn thresholds_map_to_levels() {
        assert_eq!(RiskLevel::from_score(29), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(30), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(60), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(80), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(100), RiskLevel::Critical);
    }

    #[test]
    fn unknown_user_without_history_gets_first_transaction_check() {
        let now = Utc::now();
        let ctx = RiskContext {
            amount_usd: Some(BigDecimal::from(600)),
            ..Default::default()
        };
        let assessment = assess_risk(&ctx, now);
        assert_eq!(assessment.risk_score, 45);
    }

    #[test]
    fn pioneer_needs_quality_and_low_risk() {
        let now = Utc::now();
        let profile = established(now);
        assert_eq!(quality_score(&profile, now), 100);

        let clean = assess_risk(
            &RiskContext {
                profile: Some(profile.clone()),
                ..Default::default()
            },
            now,
        );
        assert!(pioneer_eligibility(&profile, &clean, now).eligible);

        let fresh = UserProfile {
            created_at: now,
            activity_count: 3,
            ..profile
        };
        let eligibility = pioneer_eligibility(&fresh, &clean, now);
        assert!(!eligibility.eligible);
        assert_eq!(eligibility.quality_score, 50);
    }

    #[actix_web::test]
    async fn test_memory_signals_keep_one_day() {
        let signals = MemoryRiskSignals::new();
        let now = Utc::now();
        signals
            .record(SecurityEvent {
                at: now - Duration::hours(30),
                ..SecurityEvent::now("u1", SecurityEventKind::Login)
            })
            .await;
        signals.record(SecurityEvent::now("u1", SecurityEventKind::WithdrawalAttempt)).await;

        let recent = signals.recent_events("u1", Utc::now()).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].kind, SecurityEventKind::WithdrawalAttempt);

        let ctx = signals.context("u1", None, None).await;
        assert!(ctx.profile.is_none());
        assert_eq!(ctx.recent_events.len(), 1);

        signals.upsert_profile(established(now)).await;
        let ctx = signals.context("u1", None, None).await;
        assert_eq!(ctx.profile.map(|p| p.verified), Some(true));
    }
}
