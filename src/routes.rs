use std::str::FromStr;
use std::sync::Arc;

use actix_request_identifier::RequestId;
use actix_web::{get, http::header, post, put, web, HttpResponse};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, instrument};

use crate::config::Settings;
use crate::currency::CurrencyConverter;
use crate::dispatcher::{Activity, RewardDispatcher, RewardEvent, TracingNotifier, TracingWalletSync};
use crate::fraud::{
    assess_risk, pioneer_eligibility, BlockedAction, MemoryRiskSignals, RiskSignals, SecurityEvent, SecurityEventKind,
    UserProfile,
};
use crate::gate::{
    BoostRequest, ManualPayouts, PayoutResult, SpendGate, SpendOutcome, TransferRequest, WithdrawalOutcome,
    WithdrawalRequest,
};
use crate::ledger::{verify_balance, LedgerError, LedgerStore, PageRequest};
use crate::proto::{self, GenericOutput};
use crate::reports::{self, Period};
use crate::{config, responses};

/// Shared services behind the HTTP handlers.
#[derive(Clone)]
pub struct AppData {
    pub ledger: Arc<dyn LedgerStore>,
    pub dispatcher: Arc<RewardDispatcher>,
    pub gate: Arc<SpendGate>,
    pub signals: Arc<dyn RiskSignals>,
    pub policy: config::WithdrawalPolicy,
}

impl AppData {
    pub fn new(settings: &Settings, ledger: Arc<dyn LedgerStore>, converter: CurrencyConverter) -> Self {
        let wallet = Arc::new(TracingWalletSync);
        let signals: Arc<dyn RiskSignals> = Arc::new(MemoryRiskSignals::new());
        let dispatcher = RewardDispatcher::new(
            ledger.clone(),
            converter.clone(),
            Arc::new(TracingNotifier),
            wallet.clone(),
            settings.award,
        );
        let gate = SpendGate::new(
            ledger.clone(),
            converter,
            signals.clone(),
            Arc::new(ManualPayouts),
            wallet,
            settings.withdrawal.clone(),
        );
        Self {
            ledger,
            dispatcher: Arc::new(dispatcher),
            gate: Arc::new(gate),
            signals,
            policy: settings.withdrawal.clone(),
        }
    }

    pub fn configure(&self, cfg: &mut web::ServiceConfig) {
        cfg.app_data(web::Data::from(self.ledger.clone()))
            .app_data(web::Data::from(self.dispatcher.clone()))
            .app_data(web::Data::from(self.gate.clone()))
            .app_data(web::Data::from(self.signals.clone()))
            .app_data(web::Data::new(self.policy.clone()))
            .service(balance_handler)
            .service(history_handler)
            .service(audit_handler)
            .service(analytics_handler)
            .service(tax_report_handler)
            .service(track_handler)
            .service(batch_handler)
            .service(withdrawal_handler)
            .service(settle_handler)
            .service(boost_handler)
            .service(transfer_handler)
            .service(risk_handler)
            .service(pioneer_handler)
            .service(profile_handler)
            .service(security_event_handler);
    }
}

fn wants_protobuf(accept: &header::Accept) -> bool {
    accept.iter().any(|a| a.item.essence_str() == responses::PROTOBUF_CONTENT_TYPE)
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[get("/points/{user_id}")]
#[instrument(skip(ledger, policy), fields(request_id = request_id.as_str()))]
pub async fn balance_handler(
    ledger: web::Data<dyn LedgerStore>,
    policy: web::Data<config::WithdrawalPolicy>,
    request_id: RequestId,
    accept: web::Header<header::Accept>,
    user_id: web::Path<String>,
) -> Result<HttpResponse, LedgerError> {
    let is_protobuf = wants_protobuf(&accept);
    let points = ledger.balance(&user_id).await?;
    let data = GenericOutput {
        user_balance: Some(responses::user_balance_data(&user_id, points, policy.points_per_usd)),
        ..Default::default()
    };
    Ok(responses::generic_http_response(&data, is_protobuf))
}

#[get("/points/{user_id}/history")]
#[instrument(skip(ledger), fields(request_id = request_id.as_str()))]
pub async fn history_handler(
    ledger: web::Data<dyn LedgerStore>,
    request_id: RequestId,
    accept: web::Header<header::Accept>,
    user_id: web::Path<String>,
    page: web::Query<PageRequest>,
) -> Result<HttpResponse, LedgerError> {
    let is_protobuf = wants_protobuf(&accept);
    let page = ledger.history(&user_id, page.into_inner()).await?;
    let data = GenericOutput {
        history: Some(responses::history_data(&page)),
        ..Default::default()
    };
    Ok(responses::generic_http_response(&data, is_protobuf))
}

#[get("/points/{user_id}/audit")]
#[instrument(skip(ledger), fields(request_id = request_id.as_str()))]
pub async fn audit_handler(
    ledger: web::Data<dyn LedgerStore>,
    request_id: RequestId,
    user_id: web::Path<String>,
) -> Result<HttpResponse, LedgerError> {
    let audit = verify_balance(ledger.get_ref(), &user_id).await?;
    Ok(HttpResponse::Ok().json(audit))
}

#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    period: Option<String>,
}

#[get("/points/{user_id}/analytics")]
#[instrument(skip(ledger), fields(request_id = request_id.as_str()))]
pub async fn analytics_handler(
    ledger: web::Data<dyn LedgerStore>,
    request_id: RequestId,
    user_id: web::Path<String>,
    query: web::Query<AnalyticsQuery>,
) -> Result<HttpResponse, LedgerError> {
    let period = match query.period.as_deref() {
        None => Period::default(),
        Some(period) => match Period::from_str(period) {
            Ok(period) => period,
            Err(_) => return Ok(responses::bad_parameter_http_response("period", false)),
        },
    };
    let report = reports::analytics(ledger.get_ref(), &user_id, period, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(report))
}

#[get("/points/{user_id}/tax-report/{year}")]
#[instrument(skip(ledger, policy), fields(request_id = request_id.as_str()))]
pub async fn tax_report_handler(
    ledger: web::Data<dyn LedgerStore>,
    policy: web::Data<config::WithdrawalPolicy>,
    request_id: RequestId,
    path: web::Path<(String, i32)>,
) -> Result<HttpResponse, LedgerError> {
    let (user_id, year) = path.into_inner();
    let report = reports::tax_report(ledger.get_ref(), &user_id, year, policy.points_per_usd).await?;
    Ok(HttpResponse::Ok().json(report))
}

// feeds the request-rate signal
async fn record_request(signals: &dyn RiskSignals, user_id: Option<&str>) {
    if let Some(user_id) = user_id.and_then(non_empty) {
        signals.record(SecurityEvent::now(&user_id, SecurityEventKind::Request)).await;
    }
}

#[post("/rewards/track")]
#[instrument(skip(dispatcher, signals), fields(request_id = request_id.as_str()))]
pub async fn track_handler(
    dispatcher: web::Data<RewardDispatcher>,
    signals: web::Data<dyn RiskSignals>,
    request_id: RequestId,
    accept: web::Header<header::Accept>,
    event: web::Json<RewardEvent>,
) -> HttpResponse {
    let is_protobuf = wants_protobuf(&accept);
    record_request(signals.get_ref(), event.user_id.as_deref()).await;
    let outcome = dispatcher.track(event.into_inner()).await;
    match outcome.to_response() {
        Some(award) => {
            let data = GenericOutput {
                award: Some(responses::award_data(&award)),
                ..Default::default()
            };
            responses::generic_http_response(&data, is_protobuf)
        }
        None if is_protobuf => responses::generic_http_response(&GenericOutput::default(), true),
        None => HttpResponse::Ok().content_type("application/json").body("null"),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchInput {
    #[serde(default)]
    user_id: Option<String>,
    activities: Vec<Activity>,
}

#[post("/rewards/batch")]
#[instrument(skip(dispatcher, signals), fields(request_id = request_id.as_str()))]
pub async fn batch_handler(
    dispatcher: web::Data<RewardDispatcher>,
    signals: web::Data<dyn RiskSignals>,
    request_id: RequestId,
    accept: web::Header<header::Accept>,
    batch: web::Json<BatchInput>,
) -> HttpResponse {
    let is_protobuf = wants_protobuf(&accept);
    let BatchInput { user_id, activities } = batch.into_inner();
    record_request(signals.get_ref(), user_id.as_deref()).await;
    match dispatcher.track_batch(user_id.as_deref(), activities).await {
        Some(summary) => {
            let data = GenericOutput {
                batch: Some(responses::batch_data(&summary)),
                ..Default::default()
            };
            responses::generic_http_response(&data, is_protobuf)
        }
        None if is_protobuf => responses::generic_http_response(&GenericOutput::default(), true),
        None => HttpResponse::Ok().content_type("application/json").body("null"),
    }
}

#[post("/withdrawals")]
#[instrument(skip(gate), fields(request_id = request_id.as_str()))]
pub async fn withdrawal_handler(
    gate: web::Data<SpendGate>,
    request_id: RequestId,
    accept: web::Header<header::Accept>,
    input: web::Json<proto::WithdrawalInput>,
) -> Result<HttpResponse, LedgerError> {
    let is_protobuf = wants_protobuf(&accept);
    let input = input.into_inner();

    if input.user_id.trim().is_empty() {
        return Ok(responses::bad_parameter_http_response("user_id", is_protobuf));
    }
    let amount = match BigDecimal::from_str(input.amount.trim()) {
        Ok(amount) => amount,
        Err(_) => return Ok(responses::bad_parameter_http_response("amount", is_protobuf)),
    };
    // payment details arrive as a JSON document inside a string field
    let payment_details = match non_empty(&input.payment_details) {
        None => None,
        Some(details) => match serde_json::from_str::<serde_json::Value>(&details) {
            Ok(details) => Some(details),
            Err(_) => return Ok(responses::bad_parameter_http_response("payment_details", is_protobuf)),
        },
    };

    let request = WithdrawalRequest {
        user_id: input.user_id,
        amount,
        currency: input.currency.trim().to_uppercase(),
        payout_method: non_empty(&input.payout_method),
        payment_details,
        country: non_empty(&input.country),
    };
    let response = match gate.request_withdrawal(request).await? {
        WithdrawalOutcome::Accepted(response) => {
            let data = GenericOutput {
                withdrawal: Some(responses::withdrawal_response_data(&response)),
                ..Default::default()
            };
            responses::generic_http_response(&data, is_protobuf)
        }
        WithdrawalOutcome::Rejected(errors) => responses::withdrawal_rejected_http_response(&errors, is_protobuf),
        WithdrawalOutcome::Restricted(assessment) => {
            responses::risk_restricted_http_response(&assessment, is_protobuf)
        }
    };
    Ok(response)
}

#[post("/withdrawals/{id}/settle")]
#[instrument(skip(gate, ledger), fields(request_id = request_id.as_str()))]
pub async fn settle_handler(
    gate: web::Data<SpendGate>,
    ledger: web::Data<dyn LedgerStore>,
    request_id: RequestId,
    accept: web::Header<header::Accept>,
    id: web::Path<i64>,
    input: web::Json<proto::SettleInput>,
) -> Result<HttpResponse, LedgerError> {
    let is_protobuf = wants_protobuf(&accept);
    let id = id.into_inner();
    let result = match input.status.as_str() {
        "completed" => PayoutResult::Completed,
        "failed" => PayoutResult::Failed {
            reason: non_empty(&input.reason).unwrap_or_else(|| "payout failed".to_string()),
        },
        _ => return Ok(responses::bad_parameter_http_response("status", is_protobuf)),
    };

    let record = match gate.settle_withdrawal(id, result).await {
        Ok(record) => record,
        Err(LedgerError::WithdrawalNotFound(_)) => {
            return Ok(responses::not_found_http_response("withdrawal", is_protobuf))
        }
        Err(e @ LedgerError::InvalidStatusTransition { .. }) => {
            info!("settlement refused: {e}");
            return Ok(responses::bad_parameter_http_response("status", is_protobuf));
        }
        Err(e) => return Err(e),
    };
    let balance = ledger.balance(&record.user_id).await?;
    let data = GenericOutput {
        withdrawal: Some(responses::withdrawal_data(&record, balance)),
        ..Default::default()
    };
    Ok(responses::generic_http_response(&data, is_protobuf))
}

#[post("/boosts")]
#[instrument(skip(gate), fields(request_id = request_id.as_str()))]
pub async fn boost_handler(
    gate: web::Data<SpendGate>,
    request_id: RequestId,
    accept: web::Header<header::Accept>,
    input: web::Json<proto::BoostInput>,
) -> Result<HttpResponse, LedgerError> {
    let is_protobuf = wants_protobuf(&accept);
    let input = input.into_inner();
    for (name, value) in [
        ("user_id", &input.user_id),
        ("boost_id", &input.boost_id),
        ("content_id", &input.content_id),
    ] {
        if value.trim().is_empty() {
            return Ok(responses::bad_parameter_http_response(name, is_protobuf));
        }
    }

    let request = BoostRequest {
        country: non_empty(&input.country),
        user_id: input.user_id,
        boost_id: input.boost_id,
        content_id: input.content_id,
        points: input.points,
    };
    let response = match gate.spend_for_boost(request).await? {
        SpendOutcome::Completed(tx) => {
            let data = GenericOutput {
                transactions: vec![responses::transaction_data(&tx)],
                ..Default::default()
            };
            responses::generic_http_response(&data, is_protobuf)
        }
        SpendOutcome::Rejected(err) => responses::spend_rejected_http_response(&err, is_protobuf),
        SpendOutcome::Restricted(assessment) => responses::risk_restricted_http_response(&assessment, is_protobuf),
    };
    Ok(response)
}

#[post("/transfers")]
#[instrument(skip(gate), fields(request_id = request_id.as_str()))]
pub async fn transfer_handler(
    gate: web::Data<SpendGate>,
    request_id: RequestId,
    accept: web::Header<header::Accept>,
    input: web::Json<proto::TransferInput>,
) -> Result<HttpResponse, LedgerError> {
    let is_protobuf = wants_protobuf(&accept);
    let input = input.into_inner();
    for (name, value) in [
        ("transfer_id", &input.transfer_id),
        ("from_user_id", &input.from_user_id),
        ("to_user_id", &input.to_user_id),
    ] {
        if value.trim().is_empty() {
            return Ok(responses::bad_parameter_http_response(name, is_protobuf));
        }
    }

    let request = TransferRequest {
        description: non_empty(&input.description),
        transfer_id: input.transfer_id,
        from_user_id: input.from_user_id,
        to_user_id: input.to_user_id,
        points: input.points,
    };
    let response = match gate.transfer_points(request).await? {
        SpendOutcome::Completed((debit, credit)) => {
            let data = GenericOutput {
                transactions: vec![responses::transaction_data(&debit), responses::transaction_data(&credit)],
                ..Default::default()
            };
            responses::generic_http_response(&data, is_protobuf)
        }
        SpendOutcome::Rejected(err) => responses::spend_rejected_http_response(&err, is_protobuf),
        SpendOutcome::Restricted(assessment) => responses::risk_restricted_http_response(&assessment, is_protobuf),
    };
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct RiskQuery {
    action: Option<String>,
    amount: Option<String>,
}

#[get("/risk/{user_id}")]
#[instrument(skip(signals), fields(request_id = request_id.as_str()))]
pub async fn risk_handler(
    signals: web::Data<dyn RiskSignals>,
    request_id: RequestId,
    accept: web::Header<header::Accept>,
    user_id: web::Path<String>,
    query: web::Query<RiskQuery>,
) -> HttpResponse {
    let is_protobuf = wants_protobuf(&accept);
    let action = match query.action.as_deref().and_then(non_empty) {
        None => None,
        Some(action) => match serde_json::from_value::<BlockedAction>(serde_json::Value::String(action)) {
            Ok(action) => Some(action),
            Err(_) => return responses::bad_parameter_http_response("action", is_protobuf),
        },
    };
    let amount_usd = match query.amount.as_deref().and_then(non_empty) {
        None => None,
        Some(amount) => match BigDecimal::from_str(&amount) {
            Ok(amount) => Some(amount),
            Err(_) => return responses::bad_parameter_http_response("amount", is_protobuf),
        },
    };

    let ctx = signals.context(&user_id, amount_usd, None).await;
    let assessment = assess_risk(&ctx, Utc::now());
    let data = GenericOutput {
        risk: Some(responses::risk_data_for(&assessment, action)),
        ..Default::default()
    };
    responses::generic_http_response(&data, is_protobuf)
}

#[get("/pioneer/{user_id}")]
#[instrument(skip(signals), fields(request_id = request_id.as_str()))]
pub async fn pioneer_handler(
    signals: web::Data<dyn RiskSignals>,
    request_id: RequestId,
    user_id: web::Path<String>,
) -> HttpResponse {
    let ctx = signals.context(&user_id, None, None).await;
    let Some(profile) = ctx.profile.as_ref() else {
        return responses::not_found_http_response("user", false);
    };
    let now = Utc::now();
    let assessment = assess_risk(&ctx, now);
    HttpResponse::Ok().json(pioneer_eligibility(profile, &assessment, now))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileInput {
    created_at: DateTime<Utc>,
    #[serde(default)]
    known_countries: Vec<String>,
    #[serde(default)]
    average_transaction_usd: Option<BigDecimal>,
    #[serde(default)]
    profile_complete: bool,
    #[serde(default)]
    verified: bool,
    #[serde(default)]
    activity_count: u64,
}

#[put("/profiles/{user_id}")]
#[instrument(skip(signals, input), fields(request_id = request_id.as_str()))]
pub async fn profile_handler(
    signals: web::Data<dyn RiskSignals>,
    request_id: RequestId,
    user_id: web::Path<String>,
    input: web::Json<ProfileInput>,
) -> HttpResponse {
    let Some(user_id) = non_empty(&user_id) else {
        return responses::bad_parameter_http_response("user_id", false);
    };
    let input = input.into_inner();
    if input.created_at > Utc::now() {
        return responses::bad_parameter_http_response("created_at", false);
    }
    let profile = UserProfile {
        user_id,
        created_at: input.created_at,
        known_countries: input.known_countries,
        average_transaction_usd: input.average_transaction_usd,
        profile_complete: input.profile_complete,
        verified: input.verified,
        activity_count: input.activity_count,
    };
    signals.upsert_profile(profile.clone()).await;
    info!(user_id = profile.user_id.as_str(), "risk profile updated");
    HttpResponse::Ok().json(profile)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEventInput {
    user_id: String,
    kind: SecurityEventKind,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    at: Option<DateTime<Utc>>,
}

/// Records a security event and answers with the user's risk after it.
#[post("/security-events")]
#[instrument(skip(signals), fields(request_id = request_id.as_str()))]
pub async fn security_event_handler(
    signals: web::Data<dyn RiskSignals>,
    request_id: RequestId,
    accept: web::Header<header::Accept>,
    input: web::Json<SecurityEventInput>,
) -> HttpResponse {
    let is_protobuf = wants_protobuf(&accept);
    let input = input.into_inner();
    let Some(user_id) = non_empty(&input.user_id) else {
        return responses::bad_parameter_http_response("user_id", is_protobuf);
    };
    let now = Utc::now();
    // events from the future would never age out of the windows
    let at = input.at.map_or(now, |at| at.min(now));
    signals
        .record(SecurityEvent {
            user_id: user_id.clone(),
            kind: input.kind,
            country: input.country.as_deref().and_then(non_empty),
            at,
        })
        .await;

    let ctx = signals.context(&user_id, None, None).await;
    let data = GenericOutput {
        risk: Some(responses::risk_data(&assess_risk(&ctx, now))),
        ..Default::default()
    };
    responses::generic_http_response(&data, is_protobuf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::create_currency_converter;
    use crate::ledger::{MemoryLedger, NewEntry, TransactionType};
    use crate::rules::SourceType;
    use actix_request_identifier::RequestIdentifier;
    use actix_web::{test, App};
    use prost::Message;

    fn app_data() -> AppData {
        let settings = Settings::from_lookup(|_| None).unwrap();
        AppData::new(&settings, Arc::new(MemoryLedger::new()), create_currency_converter().unwrap())
    }

    async fn fund(data: &AppData, user_id: &str, points: i64) {
        data.ledger
            .append(NewEntry::new(user_id, TransactionType::Bonus, SourceType::Bonus, points).source_id("seed"))
            .await
            .unwrap();
    }

    macro_rules! init_app {
        ($data:expr) => {{
            let data = $data.clone();
            test::init_service(
                App::new()
                    .wrap(RequestIdentifier::with_uuid())
                    .configure(move |cfg| data.configure(cfg)),
            )
            .await
        }};
    }

    #[actix_web::test]
    async fn test_balance_json_and_protobuf() {
        let data = app_data();
        fund(&data, "amy", 1250).await;
        let app = init_app!(data);

        let req = test::TestRequest::get().uri("/points/amy").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["userBalance"]["points"], 1250);
        assert_eq!(body["userBalance"]["value"], "12.50");
        assert_eq!(body["userBalance"]["isOverdraft"], false);

        let req = test::TestRequest::get()
            .uri("/points/amy")
            .insert_header((header::ACCEPT, "application/x-protobuf"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/x-protobuf"
        );
        let decoded = GenericOutput::decode(test::read_body(resp).await).unwrap();
        assert_eq!(decoded.user_balance.unwrap().points, 1250);
    }

    #[actix_web::test]
    async fn test_track_unauthenticated_returns_null() {
        let data = app_data();
        let app = init_app!(data);

        let req = test::TestRequest::post()
            .uri("/rewards/track")
            .set_json(serde_json::json!({"activity": {"type": "tip", "tipId": "t1"}}))
            .to_request();
        let body = test::call_and_read_body(&app, req).await;
        assert_eq!(body, "null");
    }

    #[actix_web::test]
    async fn test_track_and_history() {
        let data = app_data();
        let app = init_app!(data);

        for _ in 0..2 {
            let req = test::TestRequest::post()
                .uri("/rewards/track")
                .set_json(serde_json::json!({
                    "userId": "bea",
                    "activity": {"type": "subscription", "subscriptionId": "s1", "creatorId": "c1"}
                }))
                .to_request();
            let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
            assert_eq!(body["award"]["success"], true);
            assert_eq!(body["award"]["softPoints"], 10);
        }

        let req = test::TestRequest::get().uri("/points/bea/history?limit=5").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["history"]["total"], 1);
        assert_eq!(body["history"]["limit"], 5);
        assert_eq!(body["history"]["items"][0]["sourceType"], "subscriptions");
        assert_eq!(body["history"]["items"][0]["balanceAfter"], 10);

        let req = test::TestRequest::get().uri("/points/bea/audit").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["consistent"], true);
    }

    #[actix_web::test]
    async fn test_batch() {
        let data = app_data();
        let app = init_app!(data);

        let req = test::TestRequest::post()
            .uri("/rewards/batch")
            .set_json(serde_json::json!({
                "userId": "cal",
                "activities": [
                    {"type": "tip", "tipId": "t1"},
                    {"type": "video_view", "eventId": "e1", "videoId": "v1", "views": 2000},
                ]
            }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["batch"]["totalPoints"], 11);
        assert_eq!(body["batch"]["awarded"], 2);
    }

    #[actix_web::test]
    async fn test_withdrawal_flow() {
        let data = app_data();
        fund(&data, "dan", 1000).await;
        let app = init_app!(data);

        let req = test::TestRequest::post()
            .uri("/withdrawals")
            .set_json(serde_json::json!({
                "userId": "dan",
                "amount": "5",
                "currency": "usd",
                "payoutMethod": "bank_transfer",
                "paymentDetails": "{\"accountNumber\": \"0123456789\"}"
            }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["withdrawal"]["fee"], "0.50");
        assert_eq!(body["withdrawal"]["netAmount"], "4.50");
        assert_eq!(body["withdrawal"]["points"], 500);
        assert_eq!(body["withdrawal"]["balance"], 500);
        assert_eq!(body["withdrawal"]["status"], "processing");
        let id = body["withdrawal"]["id"].as_i64().unwrap();

        let req = test::TestRequest::post()
            .uri(&format!("/withdrawals/{id}/settle"))
            .set_json(serde_json::json!({"status": "failed", "reason": "bank rejected"}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["withdrawal"]["status"], "failed");
        assert_eq!(body["withdrawal"]["balance"], 1000);

        let req = test::TestRequest::post()
            .uri("/withdrawals/1/settle")
            .set_json(serde_json::json!({"status": "completed"}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["error"]["oneError"]["notFound"]["name"], "withdrawal");
    }

    #[actix_web::test]
    async fn test_withdrawal_rejections() {
        let data = app_data();
        fund(&data, "eli", 1000).await;
        let app = init_app!(data);

        let req = test::TestRequest::post()
            .uri("/withdrawals")
            .set_json(serde_json::json!({
                "userId": "eli",
                "amount": "3",
                "currency": "USD",
                "payoutMethod": "bank_transfer",
                "paymentDetails": "{\"accountNumber\": \"1\"}"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(
            body["error"]["oneError"]["rejected"]["messages"][0],
            "Minimum withdrawal is 5.00 USD"
        );

        let req = test::TestRequest::post()
            .uri("/withdrawals")
            .set_json(serde_json::json!({"userId": "eli", "amount": "lots", "currency": "USD"}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["error"]["oneError"]["badParameter"]["name"], "amount");
        assert_eq!(data.ledger.balance("eli").await.unwrap(), 1000);
    }

    #[actix_web::test]
    async fn test_boost_and_transfer() {
        let data = app_data();
        fund(&data, "fay", 100).await;
        let app = init_app!(data);

        let req = test::TestRequest::post()
            .uri("/boosts")
            .set_json(serde_json::json!({"userId": "fay", "boostId": "b1", "contentId": "p1", "points": 500}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["error"]["oneError"]["insufficientBalance"]["available"], 100);

        let req = test::TestRequest::post()
            .uri("/transfers")
            .set_json(serde_json::json!({"transferId": "t1", "fromUserId": "fay", "toUserId": "gil", "points": 30}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["transactions"][0]["balanceAfter"], 70);
        assert_eq!(body["transactions"][1]["balanceAfter"], 30);
    }

    #[actix_web::test]
    async fn test_risk_and_pioneer() {
        let data = app_data();
        let app = init_app!(data);

        let req = test::TestRequest::get()
            .uri("/risk/hank?action=withdrawal&amount=20")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["risk"]["riskScore"], 20);
        assert_eq!(body["risk"]["riskLevel"], "low");
        assert_eq!(body["risk"]["reasons"][0], "new account");
        assert_eq!(body["risk"]["allowed"], true);

        let req = test::TestRequest::get().uri("/risk/hank?action=fly").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["error"]["oneError"]["badParameter"]["name"], "action");

        let req = test::TestRequest::get().uri("/pioneer/hank").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["error"]["oneError"]["notFound"]["name"], "user");
    }

    #[actix_web::test]
    async fn test_profiles_and_security_events_drive_risk() {
        let data = app_data();
        let app = init_app!(data);

        let created_at = Utc::now() - chrono::Duration::days(60);
        let req = test::TestRequest::put()
            .uri("/profiles/nia")
            .set_json(serde_json::json!({
                "createdAt": created_at,
                "knownCountries": ["NG"],
                "profileComplete": true,
                "verified": true,
                "activityCount": 80
            }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["userId"], "nia");

        let req = test::TestRequest::get().uri("/risk/nia").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["risk"]["riskScore"], 0);
        assert_eq!(body["risk"]["riskLevel"], "low");

        let req = test::TestRequest::get().uri("/pioneer/nia").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["eligible"], true);
        assert_eq!(body["qualityScore"], 100);

        let mut last = serde_json::Value::Null;
        for _ in 0..11 {
            let req = test::TestRequest::post()
                .uri("/security-events")
                .set_json(serde_json::json!({"userId": "nia", "kind": "failed_verification"}))
                .to_request();
            last = test::call_and_read_body_json(&app, req).await;
        }
        assert_eq!(last["risk"]["riskScore"], 45);
        assert_eq!(last["risk"]["riskLevel"], "medium");
        assert_eq!(last["risk"]["blockedActions"][0], "large_transaction");

        let req = test::TestRequest::get().uri("/pioneer/nia").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["eligible"], false);

        let req = test::TestRequest::post()
            .uri("/security-events")
            .set_json(serde_json::json!({"userId": " ", "kind": "login"}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["error"]["oneError"]["badParameter"]["name"], "user_id");
    }

    #[actix_web::test]
    async fn test_award_requests_count_toward_request_rate() {
        let data = app_data();
        let app = init_app!(data);

        for i in 0..11 {
            let req = test::TestRequest::post()
                .uri("/rewards/track")
                .set_json(serde_json::json!({"userId": "oli", "activity": {"type": "tip", "tipId": format!("t{i}")}}))
                .to_request();
            test::call_service(&app, req).await;
        }

        let req = test::TestRequest::get().uri("/risk/oli").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["risk"]["riskScore"], 40);
        assert_eq!(body["risk"]["reasons"][1], "unusual request rate");
    }

    #[actix_web::test]
    async fn test_reports() {
        let data = app_data();
        fund(&data, "ida", 700).await;
        let app = init_app!(data);

        let req = test::TestRequest::get().uri("/points/ida/analytics?period=week").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["period"], "week");
        assert_eq!(body["earned"], 700);

        let req = test::TestRequest::get().uri("/points/ida/analytics?period=decade").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["error"]["oneError"]["badParameter"]["name"], "period");

        let year = Utc::now().format("%Y").to_string();
        let req = test::TestRequest::get()
            .uri(&format!("/points/ida/tax-report/{year}"))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["pointsEarned"], 700);
        assert_eq!(body["earnedUsd"], "7.00");
    }
}
