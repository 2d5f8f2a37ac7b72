use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use prost::Message;
use prost_wkt_types::Timestamp;
use tracing::error;

use crate::currency::value_of_points;
use crate::dispatcher::{AwardResponse, BatchSummary};
use crate::fraud::{BlockedAction, FraudRiskAssessment};
use crate::gate::{SpendError, WithdrawalError, WithdrawalResponse};
use crate::ledger::{LedgerError, Page, PointsTransaction, WithdrawalRecord};
use crate::proto::{
    error, AwardData, BadParameterError, BatchData, Error, GenericOutput, HistoryData, InsufficientBalanceError,
    NotFoundError, RejectedError, RiskData, TransactionData, UserBalanceData, WithdrawalData,
};

pub const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

impl ResponseError for LedgerError {
    fn status_code(&self) -> StatusCode {
        match self {
            LedgerError::InvalidEntry(_) => StatusCode::BAD_REQUEST,
            LedgerError::WithdrawalNotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::InsufficientBalance { .. } | LedgerError::InvalidStatusTransition { .. } => {
                StatusCode::CONFLICT
            }
            LedgerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Encodes `data` as protobuf or JSON, whichever the client asked for.
pub fn generic_http_response(data: &GenericOutput, is_protobuf: bool) -> HttpResponse {
    if is_protobuf {
        return HttpResponse::Ok()
            .content_type(PROTOBUF_CONTENT_TYPE)
            .body(data.encode_to_vec());
    }
    match serde_json::to_string(data) {
        Ok(body) => HttpResponse::Ok().content_type("application/json").body(body),
        Err(e) => {
            error!("response serialization failed: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

fn error_http_response(one_error: error::OneError, is_protobuf: bool) -> HttpResponse {
    let data = GenericOutput {
        error: Some(Error {
            one_error: Some(one_error),
        }),
        ..Default::default()
    };
    generic_http_response(&data, is_protobuf)
}

pub fn bad_parameter_http_response(field: &str, is_protobuf: bool) -> HttpResponse {
    error_http_response(
        error::OneError::BadParameter(BadParameterError { name: field.to_string() }),
        is_protobuf,
    )
}

pub fn not_found_http_response(name: &str, is_protobuf: bool) -> HttpResponse {
    error_http_response(error::OneError::NotFound(NotFoundError { name: name.to_string() }), is_protobuf)
}

pub fn withdrawal_rejected_http_response(errors: &[WithdrawalError], is_protobuf: bool) -> HttpResponse {
    error_http_response(
        error::OneError::Rejected(RejectedError {
            messages: errors.iter().map(ToString::to_string).collect(),
        }),
        is_protobuf,
    )
}

pub fn spend_rejected_http_response(err: &SpendError, is_protobuf: bool) -> HttpResponse {
    let one_error = match err {
        SpendError::InsufficientBalance { required, available } => {
            error::OneError::InsufficientBalance(InsufficientBalanceError {
                required: *required,
                available: *available,
            })
        }
        other => error::OneError::Rejected(RejectedError {
            messages: vec![other.to_string()],
        }),
    };
    error_http_response(one_error, is_protobuf)
}

pub fn risk_restricted_http_response(assessment: &FraudRiskAssessment, is_protobuf: bool) -> HttpResponse {
    error_http_response(error::OneError::RiskRestricted(risk_data(assessment)), is_protobuf)
}

pub fn timestamp(at: &DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: at.timestamp(),
        nanos: at.timestamp_subsec_nanos() as i32,
    }
}

fn snake_case<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        _ => String::new(),
    }
}

pub fn user_balance_data(user_id: &str, points: i64, points_per_usd: i64) -> UserBalanceData {
    UserBalanceData {
        user_id: user_id.to_string(),
        points,
        value: value_of_points(points, points_per_usd).with_scale(2).to_string(),
        is_overdraft: points < 0,
    }
}

pub fn transaction_data(tx: &PointsTransaction) -> TransactionData {
    TransactionData {
        id: tx.id,
        user_id: tx.user_id.clone(),
        transaction_type: tx.transaction_type.to_string(),
        amount: tx.amount,
        source_type: tx.source_type.to_string(),
        source_id: tx.source_id.clone().unwrap_or_default(),
        content_id: tx.content_id.clone().unwrap_or_default(),
        balance_before: tx.balance_before,
        balance_after: tx.balance_after,
        description: tx.description.clone().unwrap_or_default(),
        created_at: Some(timestamp(&tx.created_at)),
    }
}

pub fn history_data(page: &Page<PointsTransaction>) -> HistoryData {
    HistoryData {
        items: page.items.iter().map(transaction_data).collect(),
        page: page.page,
        limit: page.limit,
        total: page.total,
    }
}

fn decimal_string(value: Option<&BigDecimal>) -> String {
    value.map(ToString::to_string).unwrap_or_default()
}

pub fn award_data(award: &AwardResponse) -> AwardData {
    AwardData {
        success: award.success,
        soft_points: award.soft_points,
        wallet_bonus: decimal_string(award.wallet_bonus.as_ref()),
    }
}

pub fn batch_data(summary: &BatchSummary) -> BatchData {
    BatchData {
        total_points: summary.total_points,
        total_wallet_bonus: summary.total_wallet_bonus.to_string(),
        awarded: summary.awarded as u32,
        failed: summary.failed as u32,
        results: summary
            .results
            .iter()
            .map(|result| match result {
                Some(award) => award_data(award),
                None => AwardData::default(),
            })
            .collect(),
    }
}

pub fn withdrawal_data(record: &WithdrawalRecord, balance: i64) -> WithdrawalData {
    WithdrawalData {
        id: record.id,
        user_id: record.user_id.clone(),
        amount: record.amount.to_string(),
        currency: record.currency.clone(),
        fee: record.fee.to_string(),
        net_amount: record.net_amount.to_string(),
        points: record.points,
        payout_method: record.payout_method.clone(),
        status: record.status.as_str().to_string(),
        balance,
        created_at: Some(timestamp(&record.created_at)),
        updated_at: Some(timestamp(&record.updated_at)),
    }
}

pub fn withdrawal_response_data(response: &WithdrawalResponse) -> WithdrawalData {
    withdrawal_data(&response.withdrawal, response.balance)
}

pub fn risk_data(assessment: &FraudRiskAssessment) -> RiskData {
    risk_data_for(assessment, None)
}

pub fn risk_data_for(assessment: &FraudRiskAssessment, action: Option<BlockedAction>) -> RiskData {
    RiskData {
        risk_score: u32::from(assessment.risk_score),
        risk_level: snake_case(&assessment.risk_level),
        reasons: assessment.reasons.clone(),
        blocked_actions: assessment.blocked_actions.iter().map(snake_case).collect(),
        allowed: action.map_or(true, |action| !assessment.blocks(action)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fraud::RiskLevel;
    use actix_web::body::to_bytes;

    #[test]
    fn balance_value_is_in_dollars() {
        let data = user_balance_data("u1", 1250, 100);
        assert_eq!(data.value, "12.50");
        assert!(!data.is_overdraft);
        assert!(user_balance_data("u1", -5, 100).is_overdraft);
    }

    #[test]
    fn risk_enums_use_wire_names() {
        let data = risk_data(&FraudRiskAssessment {
            risk_score: 65,
            risk_level: RiskLevel::High,
            reasons: vec!["new account".to_string()],
            blocked_actions: vec![BlockedAction::LargeTransaction, BlockedAction::Trading],
        });
        assert_eq!(data.risk_level, "high");
        assert_eq!(data.blocked_actions, vec!["large_transaction", "trading"]);
        assert!(data.allowed);

        let assessment = FraudRiskAssessment {
            risk_score: 65,
            risk_level: RiskLevel::High,
            reasons: vec![],
            blocked_actions: RiskLevel::High.blocked_actions(),
        };
        assert!(!risk_data_for(&assessment, Some(BlockedAction::Trading)).allowed);
        assert!(risk_data_for(&assessment, Some(BlockedAction::Withdrawal)).allowed);
    }

    #[actix_web::test]
    async fn test_error_payload_is_negotiated() {
        let json = bad_parameter_http_response("user_id", false);
        assert_eq!(json.status(), StatusCode::OK);
        let body = to_bytes(json.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"]["oneError"]["badParameter"]["name"], "user_id");

        let proto = bad_parameter_http_response("user_id", true);
        let body = to_bytes(proto.into_body()).await.unwrap();
        let decoded = GenericOutput::decode(body).unwrap();
        assert_eq!(
            decoded.error.and_then(|e| e.one_error),
            Some(error::OneError::BadParameter(BadParameterError {
                name: "user_id".to_string()
            }))
        );
    }

    #[test]
    fn storage_errors_are_server_errors() {
        assert_eq!(
            LedgerError::Storage("down".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(LedgerError::WithdrawalNotFound(1).status_code(), StatusCode::NOT_FOUND);
    }
}
