use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::ledger::{LedgerError, PointsTransaction, WithdrawalRecord};

#[derive(Queryable)]
pub struct PointsBalance {
    pub user_id: String,
    pub balance: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Queryable)]
pub struct Transaction {
    pub id: i64,
    pub user_id: String,
    pub transaction_type: String,
    pub amount: i64,
    pub source_type: String,
    pub source_id: Option<String>,
    pub content_id: Option<String>,
    pub balance_before: i64,
    pub balance_after: i64,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<Transaction> for PointsTransaction {
    type Error = LedgerError;

    fn try_from(row: Transaction) -> Result<Self, Self::Error> {
        Ok(PointsTransaction {
            id: row.id,
            user_id: row.user_id,
            transaction_type: row.transaction_type.parse()?,
            amount: row.amount,
            source_type: row
                .source_type
                .parse()
                .map_err(|e| LedgerError::Storage(format!("{e}")))?,
            source_id: row.source_id,
            content_id: row.content_id,
            balance_before: row.balance_before,
            balance_after: row.balance_after,
            description: row.description,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::points_transaction)]
pub struct NewTransaction {
    pub id: i64,
    pub user_id: String,
    pub transaction_type: String,
    pub amount: i64,
    pub source_type: String,
    pub source_id: Option<String>,
    pub content_id: Option<String>,
    pub balance_before: i64,
    pub balance_after: i64,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl From<&PointsTransaction> for NewTransaction {
    fn from(tx: &PointsTransaction) -> Self {
        NewTransaction {
            id: tx.id,
            user_id: tx.user_id.clone(),
            transaction_type: tx.transaction_type.as_str().to_string(),
            amount: tx.amount,
            source_type: tx.source_type.as_str().to_string(),
            source_id: tx.source_id.clone(),
            content_id: tx.content_id.clone(),
            balance_before: tx.balance_before,
            balance_after: tx.balance_after,
            description: tx.description.clone(),
            metadata: tx.metadata.clone(),
            created_at: tx.created_at,
        }
    }
}

#[derive(Queryable, Insertable)]
#[diesel(table_name = crate::schema::withdrawal_request)]
pub struct Withdrawal {
    pub id: i64,
    pub user_id: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub fee: BigDecimal,
    pub net_amount: BigDecimal,
    pub points: i64,
    pub payout_method: String,
    pub payment_details: serde_json::Value,
    pub status: String,
    pub debit_transaction_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<Withdrawal> for WithdrawalRecord {
    type Error = LedgerError;

    fn try_from(row: Withdrawal) -> Result<Self, Self::Error> {
        Ok(WithdrawalRecord {
            id: row.id,
            user_id: row.user_id,
            amount: row.amount,
            currency: row.currency,
            fee: row.fee,
            net_amount: row.net_amount,
            points: row.points,
            payout_method: row.payout_method,
            payment_details: row.payment_details,
            status: row.status.parse()?,
            debit_transaction_id: row.debit_transaction_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<&WithdrawalRecord> for Withdrawal {
    fn from(record: &WithdrawalRecord) -> Self {
        Withdrawal {
            id: record.id,
            user_id: record.user_id.clone(),
            amount: record.amount.clone(),
            currency: record.currency.clone(),
            fee: record.fee.clone(),
            net_amount: record.net_amount.clone(),
            points: record.points,
            payout_method: record.payout_method.clone(),
            payment_details: record.payment_details.clone(),
            status: record.status.as_str().to_string(),
            debit_transaction_id: record.debit_transaction_id,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}
