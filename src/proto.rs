//! Wire messages for the HTTP API. Every message encodes as protobuf and as camelCase JSON.

use prost_wkt_types::Timestamp;
use serde::{Deserialize, Serialize};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericOutput {
    #[prost(message, optional, tag = "1")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_balance: Option<UserBalanceData>,
    #[prost(message, optional, tag = "2")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<HistoryData>,
    #[prost(message, optional, tag = "3")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub award: Option<AwardData>,
    #[prost(message, optional, tag = "4")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchData>,
    #[prost(message, optional, tag = "5")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub withdrawal: Option<WithdrawalData>,
    #[prost(message, repeated, tag = "6")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transactions: Vec<TransactionData>,
    #[prost(message, optional, tag = "7")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskData>,
    #[prost(message, optional, tag = "15")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Error>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBalanceData {
    #[prost(string, tag = "1")]
    pub user_id: String,
    #[prost(int64, tag = "2")]
    pub points: i64,
    /// USD value of the balance, as a decimal string.
    #[prost(string, tag = "3")]
    pub value: String,
    #[prost(bool, tag = "4")]
    pub is_overdraft: bool,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionData {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(string, tag = "2")]
    pub user_id: String,
    #[prost(string, tag = "3")]
    pub transaction_type: String,
    #[prost(int64, tag = "4")]
    pub amount: i64,
    #[prost(string, tag = "5")]
    pub source_type: String,
    #[prost(string, tag = "6")]
    pub source_id: String,
    #[prost(string, tag = "7")]
    pub content_id: String,
    #[prost(int64, tag = "8")]
    pub balance_before: i64,
    #[prost(int64, tag = "9")]
    pub balance_after: i64,
    #[prost(string, tag = "10")]
    pub description: String,
    #[prost(message, optional, tag = "11")]
    pub created_at: Option<Timestamp>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryData {
    #[prost(message, repeated, tag = "1")]
    pub items: Vec<TransactionData>,
    #[prost(uint32, tag = "2")]
    pub page: u32,
    #[prost(uint32, tag = "3")]
    pub limit: u32,
    #[prost(uint64, tag = "4")]
    pub total: u64,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwardData {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(int64, tag = "2")]
    pub soft_points: i64,
    #[prost(string, tag = "3")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub wallet_bonus: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchData {
    #[prost(int64, tag = "1")]
    pub total_points: i64,
    #[prost(string, tag = "2")]
    pub total_wallet_bonus: String,
    #[prost(uint32, tag = "3")]
    pub awarded: u32,
    #[prost(uint32, tag = "4")]
    pub failed: u32,
    #[prost(message, repeated, tag = "5")]
    pub results: Vec<AwardData>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalData {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(string, tag = "2")]
    pub user_id: String,
    #[prost(string, tag = "3")]
    pub amount: String,
    #[prost(string, tag = "4")]
    pub currency: String,
    #[prost(string, tag = "5")]
    pub fee: String,
    #[prost(string, tag = "6")]
    pub net_amount: String,
    #[prost(int64, tag = "7")]
    pub points: i64,
    #[prost(string, tag = "8")]
    pub payout_method: String,
    #[prost(string, tag = "9")]
    pub status: String,
    #[prost(int64, tag = "10")]
    pub balance: i64,
    #[prost(message, optional, tag = "11")]
    pub created_at: Option<Timestamp>,
    #[prost(message, optional, tag = "12")]
    pub updated_at: Option<Timestamp>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskData {
    #[prost(uint32, tag = "1")]
    pub risk_score: u32,
    #[prost(string, tag = "2")]
    pub risk_level: String,
    #[prost(string, repeated, tag = "3")]
    pub reasons: Vec<String>,
    #[prost(string, repeated, tag = "4")]
    pub blocked_actions: Vec<String>,
    /// Whether the queried action may proceed; true when no action was asked about.
    #[prost(bool, tag = "5")]
    pub allowed: bool,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Error {
    #[prost(oneof = "error::OneError", tags = "1, 2, 3, 4, 5")]
    pub one_error: Option<error::OneError>,
}

pub mod error {
    use serde::{Deserialize, Serialize};

    #[derive(Clone, PartialEq, ::prost::Oneof, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub enum OneError {
        #[prost(message, tag = "1")]
        BadParameter(super::BadParameterError),
        #[prost(message, tag = "2")]
        NotFound(super::NotFoundError),
        #[prost(message, tag = "3")]
        InsufficientBalance(super::InsufficientBalanceError),
        #[prost(message, tag = "4")]
        Rejected(super::RejectedError),
        #[prost(message, tag = "5")]
        RiskRestricted(super::RiskData),
    }
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BadParameterError {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotFoundError {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsufficientBalanceError {
    #[prost(int64, tag = "1")]
    pub required: i64,
    #[prost(int64, tag = "2")]
    pub available: i64,
}

/// Validation failures; the first message is the primary one.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedError {
    #[prost(string, repeated, tag = "1")]
    pub messages: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalInput {
    #[prost(string, tag = "1")]
    pub user_id: String,
    #[prost(string, tag = "2")]
    pub amount: String,
    #[prost(string, tag = "3")]
    pub currency: String,
    #[prost(string, tag = "4")]
    #[serde(default)]
    pub payout_method: String,
    /// JSON object with the payout destination.
    #[prost(string, tag = "5")]
    #[serde(default)]
    pub payment_details: String,
    #[prost(string, tag = "6")]
    #[serde(default)]
    pub country: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleInput {
    /// `completed` or `failed`.
    #[prost(string, tag = "1")]
    pub status: String,
    #[prost(string, tag = "2")]
    #[serde(default)]
    pub reason: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoostInput {
    #[prost(string, tag = "1")]
    pub user_id: String,
    #[prost(string, tag = "2")]
    pub boost_id: String,
    #[prost(string, tag = "3")]
    pub content_id: String,
    #[prost(int64, tag = "4")]
    pub points: i64,
    #[prost(string, tag = "5")]
    #[serde(default)]
    pub country: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferInput {
    #[prost(string, tag = "1")]
    pub transfer_id: String,
    #[prost(string, tag = "2")]
    pub from_user_id: String,
    #[prost(string, tag = "3")]
    pub to_user_id: String,
    #[prost(int64, tag = "4")]
    pub points: i64,
    #[prost(string, tag = "5")]
    #[serde(default)]
    pub description: String,
}
