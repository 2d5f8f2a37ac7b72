//! Postgres-backed ledger store.
//!
//! Per-user serialization comes from a `FOR UPDATE` lock on the user's `points_balance` row,
//! held for the whole append transaction; the dedup key is backed by a unique index.

use actix_web::web;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::PgConnection;
use tracing::error;

use crate::ledger::{
    Appended, LedgerError, LedgerStore, NewEntry, NewTransfer, Page, PageRequest, PointsTransaction,
    WithdrawalRecord, WithdrawalStatus,
};
use crate::rules::SourceType;

pub mod connect;
pub mod models;
pub mod mutations;
pub mod queries;

pub use connect::DbPool;

impl From<diesel::result::Error> for LedgerError {
    fn from(e: diesel::result::Error) -> Self {
        LedgerError::Storage(e.to_string())
    }
}

impl From<diesel::r2d2::PoolError> for LedgerError {
    fn from(e: diesel::r2d2::PoolError) -> Self {
        LedgerError::Storage(format!("connection pool: {e}"))
    }
}

#[derive(Clone)]
pub struct PgLedger {
    pool: DbPool,
}

impl PgLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    // runs blocking diesel work on the actix blocking pool
    async fn run<T, F>(&self, f: F) -> Result<T, LedgerError>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> Result<T, LedgerError> + Send + 'static,
    {
        let pool = self.pool.clone();
        web::block(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .unwrap_or_else(|e| {
            error!("{e}");
            Err(LedgerError::Storage(e.to_string()))
        })
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn append(&self, entry: NewEntry) -> Result<Appended, LedgerError> {
        self.run(move |conn| mutations::append(conn, entry)).await
    }

    async fn transfer(&self, transfer: NewTransfer) -> Result<(PointsTransaction, PointsTransaction), LedgerError> {
        self.run(move |conn| mutations::transfer(conn, &transfer)).await
    }

    async fn balance(&self, user_id: &str) -> Result<i64, LedgerError> {
        let user_id = user_id.to_string();
        self.run(move |conn| queries::balance(conn, &user_id)).await
    }

    async fn total_amount(&self, user_id: &str) -> Result<i64, LedgerError> {
        let user_id = user_id.to_string();
        self.run(move |conn| queries::total_amount(conn, &user_id)).await
    }

    async fn find_by_source(
        &self,
        user_id: &str,
        source_type: SourceType,
        source_id: &str,
    ) -> Result<Option<PointsTransaction>, LedgerError> {
        let user_id = user_id.to_string();
        let source_id = source_id.to_string();
        self.run(move |conn| queries::find_by_source(conn, &user_id, source_type, &source_id))
            .await
    }

    async fn history(&self, user_id: &str, page: PageRequest) -> Result<Page<PointsTransaction>, LedgerError> {
        let user_id = user_id.to_string();
        self.run(move |conn| queries::history(conn, &user_id, page)).await
    }

    async fn transactions_between(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PointsTransaction>, LedgerError> {
        let user_id = user_id.to_string();
        self.run(move |conn| queries::transactions_between(conn, &user_id, from, to))
            .await
    }

    async fn save_withdrawal(&self, withdrawal: &WithdrawalRecord) -> Result<(), LedgerError> {
        let withdrawal = withdrawal.clone();
        self.run(move |conn| mutations::save_withdrawal(conn, &withdrawal)).await
    }

    async fn update_withdrawal(
        &self,
        id: i64,
        status: WithdrawalStatus,
        debit_transaction_id: Option<i64>,
    ) -> Result<WithdrawalRecord, LedgerError> {
        self.run(move |conn| mutations::update_withdrawal(conn, id, status, debit_transaction_id))
            .await
    }

    async fn withdrawal(&self, id: i64) -> Result<Option<WithdrawalRecord>, LedgerError> {
        self.run(move |conn| queries::withdrawal(conn, id)).await
    }
}
