use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex as AsyncMutex;

use super::{
    Appended, LedgerError, LedgerStore, NewEntry, NewTransfer, Page, PageRequest, PointsTransaction,
    WithdrawalRecord, WithdrawalStatus,
};
use crate::idgen;
use crate::rules::SourceType;

#[derive(Debug, Default)]
struct UserLedger {
    balance: i64,
    // insertion order is created_at order
    transactions: Vec<PointsTransaction>,
    by_source: HashMap<(SourceType, String), usize>,
}

impl UserLedger {
    fn find(&self, source_type: SourceType, source_id: &str) -> Option<&PointsTransaction> {
        self.by_source
            .get(&(source_type, source_id.to_string()))
            .map(|idx| &self.transactions[*idx])
    }

    fn duplicate_of(&self, entry: &NewEntry) -> Option<PointsTransaction> {
        entry
            .source_id
            .as_deref()
            .and_then(|source_id| self.find(entry.source_type, source_id))
            .cloned()
    }

    fn record(&mut self, entry: NewEntry, balance_after: i64) -> PointsTransaction {
        let now = Utc::now();
        let created_at = match self.transactions.last() {
            Some(last) if last.created_at > now => last.created_at,
            _ => now,
        };
        let tx = PointsTransaction {
            id: idgen::next(),
            user_id: entry.user_id,
            transaction_type: entry.transaction_type,
            amount: entry.amount,
            source_type: entry.source_type,
            source_id: entry.source_id,
            content_id: entry.content_id,
            balance_before: self.balance,
            balance_after,
            description: entry.description,
            metadata: entry.metadata,
            created_at,
        };
        if let Some(source_id) = &tx.source_id {
            self.by_source
                .insert((tx.source_type, source_id.clone()), self.transactions.len());
        }
        self.balance = balance_after;
        self.transactions.push(tx.clone());
        tx
    }

    fn append(&mut self, entry: NewEntry) -> Result<Appended, LedgerError> {
        if let Some(prior) = self.duplicate_of(&entry) {
            entry.check_redelivery(&prior)?;
            return Ok(Appended::Duplicate(prior));
        }
        let balance_after = entry.apply_to(self.balance)?;
        Ok(Appended::New(self.record(entry, balance_after)))
    }
}

/// In-process ledger. Each user's history sits behind its own async mutex, so writes for
/// one user serialize while different users proceed in parallel.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    users: Mutex<HashMap<String, Arc<AsyncMutex<UserLedger>>>>,
    withdrawals: AsyncMutex<HashMap<i64, WithdrawalRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn user(&self, user_id: &str) -> Arc<AsyncMutex<UserLedger>> {
        let mut users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        users.entry(user_id.to_string()).or_default().clone()
    }

    fn existing_user(&self, user_id: &str) -> Option<Arc<AsyncMutex<UserLedger>>> {
        let users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        users.get(user_id).cloned()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn append(&self, entry: NewEntry) -> Result<Appended, LedgerError> {
        entry.validate()?;
        let user = self.user(&entry.user_id);
        let mut ledger = user.lock().await;
        ledger.append(entry)
    }

    async fn transfer(&self, transfer: NewTransfer) -> Result<(PointsTransaction, PointsTransaction), LedgerError> {
        transfer.validate()?;
        let (debit, credit) = transfer.legs();
        let from = self.user(&transfer.from_user_id);
        let to = self.user(&transfer.to_user_id);

        // lock in user id order so two opposite transfers cannot deadlock
        let from_first = transfer.from_user_id < transfer.to_user_id;
        let (first, second) = if from_first { (&from, &to) } else { (&to, &from) };
        let mut first = first.lock().await;
        let mut second = second.lock().await;
        let (from_ledger, to_ledger) = if from_first {
            (&mut *first, &mut *second)
        } else {
            (&mut *second, &mut *first)
        };

        let crossed = from_ledger.find(SourceType::Transfer, &transfer.credit_key()).is_some()
            || to_ledger.find(SourceType::Transfer, &transfer.debit_key()).is_some();
        if let Some(legs) =
            transfer.resolve_prior(from_ledger.duplicate_of(&debit), to_ledger.duplicate_of(&credit), crossed)?
        {
            return Ok(legs);
        }

        let debit_after = debit.apply_to(from_ledger.balance)?;
        let credit_after = credit.apply_to(to_ledger.balance)?;
        let debit = from_ledger.record(debit, debit_after);
        let credit = to_ledger.record(credit, credit_after);
        Ok((debit, credit))
    }

    async fn balance(&self, user_id: &str) -> Result<i64, LedgerError> {
        match self.existing_user(user_id) {
            Some(user) => {
                let ledger = user.lock().await;
                Ok(ledger.transactions.last().map_or(0, |tx| tx.balance_after))
            }
            None => Ok(0),
        }
    }

    async fn total_amount(&self, user_id: &str) -> Result<i64, LedgerError> {
        match self.existing_user(user_id) {
            Some(user) => {
                let ledger = user.lock().await;
                Ok(ledger.transactions.iter().map(|tx| tx.amount).sum())
            }
            None => Ok(0),
        }
    }

    async fn find_by_source(
        &self,
        user_id: &str,
        source_type: SourceType,
        source_id: &str,
    ) -> Result<Option<PointsTransaction>, LedgerError> {
        match self.existing_user(user_id) {
            Some(user) => {
                let ledger = user.lock().await;
                Ok(ledger.find(source_type, source_id).cloned())
            }
            None => Ok(None),
        }
    }

    async fn history(&self, user_id: &str, page: PageRequest) -> Result<Page<PointsTransaction>, LedgerError> {
        let limit = page.limit();
        let (items, total) = match self.existing_user(user_id) {
            Some(user) => {
                let ledger = user.lock().await;
                let items = ledger
                    .transactions
                    .iter()
                    .rev()
                    .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
                    .take(limit as usize)
                    .cloned()
                    .collect();
                (items, ledger.transactions.len() as u64)
            }
            None => (Vec::new(), 0),
        };
        Ok(Page {
            items,
            page: page.page,
            limit,
            total,
        })
    }

    async fn transactions_between(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PointsTransaction>, LedgerError> {
        match self.existing_user(user_id) {
            Some(user) => {
                let ledger = user.lock().await;
                Ok(ledger
                    .transactions
                    .iter()
                    .filter(|tx| tx.created_at >= from && tx.created_at < to)
                    .cloned()
                    .collect())
            }
            None => Ok(Vec::new()),
        }
    }

    async fn save_withdrawal(&self, withdrawal: &WithdrawalRecord) -> Result<(), LedgerError> {
        let mut withdrawals = self.withdrawals.lock().await;
        if withdrawals.contains_key(&withdrawal.id) {
            return Err(LedgerError::InvalidEntry(format!("withdrawal {} already exists", withdrawal.id)));
        }
        withdrawals.insert(withdrawal.id, withdrawal.clone());
        Ok(())
    }

    async fn update_withdrawal(
        &self,
        id: i64,
        status: WithdrawalStatus,
        debit_transaction_id: Option<i64>,
    ) -> Result<WithdrawalRecord, LedgerError> {
        let mut withdrawals = self.withdrawals.lock().await;
        let record = withdrawals.get_mut(&id).ok_or(LedgerError::WithdrawalNotFound(id))?;
        if record.status != status && !record.status.can_move_to(status) {
            return Err(LedgerError::InvalidStatusTransition {
                id,
                from: record.status,
                to: status,
            });
        }
        record.status = status;
        if debit_transaction_id.is_some() {
            record.debit_transaction_id = debit_transaction_id;
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn withdrawal(&self, id: i64) -> Result<Option<WithdrawalRecord>, LedgerError> {
        let withdrawals = self.withdrawals.lock().await;
        Ok(withdrawals.get(&id).cloned())
    }
}
