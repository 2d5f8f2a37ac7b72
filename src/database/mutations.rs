use chrono::Utc;
use diesel::{Connection, ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl};

use crate::database::{models, queries};
use crate::idgen;
use crate::ledger::{
    Appended, LedgerError, NewEntry, NewTransfer, PointsTransaction, WithdrawalRecord, WithdrawalStatus,
};
use crate::rules::SourceType;

// creates the user's balance row, on conflict does nothing
fn init_user_balance(conn: &mut PgConnection, req_user_id: &str) -> Result<bool, LedgerError> {
    use crate::schema::points_balance::dsl::*;
    diesel::insert_into(points_balance)
        .values((user_id.eq(req_user_id), balance.eq(0i64), updated_at.eq(Utc::now())))
        .on_conflict(user_id)
        .do_nothing()
        .execute(conn)
        .map(|res| res > 0)
        .map_err(Into::into)
}

fn find_duplicate(conn: &mut PgConnection, entry: &NewEntry) -> Result<Option<PointsTransaction>, LedgerError> {
    let Some(req_source_id) = entry.source_id.as_deref() else {
        return Ok(None);
    };
    use crate::schema::points_transaction::dsl::*;
    points_transaction
        .filter(user_id.eq(&entry.user_id))
        .filter(source_type.eq(entry.source_type.as_str()))
        .filter(source_id.eq(req_source_id))
        .first::<models::Transaction>(conn)
        .optional()?
        .map(PointsTransaction::try_from)
        .transpose()
}

// writes the row and moves the balance; caller holds the balance row lock
fn record(conn: &mut PgConnection, entry: NewEntry, balance_before: i64) -> Result<PointsTransaction, LedgerError> {
    let balance_after = entry.apply_to(balance_before)?;
    let tx = PointsTransaction {
        id: idgen::next(),
        user_id: entry.user_id,
        transaction_type: entry.transaction_type,
        amount: entry.amount,
        source_type: entry.source_type,
        source_id: entry.source_id,
        content_id: entry.content_id,
        balance_before,
        balance_after,
        description: entry.description,
        metadata: entry.metadata,
        created_at: Utc::now(),
    };
    {
        use crate::schema::points_transaction::dsl::*;
        diesel::insert_into(points_transaction)
            .values(&models::NewTransaction::from(&tx))
            .execute(conn)?;
    }
    {
        use crate::schema::points_balance::dsl::*;
        diesel::update(points_balance.filter(user_id.eq(&tx.user_id)))
            .set((balance.eq(balance_after), updated_at.eq(tx.created_at)))
            .execute(conn)?;
    }
    Ok(tx)
}

// appends one entry under the user's balance row lock
pub fn append(conn: &mut PgConnection, entry: NewEntry) -> Result<Appended, LedgerError> {
    entry.validate()?;
    init_user_balance(conn, &entry.user_id)?;

    conn.transaction::<_, LedgerError, _>(|conn| {
        // load user balance record and lock for update
        let user_balance = {
            use crate::schema::points_balance::dsl::*;
            points_balance
                .filter(user_id.eq(&entry.user_id))
                .for_update()
                .first::<models::PointsBalance>(conn)?
        };
        // idempotency check
        if let Some(prior) = find_duplicate(conn, &entry)? {
            entry.check_redelivery(&prior)?;
            return Ok(Appended::Duplicate(prior));
        }
        record(conn, entry, user_balance.balance).map(Appended::New)
    })
}

pub fn transfer(
    conn: &mut PgConnection,
    transfer: &NewTransfer,
) -> Result<(PointsTransaction, PointsTransaction), LedgerError> {
    transfer.validate()?;
    init_user_balance(conn, &transfer.from_user_id)?;
    init_user_balance(conn, &transfer.to_user_id)?;
    let (debit, credit) = transfer.legs();

    conn.transaction::<_, LedgerError, _>(|conn| {
        // both rows locked in user id order
        let balances = {
            use crate::schema::points_balance::dsl::*;
            points_balance
                .filter(user_id.eq_any([&transfer.from_user_id, &transfer.to_user_id]))
                .order(user_id)
                .for_update()
                .load::<models::PointsBalance>(conn)?
        };
        let balance_of = |id: &str| {
            balances
                .iter()
                .find(|b| b.user_id == id)
                .map(|b| b.balance)
                .ok_or_else(|| LedgerError::Storage(format!("balance row for {id} is missing")))
        };
        let from_balance = balance_of(&transfer.from_user_id)?;
        let to_balance = balance_of(&transfer.to_user_id)?;

        let crossed = queries::find_by_source(conn, &transfer.from_user_id, SourceType::Transfer, &transfer.credit_key())?
            .is_some()
            || queries::find_by_source(conn, &transfer.to_user_id, SourceType::Transfer, &transfer.debit_key())?
                .is_some();
        let prior_debit = find_duplicate(conn, &debit)?;
        let prior_credit = find_duplicate(conn, &credit)?;
        if let Some(legs) = transfer.resolve_prior(prior_debit, prior_credit, crossed)? {
            return Ok(legs);
        }

        let debit = record(conn, debit, from_balance)?;
        let credit = record(conn, credit, to_balance)?;
        Ok((debit, credit))
    })
}

pub fn save_withdrawal(conn: &mut PgConnection, withdrawal: &WithdrawalRecord) -> Result<(), LedgerError> {
    use crate::schema::withdrawal_request::dsl::*;
    diesel::insert_into(withdrawal_request)
        .values(&models::Withdrawal::from(withdrawal))
        .execute(conn)?;
    Ok(())
}

pub fn update_withdrawal(
    conn: &mut PgConnection,
    req_id: i64,
    new_status: WithdrawalStatus,
    debit_id: Option<i64>,
) -> Result<WithdrawalRecord, LedgerError> {
    conn.transaction::<_, LedgerError, _>(|conn| {
        use crate::schema::withdrawal_request::dsl::*;
        let current: WithdrawalRecord = withdrawal_request
            .filter(id.eq(req_id))
            .for_update()
            .first::<models::Withdrawal>(conn)
            .optional()?
            .ok_or(LedgerError::WithdrawalNotFound(req_id))?
            .try_into()?;
        if current.status != new_status && !current.status.can_move_to(new_status) {
            return Err(LedgerError::InvalidStatusTransition {
                id: req_id,
                from: current.status,
                to: new_status,
            });
        }

        let row = diesel::update(withdrawal_request.filter(id.eq(req_id)))
            .set((
                status.eq(new_status.as_str()),
                debit_transaction_id.eq(debit_id.or(current.debit_transaction_id)),
                updated_at.eq(Utc::now()),
            ))
            .get_result::<models::Withdrawal>(conn)?;
        row.try_into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{connect, queries};
    use crate::ledger::TransactionType;

    fn pool() -> connect::DbPool {
        dotenvy::dotenv().ok();
        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = connect::create_db_connection_pool(&url).unwrap();
        connect::run_migrations(&pool).unwrap();
        pool
    }

    #[actix_web::test]
    #[ignore = "needs DATABASE_URL"]
    async fn test_append_is_idempotent() {
        let pool = pool();

        pool.get().unwrap().test_transaction::<_, LedgerError, _>(|conn| {
            let entry = NewEntry::new("pg_append", TransactionType::Earned, SourceType::Tips, 1).source_id("tip-1");
            let first = append(conn, entry.clone())?;
            assert!(!first.is_duplicate());
            assert_eq!(first.transaction().balance_after, 1);

            let second = append(conn, entry)?;
            assert!(second.is_duplicate());
            assert_eq!(second.transaction().id, first.transaction().id);
            assert_eq!(queries::balance(conn, "pg_append")?, 1);
            assert_eq!(queries::total_amount(conn, "pg_append")?, 1);

            let overdraw = NewEntry::new("pg_append", TransactionType::Spent, SourceType::Boost, -5).source_id("b-1");
            assert_eq!(
                append(conn, overdraw),
                Err(LedgerError::InsufficientBalance {
                    required: 5,
                    available: 1
                })
            );
            Ok(())
        });
    }

    #[actix_web::test]
    #[ignore = "needs DATABASE_URL"]
    async fn test_transfer_and_withdrawal_status() {
        let pool = pool();

        pool.get().unwrap().test_transaction::<_, LedgerError, _>(|conn| {
            append(
                conn,
                NewEntry::new("pg_from", TransactionType::Bonus, SourceType::Bonus, 100).source_id("seed"),
            )?;
            let transfer = NewTransfer {
                transfer_id: "pg-t1".to_string(),
                from_user_id: "pg_from".to_string(),
                to_user_id: "pg_to".to_string(),
                points: 60,
                description: None,
            };
            let (debit, credit) = super::transfer(conn, &transfer)?;
            assert_eq!(debit.balance_after, 40);
            assert_eq!(credit.balance_after, 60);
            let (again, _) = super::transfer(conn, &transfer)?;
            assert_eq!(again.id, debit.id);
            let reversed = NewTransfer {
                from_user_id: "pg_to".to_string(),
                to_user_id: "pg_from".to_string(),
                ..transfer.clone()
            };
            assert!(matches!(
                super::transfer(conn, &reversed),
                Err(LedgerError::InvalidEntry(_))
            ));

            let now = Utc::now();
            let record = WithdrawalRecord {
                id: idgen::next(),
                user_id: "pg_from".to_string(),
                amount: 5.into(),
                currency: "USD".to_string(),
                fee: "0.50".parse().unwrap(),
                net_amount: "4.50".parse().unwrap(),
                points: 500,
                payout_method: "bank_transfer".to_string(),
                payment_details: serde_json::json!({"accountNumber": "1"}),
                status: WithdrawalStatus::Pending,
                debit_transaction_id: None,
                created_at: now,
                updated_at: now,
            };
            save_withdrawal(conn, &record)?;
            let updated = update_withdrawal(conn, record.id, WithdrawalStatus::Processing, Some(debit.id))?;
            assert_eq!(updated.debit_transaction_id, Some(debit.id));
            assert!(matches!(
                update_withdrawal(conn, record.id, WithdrawalStatus::Pending, None),
                Err(LedgerError::InvalidStatusTransition { .. })
            ));
            Ok(())
        });
    }
}
