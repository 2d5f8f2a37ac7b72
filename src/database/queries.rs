use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Utc};
use diesel::dsl::sum;
use diesel::{ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl};

use crate::database::models;
use crate::ledger::{LedgerError, Page, PageRequest, PointsTransaction, WithdrawalRecord};
use crate::rules::SourceType;

fn into_transactions(rows: Vec<models::Transaction>) -> Result<Vec<PointsTransaction>, LedgerError> {
    rows.into_iter().map(PointsTransaction::try_from).collect()
}

pub fn balance(conn: &mut PgConnection, req_user_id: &str) -> Result<i64, LedgerError> {
    use crate::schema::points_balance::dsl::*;
    let row = points_balance
        .filter(user_id.eq(req_user_id))
        .first::<models::PointsBalance>(conn)
        .optional()?;
    Ok(row.map_or(0, |row| row.balance))
}

pub fn total_amount(conn: &mut PgConnection, req_user_id: &str) -> Result<i64, LedgerError> {
    use crate::schema::points_transaction::dsl::*;
    let total: Option<BigDecimal> = points_transaction
        .filter(user_id.eq(req_user_id))
        .select(sum(amount))
        .first(conn)?;
    total
        .unwrap_or_default()
        .to_i64()
        .ok_or_else(|| LedgerError::Storage(format!("transaction sum for {req_user_id} overflows")))
}

pub fn find_by_source(
    conn: &mut PgConnection,
    req_user_id: &str,
    req_source_type: SourceType,
    req_source_id: &str,
) -> Result<Option<PointsTransaction>, LedgerError> {
    use crate::schema::points_transaction::dsl::*;
    points_transaction
        .filter(user_id.eq(req_user_id))
        .filter(source_type.eq(req_source_type.as_str()))
        .filter(source_id.eq(req_source_id))
        .first::<models::Transaction>(conn)
        .optional()?
        .map(PointsTransaction::try_from)
        .transpose()
}

pub fn history(
    conn: &mut PgConnection,
    req_user_id: &str,
    page: PageRequest,
) -> Result<Page<PointsTransaction>, LedgerError> {
    use crate::schema::points_transaction::dsl::*;
    let limit = page.limit();
    let total: i64 = points_transaction
        .filter(user_id.eq(req_user_id))
        .count()
        .get_result(conn)?;
    let rows = points_transaction
        .filter(user_id.eq(req_user_id))
        .order((created_at.desc(), id.desc()))
        .limit(i64::from(limit))
        .offset(i64::try_from(page.offset()).unwrap_or(i64::MAX))
        .load::<models::Transaction>(conn)?;
    Ok(Page {
        items: into_transactions(rows)?,
        page: page.page,
        limit,
        total: total.max(0) as u64,
    })
}

pub fn transactions_between(
    conn: &mut PgConnection,
    req_user_id: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<PointsTransaction>, LedgerError> {
    use crate::schema::points_transaction::dsl::*;
    let rows = points_transaction
        .filter(user_id.eq(req_user_id))
        .filter(created_at.ge(from))
        .filter(created_at.lt(to))
        .order((created_at.asc(), id.asc()))
        .load::<models::Transaction>(conn)?;
    into_transactions(rows)
}

pub fn withdrawal(conn: &mut PgConnection, req_id: i64) -> Result<Option<WithdrawalRecord>, LedgerError> {
    use crate::schema::withdrawal_request::dsl::*;
    withdrawal_request
        .filter(id.eq(req_id))
        .first::<models::Withdrawal>(conn)
        .optional()?
        .map(WithdrawalRecord::try_from)
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{connect, mutations};
    use crate::ledger::{NewEntry, TransactionType};
    use diesel::Connection;

    #[actix_web::test]
    #[ignore = "needs DATABASE_URL"]
    async fn test_history_is_newest_first() {
        dotenvy::dotenv().ok();
        let pool = connect::create_db_connection_pool(&std::env::var("DATABASE_URL").unwrap()).unwrap();
        connect::run_migrations(&pool).unwrap();

        pool.get().unwrap().test_transaction::<_, LedgerError, _>(|conn| {
            for i in 0..3 {
                let entry =
                    NewEntry::new("pg_history", TransactionType::Earned, SourceType::Tips, 1).source_id(format!("tip-{i}"));
                mutations::append(conn, entry)?;
            }

            let page = history(conn, "pg_history", PageRequest::new(0, 2))?;
            assert_eq!(page.total, 3);
            assert_eq!(page.items.len(), 2);
            assert_eq!(page.items[0].balance_after, 3);
            assert_eq!(balance(conn, "pg_history")?, 3);
            assert_eq!(balance(conn, "pg_nobody")?, 0);
            assert!(find_by_source(conn, "pg_history", SourceType::Tips, "tip-0")?.is_some());
            Ok(())
        });
    }
}
