use crate::ledger::{LedgerError, LedgerStore};

/// Per-session view of the signed-in user's points.
///
/// Lives as long as the session that owns it and is handed around by reference; logging out
/// drops both the identity and anything cached for it.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PointsSession {
    user_id: Option<String>,
    cached_balance: Option<i64>,
}

impl PointsSession {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_user(user_id: &str) -> Self {
        let mut session = Self::default();
        session.login(user_id);
        session
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn login(&mut self, user_id: &str) {
        if self.user_id.as_deref() != Some(user_id) {
            self.cached_balance = None;
        }
        self.user_id = Some(user_id.to_string());
    }

    pub fn logout(&mut self) {
        self.user_id = None;
        self.cached_balance = None;
    }

    pub fn invalidate(&mut self) {
        self.cached_balance = None;
    }

    pub fn cached_balance(&self) -> Option<i64> {
        self.cached_balance
    }

    /// Cached balance, loading it from the ledger on first use. `None` when signed out.
    pub async fn balance(&mut self, ledger: &dyn LedgerStore) -> Result<Option<i64>, LedgerError> {
        let Some(user_id) = self.user_id.as_deref() else {
            return Ok(None);
        };
        if let Some(balance) = self.cached_balance {
            return Ok(Some(balance));
        }
        let balance = ledger.balance(user_id).await?;
        self.cached_balance = Some(balance);
        Ok(Some(balance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{MemoryLedger, NewEntry, TransactionType};
    use crate::rules::SourceType;

    #[actix_web::test]
    async fn test_balance_is_cached_until_invalidated() {
        let ledger = MemoryLedger::new();
        let mut session = PointsSession::for_user("lena");

        assert_eq!(session.balance(&ledger).await.unwrap(), Some(0));

        ledger
            .append(NewEntry::new("lena", TransactionType::Earned, SourceType::Tips, 3))
            .await
            .unwrap();
        assert_eq!(session.balance(&ledger).await.unwrap(), Some(0));

        session.invalidate();
        assert_eq!(session.balance(&ledger).await.unwrap(), Some(3));
    }

    #[actix_web::test]
    async fn test_logout_clears_identity_and_cache() {
        let ledger = MemoryLedger::new();
        let mut session = PointsSession::for_user("milo");
        session.balance(&ledger).await.unwrap();
        assert_eq!(session.cached_balance(), Some(0));

        session.logout();
        assert_eq!(session.user_id(), None);
        assert_eq!(session.cached_balance(), None);
        assert_eq!(session.balance(&ledger).await.unwrap(), None);

        let mut anon = PointsSession::anonymous();
        anon.login("nora");
        assert_eq!(anon.user_id(), Some("nora"));
    }
}
