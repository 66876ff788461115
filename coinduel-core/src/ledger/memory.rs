use crate::error::{CoreError, Result};
use crate::ledger::LedgerProvider;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

/// In-process ledger backed by a plain map. Used by the demo CLI and by
/// tests; a real host registers providers that talk to its own economy.
pub struct MemoryLedger {
    display_name: String,
    balances: RwLock<HashMap<Uuid, u64>>,
}

impl MemoryLedger {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            balances: RwLock::new(HashMap::new()),
        }
    }

    pub fn credit(&self, account: Uuid, amount: u64) {
        let mut balances = self.balances.write();
        *balances.entry(account).or_insert(0) += amount;
    }
}

#[async_trait]
impl LedgerProvider for MemoryLedger {
    async fn balance(&self, account: Uuid) -> Result<u64> {
        Ok(self.balances.read().get(&account).copied().unwrap_or(0))
    }

    async fn withdraw(&self, account: Uuid, amount: u64) -> Result<()> {
        let mut balances = self.balances.write();
        let balance = balances.entry(account).or_insert(0);

        if *balance < amount {
            return Err(CoreError::InsufficientFunds {
                need: amount,
                available: *balance,
            });
        }

        *balance -= amount;
        Ok(())
    }

    async fn deposit(&self, account: Uuid, amount: u64) -> Result<()> {
        let mut balances = self.balances.write();
        *balances.entry(account).or_insert(0) += amount;
        Ok(())
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn withdraw_and_deposit_round_trip() {
        let ledger = MemoryLedger::new("Gold");
        let account = Uuid::new_v4();

        ledger.credit(account, 500);
        assert_eq!(ledger.balance(account).await.unwrap(), 500);

        ledger.withdraw(account, 200).await.unwrap();
        assert_eq!(ledger.balance(account).await.unwrap(), 300);

        ledger.deposit(account, 50).await.unwrap();
        assert_eq!(ledger.balance(account).await.unwrap(), 350);
    }

    #[tokio::test]
    async fn overdraw_is_rejected() {
        let ledger = MemoryLedger::new("Gold");
        let account = Uuid::new_v4();
        ledger.credit(account, 100);

        let err = ledger.withdraw(account, 101).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::InsufficientFunds {
                need: 101,
                available: 100
            }
        ));
        // balance untouched on failed withdraw
        assert_eq!(ledger.balance(account).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn unknown_account_has_zero_balance() {
        let ledger = MemoryLedger::new("Gold");
        assert_eq!(ledger.balance(Uuid::new_v4()).await.unwrap(), 0);
    }
}
