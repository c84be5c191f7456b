use thiserror::Error;

use super::{Account, AccountId, Cents, Posting, TransactionType};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BalanceError {
    #[error("balance of account {0} would overflow")]
    Overflow(AccountId),

    #[error("posting for account {posting} applied to account {account}")]
    WrongAccount {
        account: AccountId,
        posting: AccountId,
    },
}

/// Signed balance effect of a transaction: income adds, expense subtracts.
pub fn delta(transaction_type: TransactionType, amount_cents: Cents) -> Cents {
    match transaction_type {
        TransactionType::Income => amount_cents,
        TransactionType::Expense => -amount_cents,
    }
}

impl Account {
    /// Add the effect of a transaction to the cached balance.
    /// On error the balance is left untouched.
    pub fn apply(
        &mut self,
        transaction_type: TransactionType,
        amount_cents: Cents,
    ) -> Result<(), BalanceError> {
        self.balance_cents = self
            .balance_cents
            .checked_add(delta(transaction_type, amount_cents))
            .ok_or(BalanceError::Overflow(self.id))?;
        Ok(())
    }

    /// Exact inverse of [`Account::apply`].
    pub fn reverse(
        &mut self,
        transaction_type: TransactionType,
        amount_cents: Cents,
    ) -> Result<(), BalanceError> {
        self.balance_cents = self
            .balance_cents
            .checked_sub(delta(transaction_type, amount_cents))
            .ok_or(BalanceError::Overflow(self.id))?;
        Ok(())
    }

    pub fn apply_posting(&mut self, posting: &Posting) -> Result<(), BalanceError> {
        self.check_owns(posting)?;
        self.apply(posting.transaction_type, posting.amount_cents)
    }

    pub fn reverse_posting(&mut self, posting: &Posting) -> Result<(), BalanceError> {
        self.check_owns(posting)?;
        self.reverse(posting.transaction_type, posting.amount_cents)
    }

    fn check_owns(&self, posting: &Posting) -> Result<(), BalanceError> {
        if posting.account_id != self.id {
            return Err(BalanceError::WrongAccount {
                account: self.id,
                posting: posting.account_id,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::domain::AccountType;

    fn account_with(balance_cents: Cents) -> Account {
        Account::new(Uuid::new_v4(), "Checking".into(), AccountType::Bank, balance_cents)
    }

    #[test]
    fn test_delta_sign_follows_type() {
        assert_eq!(delta(TransactionType::Income, 5000), 5000);
        assert_eq!(delta(TransactionType::Expense, 5000), -5000);
        assert_eq!(delta(TransactionType::Expense, 0), 0);
    }

    #[test]
    fn test_apply_then_reverse_restores_balance() {
        for start in [0, 1, -999, 10000, 123456789] {
            for amount in [0, 1, 99, 1001, 5000, 99999999] {
                for kind in [TransactionType::Income, TransactionType::Expense] {
                    let mut account = account_with(start);
                    account.apply(kind, amount).unwrap();
                    account.reverse(kind, amount).unwrap();
                    assert_eq!(account.balance_cents, start);
                }
            }
        }
    }

    #[test]
    fn test_income_then_update_to_expense_then_delete() {
        let mut account = account_with(10000);

        account.apply(TransactionType::Income, 5000).unwrap();
        assert_eq!(account.balance_cents, 15000);

        account.reverse(TransactionType::Income, 5000).unwrap();
        account.apply(TransactionType::Expense, 3000).unwrap();
        assert_eq!(account.balance_cents, 7000);

        account.reverse(TransactionType::Expense, 3000).unwrap();
        assert_eq!(account.balance_cents, 10000);
    }

    #[test]
    fn test_overflow_leaves_balance_untouched() {
        let mut account = account_with(Cents::MAX - 10);
        let result = account.apply(TransactionType::Income, 11);
        assert_eq!(result, Err(BalanceError::Overflow(account.id)));
        assert_eq!(account.balance_cents, Cents::MAX - 10);
    }

    #[test]
    fn test_posting_for_other_account_is_rejected() {
        let mut account = account_with(0);
        let posting = Posting {
            account_id: Uuid::new_v4(),
            transaction_type: TransactionType::Income,
            amount_cents: 100,
        };
        assert!(matches!(
            account.apply_posting(&posting),
            Err(BalanceError::WrongAccount { .. })
        ));
        assert_eq!(account.balance_cents, 0);
    }
}
