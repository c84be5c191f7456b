use std::collections::HashMap;

use serde::Serialize;

use super::{delta, format_cents, Account, AccountId, Cents, Transaction};

/// Recompute an account balance from zero: its opening balance plus every
/// posting recorded against it. Transactions for other accounts are ignored.
///
/// Returns `None` when the total does not fit in [`Cents`]. Intermediate sums
/// are widened, so the result never depends on the order of `transactions`.
pub fn replay_balance(account: &Account, transactions: &[Transaction]) -> Option<Cents> {
    let total = transactions
        .iter()
        .filter(|t| t.account_id == account.id)
        .fold(i128::from(account.opening_balance_cents), |balance, t| {
            balance + i128::from(delta(t.transaction_type, t.amount_cents))
        });
    Cents::try_from(total).ok()
}

/// Sum of signed postings per account, widened to `i128`.
pub fn sum_postings(transactions: &[Transaction]) -> HashMap<AccountId, i128> {
    let mut sums: HashMap<AccountId, i128> = HashMap::new();
    for t in transactions {
        let signed = i128::from(delta(t.transaction_type, t.amount_cents));
        *sums.entry(t.account_id).or_insert(0) += signed;
    }
    sums
}

/// An account whose cached balance disagrees with its transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceMismatch {
    pub account_id: AccountId,
    pub account_name: String,
    pub cached_cents: Cents,
    /// `None` when the replayed total is out of range
    pub replayed_cents: Option<Cents>,
}

impl std::fmt::Display for BalanceMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let replayed = match self.replayed_cents {
            Some(cents) => format_cents(cents),
            None => "an out-of-range total".to_string(),
        };
        write!(
            f,
            "{} ({}): cached {} but transactions replay to {}",
            self.account_name,
            self.account_id,
            format_cents(self.cached_cents),
            replayed
        )
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsistencyReport {
    pub account_count: usize,
    pub transaction_count: usize,
    pub mismatches: Vec<BalanceMismatch>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Compare each account's cached balance against a replay of `transactions`.
pub fn build_consistency_report(
    accounts: &[Account],
    transactions: &[Transaction],
) -> ConsistencyReport {
    let sums = sum_postings(transactions);

    let mismatches = accounts
        .iter()
        .filter_map(|account| {
            let total = i128::from(account.opening_balance_cents)
                + sums.get(&account.id).copied().unwrap_or(0);
            let replayed = Cents::try_from(total).ok();
            (replayed != Some(account.balance_cents)).then(|| BalanceMismatch {
                account_id: account.id,
                account_name: account.name.clone(),
                cached_cents: account.balance_cents,
                replayed_cents: replayed,
            })
        })
        .collect();

    ConsistencyReport {
        account_count: accounts.len(),
        transaction_count: transactions.len(),
        mismatches,
    }
}
