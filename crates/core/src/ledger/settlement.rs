//! Settlement planning: reduce net balances to a short list of transfers.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use serde::Serialize;
use splitledger_shared::types::{Money, UserId};

use super::balance::GroupBalances;
use super::error::LedgerError;

/// A suggested payment from a debtor to a creditor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transfer {
    /// Member who pays.
    pub from: UserId,
    /// Member who receives.
    pub to: UserId,
    /// Always positive.
    pub amount: Money,
}

/// Greedy largest-debtor/largest-creditor settlement planner.
///
/// Produces at most `members - 1` transfers. The plan is advisory; nothing
/// here touches the ledger.
pub struct SettlementPlanner;

impl SettlementPlanner {
    /// Plans transfers that bring every balance to zero.
    ///
    /// Ties on magnitude are broken by ascending member ID.
    pub fn plan(balances: &GroupBalances) -> Result<Vec<Transfer>, LedgerError> {
        balances.verify_zero_sum()?;
        let currency = balances.currency;

        // (magnitude, Reverse(member)): max-heap by size, lowest ID first on ties.
        let mut debtors = BinaryHeap::new();
        let mut creditors = BinaryHeap::new();
        for (member, balance) in &balances.balances {
            let magnitude = i128::from(balance.minor).unsigned_abs();
            if balance.is_negative() {
                debtors.push((magnitude, Reverse(*member)));
            } else if balance.is_positive() {
                creditors.push((magnitude, Reverse(*member)));
            }
        }

        let mut transfers = Vec::new();
        while let (Some((debt, Reverse(debtor))), Some((credit, Reverse(creditor)))) =
            (debtors.pop(), creditors.pop())
        {
            let amount = debt.min(credit);
            let minor = i64::try_from(amount).map_err(|_| LedgerError::Overflow)?;
            transfers.push(Transfer {
                from: debtor,
                to: creditor,
                amount: Money::new(minor, currency),
            });

            if debt > amount {
                debtors.push((debt - amount, Reverse(debtor)));
            }
            if credit > amount {
                creditors.push((credit - amount, Reverse(creditor)));
            }
        }

        Ok(transfers)
    }
}
