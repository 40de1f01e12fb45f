//! Reversing expenses.
//!
//! Expenses are never edited. A correction appends a reversal: a new expense
//! with the total and every share negated, linked to the original through
//! `reverses`.

use chrono::Utc;
use splitledger_shared::types::{ExpenseId, UserId};

use super::error::LedgerError;
use super::types::{Expense, Group, Split};

/// Stateless builder for reversing expenses.
pub struct ReversalService;

impl ReversalService {
    /// Builds the reversal of `original` requested by `actor`.
    ///
    /// Only the original payer or the group admin may reverse. Whether the
    /// expense was already reversed is checked by the store at append time.
    pub fn create_reversal(
        group: &Group,
        original: &Expense,
        actor: UserId,
    ) -> Result<Expense, LedgerError> {
        if !group.is_member(actor) {
            return Err(LedgerError::NotAMember(actor));
        }
        if actor != original.payer && actor != group.admin {
            return Err(LedgerError::ReversalNotPermitted(actor));
        }
        if original.is_reversal() {
            return Err(LedgerError::CannotReverseReversal(original.id));
        }

        let splits = original
            .splits
            .iter()
            .map(|split| {
                Ok::<_, LedgerError>(Split {
                    member: split.member,
                    share: split.share.checked_neg()?,
                })
            })
            .collect::<Result<Vec<_>, LedgerError>>()?;

        Ok(Expense {
            id: ExpenseId::new(),
            group_id: original.group_id,
            payer: original.payer,
            description: format!("Reversal: {}", original.description),
            total: original.total.checked_neg()?,
            split_kind: original.split_kind,
            splits,
            reverses: Some(original.id),
            created_at: Utc::now(),
        })
    }
}
