//! Property-based tests for balance derivation.
//!
//! Random histories of expenses, reversals and settlements always fold to
//! balances that sum to zero.

use std::collections::BTreeSet;

use chrono::Utc;
use proptest::prelude::*;
use splitledger_shared::types::{Currency, ExpenseId, Money, SettlementId, UserId};
use uuid::Uuid;

use super::balance::GroupBalances;
use super::reversal::ReversalService;
use super::split::{SplitInput, SplitValidator};
use super::types::{Expense, Group, GroupKind, LedgerEntry, SequencedEntry, Settlement};

#[derive(Debug, Clone)]
enum Op {
    Equal { payer: usize, total: i64 },
    Percentage { payer: usize, total: i64, first_pct: u32 },
    Settle { from: usize, to: usize, amount: i64 },
    ReverseLast,
}

fn op(members: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..members, 1i64..10_000_000).prop_map(|(payer, total)| Op::Equal { payer, total }),
        (0..members, 1i64..10_000_000, 0u32..=100)
            .prop_map(|(payer, total, first_pct)| Op::Percentage { payer, total, first_pct }),
        (0..members, 0..members, 1i64..1_000_000)
            .prop_map(|(from, to, amount)| Op::Settle { from, to, amount }),
        Just(Op::ReverseLast),
    ]
}

fn group(size: usize) -> (Group, Vec<UserId>) {
    let members: Vec<UserId> = (1..=size as u128)
        .map(|n| UserId::from_uuid(Uuid::from_u128(n)))
        .collect();
    let group = Group {
        id: splitledger_shared::types::GroupId::new(),
        name: "Goa Trip".into(),
        kind: GroupKind::Trip,
        admin: members[0],
        members: members.iter().copied().collect::<BTreeSet<_>>(),
        created_at: Utc::now(),
    };
    (group, members)
}

fn usd(minor: i64) -> Money {
    Money::new(minor, Currency::Usd)
}

fn expense(group: &Group, payer: UserId, total: i64, split: &SplitInput) -> Expense {
    let normalized = SplitValidator::validate(usd(total), split, &group.members).unwrap();
    Expense {
        id: ExpenseId::new(),
        group_id: group.id,
        payer,
        description: "Seafood Dinner".into(),
        total: usd(total),
        split_kind: normalized.kind,
        splits: normalized.splits,
        reverses: None,
        created_at: Utc::now(),
    }
}

/// Builds a valid history from random operations.
fn history(group: &Group, members: &[UserId], ops: &[Op]) -> Vec<LedgerEntry> {
    let mut entries = Vec::new();
    let mut last_expense: Option<Expense> = None;

    for op in ops {
        let entry = match op {
            Op::Equal { payer, total } => {
                let split = SplitInput::Equal { members: members.to_vec() };
                let e = expense(group, members[*payer], *total, &split);
                last_expense = Some(e.clone());
                LedgerEntry::Expense(e)
            }
            Op::Percentage { payer, total, first_pct } => {
                let mut percentages = vec![(members[0], *first_pct)];
                if members.len() > 1 {
                    percentages.push((members[1], 100 - first_pct));
                } else {
                    percentages[0].1 = 100;
                }
                let split = SplitInput::Percentage { percentages };
                let e = expense(group, members[*payer], *total, &split);
                last_expense = Some(e.clone());
                LedgerEntry::Expense(e)
            }
            Op::Settle { from, to, amount } => {
                if from == to {
                    continue;
                }
                LedgerEntry::Settlement(Settlement {
                    id: SettlementId::new(),
                    group_id: group.id,
                    from: members[*from],
                    to: members[*to],
                    amount: usd(*amount),
                    created_at: Utc::now(),
                })
            }
            Op::ReverseLast => {
                let Some(original) = last_expense.take() else {
                    continue;
                };
                LedgerEntry::Expense(
                    ReversalService::create_reversal(group, &original, group.admin).unwrap(),
                )
            }
        };
        entries.push(entry);
    }
    entries
}

fn fold(group: &Group, entries: &[LedgerEntry]) -> GroupBalances {
    let mut balances = GroupBalances::empty(group, Currency::Usd);
    for (i, entry) in entries.iter().enumerate() {
        let sequenced = SequencedEntry {
            sequence: i as u64 + 1,
            entry: entry.clone(),
        };
        balances.apply(&sequenced).unwrap();
    }
    balances
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Balances of any valid history sum to zero.
    #[test]
    fn prop_balances_sum_to_zero(
        (size, ops) in (1usize..=6).prop_flat_map(|n| (Just(n), prop::collection::vec(op(n), 0..40)))
    ) {
        let (group, members) = group(size);
        let entries = history(&group, &members, &ops);
        let balances = fold(&group, &entries);

        prop_assert_eq!(balances.residual(), 0);
        prop_assert!(balances.verify_zero_sum().is_ok());
        prop_assert_eq!(balances.balances.len(), size);
    }

    /// Folding in one pass or resuming from a prefix gives the same result.
    #[test]
    fn prop_incremental_fold_matches_full_fold(
        (ops, cut) in prop::collection::vec(op(4), 1..30).prop_flat_map(|ops| {
            let len = ops.len();
            (Just(ops), 0..=len)
        })
    ) {
        let (group, members) = group(4);
        let entries = history(&group, &members, &ops);
        let full = fold(&group, &entries);

        let cut = cut.min(entries.len());
        let mut partial = fold(&group, &entries[..cut]);
        for (i, entry) in entries.iter().enumerate().skip(cut) {
            partial
                .apply(&SequencedEntry { sequence: i as u64 + 1, entry: entry.clone() })
                .unwrap();
        }
        prop_assert_eq!(partial, full);
    }
}
