//! Property-based tests for split validation.
//!
//! Every accepted split sums exactly to the total, and the equal split is a
//! function of the member set alone.

use std::collections::BTreeSet;

use proptest::prelude::*;
use splitledger_shared::types::{Currency, Money, UserId};
use uuid::Uuid;

use super::split::{SplitInput, SplitValidator};

/// Strategy for a group of 1..=12 distinct members in ascending order.
fn members() -> impl Strategy<Value = Vec<UserId>> {
    prop::collection::btree_set(any::<u128>(), 1..=12).prop_map(|ids| {
        ids.into_iter()
            .map(|n| UserId::from_uuid(Uuid::from_u128(n)))
            .collect()
    })
}

/// Strategy for a positive total up to 10,000,000.00.
fn total() -> impl Strategy<Value = i64> {
    1i64..1_000_000_000i64
}

/// Integer percentages for `n` members summing to 100.
fn percentages(n: usize) -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(0u32..=100, n).prop_map(|raw| {
        let mut remaining = 100u32;
        let mut out: Vec<u32> = raw
            .iter()
            .map(|p| {
                let take = (*p).min(remaining);
                remaining -= take;
                take
            })
            .collect();
        if let Some(last) = out.last_mut() {
            *last += remaining;
        }
        out
    })
}

fn usd(minor: i64) -> Money {
    Money::new(minor, Currency::Usd)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Equal splits sum to the total and differ by at most one unit.
    #[test]
    fn prop_equal_split_sums_to_total(members in members(), total in total()) {
        let group: BTreeSet<UserId> = members.iter().copied().collect();
        let input = SplitInput::Equal { members: members.clone() };
        let result = SplitValidator::validate(usd(total), &input, &group).unwrap();

        prop_assert_eq!(result.sum_minor(), i128::from(total));
        let max = result.splits.iter().map(|s| s.share.minor).max().unwrap();
        let min = result.splits.iter().map(|s| s.share.minor).min().unwrap();
        prop_assert!(max - min <= 1);
        // Larger shares come first in ascending member order.
        prop_assert!(result.splits.windows(2).all(|w| w[0].share.minor >= w[1].share.minor));
    }

    /// Input order does not change an equal split.
    #[test]
    fn prop_equal_split_is_deterministic(members in members(), total in total()) {
        let group: BTreeSet<UserId> = members.iter().copied().collect();
        let mut reversed = members.clone();
        reversed.reverse();

        let a = SplitValidator::validate(usd(total), &SplitInput::Equal { members }, &group).unwrap();
        let b = SplitValidator::validate(usd(total), &SplitInput::Equal { members: reversed }, &group).unwrap();
        prop_assert_eq!(a, b);
    }

    /// Percentage splits always sum to the total.
    #[test]
    fn prop_percentage_split_sums_to_total(
        (members, pcts) in members().prop_flat_map(|m| {
            let n = m.len();
            (Just(m), percentages(n))
        }),
        total in total(),
    ) {
        let group: BTreeSet<UserId> = members.iter().copied().collect();
        let input = SplitInput::Percentage {
            percentages: members.iter().copied().zip(pcts.iter().copied()).collect(),
        };
        let result = SplitValidator::validate(usd(total), &input, &group).unwrap();

        prop_assert_eq!(result.sum_minor(), i128::from(total));
        // Members with 0% never receive anything.
        for (split, pct) in result.splits.iter().zip(pcts.iter()) {
            if *pct == 0 {
                prop_assert_eq!(split.share.minor, 0);
            }
        }
    }

    /// Exact splits are accepted iff they sum to the total.
    #[test]
    fn prop_exact_split_accepts_only_matching_sum(
        members in members(),
        shares in prop::collection::vec(0i64..1_000_000, 12),
        delta in -5i64..=5,
    ) {
        let group: BTreeSet<UserId> = members.iter().copied().collect();
        let pairs: Vec<(UserId, Money)> = members
            .iter()
            .copied()
            .zip(shares.iter().map(|s| usd(*s)))
            .collect();
        let sum: i64 = pairs.iter().map(|(_, m)| m.minor).sum();
        let total = sum + delta;
        prop_assume!(total > 0);

        let result = SplitValidator::validate(usd(total), &SplitInput::Exact { shares: pairs }, &group);
        if delta == 0 {
            prop_assert_eq!(result.unwrap().sum_minor(), i128::from(total));
        } else {
            prop_assert!(result.is_err());
        }
    }
}
