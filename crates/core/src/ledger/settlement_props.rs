//! Property-based tests for settlement planning.

use std::collections::BTreeMap;

use proptest::prelude::*;
use splitledger_shared::types::{Currency, GroupId, Money, UserId};
use uuid::Uuid;

use super::balance::GroupBalances;
use super::settlement::SettlementPlanner;

/// Strategy for zero-sum balances over 1..=10 members.
fn zero_sum_balances() -> impl Strategy<Value = GroupBalances> {
    prop::collection::vec(-1_000_000i64..1_000_000, 1..10).prop_map(|raw| {
        let closing: i64 = -raw.iter().sum::<i64>();
        let balances: BTreeMap<UserId, Money> = raw
            .into_iter()
            .chain(std::iter::once(closing))
            .enumerate()
            .map(|(i, minor)| {
                (
                    UserId::from_uuid(Uuid::from_u128(i as u128 + 1)),
                    Money::new(minor, Currency::Usd),
                )
            })
            .collect();
        GroupBalances {
            group_id: GroupId::new(),
            currency: Currency::Usd,
            as_of: 1,
            balances,
        }
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Applying the plan zeroes every balance.
    #[test]
    fn prop_plan_settles_everyone(balances in zero_sum_balances()) {
        let plan = SettlementPlanner::plan(&balances).unwrap();

        let mut remaining: BTreeMap<UserId, i64> = balances
            .balances
            .iter()
            .map(|(member, money)| (*member, money.minor))
            .collect();
        for transfer in &plan {
            *remaining.get_mut(&transfer.from).unwrap() += transfer.amount.minor;
            *remaining.get_mut(&transfer.to).unwrap() -= transfer.amount.minor;
        }
        prop_assert!(remaining.values().all(|b| *b == 0));
    }

    /// Every transfer is positive and there are at most `members - 1`.
    #[test]
    fn prop_plan_is_short_and_positive(balances in zero_sum_balances()) {
        let plan = SettlementPlanner::plan(&balances).unwrap();

        prop_assert!(plan.iter().all(|t| t.amount.is_positive()));
        prop_assert!(plan.iter().all(|t| t.from != t.to));
        prop_assert!(plan.len() < balances.balances.len().max(1));
    }

    /// The plan is a pure function of the balances.
    #[test]
    fn prop_plan_is_deterministic(balances in zero_sum_balances()) {
        prop_assert_eq!(
            SettlementPlanner::plan(&balances).unwrap(),
            SettlementPlanner::plan(&balances).unwrap()
        );
    }
}
