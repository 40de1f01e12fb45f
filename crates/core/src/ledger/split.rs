//! Split validation and integer allocation.
//!
//! Every accepted split satisfies `sum(shares) == total` exactly. Rounding
//! leftovers are handed out one minor unit at a time, in ascending member ID
//! order, so the same input always yields the same shares.

use std::collections::{BTreeSet, HashSet};

use splitledger_shared::types::{Money, UserId};

use super::error::SplitError;
use super::types::{Split, SplitKind};

/// A proposed split as submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitInput {
    /// Divide evenly among these members.
    Equal {
        /// Participating members.
        members: Vec<UserId>,
    },
    /// Use these shares verbatim.
    Exact {
        /// Member shares.
        shares: Vec<(UserId, Money)>,
    },
    /// Divide by integer percentages.
    Percentage {
        /// Member percentages (sum must be 100).
        percentages: Vec<(UserId, u32)>,
    },
}

impl SplitInput {
    /// The split kind this input produces.
    #[must_use]
    pub const fn kind(&self) -> SplitKind {
        match self {
            Self::Equal { .. } => SplitKind::Equal,
            Self::Exact { .. } => SplitKind::Exact,
            Self::Percentage { .. } => SplitKind::Percentage,
        }
    }

    fn members(&self) -> Vec<UserId> {
        match self {
            Self::Equal { members } => members.clone(),
            Self::Exact { shares } => shares.iter().map(|(m, _)| *m).collect(),
            Self::Percentage { percentages } => percentages.iter().map(|(m, _)| *m).collect(),
        }
    }
}

/// A validated split, ordered by ascending member ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedSplits {
    /// The kind of the originating input.
    pub kind: SplitKind,
    /// Shares summing exactly to the total.
    pub splits: Vec<Split>,
}

impl NormalizedSplits {
    /// Sum of all shares in minor units.
    #[must_use]
    pub fn sum_minor(&self) -> i128 {
        self.splits.iter().map(|s| i128::from(s.share.minor)).sum()
    }
}

/// Stateless validator for proposed splits.
pub struct SplitValidator;

impl SplitValidator {
    /// Validates `input` against `total` and the group's members.
    ///
    /// Checks run in this order: positive total, non-empty, membership,
    /// duplicates, then the kind-specific rules.
    pub fn validate(
        total: Money,
        input: &SplitInput,
        group_members: &BTreeSet<UserId>,
    ) -> Result<NormalizedSplits, SplitError> {
        if !total.is_positive() {
            return Err(SplitError::InvalidAmount);
        }

        let members = input.members();
        if members.is_empty() {
            return Err(SplitError::EmptySplit);
        }

        if let Some(unknown) = members.iter().find(|m| !group_members.contains(m)) {
            return Err(SplitError::UnknownMember(*unknown));
        }

        let mut seen = HashSet::with_capacity(members.len());
        if let Some(duplicate) = members.iter().find(|m| !seen.insert(**m)) {
            return Err(SplitError::DuplicateMember(*duplicate));
        }

        let mut splits = match input {
            SplitInput::Equal { members } => Self::equal(total, members)?,
            SplitInput::Exact { shares } => Self::exact(total, shares)?,
            SplitInput::Percentage { percentages } => Self::percentage(total, percentages)?,
        };
        splits.sort_by_key(|s| s.member);

        Ok(NormalizedSplits {
            kind: input.kind(),
            splits,
        })
    }

    fn equal(total: Money, members: &[UserId]) -> Result<Vec<Split>, SplitError> {
        let mut ordered = members.to_vec();
        ordered.sort_unstable();

        let shares = allocate_equal(total.minor, ordered.len()).ok_or(SplitError::InvalidAmount)?;
        Ok(ordered
            .into_iter()
            .zip(shares)
            .map(|(member, minor)| Split {
                member,
                share: Money::new(minor, total.currency),
            })
            .collect())
    }

    fn exact(total: Money, shares: &[(UserId, Money)]) -> Result<Vec<Split>, SplitError> {
        for (member, share) in shares {
            if share.currency != total.currency {
                return Err(SplitError::CurrencyMismatch {
                    expected: total.currency,
                    actual: share.currency,
                });
            }
            if share.is_negative() {
                return Err(SplitError::NegativeShare(*member));
            }
        }

        let sum: i128 = shares.iter().map(|(_, s)| i128::from(s.minor)).sum();
        let discrepancy = sum - i128::from(total.minor);
        if discrepancy != 0 {
            return Err(SplitError::SplitMismatch {
                discrepancy: clamp_to_i64(discrepancy),
            });
        }

        Ok(shares
            .iter()
            .map(|(member, share)| Split {
                member: *member,
                share: *share,
            })
            .collect())
    }

    fn percentage(
        total: Money,
        percentages: &[(UserId, u32)],
    ) -> Result<Vec<Split>, SplitError> {
        let percent_sum = percentages
            .iter()
            .try_fold(0u32, |acc, (_, p)| if *p > 100 { None } else { acc.checked_add(*p) });
        match percent_sum {
            Some(100) => {}
            Some(other) => return Err(SplitError::InvalidPercentage { total: other }),
            None => {
                let saturated = percentages
                    .iter()
                    .fold(0u32, |acc, (_, p)| acc.saturating_add(*p));
                return Err(SplitError::InvalidPercentage { total: saturated });
            }
        }

        let mut ordered = percentages.to_vec();
        ordered.sort_unstable_by_key(|(member, _)| *member);

        let weights: Vec<u32> = ordered.iter().map(|(_, p)| *p).collect();
        let shares =
            allocate_by_percentages(total.minor, &weights).ok_or(SplitError::InvalidAmount)?;

        Ok(ordered
            .into_iter()
            .zip(shares)
            .map(|((member, _), minor)| Split {
                member,
                share: Money::new(minor, total.currency),
            })
            .collect())
    }
}

/// Divides `total` minor units into `count` near-equal shares.
///
/// The first `total % count` shares receive one extra unit. Returns `None`
/// when `count` is zero.
#[must_use]
pub fn allocate_equal(total: i64, count: usize) -> Option<Vec<i64>> {
    let n = i64::try_from(count).ok().filter(|n| *n > 0)?;
    let base = total.div_euclid(n);
    let remainder = usize::try_from(total.rem_euclid(n)).ok()?;

    Some(
        (0..count)
            .map(|i| if i < remainder { base + 1 } else { base })
            .collect(),
    )
}

/// Divides `total` by integer percentages (summing to 100).
///
/// Each share is floored; the leftover units go one each to the earliest
/// entries with a non-zero percentage.
#[must_use]
pub fn allocate_by_percentages(total: i64, percentages: &[u32]) -> Option<Vec<i64>> {
    if percentages.is_empty() {
        return None;
    }

    let total_wide = i128::from(total);
    let mut shares = percentages
        .iter()
        .map(|p| i64::try_from((total_wide * i128::from(*p)).div_euclid(100)).ok())
        .collect::<Option<Vec<i64>>>()?;

    let allocated: i128 = shares.iter().map(|s| i128::from(*s)).sum();
    let leftover = usize::try_from(total_wide - allocated).ok()?;

    let eligible: Vec<usize> = percentages
        .iter()
        .enumerate()
        .filter(|(_, p)| **p > 0)
        .map(|(i, _)| i)
        .collect();
    if leftover > 0 && eligible.is_empty() {
        return None;
    }

    for idx in eligible.iter().cycle().take(leftover) {
        if let Some(share) = shares.get_mut(*idx) {
            *share += 1;
        }
    }

    Some(shares)
}

fn clamp_to_i64(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX })
}
