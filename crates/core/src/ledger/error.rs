//! Ledger error types for validation, consistency and contention errors.
//!
//! Validation errors are caller-correctable. Consistency errors mean the
//! caller's view of the group is stale and it should refresh and retry.
//! Contention errors are retriable with backoff.

use splitledger_shared::types::{Currency, ExpenseId, GroupId, MoneyError, UserId};
use thiserror::Error;

/// Errors produced while validating a proposed split.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitError {
    /// The expense total must be positive.
    #[error("Expense amount must be positive")]
    InvalidAmount,

    /// No members were proposed.
    #[error("Split must include at least one member")]
    EmptySplit,

    /// A proposed member is not in the group.
    #[error("User {0} is not a member of this group")]
    UnknownMember(UserId),

    /// A member appears more than once.
    #[error("User {0} appears more than once in the split")]
    DuplicateMember(UserId),

    /// An exact share is negative.
    #[error("Share for user {0} cannot be negative")]
    NegativeShare(UserId),

    /// An amount is not in the ledger currency.
    #[error("Expected amounts in {expected}, got {actual}")]
    CurrencyMismatch {
        /// The ledger currency.
        expected: Currency,
        /// The currency supplied.
        actual: Currency,
    },

    /// Exact shares do not add up to the total.
    #[error("Shares do not sum to the total (off by {discrepancy} minor units)")]
    SplitMismatch {
        /// `sum(shares) - total`, in minor units.
        discrepancy: i64,
    },

    /// Percentages are out of range or do not add up to 100.
    #[error("Percentages must be between 0 and 100 and sum to 100, got {total}")]
    InvalidPercentage {
        /// The sum of the supplied percentages.
        total: u32,
    },
}

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    // ========== Validation Errors ==========
    /// The proposed split was rejected.
    #[error(transparent)]
    Split(#[from] SplitError),

    /// The settlement violates a settlement rule.
    #[error("Invalid settlement: {0}")]
    InvalidSettlement(String),

    /// The group definition is invalid.
    #[error("Invalid group: {0}")]
    InvalidGroup(String),

    /// Applying the entry would push a member's balance out of range.
    #[error("Balance of user {0} would exceed the representable range")]
    BalanceOutOfRange(UserId),

    // ========== Consistency Errors ==========
    /// Group not found.
    #[error("Group not found: {0}")]
    UnknownGroup(GroupId),

    /// A participant is not a current member at append time.
    #[error("User {0} is no longer a member of this group")]
    StaleMembership(UserId),

    /// Expense not found in the group.
    #[error("Expense not found: {0}")]
    ExpenseNotFound(ExpenseId),

    /// The expense already has a reversal.
    #[error("Expense {0} has already been reversed")]
    AlreadyReversed(ExpenseId),

    /// Reversals cannot be reversed; record a new expense instead.
    #[error("Expense {0} is a reversal and cannot be reversed")]
    CannotReverseReversal(ExpenseId),

    // ========== Access Errors ==========
    /// The caller is not a member of the group.
    #[error("User {0} is not a member of this group")]
    NotAMember(UserId),

    /// Only the payer or the group admin may reverse an expense.
    #[error("User {0} may not reverse this expense")]
    ReversalNotPermitted(UserId),

    // ========== Contention Errors ==========
    /// The group's append lock could not be acquired in time.
    #[error("Timed out waiting to write to group {0}, please retry")]
    ContentionTimeout(GroupId),

    // ========== Integrity Errors ==========
    /// Derived balances do not sum to zero.
    #[error("Ledger corruption: balances are off by {residual} minor units")]
    LedgerCorruption {
        /// Sum of all balances, in minor units.
        residual: i128,
    },

    /// An amount left the representable range.
    #[error("Amount overflow")]
    Overflow,

    // ========== Storage Errors ==========
    /// Backing store failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<MoneyError> for LedgerError {
    fn from(err: MoneyError) -> Self {
        match err {
            MoneyError::CurrencyMismatch { left, right } => Self::Split(SplitError::CurrencyMismatch {
                expected: left,
                actual: right,
            }),
            MoneyError::Overflow => Self::Overflow,
            MoneyError::TooPrecise { .. } | MoneyError::Parse(_) => {
                Self::Split(SplitError::InvalidAmount)
            }
        }
    }
}

impl SplitError {
    /// Returns the error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidAmount => "INVALID_AMOUNT",
            Self::EmptySplit => "EMPTY_SPLIT",
            Self::UnknownMember(_) => "UNKNOWN_MEMBER",
            Self::DuplicateMember(_) => "DUPLICATE_MEMBER",
            Self::NegativeShare(_) => "NEGATIVE_SHARE",
            Self::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            Self::SplitMismatch { .. } => "SPLIT_MISMATCH",
            Self::InvalidPercentage { .. } => "INVALID_PERCENTAGE",
        }
    }
}

impl LedgerError {
    /// Returns the error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Split(split) => split.error_code(),
            Self::InvalidSettlement(_) => "INVALID_SETTLEMENT",
            Self::InvalidGroup(_) => "INVALID_GROUP",
            Self::BalanceOutOfRange(_) => "BALANCE_OUT_OF_RANGE",
            Self::UnknownGroup(_) => "UNKNOWN_GROUP",
            Self::StaleMembership(_) => "STALE_MEMBERSHIP",
            Self::ExpenseNotFound(_) => "EXPENSE_NOT_FOUND",
            Self::AlreadyReversed(_) => "ALREADY_REVERSED",
            Self::CannotReverseReversal(_) => "CANNOT_REVERSE_REVERSAL",
            Self::NotAMember(_) => "NOT_A_MEMBER",
            Self::ReversalNotPermitted(_) => "REVERSAL_NOT_PERMITTED",
            Self::ContentionTimeout(_) => "CONTENTION_TIMEOUT",
            Self::LedgerCorruption { .. } => "LEDGER_CORRUPTION",
            Self::Overflow => "AMOUNT_OVERFLOW",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - validation errors
            Self::Split(_)
            | Self::InvalidSettlement(_)
            | Self::InvalidGroup(_)
            | Self::BalanceOutOfRange(_)
            | Self::CannotReverseReversal(_)
            | Self::Overflow => 400,

            // 403 Forbidden - access errors
            Self::NotAMember(_) | Self::ReversalNotPermitted(_) => 403,

            // 404 Not Found
            Self::UnknownGroup(_) | Self::ExpenseNotFound(_) => 404,

            // 409 Conflict - stale views and contention
            Self::StaleMembership(_) | Self::AlreadyReversed(_) | Self::ContentionTimeout(_) => 409,

            // 500 Internal Server Error
            Self::LedgerCorruption { .. } | Self::Storage(_) => 500,
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ContentionTimeout(_))
    }

    /// Returns true if the caller should refresh its view before retrying.
    #[must_use]
    pub const fn is_stale_view(&self) -> bool {
        matches!(self, Self::UnknownGroup(_) | Self::StaleMembership(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            LedgerError::Split(SplitError::EmptySplit).error_code(),
            "EMPTY_SPLIT"
        );
        assert_eq!(
            LedgerError::Split(SplitError::SplitMismatch { discrepancy: -1 }).error_code(),
            "SPLIT_MISMATCH"
        );
        assert_eq!(
            LedgerError::UnknownGroup(GroupId::new()).error_code(),
            "UNKNOWN_GROUP"
        );
        assert_eq!(
            LedgerError::ContentionTimeout(GroupId::new()).error_code(),
            "CONTENTION_TIMEOUT"
        );
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(
            LedgerError::Split(SplitError::UnknownMember(UserId::new())).http_status_code(),
            400
        );
        assert_eq!(LedgerError::NotAMember(UserId::new()).http_status_code(), 403);
        assert_eq!(LedgerError::UnknownGroup(GroupId::new()).http_status_code(), 404);
        assert_eq!(
            LedgerError::StaleMembership(UserId::new()).http_status_code(),
            409
        );
        assert_eq!(
            LedgerError::BalanceOutOfRange(UserId::new()).http_status_code(),
            400
        );
        assert_eq!(
            LedgerError::LedgerCorruption { residual: 1 }.http_status_code(),
            500
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(LedgerError::ContentionTimeout(GroupId::new()).is_retryable());
        assert!(!LedgerError::StaleMembership(UserId::new()).is_retryable());
        assert!(!LedgerError::Split(SplitError::EmptySplit).is_retryable());
    }

    #[test]
    fn test_stale_view_errors() {
        assert!(LedgerError::UnknownGroup(GroupId::new()).is_stale_view());
        assert!(LedgerError::StaleMembership(UserId::new()).is_stale_view());
        assert!(!LedgerError::ContentionTimeout(GroupId::new()).is_stale_view());
    }

    #[test]
    fn test_error_display() {
        let err = LedgerError::Split(SplitError::SplitMismatch { discrepancy: 25 });
        assert_eq!(
            err.to_string(),
            "Shares do not sum to the total (off by 25 minor units)"
        );
        let err = LedgerError::Split(SplitError::InvalidPercentage { total: 99 });
        assert_eq!(
            err.to_string(),
            "Percentages must be between 0 and 100 and sum to 100, got 99"
        );
    }

    #[test]
    fn test_from_money_error() {
        let err: LedgerError = MoneyError::Overflow.into();
        assert!(matches!(err, LedgerError::Overflow));
        let err: LedgerError = MoneyError::CurrencyMismatch {
            left: Currency::Usd,
            right: Currency::Eur,
        }
        .into();
        assert!(matches!(
            err,
            LedgerError::Split(SplitError::CurrencyMismatch {
                expected: Currency::Usd,
                actual: Currency::Eur
            })
        ));
    }
}
