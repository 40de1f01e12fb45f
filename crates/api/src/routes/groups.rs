//! Group, expense and settlement routes.
//!
//! Every route here requires the caller to be a member of the group.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use splitledger_core::ledger::{
    Expense, Group, GroupBalances, GroupKind, HistoryWindow, LedgerEntry, NewGroup, RecordExpense,
    RecordSettlement, SequencedEntry, Settlement, SplitInput, Transfer,
};
use splitledger_shared::types::{Currency, ExpenseId, GroupId, Money, SettlementId, UserId};
use tracing::info;

use super::amount_string;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::{AppState, error::ApiError, middleware::Actor};

/// Creates the group routes (requires identity middleware to be applied externally).
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/groups", get(list_groups).post(create_group))
        .route("/groups/{group_id}", get(get_group))
        .route("/groups/{group_id}/expenses", post(record_expense))
        .route(
            "/groups/{group_id}/expenses/{expense_id}/reverse",
            post(reverse_expense),
        )
        .route("/groups/{group_id}/settlements", post(record_settlement))
        .route("/groups/{group_id}/balances", get(get_balances))
        .route("/groups/{group_id}/settlement-plan", get(get_settlement_plan))
        .route("/groups/{group_id}/history", get(get_history))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for creating a group.
#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    /// Display name.
    pub name: String,
    /// Group kind: home, trip, couple, other. Defaults to other.
    pub kind: Option<String>,
    /// Other members; the caller is always added as admin.
    #[serde(default)]
    pub members: Vec<UserId>,
}

/// Request body for recording an expense.
#[derive(Debug, Deserialize)]
pub struct RecordExpenseRequest {
    /// Member who paid. Defaults to the caller.
    pub payer: Option<UserId>,
    /// What the money was spent on.
    pub description: String,
    /// Total in major units, e.g. "12.50".
    pub amount: String,
    /// How to divide the total.
    pub split: SplitRequest,
}

/// Proposed split in a request body.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SplitRequest {
    /// Even split. All group members when `members` is absent.
    Equal {
        /// Participating members.
        members: Option<Vec<UserId>>,
    },
    /// Explicit shares.
    Exact {
        /// Member shares.
        shares: Vec<ShareRequest>,
    },
    /// Integer percentages summing to 100.
    Percentage {
        /// Member percentages.
        percentages: Vec<PercentageRequest>,
    },
}

/// One explicit share.
#[derive(Debug, Deserialize)]
pub struct ShareRequest {
    /// Member.
    pub member: UserId,
    /// Share in major units.
    pub amount: String,
}

/// One member percentage.
#[derive(Debug, Deserialize)]
pub struct PercentageRequest {
    /// Member.
    pub member: UserId,
    /// Whole percent.
    pub percent: u32,
}

/// Request body for recording a settlement.
#[derive(Debug, Deserialize)]
pub struct RecordSettlementRequest {
    /// Member who paid. Defaults to the caller.
    pub from: Option<UserId>,
    /// Member who received.
    pub to: UserId,
    /// Amount in major units.
    pub amount: String,
}

/// Query parameters for the history endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    /// Only entries after this sequence.
    pub after: Option<u64>,
    /// Page size, capped by configuration.
    pub limit: Option<u32>,
    /// Only entries committed at or after this instant.
    pub from: Option<DateTime<Utc>>,
    /// Only entries committed at or before this instant.
    pub until: Option<DateTime<Utc>>,
}

/// Response for a group.
#[derive(Debug, Serialize)]
pub struct GroupResponse {
    /// Group ID.
    pub id: GroupId,
    /// Display name.
    pub name: String,
    /// Group kind.
    pub kind: GroupKind,
    /// Admin member.
    pub admin: UserId,
    /// Members in ascending ID order.
    pub members: Vec<UserId>,
    /// Created at timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<Group> for GroupResponse {
    fn from(group: Group) -> Self {
        Self {
            id: group.id,
            name: group.name,
            kind: group.kind,
            admin: group.admin,
            members: group.members.into_iter().collect(),
            created_at: group.created_at,
        }
    }
}

/// A member amount in major units.
#[derive(Debug, Serialize)]
pub struct MemberAmount {
    /// Member.
    pub member: UserId,
    /// Amount in major units.
    pub amount: String,
}

/// Response for an expense.
#[derive(Debug, Serialize)]
pub struct ExpenseResponse {
    /// Expense ID.
    pub id: ExpenseId,
    /// Group ID.
    pub group_id: GroupId,
    /// Member who paid.
    pub payer: UserId,
    /// Description.
    pub description: String,
    /// Total in major units.
    pub amount: String,
    /// Currency code.
    pub currency: Currency,
    /// Split kind.
    pub split_kind: &'static str,
    /// Shares in ascending member order.
    pub splits: Vec<MemberAmount>,
    /// Expense this one reverses.
    pub reverses: Option<ExpenseId>,
    /// Commit time.
    pub created_at: DateTime<Utc>,
}

impl From<Expense> for ExpenseResponse {
    fn from(expense: Expense) -> Self {
        Self {
            id: expense.id,
            group_id: expense.group_id,
            payer: expense.payer,
            description: expense.description,
            amount: amount_string(expense.total),
            currency: expense.total.currency,
            split_kind: expense.split_kind.as_str(),
            splits: expense
                .splits
                .into_iter()
                .map(|split| MemberAmount {
                    member: split.member,
                    amount: amount_string(split.share),
                })
                .collect(),
            reverses: expense.reverses,
            created_at: expense.created_at,
        }
    }
}

/// Response for a settlement.
#[derive(Debug, Serialize)]
pub struct SettlementResponse {
    /// Settlement ID.
    pub id: SettlementId,
    /// Group ID.
    pub group_id: GroupId,
    /// Member who paid.
    pub from: UserId,
    /// Member who received.
    pub to: UserId,
    /// Amount in major units.
    pub amount: String,
    /// Currency code.
    pub currency: Currency,
    /// Commit time.
    pub created_at: DateTime<Utc>,
}

impl From<Settlement> for SettlementResponse {
    fn from(settlement: Settlement) -> Self {
        Self {
            id: settlement.id,
            group_id: settlement.group_id,
            from: settlement.from,
            to: settlement.to,
            amount: amount_string(settlement.amount),
            currency: settlement.amount.currency,
            created_at: settlement.created_at,
        }
    }
}

/// One history entry.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryResponse {
    /// An expense or reversal.
    Expense {
        /// Ledger sequence.
        sequence: u64,
        /// The expense.
        #[serde(flatten)]
        expense: ExpenseResponse,
    },
    /// A settlement.
    Settlement {
        /// Ledger sequence.
        sequence: u64,
        /// The settlement.
        #[serde(flatten)]
        settlement: SettlementResponse,
    },
}

impl From<SequencedEntry> for EntryResponse {
    fn from(entry: SequencedEntry) -> Self {
        let sequence = entry.sequence;
        match entry.entry {
            LedgerEntry::Expense(expense) => Self::Expense {
                sequence,
                expense: expense.into(),
            },
            LedgerEntry::Settlement(settlement) => Self::Settlement {
                sequence,
                settlement: settlement.into(),
            },
        }
    }
}

/// Response for a history page.
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    /// Entries in ascending sequence order.
    pub entries: Vec<EntryResponse>,
    /// Pass as `after` to fetch the next page; absent on the last page.
    pub next_after: Option<u64>,
}

/// Response for group balances.
#[derive(Debug, Serialize)]
pub struct BalancesResponse {
    /// Group ID.
    pub group_id: GroupId,
    /// Currency code.
    pub currency: Currency,
    /// Last ledger sequence included.
    pub as_of: u64,
    /// Net balance per member. Positive means the member is owed.
    pub balances: Vec<MemberAmount>,
}

impl From<GroupBalances> for BalancesResponse {
    fn from(balances: GroupBalances) -> Self {
        Self {
            group_id: balances.group_id,
            currency: balances.currency,
            as_of: balances.as_of,
            balances: balances
                .balances
                .into_iter()
                .map(|(member, amount)| MemberAmount {
                    member,
                    amount: amount_string(amount),
                })
                .collect(),
        }
    }
}

/// A suggested transfer.
#[derive(Debug, Serialize)]
pub struct TransferResponse {
    /// Member who pays.
    pub from: UserId,
    /// Member who receives.
    pub to: UserId,
    /// Amount in major units.
    pub amount: String,
}

impl From<Transfer> for TransferResponse {
    fn from(transfer: Transfer) -> Self {
        Self {
            from: transfer.from,
            to: transfer.to,
            amount: amount_string(transfer.amount),
        }
    }
}

/// Response for a settlement plan.
#[derive(Debug, Serialize)]
pub struct SettlementPlanResponse {
    /// Group ID.
    pub group_id: GroupId,
    /// Currency code.
    pub currency: Currency,
    /// Suggested transfers, largest first.
    pub transfers: Vec<TransferResponse>,
}

// ============================================================================
// Helper Functions
// ============================================================================

impl SplitRequest {
    fn into_split(self, group: &Group, currency: Currency) -> Result<SplitInput, ApiError> {
        Ok(match self {
            Self::Equal { members } => SplitInput::Equal {
                members: members.unwrap_or_else(|| group.members.iter().copied().collect()),
            },
            Self::Exact { shares } => SplitInput::Exact {
                shares: shares
                    .into_iter()
                    .map(|share| Ok((share.member, Money::parse(&share.amount, currency)?)))
                    .collect::<Result<_, ApiError>>()?,
            },
            Self::Percentage { percentages } => SplitInput::Percentage {
                percentages: percentages
                    .into_iter()
                    .map(|p| (p.member, p.percent))
                    .collect(),
            },
        })
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn list_groups(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<Json<Vec<GroupResponse>>, ApiError> {
    let groups = state.service.list_groups(actor.user_id()).await?;
    Ok(Json(groups.into_iter().map(GroupResponse::from).collect()))
}

async fn create_group(
    State(state): State<AppState>,
    actor: Actor,
    ApiJson(body): ApiJson<CreateGroupRequest>,
) -> Result<(StatusCode, Json<GroupResponse>), ApiError> {
    let kind = match body.kind.as_deref() {
        Some(kind) => kind.parse::<GroupKind>().map_err(ApiError::validation)?,
        None => GroupKind::Other,
    };

    let group = state
        .service
        .create_group(NewGroup {
            name: body.name,
            kind,
            admin: actor.user_id(),
            members: body.members,
        })
        .await?;

    info!(group_id = %group.id, admin = %actor.user_id(), "Group created via API");
    Ok((StatusCode::CREATED, Json(group.into())))
}

async fn get_group(
    State(state): State<AppState>,
    actor: Actor,
    ApiPath(group_id): ApiPath<GroupId>,
) -> Result<Json<GroupResponse>, ApiError> {
    let group = state
        .service
        .group_for_member(group_id, actor.user_id())
        .await?;
    Ok(Json(group.into()))
}

async fn record_expense(
    State(state): State<AppState>,
    actor: Actor,
    ApiPath(group_id): ApiPath<GroupId>,
    ApiJson(body): ApiJson<RecordExpenseRequest>,
) -> Result<(StatusCode, Json<ExpenseResponse>), ApiError> {
    let group = state
        .service
        .group_for_member(group_id, actor.user_id())
        .await?;
    let currency = state.service.currency();

    let input = RecordExpense {
        group_id,
        payer: body.payer.unwrap_or(actor.user_id()),
        description: body.description,
        total: Money::parse(&body.amount, currency)?,
        split: body.split.into_split(&group, currency)?,
    };
    let expense = state.service.record_expense(input).await?;
    Ok((StatusCode::CREATED, Json(expense.into())))
}

async fn reverse_expense(
    State(state): State<AppState>,
    actor: Actor,
    ApiPath((group_id, expense_id)): ApiPath<(GroupId, ExpenseId)>,
) -> Result<(StatusCode, Json<ExpenseResponse>), ApiError> {
    let reversal = state
        .service
        .reverse_expense(group_id, expense_id, actor.user_id())
        .await?;
    Ok((StatusCode::CREATED, Json(reversal.into())))
}

async fn record_settlement(
    State(state): State<AppState>,
    actor: Actor,
    ApiPath(group_id): ApiPath<GroupId>,
    ApiJson(body): ApiJson<RecordSettlementRequest>,
) -> Result<(StatusCode, Json<SettlementResponse>), ApiError> {
    state
        .service
        .group_for_member(group_id, actor.user_id())
        .await?;

    let input = RecordSettlement {
        group_id,
        from: body.from.unwrap_or(actor.user_id()),
        to: body.to,
        amount: Money::parse(&body.amount, state.service.currency())?,
    };
    let settlement = state.service.record_settlement(input).await?;
    Ok((StatusCode::CREATED, Json(settlement.into())))
}

async fn get_balances(
    State(state): State<AppState>,
    actor: Actor,
    ApiPath(group_id): ApiPath<GroupId>,
) -> Result<Json<BalancesResponse>, ApiError> {
    state
        .service
        .group_for_member(group_id, actor.user_id())
        .await?;
    let balances = state.service.get_balances(group_id).await?;
    Ok(Json(balances.into()))
}

async fn get_settlement_plan(
    State(state): State<AppState>,
    actor: Actor,
    ApiPath(group_id): ApiPath<GroupId>,
) -> Result<Json<SettlementPlanResponse>, ApiError> {
    state
        .service
        .group_for_member(group_id, actor.user_id())
        .await?;
    let transfers = state.service.get_settlement_plan(group_id).await?;
    Ok(Json(SettlementPlanResponse {
        group_id,
        currency: state.service.currency(),
        transfers: transfers.into_iter().map(TransferResponse::from).collect(),
    }))
}

async fn get_history(
    State(state): State<AppState>,
    actor: Actor,
    ApiPath(group_id): ApiPath<GroupId>,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    state
        .service
        .group_for_member(group_id, actor.user_id())
        .await?;
    if let (Some(from), Some(until)) = (query.from, query.until)
        && from > until
    {
        return Err(ApiError::validation("from must not be after until"));
    }

    let window = HistoryWindow {
        after: query.after,
        up_to: None,
        from: query.from,
        until: query.until,
    };
    let limit = query.limit.unwrap_or(u32::MAX);
    let entries = state.service.history_page(group_id, window, limit).await?;

    // A short page is the last one.
    let page_size = usize::try_from(state.service.history_limit(limit)).unwrap_or(usize::MAX);
    let full_page = entries.len() >= page_size;
    let next_after = if full_page {
        entries.last().map(|e| e.sequence)
    } else {
        None
    };

    Ok(Json(HistoryResponse {
        entries: entries.into_iter().map(EntryResponse::from).collect(),
        next_after,
    }))
}
