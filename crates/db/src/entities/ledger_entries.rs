//! `SeaORM` Entity for ledger_entries table.
//!
//! One row per expense, reversal or settlement. `actor_id` is the payer of
//! an expense or the `from` side of a settlement; `counterparty_id` is the
//! `to` side of a settlement.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// `entry_type` value for expenses and reversals.
pub const EXPENSE: &str = "expense";
/// `entry_type` value for settlements.
pub const SETTLEMENT: &str = "settlement";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "ledger_entries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub group_id: Uuid,
    pub sequence: i64,
    pub entry_type: String,
    pub actor_id: Uuid,
    pub counterparty_id: Option<Uuid>,
    pub description: Option<String>,
    pub amount_minor: i64,
    pub currency: String,
    pub split_kind: Option<String>,
    pub reverses: Option<Uuid>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::groups::Entity",
        from = "Column::GroupId",
        to = "super::groups::Column::Id"
    )]
    Groups,
    #[sea_orm(has_many = "super::entry_splits::Entity")]
    EntrySplits,
}

impl Related<super::groups::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Groups.def()
    }
}

impl Related<super::entry_splits::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EntrySplits.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
