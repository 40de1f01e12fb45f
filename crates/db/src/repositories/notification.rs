//! Postgres notification inbox.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use splitledger_core::notification::{
    NotificationError, NotificationEvent, NotificationInbox, NotificationKind, NotificationPayload,
};
use splitledger_shared::types::{
    Currency, GroupId, Money, NotificationId, PageRequest, PageResponse, UserId,
};
use tracing::error;

use crate::entities::notifications;

/// Notification inbox backed by the `notifications` table.
#[derive(Debug, Clone)]
pub struct PgNotificationInbox {
    db: DatabaseConnection,
}

impl PgNotificationInbox {
    /// Creates a new inbox.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    fn unread(user: UserId) -> sea_orm::Select<notifications::Entity> {
        notifications::Entity::find()
            .filter(notifications::Column::RecipientId.eq(user.into_inner()))
            .filter(notifications::Column::Read.eq(false))
    }
}

#[async_trait]
impl NotificationInbox for PgNotificationInbox {
    async fn persist(&self, events: &[NotificationEvent]) -> Result<(), NotificationError> {
        if events.is_empty() {
            return Ok(());
        }

        let rows = events.iter().map(|event| notifications::ActiveModel {
            id: Set(event.id.into_inner()),
            recipient_id: Set(event.recipient.into_inner()),
            kind: Set(event.kind.as_str().to_string()),
            group_id: Set(event.payload.group_id.into_inner()),
            group_name: Set(event.payload.group_name.clone()),
            actor_id: Set(event.payload.actor.into_inner()),
            entry_id: Set(event.payload.entry_id),
            amount_minor: Set(event.payload.amount.minor),
            currency: Set(event.payload.amount.currency.to_string()),
            message: Set(event.payload.message.clone()),
            read: Set(event.read),
            created_at: Set(event.created_at.into()),
        });

        notifications::Entity::insert_many(rows)
            .on_conflict(
                OnConflict::column(notifications::Column::Id)
                    .do_nothing()
                    .to_owned(),
            )
            .do_nothing()
            .exec(&self.db)
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    async fn fetch(
        &self,
        user: UserId,
        page: PageRequest,
    ) -> Result<PageResponse<NotificationEvent>, NotificationError> {
        let query = notifications::Entity::find()
            .filter(notifications::Column::RecipientId.eq(user.into_inner()));

        let total = query.clone().count(&self.db).await.map_err(storage_error)?;
        let rows = query
            .order_by_desc(notifications::Column::CreatedAt)
            .order_by_desc(notifications::Column::Id)
            .offset(page.offset())
            .limit(page.limit())
            .all(&self.db)
            .await
            .map_err(storage_error)?;

        let data = rows
            .into_iter()
            .map(to_event)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PageResponse::new(data, page.page, page.per_page, total))
    }

    async fn unread_count(&self, user: UserId) -> Result<u64, NotificationError> {
        Self::unread(user)
            .count(&self.db)
            .await
            .map_err(storage_error)
    }

    async fn mark_read(
        &self,
        user: UserId,
        ids: &[NotificationId],
    ) -> Result<u64, NotificationError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = notifications::Entity::update_many()
            .col_expr(notifications::Column::Read, Expr::value(true))
            .filter(notifications::Column::RecipientId.eq(user.into_inner()))
            .filter(notifications::Column::Read.eq(false))
            .filter(notifications::Column::Id.is_in(ids.iter().map(|id| id.into_inner())))
            .exec(&self.db)
            .await
            .map_err(storage_error)?;
        Ok(result.rows_affected)
    }

    async fn mark_all_read(&self, user: UserId) -> Result<u64, NotificationError> {
        let result = notifications::Entity::update_many()
            .col_expr(notifications::Column::Read, Expr::value(true))
            .filter(notifications::Column::RecipientId.eq(user.into_inner()))
            .filter(notifications::Column::Read.eq(false))
            .exec(&self.db)
            .await
            .map_err(storage_error)?;
        Ok(result.rows_affected)
    }
}

fn to_event(row: notifications::Model) -> Result<NotificationEvent, NotificationError> {
    let currency = row
        .currency
        .parse::<Currency>()
        .map_err(NotificationError::Storage)?;
    Ok(NotificationEvent {
        id: NotificationId::from_uuid(row.id),
        recipient: UserId::from_uuid(row.recipient_id),
        kind: row
            .kind
            .parse::<NotificationKind>()
            .map_err(NotificationError::Storage)?,
        payload: NotificationPayload {
            group_id: GroupId::from_uuid(row.group_id),
            group_name: row.group_name,
            actor: UserId::from_uuid(row.actor_id),
            entry_id: row.entry_id,
            amount: Money::new(row.amount_minor, currency),
            message: row.message,
        },
        created_at: row.created_at.with_timezone(&Utc),
        read: row.read,
    })
}

fn storage_error(err: DbErr) -> NotificationError {
    error!(error = %err, "Notification storage failure");
    NotificationError::Storage(err.to_string())
}
