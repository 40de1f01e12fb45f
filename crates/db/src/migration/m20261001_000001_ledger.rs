//! Initial ledger schema.
//!
//! Creates groups, memberships, the append-only ledger and notification inboxes.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        // Groups and membership
        db.execute_unprepared(GROUPS_SQL).await?;

        // Append-only ledger
        db.execute_unprepared(LEDGER_SQL).await?;

        // Notification inboxes
        db.execute_unprepared(NOTIFICATIONS_SQL).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(DROP_SQL).await?;
        Ok(())
    }
}

const GROUPS_SQL: &str = r"
CREATE TABLE groups (
    id UUID PRIMARY KEY,
    name VARCHAR(200) NOT NULL,
    kind VARCHAR(20) NOT NULL,
    admin_id UUID NOT NULL,
    ledger_head BIGINT NOT NULL DEFAULT 0,
    last_entry_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_groups_name CHECK (length(trim(name)) > 0),
    CONSTRAINT chk_groups_kind CHECK (kind IN ('home', 'trip', 'couple', 'other')),
    CONSTRAINT chk_groups_head CHECK (ledger_head >= 0)
);

CREATE TABLE group_members (
    group_id UUID NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    user_id UUID NOT NULL,
    -- Running net balance, kept in step with the ledger under the group lock
    balance_minor BIGINT NOT NULL DEFAULT 0,
    PRIMARY KEY (group_id, user_id)
);

-- Groups of a member
CREATE INDEX idx_group_members_user ON group_members(user_id);
";

const LEDGER_SQL: &str = r"
CREATE TABLE ledger_entries (
    id UUID PRIMARY KEY,
    group_id UUID NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    sequence BIGINT NOT NULL,
    entry_type VARCHAR(20) NOT NULL,
    actor_id UUID NOT NULL,
    counterparty_id UUID,
    description TEXT,
    amount_minor BIGINT NOT NULL,
    currency VARCHAR(3) NOT NULL,
    split_kind VARCHAR(20),
    reverses UUID REFERENCES ledger_entries(id),
    created_at TIMESTAMPTZ NOT NULL,
    CONSTRAINT uq_ledger_entries_sequence UNIQUE (group_id, sequence),
    CONSTRAINT chk_ledger_entries_sequence CHECK (sequence > 0),
    CONSTRAINT chk_ledger_entries_type CHECK (entry_type IN ('expense', 'settlement')),
    CONSTRAINT chk_ledger_entries_shape CHECK (
        (entry_type = 'expense' AND counterparty_id IS NULL AND split_kind IS NOT NULL
            AND (amount_minor > 0 OR (amount_minor < 0 AND reverses IS NOT NULL)))
        OR
        (entry_type = 'settlement' AND counterparty_id IS NOT NULL AND counterparty_id <> actor_id
            AND amount_minor > 0 AND reverses IS NULL)
    )
);

-- An expense can be reversed at most once
CREATE UNIQUE INDEX uq_ledger_entries_reverses ON ledger_entries(reverses) WHERE reverses IS NOT NULL;

-- History by time window
CREATE INDEX idx_ledger_entries_created ON ledger_entries(group_id, created_at, sequence);

CREATE TABLE entry_splits (
    entry_id UUID NOT NULL REFERENCES ledger_entries(id) ON DELETE CASCADE,
    member_id UUID NOT NULL,
    share_minor BIGINT NOT NULL,
    PRIMARY KEY (entry_id, member_id)
);
";

const NOTIFICATIONS_SQL: &str = r"
CREATE TABLE notifications (
    id UUID PRIMARY KEY,
    recipient_id UUID NOT NULL,
    kind VARCHAR(30) NOT NULL,
    group_id UUID NOT NULL,
    group_name VARCHAR(200) NOT NULL,
    actor_id UUID NOT NULL,
    entry_id UUID NOT NULL,
    amount_minor BIGINT NOT NULL,
    currency VARCHAR(3) NOT NULL,
    message TEXT NOT NULL,
    read BOOLEAN NOT NULL DEFAULT false,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

-- Inbox listing, newest first
CREATE INDEX idx_notifications_inbox ON notifications(recipient_id, created_at DESC, id DESC);

-- Unread badge
CREATE INDEX idx_notifications_unread ON notifications(recipient_id) WHERE read = false;
";

const DROP_SQL: &str = r"
DROP TABLE IF EXISTS notifications CASCADE;
DROP TABLE IF EXISTS entry_splits CASCADE;
DROP TABLE IF EXISTS ledger_entries CASCADE;
DROP TABLE IF EXISTS group_members CASCADE;
DROP TABLE IF EXISTS groups CASCADE;
";
