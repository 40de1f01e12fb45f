//! Database seeder for SplitLedger development and testing.
//!
//! Seeds two demo groups with expenses and a settlement through the ledger
//! service, so every entry goes through the same validation, sequencing and
//! notification path as API traffic.
//!
//! Usage: cargo run --bin seeder

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use splitledger_core::ledger::{
    GroupKind, LedgerService, NewGroup, RecordExpense, RecordSettlement, SplitInput,
};
use splitledger_db::{PgLedgerStore, PgNotificationInbox, connect_with};
use splitledger_shared::AppConfig;
use splitledger_shared::types::{GroupId, Money, UserId};
use uuid::Uuid;

/// Demo user IDs (consistent for all seeds)
const ARYA: &str = "00000000-0000-0000-0000-000000000001";
const RAHUL: &str = "00000000-0000-0000-0000-000000000002";
const SNEHA: &str = "00000000-0000-0000-0000-000000000003";
const PRIYA: &str = "00000000-0000-0000-0000-000000000004";

struct Users {
    arya: UserId,
    rahul: UserId,
    sneha: UserId,
    priya: UserId,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    let Some(url) = config.database.url.as_deref() else {
        bail!("database.url must be set to seed");
    };

    println!("Connecting to database...");
    let db = connect_with(url, &config.database).await?;
    let store = PgLedgerStore::new(
        db.clone(),
        Duration::from_millis(config.ledger.contention_timeout_ms),
    );
    let service = LedgerService::new(
        Arc::new(store),
        Arc::new(PgNotificationInbox::new(db)),
        &config.ledger,
        &config.notifications,
    );

    let users = Users {
        arya: user(ARYA)?,
        rahul: user(RAHUL)?,
        sneha: user(SNEHA)?,
        priya: user(PRIYA)?,
    };

    let existing = service.list_groups(users.arya).await?;
    if existing.iter().any(|g| g.name == "Apartment 404") {
        println!("  Demo groups already exist, skipping...");
        return Ok(());
    }

    println!("Seeding Apartment 404...");
    let apartment = seed_apartment(&service, &users).await?;

    println!("Seeding Goa Trip...");
    let trip = seed_trip(&service, &users).await?;

    // Notification delivery runs in the background.
    tokio::time::sleep(Duration::from_millis(500)).await;

    for (name, group_id) in [("Apartment 404", apartment), ("Goa Trip", trip)] {
        let balances = service.get_balances(group_id).await?;
        println!("  {name} balances (as of #{}):", balances.as_of);
        for (member, amount) in &balances.balances {
            println!("    {member}: {amount}");
        }
        for transfer in service.get_settlement_plan(group_id).await? {
            println!(
                "    suggest {} -> {}: {}",
                transfer.from, transfer.to, transfer.amount
            );
        }
    }

    println!("Seeding complete!");
    Ok(())
}

fn user(id: &str) -> anyhow::Result<UserId> {
    Ok(UserId::from_uuid(Uuid::parse_str(id)?))
}

fn amount(service: &LedgerService, major: &str) -> anyhow::Result<Money> {
    Ok(Money::parse(major, service.currency())?)
}

/// Equal splits among three flatmates, then a partial payback.
async fn seed_apartment(service: &LedgerService, users: &Users) -> anyhow::Result<GroupId> {
    let group = service
        .create_group(NewGroup {
            name: "Apartment 404".into(),
            kind: GroupKind::Home,
            admin: users.arya,
            members: vec![users.arya, users.rahul, users.sneha],
        })
        .await?;
    let everyone = vec![users.arya, users.rahul, users.sneha];

    service
        .record_expense(RecordExpense {
            group_id: group.id,
            payer: users.rahul,
            description: "WiFi Bill".into(),
            total: amount(service, "900")?,
            split: SplitInput::Equal {
                members: everyone.clone(),
            },
        })
        .await?;

    service
        .record_expense(RecordExpense {
            group_id: group.id,
            payer: users.arya,
            description: "Maid Salary".into(),
            total: amount(service, "1500")?,
            split: SplitInput::Equal { members: everyone },
        })
        .await?;

    service
        .record_settlement(RecordSettlement {
            group_id: group.id,
            from: users.rahul,
            to: users.arya,
            amount: amount(service, "500")?,
        })
        .await?;

    Ok(group.id)
}

/// An equal hotel split and an exact dinner split.
async fn seed_trip(service: &LedgerService, users: &Users) -> anyhow::Result<GroupId> {
    let group = service
        .create_group(NewGroup {
            name: "Goa Trip".into(),
            kind: GroupKind::Trip,
            admin: users.rahul,
            members: vec![users.arya, users.rahul, users.priya],
        })
        .await?;

    service
        .record_expense(RecordExpense {
            group_id: group.id,
            payer: users.priya,
            description: "Hotel Booking".into(),
            total: amount(service, "12000")?,
            split: SplitInput::Equal {
                members: vec![users.arya, users.rahul, users.priya],
            },
        })
        .await?;

    service
        .record_expense(RecordExpense {
            group_id: group.id,
            payer: users.arya,
            description: "Seafood Dinner".into(),
            total: amount(service, "3000")?,
            split: SplitInput::Exact {
                shares: vec![
                    (users.arya, amount(service, "800")?),
                    (users.rahul, amount(service, "1500")?),
                    (users.priya, amount(service, "700")?),
                ],
            },
        })
        .await?;

    Ok(group.id)
}
