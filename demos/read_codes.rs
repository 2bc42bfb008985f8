//! Example: Serving the read surface over a seeded store.
//!
//! Prints the JSON body and HTTP status an API layer would return for each
//! kind of read.
//!
//! # Usage
//!
//! ```bash
//! export LOCK_PASSWORDS="open-sesame"
//! export ALLOWED_DOMAINS="example.com"
//!
//! cargo run --example read_codes
//! ```

use chrono::{Duration, Utc};
use code_sync::{CodeQueryService, CodeRecord, CodeStore, MemoryStore, ReadConfig, ReadOutcome};
use serde::Serialize;
use std::sync::Arc;

fn show<T: Serialize>(label: &str, outcome: &ReadOutcome<T>) {
    let body = serde_json::to_string_pretty(outcome).unwrap_or_default();
    println!("== {label} ({})\n{body}\n", outcome.http_status());
}

#[tokio::main]
async fn main() -> code_sync::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().init();

    let store = Arc::new(MemoryStore::new());
    let now = Utc::now();
    store
        .insert_many(vec![
            CodeRecord {
                code: "482913".into(),
                recipient: "user@example.com".into(),
                sender: Some("no-reply@acme.com".into()),
                subject: "Your sign-in code".into(),
                received_at: now - Duration::minutes(1),
                is_protected: false,
            },
            CodeRecord {
                code: "AB3D4-E5F61".into(),
                recipient: "user@example.com".into(),
                sender: None,
                subject: "Account recovery".into(),
                received_at: now - Duration::minutes(2),
                is_protected: true,
            },
        ])
        .await?;

    let service = CodeQueryService::new(
        store,
        ReadConfig::from_env()?,
        Arc::new(|token: &str| token == "demo-session"),
    );

    show("no session", &service.recent(None).await);
    show("operator", &service.recent(Some("demo-session")).await);
    show("recipient", &service.for_recipient("user@example.com", None).await);
    show(
        "recipient, unlocked",
        &service.for_recipient("user@example.com", Some("open-sesame")).await,
    );
    show("invalid", &service.for_recipient("nobody", None).await);

    Ok(())
}
