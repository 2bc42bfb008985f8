//! Example: One sync cycle through the Gmail REST API.
//!
//! # Usage
//!
//! ```bash
//! export GOOGLE_CLIENT_ID="..."
//! export GOOGLE_CLIENT_SECRET="..."
//! export GOOGLE_REFRESH_TOKEN="..."
//!
//! cargo run --example gmail_sync
//! ```

use code_sync::{
    CycleOutcome, GmailConfig, GmailMailbox, MailboxClient, MemoryStore, SyncConfig, SyncEngine,
};
use std::sync::Arc;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> code_sync::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("code_sync=debug")),
        )
        .with_span_events(FmtSpan::CLOSE)
        .init();

    let mailbox = Arc::new(GmailMailbox::new(GmailConfig::from_env()?)?);
    let address = mailbox.probe().await?;
    tracing::info!(%address, "Authenticated");

    let store = Arc::new(MemoryStore::new());
    let engine = SyncEngine::new(SyncConfig::from_env()?, mailbox, store.clone());

    match engine.run_cycle().await {
        CycleOutcome::Completed(report) => {
            println!("{report:#?}");
            for record in store.snapshot().await {
                println!("{} -> {} ({})", record.code, record.recipient, record.sender_label());
            }
        }
        CycleOutcome::Skipped => println!("Another cycle is running"),
        CycleOutcome::Failed(e) => return Err(e),
    }

    Ok(())
}
