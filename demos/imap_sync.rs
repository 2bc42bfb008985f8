//! Example: Polling an IMAP mailbox into SQLite.
//!
//! Starts the recurring sync loop and prints each newly stored code until
//! Ctrl-C is pressed.
//!
//! # Usage
//!
//! ```bash
//! export IMAP_USER="codes@gmail.com"
//! export IMAP_PASSWORD="your-app-password"
//! # Optional, defaults to an in-memory database
//! export DATABASE_URL="sqlite://codes.db"
//! export RUST_LOG=code_sync=debug
//!
//! cargo run --example imap_sync
//! ```

use code_sync::store::RecentFilter;
use code_sync::{CodeStore, ImapConfig, ImapMailbox, SqliteStore, SyncConfig, SyncEngine};
use std::collections::HashSet;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> code_sync::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("code_sync=info")),
        )
        .with_target(true)
        .init();

    let sync_config = SyncConfig::from_env()?;
    let mailbox = Arc::new(ImapMailbox::new(ImapConfig::from_env()?)?);
    let store = Arc::new(match env::var("DATABASE_URL") {
        Ok(url) => SqliteStore::connect(&url).await?,
        Err(_) => SqliteStore::in_memory().await?,
    });

    let engine = Arc::new(SyncEngine::new(sync_config.clone(), mailbox.clone(), store.clone()));
    engine.start();

    let mut seen = HashSet::new();
    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let since = chrono::Utc::now() - sync_config.lookback();
                for record in store.find_recent(since, &RecentFilter::default()).await? {
                    if seen.insert(record.key()) {
                        println!(
                            "{}  {:<12}  {}  {}{}",
                            record.received_at.format("%H:%M:%S"),
                            record.code,
                            record.recipient,
                            record.subject,
                            if record.is_protected { "  [protected]" } else { "" },
                        );
                    }
                }
            }
        }
    }

    engine.shutdown().await;
    mailbox.logout().await?;
    Ok(())
}
