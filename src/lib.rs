//! # code-sync
//!
//! Polls a mailbox on a fixed interval, extracts verification codes from
//! message bodies, and stores each code once.
//!
//! The crate provides:
//! - A [`SyncEngine`] that runs single-flight polling cycles with stuck-cycle
//!   recovery and an idempotent recurring scheduler
//! - Two mailbox backends behind [`MailboxClient`]: IMAP over TLS
//!   ([`ImapMailbox`]) and the Gmail REST API ([`GmailMailbox`])
//! - Two stores behind [`CodeStore`]: [`MemoryStore`] and [`SqliteStore`]
//! - A [`CodeQueryService`] that serves recent codes to an operator or to a
//!   single recipient, withholding protected codes until unlocked
//!
//! ## Features
//!
//! - **`observability`**: Enables OpenTelemetry integration for distributed tracing.
//!   Without this feature, tracing spans are still emitted but require no OTEL dependencies.
//!
//! ## Quick Start
//!
//! ```no_run
//! use code_sync::{ImapConfig, ImapMailbox, SqliteStore, SyncConfig, SyncEngine};
//! use std::sync::Arc;
//!
//! # async fn example() -> code_sync::Result<()> {
//! let mailbox = ImapMailbox::new(
//!     ImapConfig::builder()
//!         .email("codes@gmail.com")
//!         .password("app-password")
//!         .build()?,
//! )?;
//! let store = SqliteStore::connect("sqlite://codes.db").await?;
//!
//! let engine = Arc::new(SyncEngine::new(
//!     SyncConfig::default(),
//!     Arc::new(mailbox),
//!     Arc::new(store),
//! ));
//!
//! // Safe to call more than once; only the first call starts the loop.
//! engine.start();
//! # engine.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Reading Codes
//!
//! ```
//! use code_sync::{CodeQueryService, MemoryStore, ReadConfig, ReadOutcome};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let service = CodeQueryService::new(
//!     Arc::new(MemoryStore::new()),
//!     ReadConfig::default(),
//!     Arc::new(|token: &str| token == "operator-session"),
//! );
//!
//! assert!(matches!(service.recent(None).await, ReadOutcome::Unauthorized));
//! assert!(matches!(
//!     service.recent(Some("operator-session")).await,
//!     ReadOutcome::NoRecords { .. }
//! ));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All errors implement `std::error::Error` and provide context. Use [`Error::is_retryable`]
//! to tell transient failures from permanent ones:
//!
//! ```
//! use code_sync::Error;
//!
//! fn handle_error(error: &Error) {
//!     if error.is_retryable() {
//!         println!("Transient error, next cycle may succeed: {}", error);
//!     } else {
//!         println!("Permanent error: {}", error);
//!     }
//! }
//! ```
//!
//! ## Observability
//!
//! The crate uses `tracing` for instrumentation. All I/O emits spans with
//! structured fields.
//!
//! ### Span Naming Convention
//!
//! - `sync_cycle` - One polling cycle
//! - `SyncEngine::process_message` - Fetch and scan of one message
//! - `ImapMailbox::connect` - IMAP connect, login and select
//! - `ImapMailbox::list` / `GmailMailbox::list` - Message listing
//! - `ImapMailbox::get` / `GmailMailbox::get` - Message fetch
//! - `SqliteStore::insert_many` - Bulk insert
//! - `CodeQueryService::recent` / `CodeQueryService::for_recipient` - Reads
//! - `session::login` - IMAP authentication
//! - `connection::connect_tls` - TLS connection
//!
//! ### Standard Fields
//!
//! - `cycle` - Cycle generation number
//! - `backend` - `imap` or `gmail`
//! - `message_id` - Provider message identifier
//! - `recipient` - Normalized recipient address
//! - `count` - Number of codes extracted
//!
//! Enable the `observability` feature for OpenTelemetry integration.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
pub mod classifier;
pub mod config;
pub mod decoder;
pub mod dedup;
pub mod error;
pub mod extractor;
pub mod mailbox;
pub mod query;
pub mod record;
pub mod store;
pub mod sync;

// Internal modules
mod connection;
mod parser;
mod session;

// Re-exports for ergonomic API
pub use config::{
    GmailConfig, GmailConfigBuilder, ImapConfig, ImapConfigBuilder, ReadConfig,
    ReadConfigBuilder, SyncConfig, SyncConfigBuilder, TimeoutConfig,
};
pub use email_address::EmailAddress;
pub use error::{Error, ErrorCategory, Result};
pub use extractor::{Extractor, VerificationCodeExtractor};
pub use mailbox::{GmailMailbox, ImapMailbox, MailboxClient};
pub use query::{CodeQueryService, ReadOutcome, SessionVerifier};
pub use record::CodeRecord;
pub use store::{CodeStore, MemoryStore, SqliteStore};
pub use sync::{CycleOutcome, CycleReport, SyncEngine};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api_accessible() {
        let _ = ImapConfig::builder();
        let _ = GmailConfig::builder();
        let _ = SyncConfig::builder();
        let _ = ReadConfig::builder();
        let _ = VerificationCodeExtractor::new();
    }
}
