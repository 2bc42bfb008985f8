//! The mailbox collaborator consumed by the sync engine.
//!
//! [`MailboxClient`] is the single seam between the engine and a mail
//! provider. Two backends implement it:
//!
//! - [`ImapMailbox`] speaks IMAP over TLS.
//! - [`GmailMailbox`] calls the Gmail REST API with an OAuth2 refresh token.
//!
//! Both hand back [`FetchedMessage`]s whose bodies are already shaped as a
//! [`MessagePart`] tree, so decoding and extraction are identical regardless
//! of transport.

mod gmail;
mod imap;

pub use gmail::GmailMailbox;
pub use imap::ImapMailbox;

use crate::decoder::MessagePart;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

/// A single message header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Header name as sent.
    pub name: String,
    /// Decoded header value.
    pub value: String,
}

impl Header {
    /// Creates a header.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Which messages to list: everything received after a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageQuery {
    /// Lower bound of the lookback window.
    pub received_after: DateTime<Utc>,
}

impl MessageQuery {
    /// Creates a query for messages received after `instant`.
    #[must_use]
    pub fn received_after(instant: DateTime<Utc>) -> Self {
        Self {
            received_after: instant,
        }
    }

    /// Returns the lower bound in whole seconds since the Unix epoch.
    #[must_use]
    pub fn after_epoch_seconds(&self) -> i64 {
        self.received_after.timestamp()
    }
}

/// One page of message identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePage {
    /// Provider-specific message identifiers.
    pub ids: Vec<String>,
    /// Token for the next page, if there is one.
    pub next_page_token: Option<String>,
}

/// A fully fetched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    /// Provider-specific identifier.
    pub id: String,
    /// Top-level headers.
    pub headers: Vec<Header>,
    /// Body tree.
    pub body: MessagePart,
    /// When the provider received the message, if it reports it.
    pub internal_date: Option<DateTime<Utc>>,
}

impl FetchedMessage {
    /// Parses a raw RFC 5322 message into headers and a part tree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ParseEmail`](crate::Error::ParseEmail) if the message
    /// cannot be parsed at all.
    pub fn from_rfc822(
        id: impl Into<String>,
        raw: &[u8],
        internal_date: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        crate::parser::parse_rfc822(id.into(), raw, internal_date)
    }
}

/// Trait for a mail provider the sync engine can poll.
///
/// Implementations must be shareable across tasks; the engine may fetch
/// several messages concurrently.
#[async_trait]
pub trait MailboxClient: Send + Sync {
    /// Lists identifiers of messages matching `query`, one page at a time.
    async fn list_message_ids(
        &self,
        query: &MessageQuery,
        page_token: Option<&str>,
    ) -> Result<MessagePage>;

    /// Fetches one message by identifier.
    async fn get_message(&self, id: &str) -> Result<FetchedMessage>;

    /// Verifies the connection and returns the authenticated mailbox address.
    async fn probe(&self) -> Result<String>;

    /// Short backend name used in logs.
    fn backend(&self) -> &'static str;
}

/// Follows `next_page_token` until the listing is exhausted.
///
/// # Errors
///
/// Returns the first listing error; no partial result is returned.
pub async fn list_all_message_ids(
    client: &dyn MailboxClient,
    query: &MessageQuery,
) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    let mut page_token: Option<String> = None;
    let mut pages = 0_usize;

    loop {
        let page = client
            .list_message_ids(query, page_token.as_deref())
            .await?;
        pages += 1;
        ids.extend(page.ids);

        match page.next_page_token {
            Some(token) if !token.is_empty() => page_token = Some(token),
            _ => break,
        }
    }

    debug!(pages, count = ids.len(), "Listed message ids");
    Ok(ids)
}
