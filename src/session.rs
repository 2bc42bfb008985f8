//! Internal IMAP session operations.
//!
//! Thin wrappers over async-imap that map failures onto [`Error`] variants.
//! Timeouts are applied by the caller.

use crate::connection::TlsStream;
use crate::error::{Error, Result};
use async_imap::types::Fetch;
use async_imap::Session;
use chrono::NaiveDate;
use futures::TryStreamExt;
use tracing::{debug, instrument};

/// IMAP session over TLS.
pub(crate) type ImapSession = Session<TlsStream>;

/// Items requested per message. `BODY.PEEK[]` leaves the `\Seen` flag alone.
const FETCH_ITEMS: &str = "(INTERNALDATE BODY.PEEK[])";

#[instrument(name = "session::login", skip_all, fields(email = %email))]
pub(crate) async fn login(tls_stream: TlsStream, email: &str, password: &str) -> Result<ImapSession> {
    debug!("Authenticating to IMAP server");

    async_imap::Client::new(tls_stream)
        .login(email, password)
        .await
        .map_err(|(source, _client)| Error::ImapLogin {
            email: email.to_string(),
            source,
        })
}

#[instrument(name = "session::select", skip(session), fields(mailbox = %mailbox))]
pub(crate) async fn select_mailbox(session: &mut ImapSession, mailbox: &str) -> Result<()> {
    let selected = session
        .select(mailbox)
        .await
        .map_err(|source| Error::SelectMailbox {
            mailbox: mailbox.to_string(),
            source,
        })?;

    debug!(exists = selected.exists, "Mailbox selected");
    Ok(())
}

/// Returns UIDs of messages on or after `since` in ascending order.
///
/// `SINCE` has day granularity, so callers re-check the exact window.
#[instrument(name = "session::search_since", skip(session), fields(since = %since))]
pub(crate) async fn search_since(session: &mut ImapSession, since: NaiveDate) -> Result<Vec<u32>> {
    // IMAP date format: "DD-Mon-YYYY" (e.g., "07-Dec-2025")
    let query = format!("SINCE {}", since.format("%d-%b-%Y"));

    let mut uids: Vec<u32> = session
        .uid_search(&query)
        .await
        .map_err(|source| Error::ImapSearch { source })?
        .into_iter()
        .collect();
    uids.sort_unstable();

    debug!(uid_count = uids.len(), "Search complete");
    Ok(uids)
}

/// Fetches one message by UID. Returns `None` if the server has no such UID.
#[instrument(name = "session::fetch", skip(session))]
pub(crate) async fn fetch_message(session: &mut ImapSession, uid: u32) -> Result<Option<Fetch>> {
    let to_error = |source| Error::ImapFetch {
        message_id: uid.to_string(),
        source,
    };

    let fetches: Vec<Fetch> = session
        .uid_fetch(uid.to_string(), FETCH_ITEMS)
        .await
        .map_err(to_error)?
        .try_collect()
        .await
        .map_err(to_error)?;

    Ok(fetches.into_iter().find(|f| f.uid == Some(uid)))
}

#[instrument(name = "session::logout", skip(session))]
pub(crate) async fn logout(session: &mut ImapSession) -> Result<()> {
    debug!("Logging out");

    session
        .logout()
        .await
        .map_err(|source| Error::ImapLogout { source })
}
