//! IMAP backend for [`MailboxClient`].

use super::{FetchedMessage, MailboxClient, MessagePage, MessageQuery};
use crate::config::ImapConfig;
use crate::connection;
use crate::error::{Error, Result};
use crate::session::{self, ImapSession};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

/// A [`MailboxClient`] backed by one IMAP session.
///
/// The session is opened lazily on first use and reused across cycles. Any
/// failed command drops it so the next call reconnects from scratch.
///
/// IMAP has no server-side paging for `SEARCH`, so every listing is
/// returned as a single page.
pub struct ImapMailbox {
    config: ImapConfig,
    session: Mutex<Option<Box<ImapSession>>>,
}

impl ImapMailbox {
    /// Creates the backend without connecting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnauthorizedInbox`] if the login is not the
    /// configured authorized inbox.
    pub fn new(config: ImapConfig) -> Result<Self> {
        config.check_authorized_inbox()?;
        Ok(Self {
            config,
            session: Mutex::new(None),
        })
    }

    /// Logs out and drops the current session, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the logout command fails or times out. The
    /// session is dropped either way.
    pub async fn logout(&self) -> Result<()> {
        let Some(mut session) = self.session.lock().await.take() else {
            return Ok(());
        };
        let limit = self.config.timeouts.logout;
        timeout(limit, session::logout(&mut session))
            .await
            .map_err(|_| Error::LogoutTimeout { timeout: limit })?
    }

    /// Connects, authenticates, and selects the configured mailbox.
    #[instrument(
        name = "ImapMailbox::connect",
        skip_all,
        fields(email = %self.config.email(), host = %self.config.imap_host)
    )]
    async fn connect(&self) -> Result<ImapSession> {
        let config = &self.config;
        let timeouts = &config.timeouts;
        let target = config.server_address();

        let tls_stream = timeout(
            timeouts.connect,
            connection::connect_tls(&config.imap_host, &target),
        )
        .await
        .map_err(|_| Error::ConnectTimeout {
            target: target.clone(),
            timeout: timeouts.connect,
        })??;

        let mut session = timeout(
            timeouts.auth,
            session::login(tls_stream, config.email(), config.password()),
        )
        .await
        .map_err(|_| Error::AuthTimeout {
            email: config.email().to_string(),
            timeout: timeouts.auth,
        })??;

        let mailbox = config.effective_mailbox();
        timeout(timeouts.select, session::select_mailbox(&mut session, mailbox))
            .await
            .map_err(|_| Error::SelectTimeout {
                mailbox: mailbox.to_string(),
                timeout: timeouts.select,
            })??;

        debug!(mailbox, "IMAP session ready");
        Ok(session)
    }

    /// Returns the open session, connecting first if there is none.
    async fn open_session<'a>(
        &self,
        slot: &'a mut Option<Box<ImapSession>>,
    ) -> Result<&'a mut ImapSession> {
        let session = match slot.take() {
            Some(session) => session,
            None => Box::new(self.connect().await?),
        };
        Ok(&mut **slot.insert(session))
    }
}

impl std::fmt::Debug for ImapMailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapMailbox")
            .field("email", &self.config.email())
            .field("host", &self.config.imap_host)
            .field("mailbox", &self.config.effective_mailbox())
            .finish_non_exhaustive()
    }
}

/// Date for `SEARCH SINCE`, one day before the window start in UTC.
///
/// `SINCE` compares against each message's internal date in the server's own
/// zone, which can be a calendar day behind UTC. The engine drops the extra
/// messages by timestamp.
fn search_since_date(query: &MessageQuery) -> NaiveDate {
    (query.received_after - Duration::days(1)).date_naive()
}

/// Drops the session after a failed command so the next call reconnects.
fn reset_on_error<T>(slot: &mut Option<Box<ImapSession>>, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        warn!(error = %e, "IMAP command failed, dropping session");
        *slot = None;
    }
    result
}

#[async_trait]
impl MailboxClient for ImapMailbox {
    #[instrument(name = "ImapMailbox::list", skip_all, fields(after = %query.received_after))]
    async fn list_message_ids(
        &self,
        query: &MessageQuery,
        _page_token: Option<&str>,
    ) -> Result<MessagePage> {
        let limit = self.config.timeouts.search;
        let mut slot = self.session.lock().await;
        let session = self.open_session(&mut slot).await?;

        let result = timeout(
            limit,
            session::search_since(session, search_since_date(query)),
        )
        .await
        .map_err(|_| Error::SearchTimeout { timeout: limit })
        .and_then(|r| r);
        let uids = reset_on_error(&mut slot, result)?;

        Ok(MessagePage {
            ids: uids.iter().map(ToString::to_string).collect(),
            next_page_token: None,
        })
    }

    #[instrument(name = "ImapMailbox::get", skip(self))]
    async fn get_message(&self, id: &str) -> Result<FetchedMessage> {
        let uid: u32 = id.parse().map_err(|_| Error::MessageNotFound {
            message_id: id.to_string(),
        })?;
        let limit = self.config.timeouts.message_fetch;

        let mut slot = self.session.lock().await;
        let session = self.open_session(&mut slot).await?;

        let result = timeout(limit, session::fetch_message(session, uid))
            .await
            .map_err(|_| Error::FetchTimeout {
                message_id: id.to_string(),
                timeout: limit,
            })
            .and_then(|r| r);
        let fetch = reset_on_error(&mut slot, result)?;
        drop(slot);

        let Some(fetch) = fetch else {
            return Err(Error::MessageNotFound {
                message_id: id.to_string(),
            });
        };
        let Some(raw) = fetch.body() else {
            return Err(Error::MalformedResponse {
                context: "IMAP fetch",
                message: format!("message {id} has no body"),
            });
        };
        let internal_date = fetch.internal_date().map(|d| d.with_timezone(&Utc));

        FetchedMessage::from_rfc822(id, raw, internal_date)
    }

    async fn probe(&self) -> Result<String> {
        let mut slot = self.session.lock().await;
        self.open_session(&mut slot).await?;
        Ok(self.config.email().to_string())
    }

    fn backend(&self) -> &'static str {
        "imap"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn config(inbox: Option<&str>) -> ImapConfig {
        let mut builder = ImapConfig::builder()
            .email("codes@gmail.com")
            .password("app-password");
        if let Some(inbox) = inbox {
            builder = builder.authorized_inbox(inbox);
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_search_date_covers_servers_behind_utc() {
        // 00:02 UTC on the 16th is still the 15th at -0700.
        let start = Utc.with_ymd_and_hms(2025, 10, 16, 0, 2, 0).unwrap();
        let since = search_since_date(&MessageQuery::received_after(start));
        assert_eq!(since, NaiveDate::from_ymd_opt(2025, 10, 15).unwrap());

        let west = FixedOffset::west_opt(7 * 3600).unwrap();
        let stamped = Utc
            .with_ymd_and_hms(2025, 10, 16, 0, 5, 0)
            .unwrap()
            .with_timezone(&west);
        assert!(stamped.date_naive() >= since);
    }

    #[test]
    fn test_rejects_unauthorized_login() {
        let err = ImapMailbox::new(config(Some("other@gmail.com"))).unwrap_err();
        assert!(matches!(err, Error::UnauthorizedInbox { .. }));

        assert!(ImapMailbox::new(config(Some("Codes@Gmail.com"))).is_ok());
        assert!(ImapMailbox::new(config(None)).is_ok());
    }

    #[tokio::test]
    async fn test_non_uid_id_is_not_found_without_connecting() {
        let mailbox = ImapMailbox::new(config(None)).unwrap();
        let err = mailbox.get_message("abc").await.unwrap_err();
        assert!(matches!(err, Error::MessageNotFound { .. }));
        assert!(mailbox.session.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_logout_without_session_is_noop() {
        let mailbox = ImapMailbox::new(config(None)).unwrap();
        assert!(mailbox.logout().await.is_ok());
        assert_eq!(mailbox.backend(), "imap");
    }
}
