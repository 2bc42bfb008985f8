//! The read surface: recent codes for an operator or for one recipient.
//!
//! Every read resolves to a [`ReadOutcome`], which keeps "nothing to show",
//! "not allowed" and "try again later" apart so a UI never renders a silent
//! blank. Store failures are logged here and reach the caller only as
//! [`ReadOutcome::Unavailable`].

use crate::config::ReadConfig;
use crate::record::CodeRecord;
use crate::store::{CodeStore, RecentFilter};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, instrument};

/// Decides whether a session token grants operator access.
pub trait SessionVerifier: Send + Sync {
    /// Returns `true` if `token` belongs to a valid, unexpired session.
    fn verify(&self, token: &str) -> bool;
}

impl<F> SessionVerifier for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn verify(&self, token: &str) -> bool {
        self(token)
    }
}

/// Result of a read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReadOutcome<T> {
    /// Records were found.
    Found(T),
    /// The query succeeded but matched nothing.
    NoRecords {
        /// When the read was served.
        #[serde(rename = "checkedAt")]
        checked_at: DateTime<Utc>,
    },
    /// The caller's session is missing, invalid or expired.
    Unauthorized,
    /// The recipient is not an email address.
    InvalidRecipient,
    /// The recipient's domain is not served.
    Forbidden,
    /// The store could not be read.
    Unavailable {
        /// When the read was attempted.
        #[serde(rename = "checkedAt")]
        checked_at: DateTime<Utc>,
    },
}

impl<T> ReadOutcome<T> {
    /// HTTP status an API layer should answer with.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Found(_) | Self::NoRecords { .. } => 200,
            Self::InvalidRecipient => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::Unavailable { .. } => 503,
        }
    }

    /// Returns the payload if records were found.
    #[must_use]
    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(view) => Some(view),
            _ => None,
        }
    }
}

/// One code as shown to a reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeItem {
    /// The code.
    pub code: String,
    /// Sender address or "Unknown sender".
    pub from: String,
    /// Recipient address.
    pub to: String,
    /// Receive time in seconds since the Unix epoch.
    pub timestamp: i64,
    /// Receive time as RFC 3339.
    pub time: String,
    /// Whether the code came from a sensitive-looking message.
    pub is_protected: bool,
}

impl From<&CodeRecord> for CodeItem {
    fn from(record: &CodeRecord) -> Self {
        Self {
            code: record.code.clone(),
            from: record.sender_label().to_string(),
            to: record.recipient.clone(),
            timestamp: record.received_at.timestamp(),
            time: record.received_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            is_protected: record.is_protected,
        }
    }
}

/// Every recent code, for an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminView {
    /// Newest first, at most one page.
    pub items: Vec<CodeItem>,
    /// When the read was served.
    pub checked_at: DateTime<Utc>,
}

/// Recent codes for one recipient.
///
/// Unless unlocked, protected codes are withheld from `items` and only
/// counted in `locked_count`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientView {
    /// The normalized recipient.
    pub email: String,
    /// Visible codes, newest first.
    pub items: Vec<CodeItem>,
    /// How many protected codes were withheld.
    pub locked_count: usize,
    /// Whether a valid unlock password was supplied.
    pub unlocked: bool,
    /// When the read was served.
    pub checked_at: DateTime<Utc>,
}

/// Serves recent codes from a [`CodeStore`].
pub struct CodeQueryService {
    store: Arc<dyn CodeStore>,
    config: ReadConfig,
    verifier: Arc<dyn SessionVerifier>,
}

impl std::fmt::Debug for CodeQueryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeQueryService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CodeQueryService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        store: Arc<dyn CodeStore>,
        config: ReadConfig,
        verifier: Arc<dyn SessionVerifier>,
    ) -> Self {
        Self {
            store,
            config,
            verifier,
        }
    }

    /// All codes inside the lookback window, newest first, one page at most.
    #[instrument(name = "CodeQueryService::recent", skip_all)]
    pub async fn recent(&self, session_token: Option<&str>) -> ReadOutcome<AdminView> {
        let authorized = session_token.is_some_and(|token| self.verifier.verify(token));
        if !authorized {
            debug!(has_token = session_token.is_some(), "Rejected unauthorized read");
            return ReadOutcome::Unauthorized;
        }

        let filter = RecentFilter {
            recipient: None,
            limit: Some(self.config.page_size),
        };
        let checked_at = Utc::now();
        let records = match self.load(checked_at, &filter).await {
            Ok(records) => records,
            Err(outcome) => return outcome,
        };

        ReadOutcome::Found(AdminView {
            items: records.iter().map(CodeItem::from).collect(),
            checked_at,
        })
    }

    /// Codes sent to `email` inside the lookback window, newest first and
    /// uncapped.
    ///
    /// Protected codes are included only when `unlock_password` is one of
    /// the configured lock passwords.
    #[instrument(name = "CodeQueryService::for_recipient", skip(self, unlock_password))]
    pub async fn for_recipient(
        &self,
        email: &str,
        unlock_password: Option<&str>,
    ) -> ReadOutcome<RecipientView> {
        let email = email.trim().to_lowercase();
        let Some((_, domain)) = email.split_once('@') else {
            return ReadOutcome::InvalidRecipient;
        };
        if domain.is_empty() {
            return ReadOutcome::InvalidRecipient;
        }
        if !self.config.is_domain_allowed(domain) {
            debug!(domain, "Recipient domain not allowed");
            return ReadOutcome::Forbidden;
        }

        let filter = RecentFilter::recipient(email.clone());
        let checked_at = Utc::now();
        let records = match self.load(checked_at, &filter).await {
            Ok(records) => records,
            Err(outcome) => return outcome,
        };

        let unlocked = unlock_password.is_some_and(|p| self.config.is_unlock_password(p));
        let (visible, locked): (Vec<&CodeRecord>, Vec<&CodeRecord>) = records
            .iter()
            .partition(|record| unlocked || !record.is_protected);

        ReadOutcome::Found(RecipientView {
            email,
            items: visible.into_iter().map(CodeItem::from).collect(),
            locked_count: locked.len(),
            unlocked,
            checked_at,
        })
    }

    /// Loads the window, mapping empty results and failures to outcomes.
    async fn load<T>(
        &self,
        checked_at: DateTime<Utc>,
        filter: &RecentFilter,
    ) -> Result<Vec<CodeRecord>, ReadOutcome<T>> {
        let since = checked_at - self.config.lookback();
        match self.store.find_recent(since, filter).await {
            Ok(records) if records.is_empty() => Err(ReadOutcome::NoRecords { checked_at }),
            Ok(records) => Ok(records),
            Err(e) => {
                error!(error = %e, category = %e.category(), "Failed to read codes");
                Err(ReadOutcome::Unavailable { checked_at })
            }
        }
    }
}
