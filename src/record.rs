//! Code records and the envelope fields they are built from.

use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use mailparse::MailAddr;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::mailbox::Header;

/// Recipient stored when the `To` header is missing or unparseable.
pub const UNKNOWN_RECIPIENT: &str = "unknown";
/// Subject stored when the message has none.
pub const NO_SUBJECT: &str = "(no subject)";
/// Sender label shown when the `From` header is missing.
pub const UNKNOWN_SENDER: &str = "Unknown sender";

static ANGLE_ADDR: Lazy<Regex> = Lazy::new(|| Regex::new(r"<([^>]+)>").expect("valid regex"));

/// One extracted verification code, as persisted by the store.
///
/// Records are never mutated after creation. Two records are the same record
/// iff their [`DedupKey`]s are equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeRecord {
    /// The extracted token.
    pub code: String,
    /// Lowercase address the message was sent to, or `"unknown"`.
    pub recipient: String,
    /// Lowercase sender address, if the message had one.
    pub sender: Option<String>,
    /// Message subject.
    pub subject: String,
    /// When the message was received, at millisecond precision.
    pub received_at: DateTime<Utc>,
    /// Whether the message looked like a sensitive flow.
    pub is_protected: bool,
}

impl CodeRecord {
    /// Returns the identity of this record.
    #[must_use]
    pub fn key(&self) -> DedupKey {
        DedupKey {
            code: self.code.clone(),
            recipient: self.recipient.clone(),
            received_at_ms: self.received_at.timestamp_millis(),
        }
    }

    /// Returns the sender for display, falling back to [`UNKNOWN_SENDER`].
    #[must_use]
    pub fn sender_label(&self) -> &str {
        self.sender.as_deref().unwrap_or(UNKNOWN_SENDER)
    }
}

/// The `(code, recipient, receivedAt)` triple that identifies a record.
///
/// `received_at_ms` is compared at millisecond granularity, which is the
/// precision records are truncated to before they reach a store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    /// The extracted token.
    pub code: String,
    /// Normalized recipient.
    pub recipient: String,
    /// Receive time in milliseconds since the Unix epoch.
    pub received_at_ms: i64,
}

/// Header-derived fields shared by every code found in one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    /// Normalized recipient.
    pub recipient: String,
    /// Normalized sender.
    pub sender: Option<String>,
    /// Subject or [`NO_SUBJECT`].
    pub subject: String,
    /// Receive time, truncated to milliseconds.
    pub received_at: DateTime<Utc>,
}

impl MessageEnvelope {
    /// Builds an envelope from message headers.
    ///
    /// The receive time comes from the `Date` header and falls back to the
    /// provider's internal timestamp. Returns `None` when neither is usable,
    /// since a record without a stable time cannot be deduplicated.
    #[must_use]
    pub fn from_headers(headers: &[Header], internal_date: Option<DateTime<Utc>>) -> Option<Self> {
        let received_at = header_value(headers, "Date")
            .and_then(parse_date_header)
            .or(internal_date)?;

        Some(Self {
            recipient: normalize_address(header_value(headers, "To"))
                .unwrap_or_else(|| UNKNOWN_RECIPIENT.to_string()),
            sender: normalize_address(header_value(headers, "From")),
            subject: header_value(headers, "Subject")
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map_or_else(|| NO_SUBJECT.to_string(), str::to_string),
            received_at: received_at.trunc_subsecs(3),
        })
    }

    /// Creates the record for one code found in this message.
    #[must_use]
    pub fn record(&self, code: impl Into<String>, is_protected: bool) -> CodeRecord {
        CodeRecord {
            code: code.into(),
            recipient: self.recipient.clone(),
            sender: self.sender.clone(),
            subject: self.subject.clone(),
            received_at: self.received_at,
            is_protected,
        }
    }
}

/// Returns the first value of the named header, compared case-insensitively.
#[must_use]
pub fn header_value<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Reduces an address header to one lowercase address.
///
/// Handles `Name <user@example.com>`, bare addresses, and lists (the first
/// address wins). Blank input yields `None`.
#[must_use]
pub fn normalize_address(header: Option<&str>) -> Option<String> {
    let raw = header?.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(list) = mailparse::addrparse(raw) {
        let first = list.iter().find_map(|addr| match addr {
            MailAddr::Single(info) => Some(info.addr.clone()),
            MailAddr::Group(group) => group.addrs.first().map(|info| info.addr.clone()),
        });
        if let Some(addr) = first.filter(|a| !a.trim().is_empty()) {
            return Some(addr.trim().to_lowercase());
        }
    }

    let addr = ANGLE_ADDR
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map_or(raw, |m| m.as_str());
    Some(addr.trim().to_lowercase())
}

/// Parses an RFC 2822 `Date` header.
fn parse_date_header(value: &str) -> Option<DateTime<Utc>> {
    let secs = mailparse::dateparse(value).ok()?;
    Utc.timestamp_opt(secs, 0).single()
}
