//! Error types for the code-sync crate.
//!
//! Every fallible operation returns [`Error`]. Errors are grouped into
//! [`ErrorCategory`] values and classified by retryability, which the sync
//! engine uses to decide how loudly to log a failed cycle.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while syncing, storing, or reading codes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration / validation errors (NOT retryable)
    // ─────────────────────────────────────────────────────────────────────────
    /// Invalid email address format.
    #[error("invalid email format: {email}")]
    InvalidEmailFormat {
        /// The invalid email address.
        email: String,
    },

    /// Invalid configuration provided.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// Invalid DNS name for TLS.
    #[error("invalid DNS name for host '{host}'")]
    InvalidDnsName {
        /// The invalid hostname.
        host: String,
        /// The underlying DNS name error.
        #[source]
        source: rustls::client::InvalidDnsNameError,
    },

    /// The mailbox login does not match the inbox this deployment is bound to.
    #[error("mailbox login {actual} does not match authorized inbox {expected}")]
    UnauthorizedInbox {
        /// The configured authorized inbox.
        expected: String,
        /// The login that was attempted.
        actual: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Network / connection errors (RETRYABLE)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to establish TCP connection.
    #[error("failed to connect to {target}")]
    TcpConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to establish TLS connection.
    #[error("failed to establish TLS connection to {target}")]
    TlsConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// HTTP transport failure talking to the Gmail API.
    #[error("HTTP request to {endpoint} failed")]
    Http {
        /// The endpoint that was called.
        endpoint: String,
        /// The underlying HTTP client error.
        #[source]
        source: reqwest::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Timeout errors (RETRYABLE except logout)
    // ─────────────────────────────────────────────────────────────────────────
    /// Connection timeout.
    #[error("connection timeout to {target} after {timeout:?}")]
    ConnectTimeout {
        /// The target address.
        target: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Authentication timeout.
    #[error("authentication timeout for {email} after {timeout:?}")]
    AuthTimeout {
        /// The email address used for authentication.
        email: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Mailbox selection timeout.
    #[error("mailbox selection timeout for '{mailbox}' after {timeout:?}")]
    SelectTimeout {
        /// The mailbox name.
        mailbox: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Message search timeout.
    #[error("message search timeout after {timeout:?}")]
    SearchTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Message fetch timeout.
    #[error("message fetch timeout for message {message_id} after {timeout:?}")]
    FetchTimeout {
        /// The message being fetched.
        message_id: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Logout timeout (not critical).
    #[error("logout timeout after {timeout:?}")]
    LogoutTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Mailbox protocol errors (RETRYABLE - could be transient server issues)
    // ─────────────────────────────────────────────────────────────────────────
    /// IMAP login failed.
    #[error("IMAP login failed for {email}")]
    ImapLogin {
        /// The email address used for login.
        email: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Failed to select mailbox.
    #[error("failed to select mailbox '{mailbox}'")]
    SelectMailbox {
        /// The mailbox name.
        mailbox: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP search failed.
    #[error("IMAP search failed")]
    ImapSearch {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP fetch failed.
    #[error("IMAP fetch failed for message {message_id}")]
    ImapFetch {
        /// The message that failed.
        message_id: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP logout failed.
    #[error("IMAP logout failed")]
    ImapLogout {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// The Gmail API answered with a non-success status.
    #[error("Gmail API {endpoint} returned {status}: {message}")]
    GmailApi {
        /// The endpoint that was called.
        endpoint: String,
        /// HTTP status code.
        status: u16,
        /// Error text from the response body.
        message: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Parsing errors (NOT retryable - malformed content won't change)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to parse an RFC 5322 message.
    #[error("failed to parse message {message_id}")]
    ParseEmail {
        /// The message that could not be parsed.
        message_id: String,
        /// The underlying parse error.
        #[source]
        source: mailparse::MailParseError,
    },

    /// A provider response was missing a required field.
    #[error("malformed {context} response: {message}")]
    MalformedResponse {
        /// What was being read.
        context: &'static str,
        /// What was wrong with it.
        message: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Store errors (RETRYABLE)
    // ─────────────────────────────────────────────────────────────────────────
    /// A persistent store operation failed.
    #[error("store {operation} failed")]
    Store {
        /// The operation that failed.
        operation: &'static str,
        /// The underlying database error.
        #[source]
        source: sqlx::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Lookup errors (NOT retryable)
    // ─────────────────────────────────────────────────────────────────────────
    /// The mailbox has no message with this identifier.
    #[error("message {message_id} not found")]
    MessageNotFound {
        /// The identifier that was requested.
        message_id: String,
    },
}

impl Error {
    /// Returns `true` if this error represents a transient failure that might succeed on retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::TcpConnect { .. }
            | Error::TlsConnect { .. }
            | Error::Http { .. }
            | Error::ConnectTimeout { .. }
            | Error::AuthTimeout { .. }
            | Error::SelectTimeout { .. }
            | Error::SearchTimeout { .. }
            | Error::FetchTimeout { .. }
            | Error::ImapLogin { .. }
            | Error::SelectMailbox { .. }
            | Error::ImapSearch { .. }
            | Error::ImapFetch { .. }
            | Error::Store { .. } => true,

            // 429 and 5xx are worth another cycle; other statuses are not.
            Error::GmailApi { status, .. } => *status == 429 || *status >= 500,

            Error::InvalidEmailFormat { .. }
            | Error::InvalidConfig { .. }
            | Error::InvalidDnsName { .. }
            | Error::UnauthorizedInbox { .. }
            | Error::LogoutTimeout { .. }
            | Error::ImapLogout { .. }
            | Error::ParseEmail { .. }
            | Error::MalformedResponse { .. }
            | Error::MessageNotFound { .. } => false,
        }
    }

    /// Returns the error category for metrics/logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidEmailFormat { .. }
            | Error::InvalidConfig { .. }
            | Error::InvalidDnsName { .. }
            | Error::UnauthorizedInbox { .. } => ErrorCategory::Configuration,

            Error::TcpConnect { .. } | Error::TlsConnect { .. } | Error::Http { .. } => {
                ErrorCategory::Network
            }

            Error::ConnectTimeout { .. }
            | Error::AuthTimeout { .. }
            | Error::SelectTimeout { .. }
            | Error::SearchTimeout { .. }
            | Error::FetchTimeout { .. }
            | Error::LogoutTimeout { .. } => ErrorCategory::Timeout,

            Error::ImapLogin { .. }
            | Error::SelectMailbox { .. }
            | Error::ImapSearch { .. }
            | Error::ImapFetch { .. }
            | Error::ImapLogout { .. }
            | Error::GmailApi { .. } => ErrorCategory::Protocol,

            Error::ParseEmail { .. } | Error::MalformedResponse { .. } => ErrorCategory::Parse,

            Error::Store { .. } => ErrorCategory::Store,

            Error::MessageNotFound { .. } => ErrorCategory::NotFound,
        }
    }
}

/// Error categories for metrics and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Configuration or validation errors.
    Configuration,
    /// Network connectivity errors.
    Network,
    /// Timeout errors.
    Timeout,
    /// Mailbox protocol or API errors.
    Protocol,
    /// Message or response parsing errors.
    Parse,
    /// Persistent store errors.
    Store,
    /// Requested item does not exist.
    NotFound,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::Parse => write!(f, "parse"),
            ErrorCategory::Store => write!(f, "store"),
            ErrorCategory::NotFound => write!(f, "not_found"),
        }
    }
}
