//! Configuration for the sync engine, the read surface, and the mailbox backends.
//!
//! Every configuration type is built through a builder that validates on
//! [`build`](SyncConfigBuilder::build), and can also be loaded from
//! environment variables with `from_env`:
//!
//! ```
//! use code_sync::SyncConfig;
//! use std::time::Duration;
//!
//! let config = SyncConfig::builder()
//!     .lookback_minutes(15)
//!     .interval(Duration::from_secs(30))
//!     .build()
//!     .expect("valid config");
//!
//! assert_eq!(config.lookback_minutes, 15);
//! ```

use crate::error::{Error, Result};
use email_address::EmailAddress;
use secrecy::{ExposeSecret, SecretString};
use std::str::FromStr;
use std::time::Duration;

/// Default trailing window scanned by each cycle and served by reads.
pub const DEFAULT_LOOKBACK_MINUTES: u32 = 8;
/// Default delay between scheduler ticks.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(10);
/// Default age after which a running cycle is considered wedged.
pub const DEFAULT_STUCK_THRESHOLD: Duration = Duration::from_secs(120);
/// Default number of candidates per dedup lookup.
pub const DEFAULT_DEDUP_CHUNK_SIZE: usize = 100;
/// Default cap on rows returned by the privileged view.
pub const DEFAULT_PAGE_SIZE: usize = 100;
/// Default number of messages fetched concurrently within one cycle.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 4;

const DEFAULT_IMAP_HOST: &str = "imap.gmail.com";
const GMAIL_ALL_MAIL: &str = "[Gmail]/All Mail";

// ─────────────────────────────────────────────────────────────────────────────
// Environment helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Reads an environment variable, treating blank values as unset.
fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    env_var(name)
        .map(|raw| {
            raw.parse::<T>().map_err(|_| Error::InvalidConfig {
                message: format!("{name} must be a number, got '{raw}'"),
            })
        })
        .transpose()
}

fn env_required(name: &str) -> Result<String> {
    env_var(name).ok_or_else(|| Error::InvalidConfig {
        message: format!("{name} is required"),
    })
}

/// Splits a comma separated list, dropping blank entries.
pub(crate) fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn positive(name: &str, value: usize) -> Result<usize> {
    if value == 0 {
        return Err(Error::InvalidConfig {
            message: format!("{name} must be greater than zero"),
        });
    }
    Ok(value)
}

// ─────────────────────────────────────────────────────────────────────────────
// Sync engine
// ─────────────────────────────────────────────────────────────────────────────

/// Options consumed by [`SyncEngine`](crate::SyncEngine).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Messages received within this many minutes are scanned.
    pub lookback_minutes: u32,
    /// Delay between scheduler ticks.
    pub interval: Duration,
    /// A cycle running longer than this is force-reset by the next tick.
    pub stuck_threshold: Duration,
    /// Candidates per dedup lookup.
    pub dedup_chunk_size: usize,
    /// Messages fetched concurrently within one cycle.
    pub fetch_concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lookback_minutes: DEFAULT_LOOKBACK_MINUTES,
            interval: DEFAULT_SYNC_INTERVAL,
            stuck_threshold: DEFAULT_STUCK_THRESHOLD,
            dedup_chunk_size: DEFAULT_DEDUP_CHUNK_SIZE,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
        }
    }
}

impl SyncConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Loads the configuration from the environment.
    ///
    /// Recognized variables: `LOOKBACK_MINUTES`, `SYNC_INTERVAL_SECS`,
    /// `STUCK_THRESHOLD_SECS`, `DEDUP_CHUNK_SIZE`, `FETCH_CONCURRENCY`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a variable is not a number or a
    /// value fails validation.
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::builder();
        if let Some(minutes) = env_parse("LOOKBACK_MINUTES")? {
            builder = builder.lookback_minutes(minutes);
        }
        if let Some(secs) = env_parse("SYNC_INTERVAL_SECS")? {
            builder = builder.interval(Duration::from_secs(secs));
        }
        if let Some(secs) = env_parse("STUCK_THRESHOLD_SECS")? {
            builder = builder.stuck_threshold(Duration::from_secs(secs));
        }
        if let Some(size) = env_parse("DEDUP_CHUNK_SIZE")? {
            builder = builder.dedup_chunk_size(size);
        }
        if let Some(n) = env_parse("FETCH_CONCURRENCY")? {
            builder = builder.fetch_concurrency(n);
        }
        builder.build()
    }

    /// Returns the lookback window as a chrono duration.
    #[must_use]
    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.lookback_minutes))
    }
}

/// Builder for [`SyncConfig`].
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    lookback_minutes: Option<u32>,
    interval: Option<Duration>,
    stuck_threshold: Option<Duration>,
    dedup_chunk_size: Option<usize>,
    fetch_concurrency: Option<usize>,
}

impl SyncConfigBuilder {
    /// Sets the lookback window in minutes (default 8).
    #[must_use]
    pub fn lookback_minutes(mut self, minutes: u32) -> Self {
        self.lookback_minutes = Some(minutes);
        self
    }

    /// Sets the scheduler interval (default 10 seconds).
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Sets the stuck-cycle threshold (default 120 seconds).
    #[must_use]
    pub fn stuck_threshold(mut self, threshold: Duration) -> Self {
        self.stuck_threshold = Some(threshold);
        self
    }

    /// Sets the dedup chunk size (default 100).
    #[must_use]
    pub fn dedup_chunk_size(mut self, size: usize) -> Self {
        self.dedup_chunk_size = Some(size);
        self
    }

    /// Sets how many messages are fetched at once (default 4).
    #[must_use]
    pub fn fetch_concurrency(mut self, n: usize) -> Self {
        self.fetch_concurrency = Some(n);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is zero.
    pub fn build(self) -> Result<SyncConfig> {
        let defaults = SyncConfig::default();
        let lookback_minutes = self.lookback_minutes.unwrap_or(defaults.lookback_minutes);
        if lookback_minutes == 0 {
            return Err(Error::InvalidConfig {
                message: "lookback_minutes must be greater than zero".into(),
            });
        }
        let interval = self.interval.unwrap_or(defaults.interval);
        if interval.is_zero() {
            return Err(Error::InvalidConfig {
                message: "interval must be greater than zero".into(),
            });
        }

        Ok(SyncConfig {
            lookback_minutes,
            interval,
            stuck_threshold: self.stuck_threshold.unwrap_or(defaults.stuck_threshold),
            dedup_chunk_size: positive(
                "dedup_chunk_size",
                self.dedup_chunk_size.unwrap_or(defaults.dedup_chunk_size),
            )?,
            fetch_concurrency: positive(
                "fetch_concurrency",
                self.fetch_concurrency.unwrap_or(defaults.fetch_concurrency),
            )?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Read surface
// ─────────────────────────────────────────────────────────────────────────────

/// Options consumed by [`CodeQueryService`](crate::CodeQueryService).
///
/// Unlock passwords are stored as [`SecretString`] and never printed.
#[derive(Clone)]
pub struct ReadConfig {
    /// Records received within this many minutes are served.
    pub lookback_minutes: u32,
    /// Maximum rows returned by the operator view.
    pub page_size: usize,
    /// Lowercase domains a recipient lookup may target. Empty allows all.
    pub allowed_domains: Vec<String>,
    lock_passwords: Vec<SecretString>,
}

impl std::fmt::Debug for ReadConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadConfig")
            .field("lookback_minutes", &self.lookback_minutes)
            .field("page_size", &self.page_size)
            .field("allowed_domains", &self.allowed_domains)
            .field("lock_passwords", &format!("[{} REDACTED]", self.lock_passwords.len()))
            .finish()
    }
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            lookback_minutes: DEFAULT_LOOKBACK_MINUTES,
            page_size: DEFAULT_PAGE_SIZE,
            allowed_domains: Vec::new(),
            lock_passwords: Vec::new(),
        }
    }
}

impl ReadConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> ReadConfigBuilder {
        ReadConfigBuilder::default()
    }

    /// Loads the configuration from `LOOKBACK_MINUTES`, `PAGE_SIZE`,
    /// `ALLOWED_DOMAINS` and `LOCK_PASSWORDS`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] on unparseable or zero values.
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::builder();
        if let Some(minutes) = env_parse("LOOKBACK_MINUTES")? {
            builder = builder.lookback_minutes(minutes);
        }
        if let Some(size) = env_parse("PAGE_SIZE")? {
            builder = builder.page_size(size);
        }
        if let Some(domains) = env_var("ALLOWED_DOMAINS") {
            builder = builder.allowed_domains(split_list(&domains));
        }
        if let Some(passwords) = env_var("LOCK_PASSWORDS") {
            builder = builder.lock_passwords(split_list(&passwords));
        }
        builder.build()
    }

    /// Returns the lookback window as a chrono duration.
    #[must_use]
    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.lookback_minutes))
    }

    /// Returns `true` if `password` is one of the configured unlock passwords.
    ///
    /// A blank password or an empty password list never unlocks.
    #[must_use]
    pub fn is_unlock_password(&self, password: &str) -> bool {
        let password = password.trim();
        !password.is_empty()
            && self
                .lock_passwords
                .iter()
                .any(|candidate| candidate.expose_secret() == password)
    }

    /// Returns `true` if `domain` may be looked up.
    #[must_use]
    pub fn is_domain_allowed(&self, domain: &str) -> bool {
        self.allowed_domains.is_empty()
            || self
                .allowed_domains
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(domain))
    }
}

/// Builder for [`ReadConfig`].
#[derive(Default)]
pub struct ReadConfigBuilder {
    lookback_minutes: Option<u32>,
    page_size: Option<usize>,
    allowed_domains: Vec<String>,
    lock_passwords: Vec<String>,
}

impl std::fmt::Debug for ReadConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadConfigBuilder")
            .field("lookback_minutes", &self.lookback_minutes)
            .field("page_size", &self.page_size)
            .field("allowed_domains", &self.allowed_domains)
            .finish_non_exhaustive()
    }
}

impl ReadConfigBuilder {
    /// Sets the recency window in minutes (default 8).
    #[must_use]
    pub fn lookback_minutes(mut self, minutes: u32) -> Self {
        self.lookback_minutes = Some(minutes);
        self
    }

    /// Sets the row cap per read (default 100).
    #[must_use]
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Restricts recipient lookups to these domains.
    #[must_use]
    pub fn allowed_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_domains = domains
            .into_iter()
            .map(|d| d.into().trim().to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        self
    }

    /// Sets the passwords that unlock protected codes.
    #[must_use]
    pub fn lock_passwords<I, S>(mut self, passwords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock_passwords = passwords
            .into_iter()
            .map(Into::into)
            .filter(|p| !p.trim().is_empty())
            .collect();
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookback or page size is zero.
    pub fn build(self) -> Result<ReadConfig> {
        let lookback_minutes = self.lookback_minutes.unwrap_or(DEFAULT_LOOKBACK_MINUTES);
        if lookback_minutes == 0 {
            return Err(Error::InvalidConfig {
                message: "lookback_minutes must be greater than zero".into(),
            });
        }
        Ok(ReadConfig {
            lookback_minutes,
            page_size: positive("page_size", self.page_size.unwrap_or(DEFAULT_PAGE_SIZE))?,
            allowed_domains: self.allowed_domains,
            lock_passwords: self
                .lock_passwords
                .into_iter()
                .map(|p| SecretString::from(p.trim().to_string()))
                .collect(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// IMAP backend
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the IMAP mailbox backend.
///
/// The `password` field is stored as a [`SecretString`] to prevent accidental
/// logging. The login is stored as a validated [`EmailAddress`].
#[derive(Clone)]
pub struct ImapConfig {
    email: EmailAddress,
    password: SecretString,
    /// IMAP server hostname (default: `imap.gmail.com`).
    pub imap_host: String,
    /// IMAP server port (default: 993 for IMAPS).
    pub imap_port: u16,
    /// Mailbox to scan; see [`effective_mailbox`](Self::effective_mailbox).
    pub mailbox: Option<String>,
    /// When set, the login must equal this address.
    pub authorized_inbox: Option<String>,
    /// Timeout configuration.
    pub timeouts: TimeoutConfig,
}

impl std::fmt::Debug for ImapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapConfig")
            .field("email", &self.email.as_str())
            .field("password", &"[REDACTED]")
            .field("imap_host", &self.imap_host)
            .field("imap_port", &self.imap_port)
            .field("mailbox", &self.effective_mailbox())
            .field("authorized_inbox", &self.authorized_inbox)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl ImapConfig {
    /// Creates a new configuration builder.
    ///
    /// ```
    /// use code_sync::ImapConfig;
    ///
    /// let config = ImapConfig::builder()
    ///     .email("codes@gmail.com")
    ///     .password("app-password")
    ///     .build()
    ///     .expect("valid config");
    ///
    /// assert_eq!(config.effective_mailbox(), "[Gmail]/All Mail");
    /// ```
    #[must_use]
    pub fn builder() -> ImapConfigBuilder {
        ImapConfigBuilder::default()
    }

    /// Loads the configuration from `IMAP_HOST`, `IMAP_PORT`, `IMAP_USER`,
    /// `IMAP_PASSWORD`, `IMAP_MAILBOX` and `AUTHORIZED_INBOX`.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials are missing or invalid.
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::builder()
            .email(env_required("IMAP_USER")?)
            .password(env_required("IMAP_PASSWORD")?);
        if let Some(host) = env_var("IMAP_HOST") {
            builder = builder.imap_host(host);
        }
        if let Some(port) = env_parse("IMAP_PORT")? {
            builder = builder.imap_port(port);
        }
        if let Some(mailbox) = env_var("IMAP_MAILBOX") {
            builder = builder.mailbox(mailbox);
        }
        if let Some(inbox) = env_var("AUTHORIZED_INBOX") {
            builder = builder.authorized_inbox(inbox);
        }
        builder.build()
    }

    /// Returns the login address.
    #[must_use]
    pub fn email(&self) -> &str {
        self.email.as_str()
    }

    /// Returns the password for authentication.
    #[must_use]
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }

    /// Returns the full IMAP server address as "host:port".
    #[must_use]
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.imap_host, self.imap_port)
    }

    /// Returns the mailbox to scan.
    ///
    /// Gmail files every message under `[Gmail]/All Mail`, so that is the
    /// default for Gmail hosts; other servers default to `INBOX`.
    #[must_use]
    pub fn effective_mailbox(&self) -> &str {
        match &self.mailbox {
            Some(mailbox) => mailbox,
            None if self.imap_host.to_ascii_lowercase().contains("gmail.com") => GMAIL_ALL_MAIL,
            None => "INBOX",
        }
    }

    /// Checks the login against [`authorized_inbox`](Self::authorized_inbox).
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnauthorizedInbox`] on mismatch.
    pub fn check_authorized_inbox(&self) -> Result<()> {
        match &self.authorized_inbox {
            Some(expected) if !expected.eq_ignore_ascii_case(self.email()) => {
                Err(Error::UnauthorizedInbox {
                    expected: expected.clone(),
                    actual: self.email().to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Timeout configuration for IMAP operations.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Timeout for establishing TCP/TLS connection.
    pub connect: Duration,
    /// Timeout for IMAP authentication.
    pub auth: Duration,
    /// Timeout for selecting a mailbox.
    pub select: Duration,
    /// Timeout for searching message ids.
    pub search: Duration,
    /// Timeout for fetching one message.
    pub message_fetch: Duration,
    /// Timeout for logout operation.
    pub logout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            auth: Duration::from_secs(30),
            select: Duration::from_secs(10),
            search: Duration::from_secs(10),
            message_fetch: Duration::from_secs(30),
            logout: Duration::from_secs(5),
        }
    }
}

/// Validates an email address format.
fn validate_email(email: &str) -> Result<EmailAddress> {
    EmailAddress::parse_with_options(email, email_address::Options::default()).map_err(|_| {
        Error::InvalidEmailFormat {
            email: email.to_string(),
        }
    })
}

/// Builder for [`ImapConfig`].
#[derive(Default)]
pub struct ImapConfigBuilder {
    email: Option<String>,
    password: Option<String>,
    imap_host: Option<String>,
    imap_port: Option<u16>,
    mailbox: Option<String>,
    authorized_inbox: Option<String>,
    timeouts: Option<TimeoutConfig>,
}

impl std::fmt::Debug for ImapConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapConfigBuilder")
            .field("email", &self.email)
            .field("imap_host", &self.imap_host)
            .finish_non_exhaustive()
    }
}

impl ImapConfigBuilder {
    /// Sets the login address (required).
    #[must_use]
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Sets the password (required). For Gmail, use an app password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the IMAP server hostname.
    #[must_use]
    pub fn imap_host(mut self, host: impl Into<String>) -> Self {
        self.imap_host = Some(host.into());
        self
    }

    /// Sets the IMAP server port.
    #[must_use]
    pub fn imap_port(mut self, port: u16) -> Self {
        self.imap_port = Some(port);
        self
    }

    /// Sets the mailbox to scan.
    #[must_use]
    pub fn mailbox(mut self, mailbox: impl Into<String>) -> Self {
        self.mailbox = Some(mailbox.into());
        self
    }

    /// Binds this deployment to a single inbox.
    #[must_use]
    pub fn authorized_inbox(mut self, inbox: impl Into<String>) -> Self {
        self.authorized_inbox = Some(inbox.into().trim().to_lowercase());
        self
    }

    /// Sets timeout configuration.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if required fields are missing or invalid.
    pub fn build(self) -> Result<ImapConfig> {
        let email_raw = self.email.ok_or_else(|| Error::InvalidConfig {
            message: "email is required".into(),
        })?;
        let email = validate_email(&email_raw)?;

        let password_raw = self.password.ok_or_else(|| Error::InvalidConfig {
            message: "password is required".into(),
        })?;

        Ok(ImapConfig {
            email,
            password: SecretString::from(password_raw),
            imap_host: self.imap_host.unwrap_or_else(|| DEFAULT_IMAP_HOST.to_string()),
            imap_port: self.imap_port.unwrap_or(993),
            mailbox: self.mailbox,
            authorized_inbox: self.authorized_inbox.filter(|inbox| !inbox.is_empty()),
            timeouts: self.timeouts.unwrap_or_default(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Gmail backend
// ─────────────────────────────────────────────────────────────────────────────

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Configuration for the Gmail REST backend (OAuth2 refresh-token flow).
#[derive(Clone)]
pub struct GmailConfig {
    /// OAuth2 client id.
    pub client_id: String,
    client_secret: SecretString,
    refresh_token: SecretString,
    /// Base URL of the Gmail API.
    pub api_base: String,
    /// OAuth2 token endpoint.
    pub token_url: String,
    /// Ids requested per list page (Gmail caps this at 500).
    pub list_page_size: u32,
    /// Timeout applied to every HTTP request.
    pub request_timeout: Duration,
}

impl std::fmt::Debug for GmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GmailConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("token_url", &self.token_url)
            .field("list_page_size", &self.list_page_size)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl GmailConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> GmailConfigBuilder {
        GmailConfigBuilder::default()
    }

    /// Loads credentials from `GOOGLE_CLIENT_ID`, `GOOGLE_CLIENT_SECRET` and
    /// `GOOGLE_REFRESH_TOKEN`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if any credential is missing.
    pub fn from_env() -> Result<Self> {
        Self::builder()
            .client_id(env_required("GOOGLE_CLIENT_ID")?)
            .client_secret(env_required("GOOGLE_CLIENT_SECRET")?)
            .refresh_token(env_required("GOOGLE_REFRESH_TOKEN")?)
            .build()
    }

    pub(crate) fn client_secret(&self) -> &str {
        self.client_secret.expose_secret()
    }

    pub(crate) fn refresh_token(&self) -> &str {
        self.refresh_token.expose_secret()
    }
}

/// Builder for [`GmailConfig`].
#[derive(Default)]
pub struct GmailConfigBuilder {
    client_id: Option<String>,
    client_secret: Option<String>,
    refresh_token: Option<String>,
    api_base: Option<String>,
    token_url: Option<String>,
    list_page_size: Option<u32>,
    request_timeout: Option<Duration>,
}

impl std::fmt::Debug for GmailConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GmailConfigBuilder")
            .field("client_id", &self.client_id)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl GmailConfigBuilder {
    /// Sets the OAuth2 client id (required).
    #[must_use]
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Sets the OAuth2 client secret (required).
    #[must_use]
    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Sets the long-lived refresh token (required).
    #[must_use]
    pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    /// Overrides the Gmail API base URL.
    #[must_use]
    pub fn api_base(mut self, url: impl Into<String>) -> Self {
        self.api_base = Some(url.into());
        self
    }

    /// Overrides the OAuth2 token endpoint.
    #[must_use]
    pub fn token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = Some(url.into());
        self
    }

    /// Sets ids requested per list page (default 100).
    #[must_use]
    pub fn list_page_size(mut self, size: u32) -> Self {
        self.list_page_size = Some(size);
        self
    }

    /// Sets the per-request timeout (default 30 seconds).
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a credential is missing or the page size is out of range.
    pub fn build(self) -> Result<GmailConfig> {
        let required = |value: Option<String>, name: &str| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::InvalidConfig {
                    message: format!("{name} is required"),
                })
        };

        let list_page_size = self.list_page_size.unwrap_or(100);
        if !(1..=500).contains(&list_page_size) {
            return Err(Error::InvalidConfig {
                message: format!("list_page_size must be within 1..=500, got {list_page_size}"),
            });
        }

        Ok(GmailConfig {
            client_id: required(self.client_id, "client_id")?,
            client_secret: SecretString::from(required(self.client_secret, "client_secret")?),
            refresh_token: SecretString::from(required(self.refresh_token, "refresh_token")?),
            api_base: self
                .api_base
                .unwrap_or_else(|| GMAIL_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            token_url: self.token_url.unwrap_or_else(|| GOOGLE_TOKEN_URL.to_string()),
            list_page_size,
            request_timeout: self.request_timeout.unwrap_or(Duration::from_secs(30)),
        })
    }
}
