//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use code_sync::decoder::{MessagePart, TransferEncoding};
use code_sync::mailbox::{FetchedMessage, Header, MailboxClient, MessagePage, MessageQuery};
use code_sync::record::{CodeRecord, DedupKey};
use code_sync::store::{CodeStore, InsertReport, RecentFilter};
use code_sync::{Error, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// An in-memory mailbox with switchable failures.
///
/// Like an IMAP `SINCE` search it does not filter by the query, so messages
/// outside the window are returned and must be dropped by the caller.
pub struct ScriptedMailbox {
    messages: Mutex<Vec<FetchedMessage>>,
    page_size: usize,
    failing_ids: Mutex<HashSet<String>>,
    fail_listing: AtomicBool,
    hang_listing: AtomicBool,
    list_calls: AtomicUsize,
}

impl ScriptedMailbox {
    pub fn new(messages: Vec<FetchedMessage>) -> Self {
        Self {
            messages: Mutex::new(messages),
            page_size: 50,
            failing_ids: Mutex::new(HashSet::new()),
            fail_listing: AtomicBool::new(false),
            hang_listing: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn push(&self, message: FetchedMessage) {
        self.messages.lock().unwrap().push(message);
    }

    pub fn fail_message(&self, id: &str) {
        self.failing_ids.lock().unwrap().insert(id.to_string());
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn set_hang_listing(&self, hang: bool) {
        self.hang_listing.store(hang, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailboxClient for ScriptedMailbox {
    async fn list_message_ids(
        &self,
        _query: &MessageQuery,
        page_token: Option<&str>,
    ) -> Result<MessagePage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        if self.hang_listing.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(Error::GmailApi {
                endpoint: "messages.list".into(),
                status: 503,
                message: "backend unavailable".into(),
            });
        }

        let offset: usize = page_token.map_or(0, |t| t.parse().unwrap());
        let messages = self.messages.lock().unwrap();
        let ids: Vec<String> = messages
            .iter()
            .skip(offset)
            .take(self.page_size)
            .map(|m| m.id.clone())
            .collect();
        let next = offset + ids.len();
        let next_page_token = (next < messages.len()).then(|| next.to_string());

        Ok(MessagePage {
            ids,
            next_page_token,
        })
    }

    async fn get_message(&self, id: &str) -> Result<FetchedMessage> {
        if self.failing_ids.lock().unwrap().contains(id) {
            return Err(Error::FetchTimeout {
                message_id: id.to_string(),
                timeout: std::time::Duration::from_secs(30),
            });
        }
        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| Error::MessageNotFound {
                message_id: id.to_string(),
            })
    }

    async fn probe(&self) -> Result<String> {
        Ok("codes@example.com".to_string())
    }

    fn backend(&self) -> &'static str {
        "scripted"
    }
}

/// A store whose every call fails.
pub struct FailingStore;

fn unavailable() -> Error {
    Error::Store {
        operation: "test",
        source: sqlx::Error::PoolTimedOut,
    }
}

#[async_trait]
impl CodeStore for FailingStore {
    async fn find_matching(&self, _keys: &[DedupKey]) -> Result<Vec<DedupKey>> {
        Err(unavailable())
    }

    async fn insert_many(&self, _records: Vec<CodeRecord>) -> Result<InsertReport> {
        Err(unavailable())
    }

    async fn find_recent(
        &self,
        _since: DateTime<Utc>,
        _filter: &RecentFilter,
    ) -> Result<Vec<CodeRecord>> {
        Err(unavailable())
    }
}

/// A moment safely inside the default lookback window, whole seconds so the
/// `Date` header round-trips exactly.
pub fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    let t = Utc::now() - Duration::minutes(minutes);
    DateTime::from_timestamp(t.timestamp(), 0).unwrap()
}

fn headers(to: &str, subject: &str, at: DateTime<Utc>) -> Vec<Header> {
    vec![
        Header::new("From", "Acme Security <No-Reply@Acme.com>"),
        Header::new("To", to),
        Header::new("Subject", subject),
        Header::new("Date", at.to_rfc2822()),
    ]
}

pub fn plain_message(id: &str, to: &str, subject: &str, body: &str, at: DateTime<Utc>) -> FetchedMessage {
    FetchedMessage {
        id: id.to_string(),
        headers: headers(to, subject, at),
        body: MessagePart::leaf("text/plain", TransferEncoding::Identity, body),
        internal_date: Some(at),
    }
}

pub fn html_message(id: &str, to: &str, subject: &str, html: &str, at: DateTime<Utc>) -> FetchedMessage {
    FetchedMessage {
        id: id.to_string(),
        headers: headers(to, subject, at),
        body: MessagePart::container(
            "multipart/alternative",
            vec![MessagePart::leaf("text/html", TransferEncoding::Identity, html)],
        ),
        internal_date: Some(at),
    }
}

pub fn record(code: &str, to: &str, at: DateTime<Utc>, is_protected: bool) -> CodeRecord {
    CodeRecord {
        code: code.to_string(),
        recipient: to.to_string(),
        sender: Some("no-reply@acme.com".to_string()),
        subject: "Your code".to_string(),
        received_at: at,
        is_protected,
    }
}
