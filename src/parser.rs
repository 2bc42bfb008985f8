//! Internal module for turning raw RFC 5322 messages into part trees.
//!
//! Used by the IMAP backend, which receives whole messages as bytes. Bodies
//! are kept transfer-encoded so the decoder is the single place where
//! encodings are undone.

use crate::decoder::{MessagePart, TransferEncoding};
use crate::error::{Error, Result};
use crate::mailbox::{FetchedMessage, Header};
use chrono::{DateTime, Utc};
use mailparse::{body::Body, parse_mail, MailHeaderMap, ParsedMail};
use tracing::{debug, warn};

pub(crate) fn parse_rfc822(
    id: String,
    raw: &[u8],
    internal_date: Option<DateTime<Utc>>,
) -> Result<FetchedMessage> {
    let parsed = parse_mail(raw).map_err(|source| Error::ParseEmail {
        message_id: id.clone(),
        source,
    })?;

    let headers = parsed
        .headers
        .iter()
        .map(|h| Header::new(h.get_key(), h.get_value()))
        .collect();
    let body = part_tree(&parsed);

    debug!(message_id = %id, size = raw.len(), "Parsed message");

    Ok(FetchedMessage {
        id,
        headers,
        body,
        internal_date,
    })
}

fn part_tree(parsed: &ParsedMail<'_>) -> MessagePart {
    let mime_type = parsed.ctype.mimetype.as_str();

    if !parsed.subparts.is_empty() {
        return MessagePart::container(mime_type, parsed.subparts.iter().map(part_tree).collect());
    }

    let encoding = TransferEncoding::from_header(
        parsed
            .headers
            .get_first_value("Content-Transfer-Encoding")
            .as_deref(),
    );

    let body = match parsed.get_body_encoded() {
        Body::Base64(b) | Body::QuotedPrintable(b) => b.get_raw().to_vec(),
        Body::SevenBit(b) | Body::EightBit(b) => b.get_raw().to_vec(),
        Body::Binary(b) => b.get_raw().to_vec(),
    };

    if body.is_empty() {
        warn!(mime_type, "Empty message part");
    }

    MessagePart::leaf(mime_type, encoding, body)
}
