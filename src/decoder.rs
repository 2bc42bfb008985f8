//! Recovery of plain text and HTML from a message part tree.
//!
//! Mailbox backends translate whatever their transport delivers into a
//! [`MessagePart`] tree. [`decode`] walks that tree depth-first, undoes each
//! leaf's content-transfer-encoding, and concatenates text and HTML leaves in
//! traversal order. HTML leaves are also rendered to text and appended to
//! [`DecodedContent::text`] so that callers scanning text never miss
//! HTML-only content.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{trace, warn};

/// Deepest container nesting that is walked. Deeper parts are skipped.
pub const MAX_PART_DEPTH: usize = 32;

/// Rendering width handed to the HTML renderer; wide enough to never wrap a code.
const HTML_RENDER_WIDTH: usize = 1000;

const PART_SEPARATOR: &str = "\n";

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));

/// Content-Transfer-Encoding of a leaf body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferEncoding {
    /// `7bit`, `8bit`, `binary`, missing, or unknown.
    #[default]
    Identity,
    /// `base64`.
    Base64,
    /// `quoted-printable`.
    QuotedPrintable,
}

impl TransferEncoding {
    /// Maps a `Content-Transfer-Encoding` header value.
    ///
    /// Missing or unrecognized values are treated as identity.
    #[must_use]
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("base64") => Self::Base64,
            Some("quoted-printable") => Self::QuotedPrintable,
            _ => Self::Identity,
        }
    }
}

/// A node of a message body: either a leaf with content or a container of parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePart {
    /// A single body with its declared type and encoding.
    Leaf {
        /// Lowercase MIME type, e.g. `text/plain`.
        mime_type: String,
        /// Declared transfer encoding of `body`.
        encoding: TransferEncoding,
        /// Body bytes, still transfer-encoded.
        body: Vec<u8>,
    },
    /// A `multipart/*` (or `message/*`) node.
    Container {
        /// Lowercase MIME type, e.g. `multipart/alternative`.
        mime_type: String,
        /// Child parts in document order.
        parts: Vec<MessagePart>,
    },
}

impl MessagePart {
    /// Creates a leaf part.
    #[must_use]
    pub fn leaf(mime_type: &str, encoding: TransferEncoding, body: impl Into<Vec<u8>>) -> Self {
        Self::Leaf {
            mime_type: mime_type.trim().to_ascii_lowercase(),
            encoding,
            body: body.into(),
        }
    }

    /// Creates a container part.
    #[must_use]
    pub fn container(mime_type: &str, parts: Vec<MessagePart>) -> Self {
        Self::Container {
            mime_type: mime_type.trim().to_ascii_lowercase(),
            parts,
        }
    }
}

/// Text recovered from a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedContent {
    /// Plain text leaves plus the rendered text of HTML leaves.
    pub text: String,
    /// Raw HTML leaves.
    pub html: String,
}

impl DecodedContent {
    /// Returns text and HTML joined by a separator, the input used for extraction.
    #[must_use]
    pub fn combined(&self) -> String {
        format!("{} {}", self.text, self.html)
    }

    /// Returns `true` if neither text nor HTML was recovered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.html.is_empty()
    }
}

/// Decodes a part tree into text and HTML.
///
/// Never fails: bodies whose encoding cannot be undone are used as-is, and
/// invalid UTF-8 is replaced lossily.
#[must_use]
pub fn decode(root: &MessagePart) -> DecodedContent {
    let mut collector = Collector::default();
    collector.walk(root, 0);
    DecodedContent {
        text: collector.text.join(PART_SEPARATOR),
        html: collector.html.join(PART_SEPARATOR),
    }
}

#[derive(Default)]
struct Collector {
    text: Vec<String>,
    html: Vec<String>,
}

impl Collector {
    fn walk(&mut self, part: &MessagePart, depth: usize) {
        if depth > MAX_PART_DEPTH {
            warn!(depth, "Part tree exceeds maximum depth, skipping subtree");
            return;
        }

        match part {
            MessagePart::Container { parts, .. } => {
                for child in parts {
                    self.walk(child, depth + 1);
                }
            }
            MessagePart::Leaf {
                mime_type,
                encoding,
                body,
            } => match mime_type.as_str() {
                "text/plain" => {
                    push_non_blank(&mut self.text, decode_text(body, *encoding));
                }
                "text/html" => {
                    let html = decode_text(body, *encoding);
                    push_non_blank(&mut self.text, html_to_text(&html));
                    push_non_blank(&mut self.html, html);
                }
                other => trace!(mime_type = other, "Skipping non-text part"),
            },
        }
    }
}

fn push_non_blank(buffer: &mut Vec<String>, value: String) {
    let trimmed = value.trim();
    if !trimmed.is_empty() {
        buffer.push(trimmed.to_string());
    }
}

fn decode_text(body: &[u8], encoding: TransferEncoding) -> String {
    String::from_utf8_lossy(&decode_body(body, encoding)).into_owned()
}

/// Undoes a transfer encoding, falling back to the raw bytes on malformed input.
#[must_use]
pub fn decode_body(body: &[u8], encoding: TransferEncoding) -> Vec<u8> {
    match encoding {
        TransferEncoding::Identity => body.to_vec(),
        TransferEncoding::Base64 => {
            let cleaned: Vec<u8> = body
                .iter()
                .filter(|b| !b.is_ascii_whitespace())
                .copied()
                .collect();
            STANDARD.decode(&cleaned).unwrap_or_else(|e| {
                warn!(error = %e, "Invalid base64 body, using raw bytes");
                body.to_vec()
            })
        }
        TransferEncoding::QuotedPrintable => {
            quoted_printable::decode(body, quoted_printable::ParseMode::Robust).unwrap_or_else(
                |e| {
                    warn!(error = %e, "Invalid quoted-printable body, using raw bytes");
                    body.to_vec()
                },
            )
        }
    }
}

/// Renders HTML to plain text.
///
/// Falls back to stripping tags if the renderer rejects the document.
#[must_use]
pub fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), HTML_RENDER_WIDTH)
        .unwrap_or_else(|_| HTML_TAG.replace_all(html, " ").into_owned())
}
