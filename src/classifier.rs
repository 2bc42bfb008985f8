//! Heuristic detection of codes that guard a sensitive flow.
//!
//! A message is "protected" when its text mentions a reset code or a password
//! reset, or when its HTML carries the `#f3f3f3` background used by a known
//! reset-email template. This is a display hint only: a false result never
//! blocks extraction or persistence.

use once_cell::sync::Lazy;
use regex::Regex;

const PROTECTED_PHRASES: [&str; 2] = ["reset code", "password reset"];

static RESET_TEMPLATE_BACKGROUND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)background-color\s*:\s*#f3f3f3\b").expect("valid regex"));

/// Returns `true` if the message looks like a password or account reset.
#[must_use]
pub fn classify(text: &str, html: &str) -> bool {
    let combined = format!("{text} {html}").to_lowercase();
    PROTECTED_PHRASES
        .iter()
        .any(|phrase| combined.contains(phrase))
        || RESET_TEMPLATE_BACKGROUND.is_match(html)
}
