//! Extraction of verification codes from message text.
//!
//! A code is either exactly six ASCII digits, or two five-character
//! alphanumeric groups joined by a hyphen (`XXXXX-XXXXX`) whose ten
//! characters contain at least four digits. Both forms must sit on ASCII
//! word boundaries and must not touch a decimal or version point.
//!
//! ```
//! use code_sync::extractor::{extract_codes, Extractor, VerificationCodeExtractor};
//!
//! let codes = extract_codes("Your code is 482913. Backup: ab3d4-e5f61");
//! assert!(codes.contains("482913"));
//! assert!(codes.contains("ab3d4-e5f61"));
//!
//! // Version numbers are not codes
//! assert!(VerificationCodeExtractor::new().extract("v1.234567.8").is_empty());
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

/// Candidate grammar. The digit-count and period rules are applied per match.
///
/// Boundaries are ASCII-only, so a code touching a non-ASCII letter
/// (`验证码是482913`) still has a boundary on that side.
const CODE_PATTERN: &str =
    r"(?-u:\b)(?:[0-9]{6}|[A-Za-z0-9]{5}-[A-Za-z0-9]{5})(?-u:\b)";

/// Minimum digits in an `XXXXX-XXXXX` token.
const MIN_ALNUM_DIGITS: usize = 4;

static DEFAULT_EXTRACTOR: Lazy<VerificationCodeExtractor> =
    Lazy::new(VerificationCodeExtractor::new);

/// Trait for pulling code-shaped tokens out of text.
///
/// The result is a set: repeated tokens count once, and callers must not rely
/// on any ordering.
pub trait Extractor: Send + Sync {
    /// Returns the distinct codes found in `text`.
    fn extract(&self, text: &str) -> BTreeSet<String>;

    /// Returns a human-readable description of what this extractor looks for.
    ///
    /// Used in logging.
    fn description(&self) -> &str;
}

/// The default [`Extractor`] for six-digit and `XXXXX-XXXXX` codes.
#[derive(Debug, Clone)]
pub struct VerificationCodeExtractor {
    regex: Regex,
}

impl Default for VerificationCodeExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl VerificationCodeExtractor {
    /// Creates the extractor.
    ///
    /// # Panics
    ///
    /// Never in practice: the pattern is a compile-time constant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            regex: Regex::new(CODE_PATTERN).expect("valid regex"),
        }
    }

    fn accepts(text: &str, start: usize, end: usize) -> bool {
        let token = &text[start..end];
        if token.contains('-') && token.bytes().filter(u8::is_ascii_digit).count() < MIN_ALNUM_DIGITS
        {
            return false;
        }
        !preceded_by_period(text, start) && !followed_by_inner_period(text, end)
    }
}

impl Extractor for VerificationCodeExtractor {
    fn extract(&self, text: &str) -> BTreeSet<String> {
        let mut codes = BTreeSet::new();
        let mut at = 0;

        while at < text.len() {
            let Some(m) = self.regex.find_at(text, at) else {
                break;
            };
            if Self::accepts(text, m.start(), m.end()) {
                codes.insert(m.as_str().to_string());
                at = m.end();
            } else {
                // Matches start with an ASCII character, so start + 1 is a char boundary.
                at = m.start() + 1;
            }
        }

        codes
    }

    fn description(&self) -> &str {
        "6-digit or XXXXX-XXXXX verification code"
    }
}

/// Extracts codes with the default [`VerificationCodeExtractor`].
#[must_use]
pub fn extract_codes(text: &str) -> BTreeSet<String> {
    DEFAULT_EXTRACTOR.extract(text)
}

fn preceded_by_period(text: &str, start: usize) -> bool {
    text[..start].ends_with('.')
}

/// A following period is allowed only when it ends a sentence, i.e. when it
/// is followed by whitespace or the end of the text.
fn followed_by_inner_period(text: &str, end: usize) -> bool {
    let rest = &text[end..];
    let Some(after) = rest.strip_prefix('.') else {
        return false;
    };
    after.chars().next().is_some_and(|c| !c.is_whitespace())
}
