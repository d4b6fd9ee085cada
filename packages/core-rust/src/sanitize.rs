//! PHI masking for clinical text.
//!
//! Identifiers that commonly leak into free-text notes are replaced with
//! fixed placeholders before the text reaches the model or any log line.
//! Patterns are applied in a fixed order (SSN, phone, e-mail, long numeric
//! identifier) because later patterns would otherwise swallow earlier ones.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

static SSN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("SSN pattern compiles"));

static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b").expect("phone pattern compiles")
});

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
        .expect("email pattern compiles")
});

static LONG_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{6,}\b").expect("identifier pattern compiles"));

pub const SSN_PLACEHOLDER: &str = "[SSN]";
pub const PHONE_PLACEHOLDER: &str = "[PHONE]";
pub const EMAIL_PLACEHOLDER: &str = "[EMAIL]";
pub const ID_PLACEHOLDER: &str = "[ID]";

/// Masks SSNs, phone numbers, e-mail addresses, and 6+ digit identifiers.
///
/// Returns the input unchanged (borrowed) when nothing matched.
#[must_use]
pub fn mask_phi(text: &str) -> Cow<'_, str> {
    let mut out = Cow::Borrowed(text);
    for (pattern, placeholder) in [
        (&*SSN, SSN_PLACEHOLDER),
        (&*PHONE, PHONE_PLACEHOLDER),
        (&*EMAIL, EMAIL_PLACEHOLDER),
        (&*LONG_ID, ID_PLACEHOLDER),
    ] {
        let replaced = match pattern.replace_all(&out, placeholder) {
            Cow::Owned(replaced) => Some(replaced),
            Cow::Borrowed(_) => None,
        };
        if let Some(replaced) = replaced {
            out = Cow::Owned(replaced);
        }
    }
    out
}
