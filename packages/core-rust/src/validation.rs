//! Input validation and normalization for clinical sentences.
//!
//! Validation is pure: it never touches the model and has no side effects.
//! Length limits are measured on the raw input with a cheap approximation
//! (whitespace-separated tokens and Unicode scalar values) so that oversized
//! input is rejected without allocating.

use std::borrow::Cow;

use crate::sanitize::mask_phi;

/// Punctuation kept verbatim in addition to letters, digits, and spaces.
const ALLOWED_PUNCTUATION: &[char] = &[
    '.', ',', '-', '?', '!', ';', ':', '\'', '"', '(', ')', '[', ']', '/', '%', '+', '=', '<', '>',
    '&', '#', '@', '*', '_', '~', '°', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}',
];

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Limits applied by [`TextValidator`].
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Maximum number of whitespace-separated tokens per text.
    pub max_tokens: usize,
    /// Maximum number of characters per text.
    pub max_chars: usize,
    /// Maximum number of texts in an explicit batch.
    pub max_batch_size: usize,
    /// Whether to mask PHI (SSNs, phones, e-mails, long identifiers).
    pub mask_phi: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            max_chars: 1000,
            max_batch_size: 100,
            mask_phi: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reasons a text or batch is rejected. Always a client fault.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("text must not be empty or whitespace only")]
    Empty,
    #[error("text has {tokens} tokens, limit is {max}")]
    TooManyTokens { tokens: usize, max: usize },
    #[error("text has {chars} characters, limit is {max}")]
    TooManyChars { chars: usize, max: usize },
    #[error("batch must contain at least one text")]
    EmptyBatch,
    #[error("batch has {len} texts, limit is {max}")]
    BatchTooLarge { len: usize, max: usize },
    #[error("text at index {index}: {source}")]
    Item {
        index: usize,
        #[source]
        source: Box<ValidationError>,
    },
}

// ---------------------------------------------------------------------------
// ValidText
// ---------------------------------------------------------------------------

/// Normalized text that passed validation. Borrows the input when
/// normalization and masking left it unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidText<'a> {
    text: Cow<'a, str>,
    tokens: usize,
}

impl<'a> ValidText<'a> {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Approximate token count of the normalized text.
    #[must_use]
    pub fn tokens(&self) -> usize {
        self.tokens
    }

    /// Whether the input was used as-is.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        matches!(self.text, Cow::Borrowed(_))
    }

    #[must_use]
    pub fn into_cow(self) -> Cow<'a, str> {
        self.text
    }

    /// The rewritten text, or `None` when the input was already clean.
    #[must_use]
    pub fn into_rewritten(self) -> Option<String> {
        match self.text {
            Cow::Owned(text) => Some(text),
            Cow::Borrowed(_) => None,
        }
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.text.into_owned()
    }
}

impl AsRef<str> for ValidText<'_> {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

// ---------------------------------------------------------------------------
// TextValidator
// ---------------------------------------------------------------------------

/// Rejects malformed input and normalizes what remains.
#[derive(Debug, Clone, Default)]
pub struct TextValidator {
    config: ValidationConfig,
}

impl TextValidator {
    #[must_use]
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Validates and normalizes a single text.
    ///
    /// Whitespace runs collapse to one space, control characters and symbols
    /// outside the allowed set are dropped, and PHI is masked when enabled.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Empty`] for empty, whitespace-only, or
    /// all-stripped input, and a length error when either limit is exceeded.
    pub fn validate<'a>(&self, text: &'a str) -> Result<ValidText<'a>, ValidationError> {
        let tokens = text.split_whitespace().count();
        if tokens == 0 {
            return Err(ValidationError::Empty);
        }
        if tokens > self.config.max_tokens {
            return Err(ValidationError::TooManyTokens {
                tokens,
                max: self.config.max_tokens,
            });
        }
        let chars = text.chars().count();
        if chars > self.config.max_chars {
            return Err(ValidationError::TooManyChars {
                chars,
                max: self.config.max_chars,
            });
        }

        let normalized = normalize(text);
        if normalized.is_empty() {
            return Err(ValidationError::Empty);
        }

        let masked = if self.config.mask_phi {
            match mask_phi(&normalized) {
                Cow::Owned(masked) => Some(masked),
                Cow::Borrowed(_) => None,
            }
        } else {
            None
        };
        let text = masked.map_or(normalized, Cow::Owned);
        let tokens = text.split_whitespace().count();
        Ok(ValidText { text, tokens })
    }

    /// Validates every text of an explicit batch, preserving order.
    ///
    /// The batch is rejected as a whole if any item is invalid.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyBatch`] or
    /// [`ValidationError::BatchTooLarge`] for a bad batch size, and
    /// [`ValidationError::Item`] naming the first invalid index otherwise.
    pub fn validate_batch<'a, S: AsRef<str>>(
        &self,
        texts: &'a [S],
    ) -> Result<Vec<ValidText<'a>>, ValidationError> {
        if texts.is_empty() {
            return Err(ValidationError::EmptyBatch);
        }
        if texts.len() > self.config.max_batch_size {
            return Err(ValidationError::BatchTooLarge {
                len: texts.len(),
                max: self.config.max_batch_size,
            });
        }
        texts
            .iter()
            .enumerate()
            .map(|(index, text)| {
                self.validate(text.as_ref())
                    .map_err(|source| ValidationError::Item {
                        index,
                        source: Box::new(source),
                    })
            })
            .collect()
    }
}

fn is_allowed(c: char) -> bool {
    c.is_alphanumeric() || ALLOWED_PUNCTUATION.contains(&c)
}

/// Collapses whitespace and drops disallowed characters in one pass.
fn normalize(text: &str) -> Cow<'_, str> {
    if is_normalized(text) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if !is_allowed(c) {
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(c);
    }
    Cow::Owned(out)
}

/// True when [`normalize`] would return `text` unchanged: non-empty, only
/// allowed characters, single ASCII spaces between words.
fn is_normalized(text: &str) -> bool {
    let mut after_space = true;
    for c in text.chars() {
        if c == ' ' {
            if after_space {
                return false;
            }
            after_space = true;
        } else if c.is_whitespace() || !is_allowed(c) {
            return false;
        } else {
            after_space = false;
        }
    }
    !after_space
}
