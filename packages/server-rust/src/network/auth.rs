//! API-key authorization and client identity for rate limiting.

use std::fmt;
use std::net::SocketAddr;

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use subtle::{Choice, ConstantTimeEq};

pub const X_API_KEY: &str = "x-api-key";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Length of the hashed key prefix used as a bucket key.
const HASHED_KEY_LEN: usize = 16;

/// Accepted API keys. An empty set disables authorization.
#[derive(Clone, Default)]
pub struct ApiKeyAuth {
    keys: Vec<Vec<u8>>,
}

impl ApiKeyAuth {
    #[must_use]
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys = keys
            .into_iter()
            .map(|k| k.as_ref().trim().as_bytes().to_vec())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keys }
    }

    /// Parses the comma-separated form used by `API_KEYS`.
    #[must_use]
    pub fn from_csv(raw: &str) -> Self {
        Self::new(raw.split(','))
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.keys.is_empty()
    }

    /// Whether a request presenting `key` may proceed.
    ///
    /// Every configured key is compared in constant time, so the position of
    /// a match is not observable.
    #[must_use]
    pub fn authorize(&self, key: Option<&str>) -> bool {
        if !self.is_enabled() {
            return true;
        }
        let Some(key) = key else {
            return false;
        };
        let matched = self
            .keys
            .iter()
            .fold(Choice::from(0), |acc, accepted| {
                acc | accepted.as_slice().ct_eq(key.as_bytes())
            });
        matched.into()
    }
}

impl fmt::Debug for ApiKeyAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyAuth")
            .field("keys", &self.keys.len())
            .finish()
    }
}

/// The key presented by a request: `Authorization: Bearer <key>`, else
/// `X-API-Key`.
#[must_use]
pub fn presented_key(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            let (scheme, token) = v.trim().split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
        })
        .filter(|t| !t.is_empty());

    bearer.or_else(|| {
        headers
            .get(X_API_KEY)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|k| !k.is_empty())
    })
}

/// Rate-limit identity for a request.
///
/// A presented key is hashed so raw keys never sit in the bucket map. Without
/// one, the first `X-Forwarded-For` hop is used when `trust_forwarded` is set,
/// else the peer address. `None` means the caller is unidentifiable and shares
/// the anonymous bucket.
#[must_use]
pub fn client_key(
    api_key: Option<&str>,
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_forwarded: bool,
) -> Option<String> {
    if let Some(key) = api_key {
        let mut digest = hex::encode(Sha256::digest(key.as_bytes()));
        digest.truncate(HASHED_KEY_LEN);
        return Some(digest);
    }

    let forwarded = trust_forwarded
        .then(|| headers.get(X_FORWARDED_FOR))
        .flatten()
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty());
    if let Some(hop) = forwarded {
        return Some(hop.to_string());
    }

    peer.map(|addr| addr.ip().to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
