//! `serde` helpers for rendering [`Duration`] values as fractional numbers.

use std::time::Duration;

use serde::Serializer;

/// Serializes a duration as fractional milliseconds.
///
/// # Errors
///
/// Propagates any error raised by the serializer.
pub fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64() * 1000.0)
}

/// Serializes a duration as fractional seconds.
///
/// # Errors
///
/// Propagates any error raised by the serializer.
pub fn as_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}
