use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::durations;

/// Canonical assertion category for a clinical condition mentioned in a sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssertionLabel {
    /// The condition is confirmed.
    Present,
    /// The condition is negated.
    Absent,
    /// The condition is uncertain or hedged.
    Possible,
}

impl AssertionLabel {
    /// Every canonical label, in a fixed order usable as an array index.
    pub const ALL: [Self; 3] = [Self::Present, Self::Absent, Self::Possible];

    /// Upper-case wire name of the label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "PRESENT",
            Self::Absent => "ABSENT",
            Self::Possible => "POSSIBLE",
        }
    }

    /// Stable position of the label within [`AssertionLabel::ALL`].
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Present => 0,
            Self::Absent => 1,
            Self::Possible => 2,
        }
    }

    /// Parses a canonical label name, ignoring ASCII case and surrounding whitespace.
    #[must_use]
    pub fn from_canonical(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|label| label.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for AssertionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque identifier attached to every prediction for tracing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("req-{}", uuid::Uuid::new_v4().simple()))
    }

    /// Wraps an identifier supplied by the caller (e.g. an `X-Request-Id` header).
    #[must_use]
    pub fn from_external(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single prediction request. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictionRequest {
    text: String,
    client_id: Option<String>,
}

impl PredictionRequest {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            client_id: None,
        }
    }

    /// Attaches the client key used for rate limiting.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Consumes the request, returning the raw text.
    #[must_use]
    pub fn into_text(self) -> String {
        self.text
    }
}

/// An explicit batch of texts submitted by one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPredictionRequest {
    texts: Vec<String>,
    client_id: Option<String>,
}

impl BatchPredictionRequest {
    #[must_use]
    pub fn new(texts: Vec<String>) -> Self {
        Self {
            texts,
            client_id: None,
        }
    }

    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    #[must_use]
    pub fn texts(&self) -> &[String] {
        &self.texts
    }

    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    #[must_use]
    pub fn into_texts(self) -> Vec<String> {
        self.texts
    }
}

/// Unmapped model output for one input: the model's own label string and its
/// maximum class probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPrediction {
    pub label: String,
    pub score: f64,
}

impl RawPrediction {
    #[must_use]
    pub fn new(label: impl Into<String>, score: f64) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

/// Public prediction outcome for one input.
///
/// `label` is always derived from `raw_label` through the label map, and
/// `score` is the model's maximum class probability, guaranteed in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub label: AssertionLabel,
    pub score: f64,
    pub raw_label: String,
    #[serde(rename = "prediction_time_ms", serialize_with = "durations::as_millis")]
    pub latency: Duration,
    pub request_id: RequestId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_wire_names_are_upper_case() {
        assert_eq!(AssertionLabel::Present.as_str(), "PRESENT");
        assert_eq!(AssertionLabel::Absent.to_string(), "ABSENT");
        assert_eq!(
            serde_json::to_value(AssertionLabel::Possible).unwrap(),
            "POSSIBLE"
        );
    }

    #[test]
    fn label_indices_match_all_order() {
        for (i, label) in AssertionLabel::ALL.into_iter().enumerate() {
            assert_eq!(label.index(), i);
        }
    }

    #[test]
    fn from_canonical_ignores_case_and_whitespace() {
        assert_eq!(
            AssertionLabel::from_canonical(" absent "),
            Some(AssertionLabel::Absent)
        );
        assert_eq!(
            AssertionLabel::from_canonical("Possible"),
            Some(AssertionLabel::Possible)
        );
        assert_eq!(AssertionLabel::from_canonical("CONDITIONAL"), None);
        assert_eq!(AssertionLabel::from_canonical(""), None);
    }

    #[test]
    fn generated_request_ids_are_unique() {
        let a = RequestId::generate();
        let b = RequestId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("req-"));
    }

    #[test]
    fn prediction_request_carries_optional_client() {
        let req = PredictionRequest::new("No fever.");
        assert_eq!(req.client_id(), None);

        let req = req.with_client_id("10.0.0.1");
        assert_eq!(req.client_id(), Some("10.0.0.1"));
        assert_eq!(req.text(), "No fever.");
    }

    #[test]
    fn prediction_result_serializes_latency_in_millis() {
        let result = PredictionResult {
            label: AssertionLabel::Absent,
            score: 0.98,
            raw_label: "LABEL_1".to_string(),
            latency: Duration::from_micros(45_200),
            request_id: RequestId::from_external("req-1"),
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["label"], "ABSENT");
        assert_eq!(json["raw_label"], "LABEL_1");
        assert_eq!(json["request_id"], "req-1");
        let ms = json["prediction_time_ms"].as_f64().unwrap();
        assert!((ms - 45.2).abs() < 1e-9);
    }
}
