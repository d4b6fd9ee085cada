//! Mapping from raw model output to the public assertion taxonomy.
//!
//! The lookup is strict: a raw label missing from the table is a data-contract
//! violation between the service and the model, never a guess. Scores pass
//! through unchanged once checked to lie in `[0, 1]`.

use std::time::Duration;

use tracing::error;

use crate::types::{AssertionLabel, PredictionResult, RawPrediction, RequestId};

/// Errors raised when model output violates the label or score contract.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MappingError {
    #[error("model emitted unknown label {raw_label:?}")]
    UnknownModelLabel { raw_label: String },
    #[error("model emitted score {score} for label {raw_label:?}, expected a value in [0, 1]")]
    InvalidModelOutput { raw_label: String, score: f64 },
}

// ---------------------------------------------------------------------------
// LabelMap
// ---------------------------------------------------------------------------

/// Fixed table from raw model label strings to canonical labels.
///
/// Matching ignores ASCII case. Canonical names always map to themselves.
#[derive(Debug, Clone)]
pub struct LabelMap {
    entries: Vec<(String, AssertionLabel)>,
}

impl LabelMap {
    /// Creates a table containing only the canonical identity entries.
    #[must_use]
    pub fn canonical() -> Self {
        Self {
            entries: AssertionLabel::ALL
                .into_iter()
                .map(|label| (label.as_str().to_string(), label))
                .collect(),
        }
    }

    /// Adds (or replaces) the mapping for `raw`.
    #[must_use]
    pub fn with(mut self, raw: impl Into<String>, label: AssertionLabel) -> Self {
        let raw = raw.into();
        self.entries.retain(|(existing, _)| !existing.eq_ignore_ascii_case(&raw));
        self.entries.push((raw, label));
        self
    }

    #[must_use]
    pub fn get(&self, raw: &str) -> Option<AssertionLabel> {
        let raw = raw.trim();
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(raw))
            .map(|(_, label)| *label)
    }

    /// Raw label strings known to this table.
    pub fn raw_labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(raw, _)| raw.as_str())
    }
}

impl Default for LabelMap {
    /// `LABEL_0`/`LABEL_1`/`LABEL_2` as emitted by the sequence-classification
    /// head, plus the canonical names.
    fn default() -> Self {
        Self::canonical()
            .with("LABEL_0", AssertionLabel::Present)
            .with("LABEL_1", AssertionLabel::Absent)
            .with("LABEL_2", AssertionLabel::Possible)
    }
}

// ---------------------------------------------------------------------------
// ResultMapper
// ---------------------------------------------------------------------------

/// Converts raw model output into [`PredictionResult`]s.
#[derive(Debug, Clone, Default)]
pub struct ResultMapper {
    labels: LabelMap,
}

impl ResultMapper {
    #[must_use]
    pub fn new(labels: LabelMap) -> Self {
        Self { labels }
    }

    #[must_use]
    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    /// Resolves a raw label and checks its score.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::UnknownModelLabel`] for a label outside the
    /// table and [`MappingError::InvalidModelOutput`] for a score that is not
    /// a finite value in `[0, 1]`.
    pub fn resolve(&self, raw_label: &str, score: f64) -> Result<AssertionLabel, MappingError> {
        let Some(label) = self.labels.get(raw_label) else {
            error!(raw_label, "model label outside the known vocabulary");
            return Err(MappingError::UnknownModelLabel {
                raw_label: raw_label.to_string(),
            });
        };
        if !(0.0..=1.0).contains(&score) {
            error!(raw_label, score, "model score outside [0, 1]");
            return Err(MappingError::InvalidModelOutput {
                raw_label: raw_label.to_string(),
                score,
            });
        }
        Ok(label)
    }

    /// Maps one raw prediction into a public result.
    ///
    /// # Errors
    ///
    /// See [`ResultMapper::resolve`].
    pub fn map(
        &self,
        raw: RawPrediction,
        request_id: RequestId,
        latency: Duration,
    ) -> Result<PredictionResult, MappingError> {
        let label = self.resolve(&raw.label, raw.score)?;
        Ok(PredictionResult {
            label,
            score: raw.score,
            raw_label: raw.label,
            latency,
            request_id,
        })
    }
}
