//! Deterministic cue-word classifier.
//!
//! Stands in for the pretrained transformer where none is deployed (local
//! runs, smoke tests). It speaks the same raw vocabulary as the
//! sequence-classification head (`LABEL_0` present, `LABEL_1` absent,
//! `LABEL_2` possible) and reports a softmax confidence over cue counts.

use assertion_core::RawPrediction;

use super::{ItemResult, ModelInfo};
use crate::traits::ModelCapability;

const NEGATION_CUES: &[&str] = &[
    "no",
    "not",
    "denies",
    "denied",
    "without",
    "negative for",
    "ruled out",
    "free of",
    "absence of",
    "resolved",
];

const UNCERTAINTY_CUES: &[&str] = &[
    "may",
    "might",
    "could",
    "possibly",
    "possible",
    "likely",
    "probable",
    "probably",
    "suspect",
    "suspected",
    "suggests",
    "appears to",
    "potential",
    "cannot exclude",
    "questionable",
];

const PRESENT_LOGIT: f64 = 1.0;
const NEGATION_WEIGHT: f64 = 4.0;
const UNCERTAINTY_WEIGHT: f64 = 3.5;

#[derive(Debug, Clone)]
pub struct LexiconModel {
    name: String,
}

impl LexiconModel {
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: "lexicon-assertion-v1".to_string(),
        }
    }

    /// Classifies one sentence.
    #[must_use]
    pub fn score(&self, text: &str) -> RawPrediction {
        // Pad with spaces so every cue can be matched on word boundaries.
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();
        let padded = format!(" {} ", words.join(" "));

        let negations = count_cues(&padded, NEGATION_CUES);
        let uncertainties = count_cues(&padded, UNCERTAINTY_CUES);

        let logits = [
            PRESENT_LOGIT,
            NEGATION_WEIGHT * f64::from(negations),
            UNCERTAINTY_WEIGHT * f64::from(uncertainties),
        ];
        let (index, score) = softmax_max(&logits);
        RawPrediction::new(format!("LABEL_{index}"), score)
    }
}

impl Default for LexiconModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelCapability for LexiconModel {
    fn load(&self) -> anyhow::Result<ModelInfo> {
        Ok(ModelInfo {
            model_name: self.name.clone(),
            device: "cpu".to_string(),
            labels: vec![
                "LABEL_0".to_string(),
                "LABEL_1".to_string(),
                "LABEL_2".to_string(),
            ],
        })
    }

    fn classify_batch(&self, texts: &[String]) -> Vec<ItemResult> {
        texts.iter().map(|text| Ok(self.score(text))).collect()
    }
}

fn count_cues(padded: &str, cues: &[&str]) -> u32 {
    let hits = cues
        .iter()
        .map(|cue| padded.matches(&format!(" {cue} ")).count())
        .sum::<usize>();
    u32::try_from(hits).unwrap_or(u32::MAX)
}

/// Index and probability of the largest class after softmax.
fn softmax_max(logits: &[f64; 3]) -> (usize, f64) {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps = logits.map(|l| (l - max).exp());
    let total: f64 = exps.iter().sum();
    let (index, best) = exps
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |acc, (i, e)| if e > acc.1 { (i, e) } else { acc });
    (index, (best / total).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negation_is_absent_with_high_confidence() {
        let pred = LexiconModel::new().score("The patient denies chest pain.");
        assert_eq!(pred.label, "LABEL_1");
        assert!(pred.score > 0.9, "score was {}", pred.score);
    }

    #[test]
    fn hedging_is_possible() {
        let pred = LexiconModel::new().score("Findings may represent early pneumonia.");
        assert_eq!(pred.label, "LABEL_2");
    }

    #[test]
    fn plain_statement_is_present() {
        let pred = LexiconModel::new().score("Patient has a history of hypertension.");
        assert_eq!(pred.label, "LABEL_0");
        assert!(pred.score > 0.5 && pred.score <= 1.0);
    }

    #[test]
    fn cues_match_whole_words_only() {
        // "nothing" and "knot" must not count as "no"/"not".
        let pred = LexiconModel::new().score("Nothing remarkable, knot palpated.");
        assert_eq!(pred.label, "LABEL_0");
    }

    #[test]
    fn multi_word_cues_match() {
        let pred = LexiconModel::new().score("CT negative for pulmonary embolism.");
        assert_eq!(pred.label, "LABEL_1");
    }

    #[test]
    fn batch_returns_one_outcome_per_input() {
        let texts = vec!["No fever.".to_string(), "Fever present.".to_string()];
        let outcomes = LexiconModel::new().classify_batch(&texts);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].as_ref().unwrap().label, "LABEL_1");
        assert_eq!(outcomes[1].as_ref().unwrap().label, "LABEL_0");
    }

    #[test]
    fn load_describes_vocabulary() {
        let info = LexiconModel::new().load().unwrap();
        assert_eq!(info.labels.len(), 3);
        assert_eq!(info.device, "cpu");
    }
}
