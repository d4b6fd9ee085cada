//! Assertion Core: label taxonomy, text validation, PHI masking, and result mapping.

pub mod durations;
pub mod label_map;
pub mod sanitize;
pub mod types;
pub mod validation;

pub use label_map::{LabelMap, MappingError, ResultMapper};
pub use types::{
    AssertionLabel, BatchPredictionRequest, PredictionRequest, PredictionResult, RawPrediction,
    RequestId,
};
pub use validation::{TextValidator, ValidText, ValidationConfig, ValidationError};
