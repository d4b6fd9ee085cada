//! Tower middleware layers for the operation pipeline.
//!
//! - [`metrics`]: Operation timing, request counters, and the error window
//! - [`load_shed`]: Semaphore-based concurrency limiting
//! - [`admission`]: Authorization, validation, and rate limiting
//! - [`timeout`]: Per-operation timeout enforcement
//! - [`pipeline`]: Composes all layers into a single service stack

pub mod admission;
pub mod load_shed;
pub mod metrics;
pub mod pipeline;
pub mod timeout;

pub use admission::AdmissionLayer;
pub use load_shed::LoadShedLayer;
pub use metrics::MetricsLayer;
pub use pipeline::{build_operation_pipeline, OperationPipeline};
pub use timeout::TimeoutLayer;
