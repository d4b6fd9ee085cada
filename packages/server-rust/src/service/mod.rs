//! Prediction service and its operation pipeline.
//!
//! 1. **Facade** (`assertion`): builds an `Operation` per request and owns every component
//! 2. **Middleware** (`middleware`): Tower layers (metrics, load-shedding, admission, timeout)
//! 3. **Classification** (`classify`): scheduling, inference, and result mapping
//! 4. **Background workers** (`worker`): periodic tasks (bucket sweeping)

pub mod assertion;
pub mod classify;
pub mod config;
pub mod middleware;
pub mod operation;
pub mod worker;

// Re-export key types for convenient access.
pub use assertion::{AssertionService, CallerContext, ANONYMOUS_CLIENT};
pub use classify::ClassifyService;
pub use config::ServerConfig;
pub use operation::{
    BatchResponse, Endpoint, ItemError, ItemOutcome, Operation, OperationContext, OperationError,
    OperationResponse,
};
pub use worker::{BackgroundRunnable, BackgroundWorker};
