pub mod capture;
pub mod core;
pub mod jobs;

// --- Primary core exports ---
pub use crate::core::types;
pub use crate::core::types::*;
pub use crate::core::AppState;

pub use crate::capture::{CaptureError, CaptureRunner, CaptureSession};
pub use crate::jobs::{Job, JobStatus, JobStore};
