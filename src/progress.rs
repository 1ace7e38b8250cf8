//! Progress-callback trait for orchestration events.
//!
//! Inject an [`Arc<dyn ParseProgressCallback>`] via
//! [`crate::orchestrator::OrchestratorBuilder::progress_callback`] to observe
//! a run as it moves through its states and writes its artifacts.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdfparse::{Artifact, ParseProgressCallback};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingCallback {
//!     written: AtomicUsize,
//! }
//!
//! impl ParseProgressCallback for CountingCallback {
//!     fn on_artifact_written(&self, _artifact: Artifact, key: &str) {
//!         self.written.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("wrote {key}");
//!     }
//! }
//! ```

use crate::config::Artifact;
use crate::orchestrator::RunState;
use std::sync::Arc;

/// Called by the orchestrator as a run progresses.
///
/// Runs are sequential, so calls for one run never overlap; a callback shared
/// between concurrent runs must still be `Send + Sync`. Every method defaults
/// to a no-op.
pub trait ParseProgressCallback: Send + Sync {
    /// Called on entering each state.
    fn on_state(&self, state: RunState) {
        let _ = state;
    }

    /// Called after an artifact was written.
    fn on_artifact_written(&self, artifact: Artifact, key: &str) {
        let _ = (artifact, key);
    }

    /// Called when an artifact dump failed.
    fn on_artifact_failed(&self, artifact: Artifact, key: &str, error: &str) {
        let _ = (artifact, key, error);
    }

    /// Called once every requested dump has been attempted.
    fn on_run_complete(&self, written: usize, failed: usize) {
        let _ = (written, failed);
    }
}

/// Shared progress callback.
pub type ProgressCallback = Arc<dyn ParseProgressCallback>;

/// A callback that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgressCallback;

impl ParseProgressCallback for NoopProgressCallback {}
