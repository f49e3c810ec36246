use crate::errors::{EngineInitError, ErrorCode, Result};
use crate::options::SegmenterOptions;
use crate::result::{EngineResult, ResultBundle};
use crate::session::ResultSink;
use image::DynamicImage;

/// Receiver of everything a session reports back to the application.
///
/// Callbacks may arrive on a thread other than the one that submitted the work.
pub trait SegmenterListener: Send + Sync {
    fn on_error(&self, message: &str, code: ErrorCode);

    fn on_results(&self, bundle: ResultBundle);
}

/// Abstraction over the inference runtime that actually segments images.
///
/// The session only depends on this trait, so the runtime can be swapped for a
/// scripted one in tests.
pub trait SegmentationEngine {
    /// Segment a still image and block until the result is available.
    fn segment(&mut self, image: &DynamicImage) -> Result<EngineResult>;

    /// Queue a live-stream image and return immediately. The outcome is pushed to
    /// the `ResultSink` the engine was created with.
    fn segment_async(&mut self, image: DynamicImage, timestamp_ms: u64) -> Result<()>;
}

/// Builds engines for a session.
///
/// Construction failures come back as a tagged `EngineInitError` so the session can
/// tell a bad configuration from an unsupported delegate.
pub trait EngineFactory {
    type Engine: SegmentationEngine;

    fn create(
        &self,
        options: &SegmenterOptions,
        sink: ResultSink,
    ) -> std::result::Result<Self::Engine, EngineInitError>;
}
