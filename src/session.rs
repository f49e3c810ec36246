use std::fmt;
use std::sync::{Arc, Weak};

use image::{DynamicImage, GenericImageView};
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, MonotonicClock};
use crate::errors::{ErrorCode, Result, SegError};
use crate::frame::Frame;
use crate::options::{Delegate, RunningMode, SegmenterOptions};
use crate::result::{EngineResult, ResultBundle};
use crate::traits::{EngineFactory, SegmentationEngine, SegmenterListener};

/// Delivered through `on_error` when the engine fails without saying why.
pub const UNKNOWN_ERROR_MESSAGE: &str = "An unknown error has occurred";

/// Delivered through `on_error` when the engine cannot be constructed. The underlying
/// cause goes to the log.
pub const INIT_FAILURE_MESSAGE: &str =
    "Image segmenter failed to initialize. See error logs for details";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconfigured,
    Ready,
    Closed,
}

/// Delivery state shared by a session and the sinks handed to its engine.
struct Dispatcher {
    listener: RwLock<Option<Arc<dyn SegmenterListener>>>,
    clock: Arc<dyn Clock>,
}

/// Where an engine pushes asynchronous results and errors.
///
/// The sink only holds a weak reference to its session's delivery state. Once the
/// session is closed, set up again, or dropped, everything pushed here is discarded.
#[derive(Clone)]
pub struct ResultSink {
    dispatcher: Weak<Dispatcher>,
}

impl ResultSink {
    /// A sink that delivers nowhere.
    pub fn detached() -> Self {
        Self {
            dispatcher: Weak::new(),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.dispatcher
            .upgrade()
            .is_some_and(|dispatcher| dispatcher.listener.read().is_some())
    }

    /// Hand an engine result to the listener.
    ///
    /// The inference time is measured from `result.timestamp_ms` to now. Only the
    /// first segmentation is delivered.
    pub fn deliver_result(&self, result: EngineResult, image: &DynamicImage) {
        let Some(dispatcher) = self.dispatcher.upgrade() else {
            debug!(
                timestamp_ms = result.timestamp_ms,
                "session is gone, dropping result"
            );
            return;
        };

        // Held across the callback so close() cannot return while a delivery is running.
        let listener = dispatcher.listener.read();
        let Some(listener) = listener.as_ref() else {
            debug!(
                timestamp_ms = result.timestamp_ms,
                "listener detached, dropping result"
            );
            return;
        };

        let inference_time_ms = dispatcher
            .clock
            .now_ms()
            .saturating_sub(result.timestamp_ms);

        let extra = result.segmentations.len().saturating_sub(1);
        if extra > 0 {
            warn!(extra, "engine returned more than one segmentation, ignoring the rest");
        }

        match result.segmentations.into_iter().next() {
            Some(segmentation) => {
                let (input_width, input_height) = image.dimensions();
                listener.on_results(ResultBundle {
                    segmentation,
                    inference_time_ms,
                    input_width,
                    input_height,
                });
            }
            None => listener.on_error("Segmentation produced no output", ErrorCode::Generic),
        }
    }

    /// Forward an asynchronous engine failure to the listener.
    pub fn deliver_error(&self, message: Option<&str>) {
        let Some(dispatcher) = self.dispatcher.upgrade() else {
            debug!("session is gone, dropping error");
            return;
        };

        let listener = dispatcher.listener.read();
        if let Some(listener) = listener.as_ref() {
            let message = message
                .filter(|m| !m.is_empty())
                .unwrap_or(UNKNOWN_ERROR_MESSAGE);
            listener.on_error(message, ErrorCode::Generic);
        }
    }
}

impl fmt::Debug for ResultSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSink")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Owns one inference engine and mediates every request to it.
///
/// Listener callbacks run while delivery is locked against `close`, so a listener
/// must not close or set up its own session from inside a callback.
pub struct SegmenterSession<F: EngineFactory> {
    factory: F,
    options: SegmenterOptions,
    clock: Arc<dyn Clock>,
    engine: Option<F::Engine>,
    dispatcher: Option<Arc<Dispatcher>>,
    state: SessionState,
}

impl<F: EngineFactory> SegmenterSession<F> {
    pub fn new(factory: F) -> Self {
        Self::with_clock(factory, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(factory: F, clock: Arc<dyn Clock>) -> Self {
        Self {
            factory,
            options: SegmenterOptions::default(),
            clock,
            engine: None,
            dispatcher: None,
            state: SessionState::Unconfigured,
        }
    }

    /// `new` followed by `setup`.
    pub fn open(
        factory: F,
        options: SegmenterOptions,
        listener: Option<Arc<dyn SegmenterListener>>,
    ) -> Result<Self> {
        let mut session = Self::new(factory);
        session.setup(options, listener)?;
        Ok(session)
    }

    /// Build a fresh engine for `options`, replacing any engine already held.
    ///
    /// Live-stream mode without a listener fails with `SegError::Configuration` and
    /// leaves the session untouched. Engine construction failures are logged,
    /// reported to the listener, and leave the session `Closed`.
    pub fn setup(
        &mut self,
        options: SegmenterOptions,
        listener: Option<Arc<dyn SegmenterListener>>,
    ) -> Result<SessionState> {
        if options.running_mode.requires_listener() && listener.is_none() {
            return Err(SegError::Configuration {
                message: format!(
                    "a result listener must be set when running in {} mode",
                    options.running_mode
                ),
            });
        }

        self.close();

        let dispatcher = Arc::new(Dispatcher {
            listener: RwLock::new(listener.clone()),
            clock: Arc::clone(&self.clock),
        });
        let sink = ResultSink {
            dispatcher: Arc::downgrade(&dispatcher),
        };

        match self.factory.create(&options, sink) {
            Ok(engine) => {
                info!(
                    delegate = %options.delegate,
                    mode = %options.running_mode,
                    model = %options.model_path.display(),
                    "segmenter ready"
                );
                self.engine = Some(engine);
                self.dispatcher = Some(dispatcher);
                self.state = SessionState::Ready;
            }
            Err(err) => {
                error!(
                    kind = ?err.kind,
                    delegate = %options.delegate,
                    "Image segmenter failed to load model with error: {}",
                    err.message
                );
                if let Some(listener) = listener {
                    listener.on_error(INIT_FAILURE_MESSAGE, err.kind.error_code());
                }
                self.state = SessionState::Closed;
            }
        }

        self.options = options;
        Ok(self.state)
    }

    /// Detach the listener and release the engine. Idempotent.
    ///
    /// Work already inside the engine is not interrupted, its results are dropped.
    pub fn close(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.listener.write().take();
        }
        if self.engine.take().is_some() {
            debug!("segmenter closed");
        }
        if self.state == SessionState::Ready {
            self.state = SessionState::Closed;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.engine.is_none()
    }

    pub const fn state(&self) -> SessionState {
        self.state
    }

    pub const fn options(&self) -> &SegmenterOptions {
        &self.options
    }

    pub const fn delegate(&self) -> Delegate {
        self.options.delegate
    }

    pub const fn running_mode(&self) -> RunningMode {
        self.options.running_mode
    }

    /// Segment a still image, blocking until the engine is done.
    pub fn segment_image(&mut self, image: &DynamicImage) -> Result<ResultBundle> {
        self.ensure_still_image_mode("segment_image")?;
        let engine = self
            .engine
            .as_mut()
            .ok_or_else(|| SegError::not_ready("segment_image"))?;

        let started = self.clock.now_ms();
        let result = engine.segment(image)?;
        let inference_time_ms = self.clock.now_ms().saturating_sub(started);

        first_bundle(result, inference_time_ms, image.dimensions())
    }

    /// Segment several still images one after another.
    pub fn segment_batch(&mut self, images: &[DynamicImage]) -> Result<Vec<ResultBundle>> {
        self.ensure_still_image_mode("segment_batch")?;
        images
            .iter()
            .map(|image| self.segment_image(image))
            .collect()
    }

    /// Submit a camera frame for asynchronous segmentation.
    ///
    /// The frame is stamped with the session clock, rendered upright and handed to
    /// the engine. Results arrive later through the listener.
    pub fn segment_live_stream(&mut self, frame: Frame) -> Result<()> {
        if self.options.running_mode != RunningMode::LiveStream {
            return Err(SegError::InvalidState {
                operation: "segment_live_stream".to_string(),
                mode: self.options.running_mode,
            });
        }
        let engine = self
            .engine
            .as_mut()
            .ok_or_else(|| SegError::not_ready("segment_live_stream"))?;

        let timestamp_ms = self.clock.now_ms();
        let image = frame.into_engine_image();
        engine.segment_async(image, timestamp_ms)
    }

    fn ensure_still_image_mode(&self, operation: &str) -> Result<()> {
        match self.options.running_mode {
            RunningMode::SingleImage | RunningMode::BatchImage => Ok(()),
            mode => Err(SegError::InvalidState {
                operation: operation.to_string(),
                mode,
            }),
        }
    }
}

impl<F: EngineFactory> Drop for SegmenterSession<F> {
    fn drop(&mut self) {
        self.close();
    }
}

fn first_bundle(
    result: EngineResult,
    inference_time_ms: u64,
    (input_width, input_height): (u32, u32),
) -> Result<ResultBundle> {
    let extra = result.segmentations.len().saturating_sub(1);
    if extra > 0 {
        warn!(extra, "engine returned more than one segmentation, ignoring the rest");
    }

    let segmentation = result
        .segmentations
        .into_iter()
        .next()
        .ok_or_else(|| SegError::model("segment_image", "engine returned no segmentation"))?;

    Ok(ResultBundle {
        segmentation,
        inference_time_ms,
        input_width,
        input_height,
    })
}
