use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use image::{DynamicImage, GenericImageView, GrayImage, Luma};
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::errors::{EngineInitError, ErrorCode, Result};
use crate::listener::SegmenterEvent;
use crate::options::SegmenterOptions;
use crate::result::{EngineResult, ResultBundle, Segmentation};
use crate::session::ResultSink;
use crate::traits::{EngineFactory, SegmentationEngine, SegmenterListener};

/// Counters shared by a `MockEngineFactory` and every engine it builds.
#[derive(Debug, Default)]
pub struct MockEngineStats {
    created: AtomicUsize,
    live: AtomicUsize,
    segment_calls: AtomicUsize,
    submissions: AtomicUsize,
}

impl MockEngineStats {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Engines built and not yet dropped.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn segment_calls(&self) -> usize {
        self.segment_calls.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }
}

/// A live-stream request accepted by a mock engine and not yet answered.
pub struct PendingRequest {
    pub image: DynamicImage,
    pub timestamp_ms: u64,
    sink: ResultSink,
}

/// Answers pending live-stream requests in submission order, on whatever thread
/// calls it.
#[derive(Clone, Default)]
pub struct MockEngineController {
    pending: Arc<Mutex<VecDeque<PendingRequest>>>,
}

impl MockEngineController {
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn pending_timestamps(&self) -> Vec<u64> {
        self.pending.lock().iter().map(|r| r.timestamp_ms).collect()
    }

    /// Answer the oldest request with a mask covering the submitted image.
    pub fn complete_next(&self) -> bool {
        self.answer(|request| {
            let (width, height) = request.image.dimensions();
            vec![mock_segmentation(width, height)]
        })
    }

    pub fn complete_next_with(&self, segmentations: Vec<Segmentation>) -> bool {
        self.answer(move |_| segmentations)
    }

    pub fn fail_next(&self, message: Option<&str>) -> bool {
        let Some(request) = self.pending.lock().pop_front() else {
            return false;
        };
        request.sink.deliver_error(message);
        true
    }

    fn answer(&self, outputs: impl FnOnce(&PendingRequest) -> Vec<Segmentation>) -> bool {
        // Popped before delivery so the lock is not held across the callback.
        let Some(request) = self.pending.lock().pop_front() else {
            return false;
        };
        let result = EngineResult {
            segmentations: outputs(&request),
            timestamp_ms: request.timestamp_ms,
        };
        request.sink.deliver_result(result, &request.image);
        true
    }
}

/// Scripted engine factory for tests.
#[derive(Clone, Default)]
pub struct MockEngineFactory {
    stats: Arc<MockEngineStats>,
    controller: MockEngineController,
    failure: Option<EngineInitError>,
}

impl MockEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `create` call fails with `failure`.
    pub fn failing(mut self, failure: EngineInitError) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn stats(&self) -> Arc<MockEngineStats> {
        Arc::clone(&self.stats)
    }

    pub fn controller(&self) -> MockEngineController {
        self.controller.clone()
    }
}

impl EngineFactory for MockEngineFactory {
    type Engine = MockEngine;

    fn create(
        &self,
        options: &SegmenterOptions,
        sink: ResultSink,
    ) -> std::result::Result<MockEngine, EngineInitError> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }

        self.stats.created.fetch_add(1, Ordering::SeqCst);
        self.stats.live.fetch_add(1, Ordering::SeqCst);
        Ok(MockEngine {
            options: options.clone(),
            stats: Arc::clone(&self.stats),
            controller: self.controller.clone(),
            sink,
        })
    }
}

/// Engine that answers still images immediately and parks live-stream requests in
/// its controller.
pub struct MockEngine {
    pub options: SegmenterOptions,
    stats: Arc<MockEngineStats>,
    controller: MockEngineController,
    sink: ResultSink,
}

impl SegmentationEngine for MockEngine {
    fn segment(&mut self, image: &DynamicImage) -> Result<EngineResult> {
        self.stats.segment_calls.fetch_add(1, Ordering::SeqCst);
        let (width, height) = image.dimensions();
        Ok(EngineResult::single(mock_segmentation(width, height), 0))
    }

    fn segment_async(&mut self, image: DynamicImage, timestamp_ms: u64) -> Result<()> {
        self.stats.submissions.fetch_add(1, Ordering::SeqCst);
        self.controller.pending.lock().push_back(PendingRequest {
            image,
            timestamp_ms,
            sink: self.sink.clone(),
        });
        Ok(())
    }
}

impl Drop for MockEngine {
    fn drop(&mut self) {
        self.stats.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Everything foreground (category 1).
pub fn mock_segmentation(width: u32, height: u32) -> Segmentation {
    Segmentation::new(GrayImage::from_pixel(width, height, Luma([1])))
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub const fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Listener that keeps every callback it receives.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<SegmenterEvent>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SegmenterEvent> {
        self.events.lock().clone()
    }

    pub fn results(&self) -> Vec<ResultBundle> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SegmenterEvent::Results(bundle) => Some(bundle.clone()),
                SegmenterEvent::Error { .. } => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<(String, ErrorCode)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SegmenterEvent::Error { message, code } => Some((message.clone(), *code)),
                SegmenterEvent::Results(_) => None,
            })
            .collect()
    }
}

impl SegmenterListener for RecordingListener {
    fn on_error(&self, message: &str, code: ErrorCode) {
        self.events.lock().push(SegmenterEvent::Error {
            message: message.to_string(),
            code,
        });
    }

    fn on_results(&self, bundle: ResultBundle) {
        self.events.lock().push(SegmenterEvent::Results(bundle));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_mock_engine_accounting() -> Result<()> {
        let factory = MockEngineFactory::new();
        let stats = factory.stats();

        let mut engine = factory
            .create(&SegmenterOptions::default(), ResultSink::detached())
            .unwrap();
        assert_eq!((stats.created(), stats.live()), (1, 1));

        let result = engine.segment(&DynamicImage::ImageRgb8(RgbImage::new(7, 3)))?;
        assert_eq!(result.segmentations[0].dimensions(), (7, 3));
        assert_eq!(stats.segment_calls(), 1);

        drop(engine);
        assert_eq!(stats.live(), 0);
        Ok(())
    }

    #[test]
    fn test_controller_answers_in_order() -> Result<()> {
        let factory = MockEngineFactory::new();
        let controller = factory.controller();
        let mut engine = factory
            .create(&SegmenterOptions::default(), ResultSink::detached())
            .unwrap();

        engine.segment_async(DynamicImage::ImageRgb8(RgbImage::new(1, 1)), 5)?;
        engine.segment_async(DynamicImage::ImageRgb8(RgbImage::new(1, 1)), 9)?;
        assert_eq!(controller.pending_timestamps(), vec![5, 9]);

        assert!(controller.complete_next());
        assert_eq!(controller.pending_timestamps(), vec![9]);
        assert!(controller.fail_next(None));
        assert!(!controller.complete_next());
        Ok(())
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(10);
        clock.advance(5);
        assert_eq!(clock.now_ms(), 15);
        clock.set(3);
        assert_eq!(clock.now_ms(), 3);
    }
}
