use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use image::{imageops::FilterType, DynamicImage, GenericImageView, Rgb, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
    TensorRTExecutionProvider,
};
use ort::session::{builder::SessionBuilder, Session};
use ort::value::TensorRef;
use tracing::{debug, error, info};

use crate::errors::{EngineInitError, Result, SegError};
use crate::imageops::mask;
use crate::imageops::padding::{letterbox, Position};
use crate::options::{Delegate, RunningMode, SegmenterOptions};
use crate::result::{EngineResult, Segmentation};
use crate::session::ResultSink;
use crate::traits::{EngineFactory, SegmentationEngine};

/// Input edge used when the model leaves its spatial dimensions dynamic.
const DEFAULT_INPUT_SIZE: u32 = 512;

const WORKER_THREAD_NAME: &str = "segmenter-worker";

/// Builds `OrtEngine`s.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrtEngineFactory;

impl EngineFactory for OrtEngineFactory {
    type Engine = OrtEngine;

    fn create(
        &self,
        options: &SegmenterOptions,
        sink: ResultSink,
    ) -> std::result::Result<OrtEngine, EngineInitError> {
        OrtEngine::new(options, sink)
    }
}

struct Model {
    session: Session,
    input_name: String,
    output_name: String,
    image_size: u32,
    mask_threshold: f32,
    output_category_mask: bool,
    output_confidence_masks: bool,
}

/// Providers registered for `delegate`, in priority order.
///
/// On GPU, TensorRT is tried first and may fall back silently; CUDA is the last
/// resort and fails setup if it cannot be registered.
fn execution_providers(delegate: Delegate, device_id: i32) -> Vec<ExecutionProviderDispatch> {
    match delegate {
        Delegate::Cpu => vec![CPUExecutionProvider::default().build()],
        Delegate::Gpu => vec![
            TensorRTExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
            CUDAExecutionProvider::default()
                .with_device_id(device_id)
                .build()
                .error_on_failure(),
        ],
    }
}

impl Model {
    fn load(options: &SegmenterOptions) -> std::result::Result<Self, EngineInitError> {
        let model_path = &options.model_path;
        if !model_path.is_file() {
            return Err(EngineInitError::invalid_options(format!(
                "model file not found: {}",
                model_path.display()
            )));
        }

        let builder = SessionBuilder::new()
            .map_err(|e| EngineInitError::invalid_options(format!("session builder: {e}")))?
            .with_intra_threads(options.num_threads)
            .map_err(|e| EngineInitError::invalid_options(format!("intra-op threads: {e}")))?;

        let builder = builder
            .with_execution_providers(execution_providers(options.delegate, options.device_id))
            .map_err(|e| match options.delegate {
                Delegate::Cpu => EngineInitError::invalid_options(format!("CPU provider: {e}")),
                Delegate::Gpu => {
                    EngineInitError::delegate_unsupported(format!("GPU providers: {e}"))
                }
            })?;

        let mut session = builder
            .with_memory_pattern(true)
            .map_err(|e| EngineInitError::invalid_options(format!("memory pattern: {e}")))?
            .commit_from_file(model_path)
            .map_err(|e| {
                EngineInitError::invalid_options(format!(
                    "loading {}: {e}",
                    model_path.display()
                ))
            })?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| EngineInitError::invalid_options("model declares no inputs"))?;
        let input_name = input.name.clone();
        let image_size = input
            .input_type
            .tensor_shape()
            .and_then(|shape| shape.get(2).copied())
            .filter(|&dim| dim > 0)
            .map_or(DEFAULT_INPUT_SIZE, |dim| dim as u32);
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| EngineInitError::invalid_options("model declares no outputs"))?;

        // Warm up once so delegate problems surface here rather than on the first frame.
        let data = Array4::<f32>::zeros((1, 3, image_size as usize, image_size as usize));
        let tensor = TensorRef::from_array_view(&data)
            .map_err(|e| EngineInitError::invalid_options(format!("warm-up tensor: {e}")))?;
        session
            .run(ort::inputs![input_name.as_str() => tensor])
            .map_err(|e| match options.delegate {
                Delegate::Cpu => EngineInitError::invalid_options(format!("warm-up run: {e}")),
                Delegate::Gpu => EngineInitError::delegate_unsupported(format!("warm-up run: {e}")),
            })?;

        info!(
            model = %model_path.display(),
            delegate = %options.delegate,
            input_size = image_size,
            thread = thread::current().name().unwrap_or("unnamed"),
            "model loaded"
        );
        Ok(Self {
            session,
            input_name,
            output_name,
            image_size,
            mask_threshold: options.mask_threshold,
            output_category_mask: options.output_category_mask,
            output_confidence_masks: options.output_confidence_masks,
        })
    }

    fn predict(&mut self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        let outputs = self.session.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&tensor.as_standard_layout())?
        ])?;
        Ok(outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned())
    }

    fn segment(&mut self, image: &DynamicImage) -> Result<Segmentation> {
        let (width, height) = image.dimensions();
        let (tensor, crop) = preprocess(&image.to_rgb8(), self.image_size)?;
        let scores = self.predict(tensor.view())?;

        Ok(postprocess(
            scores.index_axis(Axis(0), 0),
            crop,
            (width, height),
            self.mask_threshold,
            self.output_category_mask,
            self.output_confidence_masks,
        ))
    }
}

/// Letterbox `image` into the model square and lay it out as a `[1, 3, S, S]` tensor
/// in `[0, 1]`.
///
/// Also returns the `[x, y, w, h]` region the image occupies in the square.
pub fn preprocess(image: &RgbImage, image_size: u32) -> Result<(Array4<f32>, [u32; 4])> {
    let (canvas, crop) = letterbox(image, image_size, Position::TopLeft, Rgb([0, 0, 0]))
        .ok_or_else(|| SegError::ImageProcessing {
            operation: "letterbox".to_string(),
            source: "image has no pixels".into(),
        })?;

    let tensor = canvas
        .as_ndarray3()
        .mapv(|v| f32::from(v) / 255.0)
        .insert_axis(Axis(0));
    Ok((tensor, crop))
}

/// Turn `(C, S, S)` model scores into the requested masks at the original
/// `(width, height)`.
pub fn postprocess(
    scores: ArrayView3<f32>,
    crop: [u32; 4],
    (width, height): (u32, u32),
    threshold: f32,
    with_category_mask: bool,
    with_confidence_masks: bool,
) -> Segmentation {
    let category_mask = with_category_mask.then(|| {
        mask::restore(
            &mask::category_mask(scores, threshold),
            crop,
            width,
            height,
            FilterType::Nearest,
        )
    });
    let confidence_masks = if with_confidence_masks {
        mask::confidence_masks(scores)
            .iter()
            .map(|m| mask::restore(m, crop, width, height, FilterType::Triangle))
            .collect()
    } else {
        Vec::new()
    };

    Segmentation {
        category_mask,
        confidence_masks,
    }
}

struct Request {
    image: DynamicImage,
    timestamp_ms: u64,
}

enum Backend {
    /// Still-image modes run on the caller's thread.
    Inline(Model),
    /// Live-stream requests are drained by a dedicated worker thread.
    Worker {
        requests: Sender<Request>,
        last_timestamp_ms: Option<u64>,
    },
}

/// Segmentation engine backed by ONNX Runtime.
pub struct OrtEngine {
    mode: RunningMode,
    backend: Backend,
}

impl OrtEngine {
    pub fn new(
        options: &SegmenterOptions,
        sink: ResultSink,
    ) -> std::result::Result<Self, EngineInitError> {
        if !options.requests_output() {
            return Err(EngineInitError::invalid_options(
                "neither a category mask nor confidence masks were requested",
            ));
        }

        let backend = match options.running_mode {
            RunningMode::LiveStream => {
                let (requests, receiver) = channel::unbounded();
                let worker_options = options.clone();
                spawn_worker(
                    move || Model::load(&worker_options),
                    move |mut model: Model| {
                        run_worker(|image| model.segment(image), receiver, sink)
                    },
                )?;
                Backend::Worker {
                    requests,
                    last_timestamp_ms: None,
                }
            }
            RunningMode::SingleImage | RunningMode::BatchImage => {
                Backend::Inline(Model::load(options)?)
            }
        };

        Ok(Self {
            mode: options.running_mode,
            backend,
        })
    }
}

/// Start the live-stream worker and wait until it has built its model.
///
/// The model is created on the worker itself, so a GPU session is only ever driven
/// from the thread that created it.
fn spawn_worker<M, L, R>(load: L, run: R) -> std::result::Result<(), EngineInitError>
where
    L: FnOnce() -> std::result::Result<M, EngineInitError> + Send + 'static,
    R: FnOnce(M) + Send + 'static,
{
    let (ready, started) = channel::bounded(1);
    thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .spawn(move || match load() {
            Ok(model) => {
                let _ = ready.send(Ok(()));
                run(model);
            }
            Err(err) => {
                let _ = ready.send(Err(err));
            }
        })
        .map_err(|e| EngineInitError::invalid_options(format!("spawning worker: {e}")))?;

    started.recv().map_err(|_| {
        EngineInitError::invalid_options("inference worker exited before loading the model")
    })?
}

fn wrong_mode(operation: &str, mode: RunningMode) -> SegError {
    SegError::InvalidState {
        operation: operation.to_string(),
        mode,
    }
}

impl SegmentationEngine for OrtEngine {
    fn segment(&mut self, image: &DynamicImage) -> Result<EngineResult> {
        match &mut self.backend {
            Backend::Inline(model) => Ok(EngineResult::single(model.segment(image)?, 0)),
            Backend::Worker { .. } => Err(wrong_mode("segment", self.mode)),
        }
    }

    fn segment_async(&mut self, image: DynamicImage, timestamp_ms: u64) -> Result<()> {
        let Backend::Worker {
            requests,
            last_timestamp_ms,
        } = &mut self.backend
        else {
            return Err(wrong_mode("segment_async", self.mode));
        };

        if let Some(last) = *last_timestamp_ms {
            if timestamp_ms < last {
                return Err(SegError::Validation {
                    field: "timestamp_ms".to_string(),
                    reason: format!("{timestamp_ms} is earlier than the previous frame at {last}"),
                });
            }
        }
        *last_timestamp_ms = Some(timestamp_ms);

        requests
            .send(Request {
                image,
                timestamp_ms,
            })
            .map_err(|_| SegError::model("segment_async", "inference worker has stopped"))
    }
}

/// Runs until the engine drops its sender; queued requests are still processed.
fn run_worker<S>(mut segment: S, requests: Receiver<Request>, sink: ResultSink)
where
    S: FnMut(&DynamicImage) -> Result<Segmentation>,
{
    for Request {
        image,
        timestamp_ms,
    } in requests
    {
        if !sink.is_attached() {
            debug!(timestamp_ms, "no listener attached, skipping frame");
            continue;
        }

        match segment(&image) {
            Ok(segmentation) => {
                sink.deliver_result(EngineResult::single(segmentation, timestamp_ms), &image)
            }
            Err(err) => {
                error!(timestamp_ms, "segmentation failed: {err}");
                sink.deliver_error(Some(&err.to_string()));
            }
        }
    }
    debug!("segmenter worker stopped");
}
