use std::fmt;
use std::path::PathBuf;

use clap::ValueEnum;

/// Model asset used when no other path is given.
pub const DEFAULT_MODEL_PATH: &str = "models/deeplab_v3.onnx";

/// Score above which a single-channel model output counts as foreground.
pub const DEFAULT_MASK_THRESHOLD: f32 = 0.5;

/// Execution delegate passed through to the engine.
///
/// A GPU-backed engine must be driven from the thread that created it. CPU-backed
/// engines have no affinity. The session does not check this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Delegate {
    #[default]
    Cpu,
    Gpu,
}

/// Governs which submission entry points are valid and whether a listener is
/// mandatory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum RunningMode {
    #[default]
    SingleImage,
    BatchImage,
    LiveStream,
}

impl RunningMode {
    pub const fn requires_listener(self) -> bool {
        matches!(self, Self::LiveStream)
    }
}

impl fmt::Display for Delegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Gpu => f.write_str("gpu"),
        }
    }
}

impl fmt::Display for RunningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleImage => f.write_str("single-image"),
            Self::BatchImage => f.write_str("batch-image"),
            Self::LiveStream => f.write_str("live-stream"),
        }
    }
}

/// Everything an `EngineFactory` needs to build an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmenterOptions {
    pub delegate: Delegate,
    pub running_mode: RunningMode,
    pub model_path: PathBuf,
    pub device_id: i32,
    pub num_threads: usize,
    pub mask_threshold: f32,
    pub output_category_mask: bool,
    pub output_confidence_masks: bool,
}

impl SegmenterOptions {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            delegate: Delegate::Cpu,
            running_mode: RunningMode::SingleImage,
            model_path: model_path.into(),
            device_id: 0,
            num_threads: 2,
            mask_threshold: DEFAULT_MASK_THRESHOLD,
            output_category_mask: true,
            output_confidence_masks: false,
        }
    }

    pub const fn with_delegate(mut self, delegate: Delegate) -> Self {
        self.delegate = delegate;
        self
    }

    pub const fn with_running_mode(mut self, running_mode: RunningMode) -> Self {
        self.running_mode = running_mode;
        self
    }

    pub const fn with_device_id(mut self, device_id: i32) -> Self {
        self.device_id = device_id;
        self
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads.max(1);
        self
    }

    pub fn with_mask_threshold(mut self, threshold: f32) -> Self {
        self.mask_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub const fn with_category_mask(mut self, enabled: bool) -> Self {
        self.output_category_mask = enabled;
        self
    }

    pub const fn with_confidence_masks(mut self, enabled: bool) -> Self {
        self.output_confidence_masks = enabled;
        self
    }

    /// Whether the engine has at least one kind of mask to produce.
    pub const fn requests_output(&self) -> bool {
        self.output_category_mask || self.output_confidence_masks
    }
}

impl Default for SegmenterOptions {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_live_stream_requires_listener() {
        assert!(!RunningMode::SingleImage.requires_listener());
        assert!(!RunningMode::BatchImage.requires_listener());
        assert!(RunningMode::LiveStream.requires_listener());
    }

    #[test]
    fn test_builder_clamps_values() {
        let options = SegmenterOptions::default()
            .with_num_threads(0)
            .with_mask_threshold(1.7);
        assert_eq!(options.num_threads, 1);
        assert_eq!(options.mask_threshold, 1.0);
        assert_eq!(options.model_path, PathBuf::from(DEFAULT_MODEL_PATH));
    }

    #[test]
    fn test_mask_outputs() {
        let options = SegmenterOptions::default();
        assert!(options.output_category_mask);
        assert!(!options.output_confidence_masks);

        let scores_only = options.with_category_mask(false).with_confidence_masks(true);
        assert!(scores_only.requests_output());
        assert!(!scores_only.with_confidence_masks(false).requests_output());
    }

    #[test]
    fn test_value_enum_names() {
        assert_eq!(
            RunningMode::from_str("live-stream", false).unwrap(),
            RunningMode::LiveStream
        );
        assert_eq!(Delegate::from_str("gpu", false).unwrap(), Delegate::Gpu);
    }
}
