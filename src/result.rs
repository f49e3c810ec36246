use image::{GrayImage, ImageBuffer, Luma};

/// Per-pixel score map for one category.
pub type ConfidenceMask = ImageBuffer<Luma<f32>, Vec<f32>>;

/// One segmentation output: a category index per pixel and one score map per
/// category, each present only when requested.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Segmentation {
    pub category_mask: Option<GrayImage>,
    pub confidence_masks: Vec<ConfidenceMask>,
}

impl Segmentation {
    pub const fn new(category_mask: GrayImage) -> Self {
        Self {
            category_mask: Some(category_mask),
            confidence_masks: Vec::new(),
        }
    }

    pub fn with_confidence_masks(mut self, masks: Vec<ConfidenceMask>) -> Self {
        self.confidence_masks = masks;
        self
    }

    /// Size of whichever mask is present, or `(0, 0)` for an empty output.
    pub fn dimensions(&self) -> (u32, u32) {
        self.category_mask
            .as_ref()
            .map(GrayImage::dimensions)
            .or_else(|| self.confidence_masks.first().map(ConfidenceMask::dimensions))
            .unwrap_or((0, 0))
    }
}

/// What an engine reports for one request. `timestamp_ms` echoes the submission
/// stamp the request was made with.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineResult {
    pub segmentations: Vec<Segmentation>,
    pub timestamp_ms: u64,
}

impl EngineResult {
    pub fn single(segmentation: Segmentation, timestamp_ms: u64) -> Self {
        Self {
            segmentations: vec![segmentation],
            timestamp_ms,
        }
    }
}

/// Result handed to the listener: the first segmentation plus the time between
/// submission and delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultBundle {
    pub segmentation: Segmentation,
    pub inference_time_ms: u64,
    pub input_width: u32,
    pub input_height: u32,
}
