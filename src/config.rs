use clap::Parser;
use image::ImageFormat;
use std::path::PathBuf;
use std::thread;

use crate::options::{
    Delegate, RunningMode, SegmenterOptions, DEFAULT_MASK_THRESHOLD, DEFAULT_MODEL_PATH,
};

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Image file or directory of images to segment.
    pub input: PathBuf,

    #[arg(default_value = "output")]
    pub output_dir: PathBuf,

    #[arg(short, long, default_value = DEFAULT_MODEL_PATH)]
    pub model_path: PathBuf,

    #[arg(short, long, default_value = "png", value_parser = check_format)]
    pub format: String,

    #[arg(long, value_enum, default_value_t = Delegate::Cpu)]
    pub delegate: Delegate,

    #[arg(long, value_enum, default_value_t = RunningMode::BatchImage)]
    pub running_mode: RunningMode,

    #[arg(short, long, default_value_t = 0)]
    pub device_id: i32,

    /// Clockwise rotation applied to every frame in live-stream mode.
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    pub rotation: i32,

    #[arg(long, default_value_t = DEFAULT_MASK_THRESHOLD)]
    pub mask_threshold: f32,

    /// Opacity of the mask drawn over the image.
    #[arg(long, default_value_t = 160)]
    pub overlay_alpha: u8,

    #[arg(short = 'j', long, default_value_t = default_threads())]
    pub num_threads: usize,
}

impl Config {
    pub fn segmenter_options(&self) -> SegmenterOptions {
        SegmenterOptions::new(&self.model_path)
            .with_delegate(self.delegate)
            .with_running_mode(self.running_mode)
            .with_device_id(self.device_id)
            .with_num_threads(self.num_threads)
            .with_mask_threshold(self.mask_threshold)
    }
}

fn default_threads() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get())
}

fn check_format(s: &str) -> Result<String, String> {
    let supported: Vec<_> = ImageFormat::all()
        .filter(|f| f.writing_enabled())
        .flat_map(|f| f.extensions_str())
        .map(|s| format!("`{}`", s))
        .collect();
    let supported_message = format!("Supported formats: {}", supported.join(", "));

    let format = ImageFormat::from_extension(s)
        .ok_or(format!("{} is not supported. {}", s, supported_message))?;
    if !format.writing_enabled() {
        return Err(format!("{} is not supported. {}", s, supported_message));
    }

    Ok(s.to_string())
}
