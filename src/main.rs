use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, ensure, Context, Result};
use clap::Parser;
use image::{DynamicImage, ImageFormat};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::{prelude::*, ThreadPoolBuilder};
use tracing::{info, warn};
use walkdir::WalkDir;

use live_seg_rs::{
    imageops::mask, ChannelListener, Config, Frame, OrtEngineFactory, RunningMode,
    SegmenterEvent, SegmenterListener, SegmenterSession, SessionState,
};

const RESULT_TIMEOUT: Duration = Duration::from_secs(60);

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let config = Config::parse();

    ensure!(config.model_path.exists(), "Model path does not exist");
    ensure!(config.input.exists(), "Input path does not exist");

    ThreadPoolBuilder::new()
        .num_threads(config.num_threads)
        .build_global()?;

    let image_paths = collect_image_paths(&config.input);
    if image_paths.is_empty() {
        warn!("No image files found in {}", config.input.display());
        return Ok(());
    }
    info!(
        count = image_paths.len(),
        mode = %config.running_mode,
        delegate = %config.delegate,
        "segmenting images"
    );

    let progress_bar = ProgressBar::new(image_paths.len() as u64);
    progress_bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec} {eta})",
        )?
        .progress_chars("#>-"),
    );

    match config.running_mode {
        RunningMode::SingleImage | RunningMode::BatchImage => {
            run_still_images(&config, &image_paths, &progress_bar)?
        }
        RunningMode::LiveStream => run_live_stream(&config, &image_paths, &progress_bar)?,
    }

    progress_bar.finish();
    Ok(())
}

fn open_session(
    config: &Config,
    listener: Option<Arc<dyn SegmenterListener>>,
) -> Result<SegmenterSession<OrtEngineFactory>> {
    let session = SegmenterSession::open(OrtEngineFactory, config.segmenter_options(), listener)?;
    if session.state() != SessionState::Ready {
        bail!(
            "Segmenter failed to initialize with the {} delegate",
            config.delegate
        );
    }
    Ok(session)
}

fn run_still_images(config: &Config, paths: &[PathBuf], progress_bar: &ProgressBar) -> Result<()> {
    let mut session = open_session(config, None)?;

    for chunk in paths.chunks(config.num_threads.max(1)) {
        let images = chunk
            .par_iter()
            .map(|path| {
                image::open(path)
                    .with_context(|| format!("Failed to open image: {}", path.display()))
            })
            .collect::<Result<Vec<_>>>()?;

        let bundles = session.segment_batch(&images)?;

        chunk
            .par_iter()
            .zip(images.par_iter())
            .zip(bundles.par_iter())
            .try_for_each(|((path, image), bundle)| -> Result<()> {
                let category_mask = bundle
                    .segmentation
                    .category_mask
                    .as_ref()
                    .context("Segmenter returned no category mask")?;
                let rendered = mask::overlay(image, category_mask, config.overlay_alpha)?;
                save_image(DynamicImage::ImageRgba8(rendered), path, config)?;
                progress_bar.inc(1);
                Ok(())
            })?;
    }

    session.close();
    Ok(())
}

fn run_live_stream(config: &Config, paths: &[PathBuf], progress_bar: &ProgressBar) -> Result<()> {
    let (listener, events) = ChannelListener::new();
    let mut session = open_session(config, Some(Arc::new(listener)))?;

    for path in paths {
        let image = image::open(path)
            .with_context(|| format!("Failed to open image: {}", path.display()))?
            .into_rgba8();
        session.segment_live_stream(Frame::new(image, config.rotation)?)?;
    }

    // One worker drains the queue in order, so events line up with `paths`.
    for path in paths {
        match events.recv_timeout(RESULT_TIMEOUT)? {
            SegmenterEvent::Results(bundle) => {
                info!(
                    path = %path.display(),
                    inference_time_ms = bundle.inference_time_ms,
                    "frame segmented"
                );
                let category_mask = bundle
                    .segmentation
                    .category_mask
                    .as_ref()
                    .context("Segmenter returned no category mask")?;
                let colored = mask::colorize(category_mask, u8::MAX);
                save_image(DynamicImage::ImageRgba8(colored), path, config)?;
            }
            SegmenterEvent::Error { message, code } => {
                warn!(path = %path.display(), %code, "{message}");
            }
        }
        progress_bar.inc(1);
    }

    session.close();
    Ok(())
}

fn collect_image_paths(input: &Path) -> Vec<PathBuf> {
    WalkDir::new(input)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| ImageFormat::from_path(e.path()).is_ok())
        .map(|e| e.into_path())
        .collect()
}

fn save_image(image: DynamicImage, path: &Path, config: &Config) -> Result<()> {
    let output_path = construct_output_path(path, config)?;
    let image = match ImageFormat::from_path(&output_path) {
        Ok(ImageFormat::Jpeg) => DynamicImage::ImageRgb8(image.to_rgb8()),
        _ => image,
    };
    image
        .save(&output_path)
        .with_context(|| format!("Failed to save image: {}", output_path.display()))
}

fn construct_output_path(path: &Path, config: &Config) -> Result<PathBuf> {
    let relative = if config.input.is_file() {
        PathBuf::from(path.file_name().context("Input file has no name")?)
    } else {
        path.strip_prefix(&config.input)?.to_path_buf()
    };

    let output_path = config
        .output_dir
        .join(relative)
        .with_extension(&config.format);
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(output_path)
}
