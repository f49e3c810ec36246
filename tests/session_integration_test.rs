use std::sync::Arc;
use std::thread;
use std::time::Duration;

use image::{DynamicImage, GenericImageView, Rgb, RgbImage, RgbaImage};

use live_seg_rs::mocks::{ManualClock, MockEngineFactory, RecordingListener};
use live_seg_rs::{
    ChannelListener, Delegate, EngineInitError, ErrorCode, Frame, RunningMode, SegError,
    SegmenterEvent, SegmenterOptions, SegmenterSession, SessionState,
};

fn live_options() -> SegmenterOptions {
    SegmenterOptions::new("deeplab_v3.onnx").with_running_mode(RunningMode::LiveStream)
}

#[test]
fn test_results_arrive_on_another_thread() -> Result<(), Box<dyn std::error::Error>> {
    let factory = MockEngineFactory::new();
    let controller = factory.controller();
    let clock = Arc::new(ManualClock::new(500));
    let (listener, events) = ChannelListener::new();

    let mut session = SegmenterSession::with_clock(factory, clock.clone());
    session.setup(live_options(), Some(Arc::new(listener)))?;

    for _ in 0..3 {
        session.segment_live_stream(Frame::new(RgbaImage::new(16, 9), 270)?)?;
        clock.advance(10);
    }
    assert_eq!(controller.pending_timestamps(), vec![500, 510, 520]);

    let engine_thread = thread::spawn(move || {
        while controller.complete_next() {}
    });
    engine_thread.join().unwrap();

    let mut inference_times = Vec::new();
    for _ in 0..3 {
        match events.recv_timeout(Duration::from_secs(5))? {
            SegmenterEvent::Results(bundle) => {
                assert_eq!((bundle.input_width, bundle.input_height), (9, 16));
                assert_eq!(bundle.segmentation.dimensions(), (9, 16));
                inference_times.push(bundle.inference_time_ms);
            }
            SegmenterEvent::Error { message, .. } => panic!("unexpected error: {message}"),
        }
    }
    assert_eq!(inference_times, vec![30, 20, 10]);
    Ok(())
}

#[test]
fn test_close_while_requests_in_flight() -> Result<(), Box<dyn std::error::Error>> {
    let factory = MockEngineFactory::new();
    let controller = factory.controller();
    let (listener, events) = ChannelListener::new();
    let mut session = SegmenterSession::open(factory, live_options(), Some(Arc::new(listener)))?;

    session.segment_live_stream(Frame::new(RgbaImage::new(4, 4), 0)?)?;
    session.segment_live_stream(Frame::new(RgbaImage::new(4, 4), 0)?)?;

    assert!(controller.complete_next());
    session.close();
    assert!(controller.complete_next());

    assert!(matches!(events.try_recv()?, SegmenterEvent::Results(_)));
    assert!(events.try_recv().is_err());
    assert!(session.is_closed());
    Ok(())
}

#[test]
fn test_reopen_after_close() -> Result<(), Box<dyn std::error::Error>> {
    let factory = MockEngineFactory::new();
    let stats = factory.stats();
    let listener = Arc::new(RecordingListener::new());
    let mut session = SegmenterSession::open(factory, live_options(), Some(listener.clone()))?;

    session.close();
    assert_eq!(session.state(), SessionState::Closed);
    assert!(matches!(
        session.segment_live_stream(Frame::new(RgbaImage::new(2, 2), 0)?),
        Err(SegError::NotReady { .. })
    ));

    let state = session.setup(
        SegmenterOptions::new("deeplab_v3.onnx").with_running_mode(RunningMode::SingleImage),
        None,
    )?;
    assert_eq!(state, SessionState::Ready);
    assert_eq!(stats.live(), 1);

    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(12, 7, Rgb([1, 2, 3])));
    let bundle = session.segment_image(&image)?;
    assert_eq!(bundle.segmentation.dimensions(), image.dimensions());
    assert_eq!(stats.segment_calls(), 1);
    Ok(())
}

#[test]
fn test_configuration_error_keeps_existing_session() -> Result<(), Box<dyn std::error::Error>> {
    let factory = MockEngineFactory::new();
    let stats = factory.stats();
    let mut session = SegmenterSession::open(factory, SegmenterOptions::default(), None)?;

    let err = session.setup(live_options(), None).unwrap_err();

    assert!(matches!(err, SegError::Configuration { .. }));
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.running_mode(), RunningMode::SingleImage);
    assert_eq!((stats.created(), stats.live()), (1, 1));
    Ok(())
}

#[test]
fn test_gpu_unsupported_reaches_listener() -> Result<(), Box<dyn std::error::Error>> {
    let factory = MockEngineFactory::new()
        .failing(EngineInitError::delegate_unsupported("GPU execution is not supported"));
    let (listener, events) = ChannelListener::new();

    let session = SegmenterSession::open(
        factory,
        live_options().with_delegate(Delegate::Gpu),
        Some(Arc::new(listener)),
    )?;

    assert!(session.is_closed());
    assert_eq!(session.delegate(), Delegate::Gpu);
    match events.try_recv()? {
        SegmenterEvent::Error { code, .. } => assert_eq!(code, ErrorCode::DelegateUnsupported),
        SegmenterEvent::Results(_) => panic!("expected an error"),
    }
    Ok(())
}
