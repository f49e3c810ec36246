pub mod clock;
pub mod config;
pub mod engine;
pub mod errors;
pub mod frame;
pub mod imageops;
pub mod labels;
pub mod listener;
pub mod options;
pub mod result;
pub mod session;
pub mod traits;

pub mod mocks;

pub use clock::{Clock, MonotonicClock};
pub use config::Config;
pub use engine::{OrtEngine, OrtEngineFactory};
pub use errors::{EngineInitError, EngineInitKind, ErrorCode, Result, SegError};
pub use frame::Frame;
pub use imageops::Rotation;
pub use listener::{ChannelListener, SegmenterEvent};
pub use options::{Delegate, RunningMode, SegmenterOptions, DEFAULT_MODEL_PATH};
pub use result::{EngineResult, ResultBundle, Segmentation};
pub use session::{ResultSink, SegmenterSession, SessionState};
pub use traits::*;
