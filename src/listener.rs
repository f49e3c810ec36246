use crossbeam::channel::{self, Receiver, Sender};

use crate::errors::ErrorCode;
use crate::result::ResultBundle;
use crate::traits::SegmenterListener;

/// One listener callback, as a value.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmenterEvent {
    Results(ResultBundle),
    Error { message: String, code: ErrorCode },
}

/// Listener that turns callbacks into events on a channel, so the consumer can
/// receive them on a thread of its choosing.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    events: Sender<SegmenterEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, Receiver<SegmenterEvent>) {
        let (events, receiver) = channel::unbounded();
        (Self { events }, receiver)
    }

    fn send(&self, event: SegmenterEvent) {
        // The receiver going away just means nobody is interested any more.
        let _ = self.events.send(event);
    }
}

impl SegmenterListener for ChannelListener {
    fn on_error(&self, message: &str, code: ErrorCode) {
        self.send(SegmenterEvent::Error {
            message: message.to_string(),
            code,
        });
    }

    fn on_results(&self, bundle: ResultBundle) {
        self.send(SegmenterEvent::Results(bundle));
    }
}
