// ABOUTME: Resize notifier translating terminal geometry changes into "<cols>:<rows>" messages
// One message per event, no coalescing, no buffering while the socket is unavailable

use crate::terminal::protocol::ResizeEvent;
use crate::terminal::websocket_client::{MessageSink, TransportError};
use std::sync::Arc;
use tracing::debug;

/// Sends one resize message per reported event
pub struct ResizeNotifier {
    sink: Arc<dyn MessageSink>,
}

impl ResizeNotifier {
    pub fn new(sink: Arc<dyn MessageSink>) -> Self {
        Self { sink }
    }

    /// Format and send the event. Fails with `NotOpen` when the socket is
    /// not open; the message is dropped, never queued.
    pub fn notify(&self, event: ResizeEvent) -> Result<(), TransportError> {
        debug!("Sending resize {} to server", event);
        self.sink.send(event.to_frame())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::protocol::{ConnectionState, Frame};
    use crate::terminal::websocket_client::MockMessageSink;
    use mockall::predicate::eq;

    #[test]
    fn test_notify_sends_exactly_one_message() {
        let mut sink = MockMessageSink::new();
        sink.expect_send()
            .with(eq(Frame::Text("120:40".to_string())))
            .times(1)
            .returning(|_| Ok(()));

        let notifier = ResizeNotifier::new(Arc::new(sink));
        notifier.notify(ResizeEvent::new(120, 40).unwrap()).unwrap();
    }

    #[test]
    fn test_every_event_is_sent_without_coalescing() {
        let mut sink = MockMessageSink::new();
        let mut seq = mockall::Sequence::new();
        for text in ["80:24", "81:24", "81:24", "100:30"] {
            sink.expect_send()
                .with(eq(Frame::Text(text.to_string())))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
        }

        let notifier = ResizeNotifier::new(Arc::new(sink));
        for (cols, rows) in [(80, 24), (81, 24), (81, 24), (100, 30)] {
            notifier.notify(ResizeEvent::new(cols, rows).unwrap()).unwrap();
        }
    }

    #[test]
    fn test_closed_socket_error_is_surfaced() {
        let mut sink = MockMessageSink::new();
        sink.expect_send()
            .times(1)
            .returning(|_| Err(TransportError::NotOpen(ConnectionState::Connecting)));

        let notifier = ResizeNotifier::new(Arc::new(sink));
        let err = notifier.notify(ResizeEvent::new(80, 24).unwrap()).unwrap_err();
        assert!(matches!(err, TransportError::NotOpen(ConnectionState::Connecting)));
    }
}
