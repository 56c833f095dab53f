// ABOUTME: Attach helper forwarding bytes between a terminal and a socket in both directions
// Keyboard chunks go upstream as binary frames (text is reserved for resize messages),
// incoming frames are written to the display verbatim

use crate::terminal::protocol::Frame;
use crate::terminal::websocket_client::MessageSink;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Ctrl-]
pub const DEFAULT_DETACH_KEY: u8 = 0x1d;

const READ_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachOptions {
    /// Byte that ends the session locally instead of being forwarded
    pub detach_key: Option<u8>,
}

impl Default for AttachOptions {
    fn default() -> Self {
        Self {
            detach_key: Some(DEFAULT_DETACH_KEY),
        }
    }
}

/// Why forwarding stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachExit {
    /// The detach key was pressed
    Detached,
    /// The keyboard hit end of input or the display could not be written
    LocalClosed,
    /// The socket stopped delivering or accepting frames
    RemoteClosed,
}

/// Running forwarders. Dropping the handle stops both directions.
pub struct AttachHandle {
    input: JoinHandle<AttachExit>,
    output: JoinHandle<AttachExit>,
}

impl AttachHandle {
    /// Wait for either direction to end, then stop the other one
    pub async fn finished(&mut self) -> AttachExit {
        let result = tokio::select! {
            result = &mut self.input => result,
            result = &mut self.output => result,
        };
        self.input.abort();
        self.output.abort();

        result.unwrap_or_else(|e| {
            error!("Attach task failed: {}", e);
            AttachExit::LocalClosed
        })
    }
}

impl Drop for AttachHandle {
    fn drop(&mut self) {
        self.input.abort();
        self.output.abort();
    }
}

/// Start forwarding keyboard → socket and socket → display
pub fn attach<R, W>(
    sink: Arc<dyn MessageSink>,
    incoming: mpsc::UnboundedReceiver<Frame>,
    keyboard: R,
    display: W,
    options: AttachOptions,
) -> AttachHandle
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let input = tokio::spawn(forward_input(sink, keyboard, options.detach_key));
    let output = tokio::spawn(forward_output(incoming, display));
    AttachHandle { input, output }
}

async fn forward_input<R>(sink: Arc<dyn MessageSink>, mut keyboard: R, detach_key: Option<u8>) -> AttachExit
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = match keyboard.read(&mut buf).await {
            Ok(0) => {
                info!("Keyboard input closed");
                return AttachExit::LocalClosed;
            }
            Ok(n) => n,
            Err(e) => {
                error!("Failed to read keyboard input: {}", e);
                return AttachExit::LocalClosed;
            }
        };

        let chunk = &buf[..n];
        let detach_at = detach_key.and_then(|key| chunk.iter().position(|&b| b == key));
        let payload = match detach_at {
            Some(pos) => &chunk[..pos],
            None => chunk,
        };

        if !payload.is_empty() {
            if let Err(e) = sink.send(Frame::Binary(payload.to_vec())) {
                info!("Stopped forwarding input: {}", e);
                return AttachExit::RemoteClosed;
            }
        }

        if detach_at.is_some() {
            info!("Detach key pressed");
            return AttachExit::Detached;
        }
    }
}

async fn forward_output<W>(mut incoming: mpsc::UnboundedReceiver<Frame>, mut display: W) -> AttachExit
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = incoming.recv().await {
        debug!("Writing {} bytes to display", frame.len());
        if let Err(e) = display.write_all(frame.as_bytes()).await {
            error!("Failed to write terminal output: {}", e);
            return AttachExit::LocalClosed;
        }
        if let Err(e) = display.flush().await {
            error!("Failed to flush terminal output: {}", e);
            return AttachExit::LocalClosed;
        }
    }
    info!("Socket output stream ended");
    AttachExit::RemoteClosed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::protocol::{ConnectionState, InboundFrame};
    use crate::terminal::websocket_client::TransportError;
    use std::sync::Mutex;
    use tokio::io::duplex;

    /// Records frames, optionally refusing them like a closed socket
    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<Frame>>,
        closed: bool,
    }

    impl MessageSink for RecordingSink {
        fn send(&self, frame: Frame) -> Result<(), TransportError> {
            if self.closed {
                return Err(TransportError::NotOpen(ConnectionState::Closed));
            }
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }

        fn is_open(&self) -> bool {
            !self.closed
        }
    }

    #[tokio::test]
    async fn test_keyboard_bytes_become_frames() {
        let sink = Arc::new(RecordingSink::default());
        let (_incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (mut keys, keyboard) = duplex(64);
        let (display, _screen) = duplex(64);

        let mut handle = attach(sink.clone(), incoming_rx, keyboard, display, AttachOptions::default());

        keys.write_all(b"ls\r").await.unwrap();
        keys.flush().await.unwrap();
        drop(keys);

        assert_eq!(handle.finished().await, AttachExit::LocalClosed);
        let frames = sink.frames.lock().unwrap();
        let sent: Vec<u8> = frames.iter().flat_map(|f| f.as_bytes().to_vec()).collect();
        assert_eq!(sent, b"ls\r");
        assert!(frames.iter().all(|f| matches!(f, Frame::Binary(_))));
    }

    #[tokio::test]
    async fn test_typed_resize_lookalike_stays_input() {
        // BEHAVIOR: pasting "12:30" must reach the container as keystrokes, not resize it
        let sink = Arc::new(RecordingSink::default());
        let (_incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (mut keys, keyboard) = duplex(64);
        let (display, _screen) = duplex(64);

        let mut handle = attach(sink.clone(), incoming_rx, keyboard, display, AttachOptions::default());
        keys.write_all(b"12:30").await.unwrap();
        drop(keys);

        assert_eq!(handle.finished().await, AttachExit::LocalClosed);
        let classified: Vec<InboundFrame> = sink
            .frames
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .map(InboundFrame::classify)
            .collect();
        assert_eq!(classified, vec![InboundFrame::Input(b"12:30".to_vec())]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_goes_out_as_binary() {
        let sink = Arc::new(RecordingSink::default());
        let (_incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (mut keys, keyboard) = duplex(64);
        let (display, _screen) = duplex(64);

        let mut handle = attach(sink.clone(), incoming_rx, keyboard, display, AttachOptions::default());
        keys.write_all(&[0xff, 0xfe]).await.unwrap();
        drop(keys);

        assert_eq!(handle.finished().await, AttachExit::LocalClosed);
        assert_eq!(*sink.frames.lock().unwrap(), vec![Frame::Binary(vec![0xff, 0xfe])]);
    }

    #[tokio::test]
    async fn test_detach_key_stops_after_sending_prefix() {
        let sink = Arc::new(RecordingSink::default());
        let (_incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (mut keys, keyboard) = duplex(64);
        let (display, _screen) = duplex(64);

        let mut handle = attach(sink.clone(), incoming_rx, keyboard, display, AttachOptions::default());
        keys.write_all(b"exit\x1dignored").await.unwrap();

        assert_eq!(handle.finished().await, AttachExit::Detached);
        assert_eq!(*sink.frames.lock().unwrap(), vec![Frame::Binary(b"exit".to_vec())]);
    }

    #[tokio::test]
    async fn test_detach_key_can_be_disabled() {
        let sink = Arc::new(RecordingSink::default());
        let (_incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (mut keys, keyboard) = duplex(64);
        let (display, _screen) = duplex(64);

        let mut handle = attach(
            sink.clone(),
            incoming_rx,
            keyboard,
            display,
            AttachOptions { detach_key: None },
        );
        keys.write_all(b"a\x1db").await.unwrap();
        drop(keys);

        assert_eq!(handle.finished().await, AttachExit::LocalClosed);
        assert_eq!(*sink.frames.lock().unwrap(), vec![Frame::Binary(b"a\x1db".to_vec())]);
    }

    #[tokio::test]
    async fn test_socket_frames_reach_display() {
        let sink = Arc::new(RecordingSink::default());
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (_keys, keyboard) = duplex(64);
        let (display, mut screen) = duplex(256);

        let mut handle = attach(sink, incoming_rx, keyboard, display, AttachOptions::default());
        incoming_tx.send(Frame::Text("hello ".into())).unwrap();
        incoming_tx.send(Frame::Binary(b"\x1b[1mworld\x1b[0m".to_vec())).unwrap();
        drop(incoming_tx);

        assert_eq!(handle.finished().await, AttachExit::RemoteClosed);
        drop(handle);

        let mut rendered = Vec::new();
        screen.read_to_end(&mut rendered).await.unwrap();
        assert_eq!(rendered, b"hello \x1b[1mworld\x1b[0m");
    }

    #[tokio::test]
    async fn test_closed_socket_stops_input() {
        let sink = Arc::new(RecordingSink {
            closed: true,
            ..Default::default()
        });
        let (_incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (mut keys, keyboard) = duplex(64);
        let (display, _screen) = duplex(64);

        let mut handle = attach(sink.clone(), incoming_rx, keyboard, display, AttachOptions::default());
        keys.write_all(b"x").await.unwrap();

        assert_eq!(handle.finished().await, AttachExit::RemoteClosed);
        assert!(sink.frames.lock().unwrap().is_empty());
    }
}
