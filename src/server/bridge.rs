// ABOUTME: Per-connection bridge between a client socket and a container TTY
// Output goes out as binary frames; inbound text is a resize if it parses as one, keystrokes otherwise

use crate::docker::{AttachedTty, ContainerBackend};
use crate::terminal::protocol::{Frame, InboundFrame};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_POLICY: u16 = 1008;
pub const CLOSE_ERROR: u16 = 1011;

const MAX_CONTAINER_ID_LEN: usize = 128;

/// What the bridge asks the socket writer to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Data(Frame),
    Close { code: u16, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    InvalidId,
    OpenFailed,
    ClientClosed,
    OutputEnded,
    InputFailed,
}

/// Docker accepts ids and names of this shape; anything else never reaches the backend
pub fn is_valid_container_id(id: &str) -> bool {
    let mut bytes = id.bytes();
    let Some(first) = bytes.next() else {
        return false;
    };
    id.len() <= MAX_CONTAINER_ID_LEN
        && first.is_ascii_alphanumeric()
        && bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}

/// Run one session until either side goes away.
///
/// `inbound` ends when the client closes; `outbound` feeds the socket writer.
pub async fn run_session(
    container_id: String,
    backend: Arc<dyn ContainerBackend>,
    mut inbound: mpsc::UnboundedReceiver<Frame>,
    outbound: mpsc::UnboundedSender<Outbound>,
) -> SessionEnd {
    if !is_valid_container_id(&container_id) {
        warn!("Rejecting invalid container id {:?}", container_id);
        let _ = outbound.send(Outbound::Close {
            code: CLOSE_POLICY,
            reason: "invalid container id".to_string(),
        });
        return SessionEnd::InvalidId;
    }

    let AttachedTty { mut output, mut input } = match backend.open_session(&container_id).await {
        Ok(tty) => tty,
        Err(e) => {
            error!("Failed to open session for {}: {}", container_id, e);
            let _ = outbound.send(Outbound::Close {
                code: CLOSE_ERROR,
                reason: format!("failed to open container session: {}", e),
            });
            return SessionEnd::OpenFailed;
        }
    };
    info!("Session for container {} opened", container_id);

    let output_tx = outbound.clone();
    let mut output_task = tokio::spawn(async move {
        while let Some(chunk) = output.next().await {
            match chunk {
                Ok(data) => {
                    debug!("Container output: {} bytes", data.len());
                    if output_tx.send(Outbound::Data(Frame::Binary(data))).is_err() {
                        return SessionEnd::ClientClosed;
                    }
                }
                Err(e) => {
                    error!("Error reading container output: {}", e);
                    break;
                }
            }
        }
        SessionEnd::OutputEnded
    });

    let input_backend = backend.clone();
    let input_id = container_id.clone();
    let mut input_task = tokio::spawn(async move {
        while let Some(frame) = inbound.recv().await {
            match InboundFrame::classify(frame) {
                InboundFrame::Resize(event) => {
                    debug!("Resize request {} for {}", event, input_id);
                    if let Err(e) = input_backend.resize(&input_id, event.cols, event.rows).await {
                        warn!("Failed to resize container {} TTY: {}", input_id, e);
                    }
                }
                InboundFrame::Input(data) => {
                    if let Err(e) = input.write_all(&data).await {
                        error!("Failed to write to container stdin: {}", e);
                        return SessionEnd::InputFailed;
                    }
                    if let Err(e) = input.flush().await {
                        error!("Failed to flush container stdin: {}", e);
                        return SessionEnd::InputFailed;
                    }
                }
            }
        }
        SessionEnd::ClientClosed
    });

    let result = tokio::select! {
        result = &mut output_task => result,
        result = &mut input_task => result,
    };
    output_task.abort();
    input_task.abort();

    let end = result.unwrap_or_else(|e| {
        error!("Bridge task failed: {}", e);
        SessionEnd::InputFailed
    });

    match end {
        SessionEnd::OutputEnded => {
            let _ = outbound.send(Outbound::Close {
                code: CLOSE_NORMAL,
                reason: "session ended".to_string(),
            });
        }
        SessionEnd::InputFailed => {
            let _ = outbound.send(Outbound::Close {
                code: CLOSE_ERROR,
                reason: "container input closed".to_string(),
            });
        }
        _ => {}
    }

    if let Err(e) = backend.close_session(&container_id).await {
        warn!("Failed to clean up session for {}: {}", container_id, e);
    }
    info!("Session for container {} ended: {:?}", container_id, end);
    end
}
