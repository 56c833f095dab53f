// ABOUTME: Wire protocol shared by the terminal client and the container bridge server
// Raw terminal bytes in both directions, plus a "<cols>:<rows>" text message for resizes

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================
// Frames
// ============================================

/// A single WebSocket data message.
///
/// Control frames (ping, pong, close) are handled by the transport and never
/// show up here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    /// The payload as bytes, regardless of frame kind
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Frame::Text(text) => text.as_bytes(),
            Frame::Binary(data) => data,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

// ============================================
// Resize message
// ============================================

/// Terminal geometry change, sent upstream as `"<cols>:<rows>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResizeEvent {
    pub cols: u16,
    pub rows: u16,
}

impl ResizeEvent {
    /// Both dimensions must be positive
    pub fn new(cols: u16, rows: u16) -> Option<Self> {
        (cols > 0 && rows > 0).then_some(Self { cols, rows })
    }

    /// Encode as the wire text, e.g. `80:24`
    pub fn encode(&self) -> String {
        format!("{}:{}", self.cols, self.rows)
    }

    /// Strict inverse of [`ResizeEvent::encode`].
    ///
    /// Accepts only ASCII digits on both sides of a single colon, with both
    /// values in `1..=u16::MAX`. Anything else is not a resize message.
    pub fn parse(text: &str) -> Option<Self> {
        let (cols, rows) = text.split_once(':')?;
        Self::new(parse_dimension(cols)?, parse_dimension(rows)?)
    }

    pub fn to_frame(&self) -> Frame {
        Frame::Text(self.encode())
    }
}

impl fmt::Display for ResizeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

fn parse_dimension(s: &str) -> Option<u16> {
    // u16::from_str would also accept a leading '+'
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

// ============================================
// Server-side classification
// ============================================

/// What the bridge server should do with a frame received from a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Resize(ResizeEvent),
    Input(Vec<u8>),
}

impl InboundFrame {
    /// Text frames that parse as a resize message resize the TTY. All other
    /// frames are keystrokes.
    pub fn classify(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => match ResizeEvent::parse(&text) {
                Some(event) => InboundFrame::Resize(event),
                None => InboundFrame::Input(text.into_bytes()),
            },
            Frame::Binary(data) => InboundFrame::Input(data),
        }
    }
}

// ============================================
// Connection State
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        self == ConnectionState::Open
    }
}
