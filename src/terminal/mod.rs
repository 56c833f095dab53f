// ABOUTME: Terminal client module: widget, fit, socket transport, attach helper and resize notifier
// Connects the local terminal to a container TTY through the bridge server's WebSocket endpoint

pub mod attach;
pub mod fit;
pub mod protocol;
pub mod resize;
pub mod session;
pub mod websocket_client;
pub mod widget;

pub use attach::{attach, AttachExit, AttachHandle, AttachOptions};
pub use protocol::{ConnectionState, Frame, InboundFrame, ResizeEvent};
pub use resize::ResizeNotifier;
pub use session::TerminalSession;
pub use websocket_client::{endpoint_url, MessageSink, TransportError, WebSocketTerminalClient};
pub use widget::{ContainerElement, HostTerminal, TerminalIo, TerminalWidget, WidgetError, WidgetOptions};
