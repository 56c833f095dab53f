// ABOUTME: Terminal widget bound to a host container (the local TTY in production)
// Tracks geometry, fits it to the container, and notifies registered resize handlers

use crate::terminal::fit::{propose_dimensions, CellMetrics, ContainerSize};
use crate::terminal::protocol::ResizeEvent;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::{self, IsTerminal};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum WidgetError {
    #[error("terminal container unavailable: {0}")]
    NoContainer(String),
    #[error("terminal is already open")]
    AlreadyOpen,
    #[error("terminal is not open")]
    NotOpen,
    #[error("invalid terminal size {cols}x{rows}")]
    InvalidSize { cols: u16, rows: u16 },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Raw byte streams of a terminal: keystrokes in, rendered output out
pub struct TerminalIo {
    pub keyboard: Box<dyn AsyncRead + Send + Unpin>,
    pub display: Box<dyn AsyncWrite + Send + Unpin>,
}

/// Where the widget is mounted. Measured on open and on every fit.
pub trait ContainerElement: Send {
    fn measure(&self) -> io::Result<ContainerSize>;

    /// Hand over the container's byte streams. Called once, on open.
    fn take_io(&mut self) -> Option<TerminalIo>;
}

/// The local terminal in raw mode. Dropping it restores cooked mode.
pub struct HostTerminal {
    io: Option<TerminalIo>,
}

impl HostTerminal {
    pub fn acquire() -> Result<Self, WidgetError> {
        if !io::stdin().is_terminal() || !io::stdout().is_terminal() {
            return Err(WidgetError::NoContainer(
                "stdin and stdout must be an interactive terminal".to_string(),
            ));
        }

        enable_raw_mode()?;
        debug!("Raw mode enabled on host terminal");

        Ok(Self {
            io: Some(TerminalIo {
                keyboard: Box::new(tokio::io::stdin()),
                display: Box::new(tokio::io::stdout()),
            }),
        })
    }
}

impl ContainerElement for HostTerminal {
    fn measure(&self) -> io::Result<ContainerSize> {
        // window_size is not available everywhere; cell counts always are
        match crossterm::terminal::window_size() {
            Ok(size) => Ok(ContainerSize {
                cols: size.columns,
                rows: size.rows,
                width_px: size.width,
                height_px: size.height,
            }),
            Err(_) => {
                let (cols, rows) = crossterm::terminal::size()?;
                Ok(ContainerSize::cells(cols, rows))
            }
        }
    }

    fn take_io(&mut self) -> Option<TerminalIo> {
        self.io.take()
    }
}

impl Drop for HostTerminal {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            warn!("Failed to restore terminal mode: {}", e);
        }
    }
}

/// Called with the new geometry whenever it changes
pub type ResizeHandler = Box<dyn FnMut(ResizeEvent) + Send>;

#[derive(Debug, Clone, Copy, Default)]
pub struct WidgetOptions {
    pub cell_metrics: Option<CellMetrics>,
    pub padding_px: u16,
}

pub struct TerminalWidget {
    options: WidgetOptions,
    container: Option<Box<dyn ContainerElement>>,
    io: Option<TerminalIo>,
    dimensions: Option<ResizeEvent>,
    resize_handlers: Vec<ResizeHandler>,
}

impl TerminalWidget {
    pub fn new(options: WidgetOptions) -> Self {
        Self {
            options,
            container: None,
            io: None,
            dimensions: None,
            resize_handlers: Vec::new(),
        }
    }

    /// Mount the widget. The container must be measurable right away.
    pub fn open(&mut self, mut container: Box<dyn ContainerElement>) -> Result<(), WidgetError> {
        if self.container.is_some() {
            return Err(WidgetError::AlreadyOpen);
        }

        let size = container
            .measure()
            .map_err(|e| WidgetError::NoContainer(e.to_string()))?;
        info!("Terminal opened in container {}x{}", size.cols, size.rows);

        self.io = container.take_io();
        self.container = Some(container);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.container.is_some()
    }

    /// Resize to whatever fits the container right now.
    ///
    /// Returns the new geometry if it changed.
    pub fn fit(&mut self) -> Result<Option<ResizeEvent>, WidgetError> {
        let container = self.container.as_ref().ok_or(WidgetError::NotOpen)?;
        let size = container.measure()?;

        let Some((cols, rows)) =
            propose_dimensions(size, self.options.cell_metrics, self.options.padding_px)
        else {
            debug!("Container reports no area, skipping fit");
            return Ok(None);
        };

        if self.resize(cols, rows)? {
            Ok(self.dimensions)
        } else {
            Ok(None)
        }
    }

    /// Set the geometry explicitly. Handlers fire only on an actual change.
    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<bool, WidgetError> {
        let event = ResizeEvent::new(cols, rows).ok_or(WidgetError::InvalidSize { cols, rows })?;
        if self.dimensions == Some(event) {
            return Ok(false);
        }

        debug!("Terminal resized to {}", event);
        self.dimensions = Some(event);
        for handler in &mut self.resize_handlers {
            handler(event);
        }
        Ok(true)
    }

    pub fn on_resize(&mut self, handler: ResizeHandler) {
        self.resize_handlers.push(handler);
    }

    pub fn dimensions(&self) -> Option<ResizeEvent> {
        self.dimensions
    }

    /// Hand the keyboard/display streams to whoever forwards them
    pub fn take_io(&mut self) -> Option<TerminalIo> {
        self.io.take()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Container with a size the test can change between fits
    pub struct FakeContainer {
        pub size: Arc<Mutex<ContainerSize>>,
        pub io: Option<TerminalIo>,
    }

    impl FakeContainer {
        pub fn new(cols: u16, rows: u16) -> (Self, Arc<Mutex<ContainerSize>>) {
            let size = Arc::new(Mutex::new(ContainerSize::cells(cols, rows)));
            (
                Self {
                    size: size.clone(),
                    io: None,
                },
                size,
            )
        }
    }

    impl ContainerElement for FakeContainer {
        fn measure(&self) -> io::Result<ContainerSize> {
            Ok(*self.size.lock().unwrap())
        }

        fn take_io(&mut self) -> Option<TerminalIo> {
            self.io.take()
        }
    }

    pub struct MissingContainer;

    impl ContainerElement for MissingContainer {
        fn measure(&self) -> io::Result<ContainerSize> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no element with id terminal"))
        }

        fn take_io(&mut self) -> Option<TerminalIo> {
            None
        }
    }
}
