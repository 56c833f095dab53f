// ABOUTME: Client session wiring the terminal widget, socket transport, attach helper and resize notifier
// Order is fixed: open → fit → connect → attach → register resize handler

use crate::config::ClientConfig;
use crate::terminal::attach::{attach, AttachExit};
use crate::terminal::resize::ResizeNotifier;
use crate::terminal::websocket_client::{endpoint_url, WebSocketTerminalClient};
use crate::terminal::widget::{ContainerElement, HostTerminal, TerminalIo, TerminalWidget};
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub struct TerminalSession;

impl TerminalSession {
    /// Attach the local terminal to `container_id` until detach or disconnect
    pub async fn run(config: &ClientConfig, container_id: &str) -> Result<AttachExit> {
        let host = HostTerminal::acquire()?;
        Self::run_in(Box::new(host), config, container_id, watch_window_changes()?).await
    }

    /// Same as [`TerminalSession::run`] with an explicit container and
    /// window-change source
    pub async fn run_in(
        container: Box<dyn ContainerElement>,
        config: &ClientConfig,
        container_id: &str,
        mut window_changes: mpsc::UnboundedReceiver<()>,
    ) -> Result<AttachExit> {
        let attach_options = config.attach_options()?;

        let mut widget = TerminalWidget::new(config.widget_options());
        widget.open(container)?;
        widget.fit()?;
        let TerminalIo { keyboard, display } = widget
            .take_io()
            .ok_or_else(|| anyhow!("terminal container has no byte streams"))?;

        let url = endpoint_url(&config.host, config.port, container_id);
        let client = Arc::new(WebSocketTerminalClient::new(url, config.connect_timeout()));
        client
            .connect()
            .await
            .with_context(|| format!("Failed to connect to {}", client.url()))?;
        let incoming = client
            .take_incoming()
            .ok_or_else(|| anyhow!("socket output already taken"))?;

        let mut handle = attach(client.clone(), incoming, keyboard, display, attach_options);

        let notifier = ResizeNotifier::new(client.clone());
        if config.announce_initial_size {
            if let Some(event) = widget.dimensions() {
                if let Err(e) = notifier.notify(event) {
                    warn!("Failed to announce initial size {}: {}", event, e);
                }
            }
        }
        widget.on_resize(Box::new(move |event| {
            if let Err(e) = notifier.notify(event) {
                warn!("Dropped resize {}: {}", event, e);
            }
        }));

        info!("Attached to container {}", container_id);

        let exit = loop {
            tokio::select! {
                exit = handle.finished() => break exit,
                Some(()) = window_changes.recv() => {
                    if let Err(e) = widget.fit() {
                        warn!("Failed to fit terminal: {}", e);
                    }
                }
            }
        };

        info!("Session with container {} ended: {:?}", container_id, exit);
        client.close();
        Ok(exit)
    }
}

/// Window-change notifications for the host terminal
#[cfg(unix)]
fn watch_window_changes() -> Result<mpsc::UnboundedReceiver<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut winch = signal(SignalKind::window_change()).context("Failed to watch SIGWINCH")?;
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while winch.recv().await.is_some() {
            if tx.send(()).is_err() {
                break;
            }
        }
    });
    Ok(rx)
}

/// No SIGWINCH here, so poll the size instead
#[cfg(not(unix))]
fn watch_window_changes() -> Result<mpsc::UnboundedReceiver<()>> {
    use tokio::time::{interval, Duration};

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_millis(250));
        let mut last = crossterm::terminal::size().ok();
        loop {
            ticker.tick().await;
            let current = crossterm::terminal::size().ok();
            if current != last {
                last = current;
                if tx.send(()).is_err() {
                    break;
                }
            }
        }
    });
    Ok(rx)
}
