//! Decoded-frame side channel
//!
//! Decoded frames are tapped inside the graph and handed to a
//! [`FrameForwarder`]; a [`ForwardService`] owns the single websocket
//! connection and sends one binary message per frame. Nothing here ever
//! blocks the graph: frames are dropped when the connection is down or the
//! two-slot queue is full.

use anyhow::Result;
use async_trait::async_trait;
use async_tungstenite::tungstenite::Message;
use bytes::Bytes;
use futures_util::StreamExt;
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::pipeline::RendererError;
use crate::pipeline::health::SessionHealth;
use crate::pipeline::stage::PipelineStage;

/// Frames waiting for the socket; matches the appsink's own queue.
const FORWARD_QUEUE: usize = 2;

/// What happened to one decoded frame handed to the side channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    Queued,
    /// Both slots taken, frame dropped
    QueueFull,
    /// The service has ended
    ServiceGone,
    /// No consumer connected, or the tap is closed
    Disconnected,
}

impl ForwardOutcome {
    pub fn is_queued(self) -> bool {
        matches!(self, ForwardOutcome::Queued)
    }
}

/// Producer side of the side channel, cheap to clone.
#[derive(Clone)]
pub struct FrameForwarder {
    tx: mpsc::Sender<Bytes>,
    connected: Arc<AtomicBool>,
    health: Arc<SessionHealth>,
}

impl FrameForwarder {
    /// Create a forwarder and the service that drains it into `url`.
    pub fn channel(url: impl Into<String>, health: Arc<SessionHealth>) -> (FrameForwarder, ForwardService) {
        let (tx, rx) = mpsc::channel(FORWARD_QUEUE);
        let connected = Arc::new(AtomicBool::new(false));

        let forwarder = FrameForwarder {
            tx,
            connected: connected.clone(),
            health: health.clone(),
        };
        let service = ForwardService {
            url: url.into(),
            rx,
            connected,
            health,
            shutdown: CancellationToken::new(),
        };
        (forwarder, service)
    }

    /// A forwarder without a service; every frame is dropped.
    pub fn disabled(health: Arc<SessionHealth>) -> FrameForwarder {
        let (forwarder, _service) = Self::channel(String::new(), health);
        forwarder
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn health(&self) -> Arc<SessionHealth> {
        self.health.clone()
    }

    /// Copy one decoded frame into the queue.
    pub fn forward(&self, frame: &[u8]) -> ForwardOutcome {
        if !self.is_connected() {
            self.health.record_forward_drop();
            return ForwardOutcome::Disconnected;
        }

        let outcome = match self.tx.try_send(Bytes::copy_from_slice(frame)) {
            Ok(()) => ForwardOutcome::Queued,
            Err(TrySendError::Full(_)) => ForwardOutcome::QueueFull,
            Err(TrySendError::Closed(_)) => ForwardOutcome::ServiceGone,
        };
        if outcome.is_queued() {
            self.health.record_forwarded();
        } else {
            self.health.record_forward_drop();
        }
        outcome
    }

    /// Tap for one pipeline instance, closed until the instance goes live.
    pub fn tap(&self) -> FrameTap {
        FrameTap {
            forwarder: self.clone(),
            live: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Per-instance gate in front of the forwarder.
///
/// Only the instance currently producing decoded output has its tap open.
#[derive(Clone)]
pub struct FrameTap {
    forwarder: FrameForwarder,
    live: Arc<AtomicBool>,
}

impl FrameTap {
    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::Release);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Called from the graph's streaming thread for every decoded frame.
    pub fn push(&self, frame: &[u8]) -> ForwardOutcome {
        if !self.is_live() {
            return ForwardOutcome::Disconnected;
        }
        self.forwarder.forward(frame)
    }
}

/// Owns the websocket connection of the side channel.
pub struct ForwardService {
    url: String,
    rx: mpsc::Receiver<Bytes>,
    connected: Arc<AtomicBool>,
    health: Arc<SessionHealth>,
    shutdown: CancellationToken,
}

impl ForwardService {
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PipelineStage for ForwardService {
    async fn run(&mut self) -> Result<()> {
        let (ws, _) = match async_tungstenite::tokio::connect_async(self.url.as_str()).await {
            Ok(conn) => conn,
            Err(e) => {
                // frames keep being dropped by the forwarder
                warn!("Side channel {} unavailable: {}", self.url, e);
                return Err(RendererError::SideChannel(e.to_string()).into());
            }
        };

        info!("Side channel connected to {}", self.url);
        let (mut write, mut read) = ws.split();
        self.connected.store(true, Ordering::Release);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
                frame = self.rx.recv() => {
                    let Some(frame) = frame else { break };
                    if let Err(e) = write.send(Message::binary(frame)).await {
                        self.health.record_send_failure();
                        warn!("Side channel send failed: {}", e);
                        break;
                    }
                }
                incoming = read.next() => match incoming {
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Side channel closed by peer");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("Side channel error: {}", e);
                        break;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }

        self.connected.store(false, Ordering::Release);
        // whatever is still queued belongs to a dead connection
        while self.rx.try_recv().is_ok() {
            self.health.record_forward_drop();
        }
        debug!("Side channel service stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ForwardService"
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.shutdown.cancel();
        Ok(())
    }
}
