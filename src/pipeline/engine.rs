//! Media engine boundary
//!
//! The renderer never touches graph internals: it builds graphs from a
//! [`GraphDescription`] and drives them through the [`Graph`] trait. Bus
//! messages come back as [`BusEnvelope`]s tagged with the owning instance.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::RendererError;
use super::types::{GraphState, InstanceId, Timestamp};
use crate::forward::FrameTap;

/// What a graph should be built from.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphDescription {
    /// Textual launch line with an ingestion endpoint named `video_source`
    Elementary { launch: String, caps: &'static str },
    /// High-level player pointed at a URI
    Player { uri: String, video_sink: Option<SinkSpec> },
}

impl GraphDescription {
    pub fn has_ingestion(&self) -> bool {
        matches!(self, GraphDescription::Elementary { .. })
    }
}

/// Explicit video sink for the player graph
#[derive(Debug, Clone, PartialEq)]
pub struct SinkSpec {
    pub factory: String,
    pub properties: Vec<(String, String)>,
}

/// Bus message, reduced to what the dispatcher acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    Error {
        src: String,
        message: String,
        debug: Option<String>,
    },
    Eos,
    Buffering {
        percent: i32,
    },
    StateChanged {
        src: String,
        old: GraphState,
        current: GraphState,
    },
    DurationChanged,
    Other {
        src: String,
        kind: String,
    },
}

impl BusMessage {
    pub fn kind(&self) -> &str {
        match self {
            BusMessage::Error { .. } => "error",
            BusMessage::Eos => "eos",
            BusMessage::Buffering { .. } => "buffering",
            BusMessage::StateChanged { .. } => "state-changed",
            BusMessage::DurationChanged => "duration-changed",
            BusMessage::Other { kind, .. } => kind,
        }
    }
}

/// A bus message together with the instance that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct BusEnvelope {
    pub instance: InstanceId,
    pub message: BusMessage,
}

pub type BusSender = mpsc::UnboundedSender<BusEnvelope>;
pub type BusReceiver = mpsc::UnboundedReceiver<BusEnvelope>;

/// Handle of a registered bus watch; forwarding stops when it is dropped.
#[derive(Debug)]
pub struct BusWatch {
    instance: InstanceId,
    token: CancellationToken,
}

impl BusWatch {
    pub fn new(instance: InstanceId) -> Self {
        Self {
            instance,
            token: CancellationToken::new(),
        }
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// Token the engine's forwarding task watches
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }
}

impl Drop for BusWatch {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Factory of media graphs
pub trait MediaEngine: Send + Sync {
    /// Build a graph named `name`. The tap, when given, receives the decoded
    /// frames of the forwarding branch.
    fn instantiate(
        &self,
        name: &str,
        description: &GraphDescription,
        tap: Option<FrameTap>,
    ) -> Result<Box<dyn Graph>, RendererError>;
}

/// One instantiated media graph.
pub trait Graph: Send + Sync {
    fn name(&self) -> &str;

    fn has_ingestion(&self) -> bool;

    /// Request a state change; asynchronous changes complete later.
    fn set_state(&self, target: GraphState) -> Result<(), RendererError>;

    /// Current state after waiting at most `timeout` for a pending change;
    /// `None` when the state could not be determined.
    fn current_state(&self, timeout: Duration) -> Option<GraphState>;

    fn push_buffer(&self, data: &[u8], pts: Option<Timestamp>) -> Result<(), RendererError>;

    fn end_of_stream(&self) -> Result<(), RendererError>;

    fn query_duration(&self) -> Option<Timestamp>;

    fn query_position(&self) -> Option<Timestamp>;

    /// Flushing key-unit seek; returns whether the engine accepted it
    fn seek_simple(&self, position: Timestamp) -> bool;

    fn base_time(&self) -> Option<Timestamp>;

    fn set_bus_flushing(&self, flushing: bool);

    /// Start forwarding bus messages of this graph, tagged with `instance`.
    fn watch_bus(&self, instance: InstanceId, tx: BusSender) -> Result<BusWatch, RendererError>;
}
