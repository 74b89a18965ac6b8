//! Renderer pipeline layer
//!
//! This module owns everything between the transport layer and the media
//! engine:
//! - Instances: one decode graph per codec, with its lifecycle state
//! - Registry: the arena of instances and the single active slot
//! - Clock: conversion of absolute timestamps to presentation times
//! - Switch/Dispatcher: codec hot-swap and bus event handling
//! - Injector/Playback: frame ingestion and on-demand queries

pub mod clock;
pub mod dispatcher;
pub mod engine;
pub mod health;
pub mod injector;
pub mod instance;
pub mod launch;
pub mod playback;
pub mod registry;
pub mod stage;
pub mod state;
pub mod switch;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use clock::{ClockFault, PresentationClock};
pub use engine::{BusEnvelope, BusMessage, BusWatch, Graph, GraphDescription, MediaEngine};
pub use health::SessionHealth;
pub use instance::PipelineInstance;
pub use registry::Registry;
pub use stage::PipelineStage;
pub use state::{DrainState, InstanceState};
pub use types::{CodecKind, GraphState, InstanceId, Timestamp};

use thiserror::Error;

/// Upper bound of every wait on a graph state change
pub const STATE_WAIT: std::time::Duration = std::time::Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("failed to build graph '{name}': {reason}")]
    Launch { name: String, reason: String },
    #[error("graph '{name}' refused state {target}")]
    StateChange { name: String, target: GraphState },
    #[error("graph '{0}' did not reach READY in time")]
    InitTimeout(String),
    #[error("graph '{0}' has no ingestion endpoint")]
    NoIngestion(String),
    #[error("push into '{name}' failed: {reason}")]
    Push { name: String, reason: String },
    #[error("seek to {0} failed")]
    Seek(Timestamp),
    #[error("only available in on-demand mode")]
    NotOnDemand,
    #[error("not available in on-demand mode")]
    NotMirror,
    #[error("no active instance")]
    NoActiveInstance,
    #[error("no instance {0}")]
    InvalidInstance(InstanceId),
    #[error("instance {0} is unusable")]
    Unusable(InstanceId),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("bus of '{0}' cannot be watched")]
    Bus(String),
    #[error("side channel: {0}")]
    SideChannel(String),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}
