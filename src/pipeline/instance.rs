//! One decode graph and the state the session keeps about it

use log::{debug, error, info, trace, warn};

use super::engine::{BusSender, BusWatch, Graph, GraphDescription, MediaEngine};
use super::launch;
use super::state::{DrainState, InstanceState};
use super::types::{CodecKind, GraphState, InstanceId, Timestamp};
use super::{RendererError, STATE_WAIT};
use crate::forward::FrameTap;

const ACTUAL_SINK_MARKER: &str = "-actual-sink-";

/// A pipeline instance owns its graph exclusively. It is created once at
/// session initialization and only released by [`PipelineInstance::destroy`].
pub struct PipelineInstance {
    id: InstanceId,
    codec: CodecKind,
    graph: Box<dyn Graph>,
    tap: Option<FrameTap>,
    state: InstanceState,

    /// Set by a fatal bus event; the session is going down
    terminated: bool,

    /// End-of-stream reached the ingestion endpoint and no reset happened since
    eos_sent: bool,

    /// The bus discards everything but pipeline state changes
    bus_flushing: bool,

    /// Still looking for the concrete sink picked by an auto sink
    autovideo: bool,
    detected_sink: Option<String>,

    duration: Option<Timestamp>,
    buffering_level: Option<u8>,
}

impl PipelineInstance {
    /// Build the graph and bring it to ready.
    ///
    /// A graph that cannot be built is an error; a graph that does not reach
    /// ready within the bounded wait yields an instance in the failed state.
    pub fn instantiate(
        id: InstanceId,
        codec: CodecKind,
        description: &GraphDescription,
        engine: &dyn MediaEngine,
        tap: Option<FrameTap>,
        autovideo: bool,
    ) -> Result<Self, RendererError> {
        let name = launch::graph_name(codec);
        if let GraphDescription::Elementary { launch, .. } = description {
            debug!("Video pipeline {} ({}):\n\"{}\"", id, codec, launch);
        }

        let graph = engine.instantiate(&name, description, tap.clone())?;

        let mut instance = Self {
            id,
            codec,
            graph,
            tap,
            state: InstanceState::Null,
            terminated: false,
            eos_sent: false,
            bus_flushing: false,
            autovideo,
            detected_sink: None,
            duration: None,
            buffering_level: None,
        };
        instance.prepare();
        Ok(instance)
    }

    fn prepare(&mut self) {
        let requested = self.graph.set_state(GraphState::Ready);
        let reached = requested.is_ok() && self.graph.current_state(STATE_WAIT) == Some(GraphState::Ready);

        if reached {
            self.transition(InstanceState::Ready);
        } else {
            error!("{}: {}", self.name(), RendererError::InitTimeout(self.name().to_string()));
            self.transition(InstanceState::Failed);
        }
    }

    fn transition(&mut self, next: InstanceState) {
        debug_assert!(
            self.state.can_transition_to(&next),
            "{}: invalid transition {} -> {}",
            self.graph.name(),
            self.state,
            next
        );
        trace!("{}: {} -> {}", self.graph.name(), self.state, next);
        self.state = next;
    }

    fn request(&self, target: GraphState) -> Result<(), RendererError> {
        if !self.state.is_usable() {
            return Err(RendererError::Unusable(self.id));
        }
        self.graph.set_state(target)
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn codec(&self) -> CodecKind {
        self.codec
    }

    pub fn name(&self) -> &str {
        self.graph.name()
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn drain_state(&self) -> DrainState {
        self.state.drain_state()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn has_ingestion(&self) -> bool {
        self.graph.has_ingestion()
    }

    pub fn bus_flushing(&self) -> bool {
        self.bus_flushing
    }

    pub fn autovideo(&self) -> bool {
        self.autovideo
    }

    pub fn detected_sink(&self) -> Option<&str> {
        self.detected_sink.as_deref()
    }

    pub fn buffering_level(&self) -> Option<u8> {
        self.buffering_level
    }

    pub fn cached_duration(&self) -> Option<Timestamp> {
        self.duration
    }

    pub fn base_time(&self) -> Option<Timestamp> {
        self.graph.base_time()
    }

    pub fn graph(&self) -> &dyn Graph {
        self.graph.as_ref()
    }

    /// Frames may be pushed right now.
    pub fn accepts_frames(&self) -> bool {
        self.has_ingestion() && !self.eos_sent && !self.terminated && self.state.accepts_frames()
    }

    pub fn watch_bus(&self, tx: BusSender) -> Result<BusWatch, RendererError> {
        self.graph.watch_bus(self.id, tx)
    }

    /// Open or close the forwarding tap of this instance.
    pub fn set_tap_live(&self, live: bool) {
        if let Some(tap) = &self.tap {
            tap.set_live(live);
        }
    }

    pub fn set_bus_flushing(&mut self, flushing: bool) {
        self.graph.set_bus_flushing(flushing);
        self.bus_flushing = flushing;
    }

    /// Bring a null instance back to ready, clearing the end-of-stream mark.
    pub fn reset_to_ready(&mut self) -> Result<(), RendererError> {
        self.set_bus_flushing(false);
        self.request(GraphState::Ready)?;
        self.eos_sent = false;
        self.transition(InstanceState::Ready);
        Ok(())
    }

    /// Start decoding. A null instance goes through ready first.
    pub fn play(&mut self) -> Result<(), RendererError> {
        match self.state {
            InstanceState::Failed => return Err(RendererError::Unusable(self.id)),
            InstanceState::Draining { .. } => {
                return Err(RendererError::StateChange {
                    name: self.name().to_string(),
                    target: GraphState::Playing,
                });
            }
            InstanceState::Null => self.reset_to_ready()?,
            _ => {}
        }

        self.request(GraphState::Playing)?;
        self.transition(InstanceState::Playing);
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), RendererError> {
        if matches!(self.state, InstanceState::Null | InstanceState::Draining { .. }) {
            return Err(RendererError::StateChange {
                name: self.name().to_string(),
                target: GraphState::Paused,
            });
        }
        self.request(GraphState::Paused)?;
        self.transition(InstanceState::Paused);
        Ok(())
    }

    /// End-of-stream then null, waiting for nothing.
    pub fn stop(&mut self) -> Result<(), RendererError> {
        self.signal_end_of_stream()?;
        self.request(GraphState::Null)?;
        self.transition(InstanceState::Null);
        Ok(())
    }

    pub fn push_compressed_frame(&self, data: &[u8], pts: Option<Timestamp>) -> Result<(), RendererError> {
        if !self.has_ingestion() {
            return Err(RendererError::NoIngestion(self.name().to_string()));
        }
        if !self.accepts_frames() {
            return Err(RendererError::Push {
                name: self.name().to_string(),
                reason: format!("instance is {}", self.state),
            });
        }
        self.graph.push_buffer(data, pts)
    }

    /// Signal end-of-stream on the ingestion endpoint, once.
    pub fn signal_end_of_stream(&mut self) -> Result<(), RendererError> {
        if !self.has_ingestion() || self.eos_sent {
            return Ok(());
        }
        self.eos_sent = true;
        self.graph.end_of_stream()
    }

    /// Retire the instance after a codec switch. Nothing here waits: the
    /// null confirmation is picked up later by the dispatcher.
    pub fn drain(&mut self) {
        if let Err(e) = self.signal_end_of_stream() {
            warn!("{}: end-of-stream on drain failed: {}", self.name(), e);
        }
        self.set_bus_flushing(true);
        if let Err(e) = self.request(GraphState::Null) {
            warn!("{}: null request on drain failed: {}", self.name(), e);
        }
        self.set_tap_live(false);
        self.transition(InstanceState::Draining { restart: false });
    }

    /// Ask a draining instance to play again once null is confirmed.
    pub fn request_restart(&mut self) {
        if let InstanceState::Draining { .. } = self.state {
            self.transition(InstanceState::Draining { restart: true });
        }
    }

    /// The graph reported null while draining. Returns whether a restart
    /// was requested in the meantime.
    pub fn confirm_null(&mut self) -> bool {
        match self.state {
            InstanceState::Draining { restart } => {
                self.transition(InstanceState::Null);
                restart
            }
            _ => false,
        }
    }

    /// Fatal bus event: stop feeding, flush the bus and park in ready.
    pub fn terminate(&mut self) {
        if let Err(e) = self.signal_end_of_stream() {
            warn!("{}: end-of-stream on terminate failed: {}", self.name(), e);
        }
        self.set_bus_flushing(true);
        if let Err(e) = self.request(GraphState::Ready) {
            warn!("{}: ready request on terminate failed: {}", self.name(), e);
        }
        self.set_tap_live(false);
        self.terminated = true;
        if self.state.is_usable() {
            self.transition(InstanceState::Ready);
        }
    }

    /// Record a buffering percentage. Returns the clamped level when it
    /// differs from the previous one.
    pub fn record_buffering(&mut self, percent: i32) -> Option<u8> {
        if percent < 0 {
            return None;
        }
        let level = percent.min(100) as u8;
        if self.buffering_level == Some(level) {
            return None;
        }
        self.buffering_level = Some(level);
        Some(level)
    }

    /// Look for the concrete sink behind an auto sink in a message source
    /// name such as `autovideosink_h264-actual-sink-xvimage`.
    pub fn detect_sink(&mut self, src: &str) -> Option<&str> {
        if !self.autovideo {
            return None;
        }
        let (_, suffix) = src.split_once(ACTUAL_SINK_MARKER)?;
        if !src.contains(self.codec.tag()) {
            return None;
        }
        self.autovideo = false;
        self.detected_sink = Some(format!("{suffix}sink"));
        self.detected_sink.as_deref()
    }

    /// Duration, from cache or from a fresh query that fills the cache.
    pub fn duration(&mut self) -> Option<Timestamp> {
        if self.duration.is_none() {
            self.duration = self.graph.query_duration();
        }
        self.duration
    }

    pub fn invalidate_duration(&mut self) {
        self.duration = None;
    }

    pub fn position(&self) -> Option<Timestamp> {
        self.graph.query_position()
    }

    /// Release the graph. Pending drains get one bounded wait to finish
    /// before null is forced.
    pub fn destroy(mut self) {
        let current = self.graph.current_state(STATE_WAIT);
        if current != Some(GraphState::Null) {
            if let Err(e) = self.signal_end_of_stream() {
                warn!("{}: end-of-stream on destroy failed: {}", self.name(), e);
            }
            if let Err(e) = self.graph.set_state(GraphState::Null) {
                warn!("{}: forcing null failed: {}", self.name(), e);
            }
        }
        self.set_tap_live(false);
        info!("{}: destroyed", self.name());
    }
}

impl std::fmt::Debug for PipelineInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineInstance")
            .field("id", &self.id)
            .field("codec", &self.codec)
            .field("name", &self.name())
            .field("state", &self.state)
            .field("terminated", &self.terminated)
            .field("bus_flushing", &self.bus_flushing)
            .field("detected_sink", &self.detected_sink)
            .finish()
    }
}
