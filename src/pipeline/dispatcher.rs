//! Bus event handling for all instances of a session

use log::{debug, error, info, trace, warn};
use std::time::Duration;

use super::clock::PresentationClock;
use super::engine::{BusEnvelope, BusMessage};
use super::instance::PipelineInstance;
use super::registry::Registry;
use super::state::InstanceState;
use super::types::GraphState;

/// What the run loop should do after a message was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchAction {
    Continue,
    Quit,
}

const GENERIC_STREAM_ERROR: &str = "Internal data stream error";

#[derive(Debug, Clone, Copy)]
pub struct BusDispatcher {
    on_demand: bool,
    verbose: bool,
}

impl BusDispatcher {
    pub fn new(on_demand: bool, verbose: bool) -> Self {
        Self { on_demand, verbose }
    }

    pub fn dispatch(
        &self,
        registry: &mut Registry,
        clock: &PresentationClock,
        envelope: &BusEnvelope,
    ) -> DispatchAction {
        let is_active = registry.active_id() == Some(envelope.instance);
        let Some(instance) = registry.get_mut(envelope.instance) else {
            debug_assert!(false, "bus message for unknown instance {}", envelope.instance);
            return DispatchAction::Continue;
        };
        let message = &envelope.message;

        if self.verbose {
            self.trace_message(instance, message);
        }

        // only state changes queued before the flush still count
        if instance.bus_flushing() && !matches!(message, BusMessage::StateChanged { .. }) {
            trace!("{}: discarded {} while flushing", instance.name(), message.kind());
            return DispatchAction::Continue;
        }

        match message {
            BusMessage::Error { src, message, debug } => {
                self.on_error(instance, src, message, debug.as_deref())
            }
            BusMessage::Eos => self.on_eos(instance),
            BusMessage::Buffering { percent } => {
                self.on_buffering(instance, *percent);
                DispatchAction::Continue
            }
            BusMessage::StateChanged { src, old, current } => {
                self.on_state_changed(instance, is_active, clock, src, *old, *current);
                DispatchAction::Continue
            }
            BusMessage::DurationChanged => {
                instance.invalidate_duration();
                DispatchAction::Continue
            }
            BusMessage::Other { .. } => DispatchAction::Continue,
        }
    }

    fn trace_message(&self, instance: &PipelineInstance, message: &BusMessage) {
        let src = match message {
            BusMessage::Error { src, .. }
            | BusMessage::StateChanged { src, .. }
            | BusMessage::Other { src, .. } => src.as_str(),
            _ => instance.name(),
        };

        if self.on_demand {
            match instance.position() {
                Some(pos) => debug!("Bus message {} {}; position: {}", src, message.kind(), pos),
                None => debug!("Bus message {} {}; position: none", src, message.kind()),
            }
        } else {
            debug!("{} bus message: {} {}", instance.codec(), src, message.kind());
        }
    }

    fn on_error(
        &self,
        instance: &mut PipelineInstance,
        src: &str,
        message: &str,
        debug_info: Option<&str>,
    ) -> DispatchAction {
        error!("GStreamer error: {} {}", src, message);
        if let Some(details) = debug_info {
            debug!("{}: {}", instance.name(), details);
        }

        if !self.on_demand && message.contains(GENERIC_STREAM_ERROR) {
            info!(
                "*** This generic error means no working video pipeline could be built.\n\
                 *** Try another decoder (e.g. avdec_h264) or a different video sink."
            );
        }

        instance.terminate();
        DispatchAction::Quit
    }

    fn on_eos(&self, instance: &mut PipelineInstance) -> DispatchAction {
        info!("{}: End-Of-Stream", instance.name());
        if !self.on_demand {
            // our own end-of-stream from a drain or stop
            return DispatchAction::Continue;
        }
        instance.terminate();
        DispatchAction::Quit
    }

    fn on_buffering(&self, instance: &mut PipelineInstance, percent: i32) {
        if !self.on_demand {
            return;
        }
        let Some(level) = instance.record_buffering(percent) else {
            return;
        };
        debug!("Buffering: {}% done", level);

        let result = if level < 100 {
            instance.pause()
        } else {
            instance.play()
        };
        if let Err(e) = result {
            warn!("{}: buffering transition failed: {}", instance.name(), e);
        }
    }

    fn on_state_changed(
        &self,
        instance: &mut PipelineInstance,
        is_active: bool,
        clock: &PresentationClock,
        src: &str,
        old: GraphState,
        current: GraphState,
    ) {
        if src != instance.name() {
            if let Some(sink) = instance.detect_sink(src) {
                info!("Automatically selected videosink is \"{}\"", sink);
            }
            return;
        }

        trace!("{}: {} -> {}", src, old, current);
        match (instance.state(), current) {
            (InstanceState::Draining { .. }, GraphState::Null) => {
                Self::finish_drain(instance, is_active, clock);
            }
            (InstanceState::Playing, GraphState::Playing) if is_active => {
                clock.refresh(instance.base_time());
            }
            _ => {}
        }
    }

    /// Confirm null on every draining instance whose graph got there.
    ///
    /// Draining flushes the bus, so the engine drops the state change that
    /// would confirm it; the graph state is polled instead. Returns how
    /// many drains completed.
    pub fn poll_drains(&self, registry: &mut Registry, clock: &PresentationClock) -> usize {
        let active = registry.active_id();
        let mut completed = 0;

        for instance in registry.iter_mut() {
            if !matches!(instance.state(), InstanceState::Draining { .. }) {
                continue;
            }
            if instance.graph().current_state(Duration::ZERO) != Some(GraphState::Null) {
                continue;
            }
            let is_active = active == Some(instance.id());
            Self::finish_drain(instance, is_active, clock);
            completed += 1;
        }
        completed
    }

    fn finish_drain(instance: &mut PipelineInstance, is_active: bool, clock: &PresentationClock) {
        let restart = instance.confirm_null();
        debug!("{}: drain complete", instance.name());
        if !restart {
            return;
        }

        info!("{}: restarting after drain", instance.name());
        match instance.play() {
            Ok(()) if is_active => clock.refresh(instance.base_time()),
            Ok(()) => {}
            Err(e) => error!("{}: restart failed: {}", instance.name(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::pipeline::launch;
    use crate::pipeline::switch::choose_codec;
    use crate::pipeline::testing::{Call, MockEngine};
    use crate::pipeline::types::{CodecKind, InstanceId, Timestamp};

    fn session(engine: &MockEngine, config: &SessionConfig) -> Registry {
        let codecs: Vec<CodecKind> = if config.is_on_demand() {
            vec![CodecKind::HlsPassthrough]
        } else {
            vec![CodecKind::H264, CodecKind::H265]
        };
        let instances = codecs
            .into_iter()
            .enumerate()
            .map(|(i, codec)| {
                let mut instance = PipelineInstance::instantiate(
                    InstanceId(i),
                    codec,
                    &launch::describe(config, codec),
                    engine,
                    None,
                    config.auto_video_sink(),
                )
                .unwrap();
                instance.play().unwrap();
                instance
            })
            .collect();
        Registry::new(instances)
    }

    fn envelope(id: usize, message: BusMessage) -> BusEnvelope {
        BusEnvelope {
            instance: InstanceId(id),
            message,
        }
    }

    fn on_demand() -> SessionConfig {
        SessionConfig {
            uri: Some("http://localhost/index.m3u8".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_buffering_pause_then_single_play() {
        let engine = MockEngine::new();
        let config = on_demand();
        let mut registry = session(&engine, &config);
        registry.set_active(Some(InstanceId(0)));
        let clock = PresentationClock::new(false);
        let dispatcher = BusDispatcher::new(true, false);
        engine.graph(0).clear_calls();

        for percent in [40, 70, 100] {
            let action = dispatcher.dispatch(&mut registry, &clock, &envelope(0, BusMessage::Buffering { percent }));
            assert_eq!(action, DispatchAction::Continue);
        }
        // repeated identical percentage changes nothing
        dispatcher.dispatch(&mut registry, &clock, &envelope(0, BusMessage::Buffering { percent: 100 }));

        let graph = engine.graph(0);
        assert_eq!(
            graph.calls(),
            vec![
                Call::SetState(GraphState::Paused),
                Call::SetState(GraphState::Paused),
                Call::SetState(GraphState::Playing)
            ]
        );
        assert_eq!(registry.get(InstanceId(0)).unwrap().buffering_level(), Some(100));
    }

    #[test]
    fn test_buffering_ignored_in_mirror_mode() {
        let engine = MockEngine::new();
        let mut registry = session(&engine, &SessionConfig::default());
        let clock = PresentationClock::new(true);
        let dispatcher = BusDispatcher::new(false, false);
        engine.graph(0).clear_calls();

        dispatcher.dispatch(&mut registry, &clock, &envelope(0, BusMessage::Buffering { percent: 10 }));
        assert!(engine.graph(0).calls().is_empty());
    }

    #[test]
    fn test_error_terminates_and_quits() {
        let engine = MockEngine::new();
        let mut registry = session(&engine, &SessionConfig::default());
        let clock = PresentationClock::new(true);
        let dispatcher = BusDispatcher::new(false, true);
        engine.graph(0).clear_calls();

        let action = dispatcher.dispatch(
            &mut registry,
            &clock,
            &envelope(
                0,
                BusMessage::Error {
                    src: "avdec_h264-0".into(),
                    message: "Internal data stream error.".into(),
                    debug: Some("gstbasesrc.c(3132)".into()),
                },
            ),
        );

        assert_eq!(action, DispatchAction::Quit);
        let instance = registry.get(InstanceId(0)).unwrap();
        assert!(instance.is_terminated());
        assert_eq!(instance.state(), InstanceState::Ready);
        assert_eq!(
            engine.graph(0).calls(),
            vec![
                Call::Eos,
                Call::BusFlushing(true),
                Call::SetState(GraphState::Ready)
            ]
        );
        // the other instance is untouched
        assert!(!registry.get(InstanceId(1)).unwrap().is_terminated());
    }

    #[test]
    fn test_eos_depends_on_mode() {
        let engine = MockEngine::new();
        let mut registry = session(&engine, &SessionConfig::default());
        let clock = PresentationClock::new(true);
        let dispatcher = BusDispatcher::new(false, false);
        assert_eq!(
            dispatcher.dispatch(&mut registry, &clock, &envelope(0, BusMessage::Eos)),
            DispatchAction::Continue
        );

        let engine = MockEngine::new();
        let mut registry = session(&engine, &on_demand());
        let dispatcher = BusDispatcher::new(true, false);
        assert_eq!(
            dispatcher.dispatch(&mut registry, &clock, &envelope(0, BusMessage::Eos)),
            DispatchAction::Quit
        );
        let instance = registry.get(InstanceId(0)).unwrap();
        assert!(instance.is_terminated());
        assert!(instance.bus_flushing());
    }

    #[test]
    fn test_flushing_bus_discards_errors() {
        let engine = MockEngine::new();
        let mut registry = session(&engine, &SessionConfig::default());
        let clock = PresentationClock::new(true);
        let dispatcher = BusDispatcher::new(false, false);

        choose_codec(&mut registry, &clock, InstanceId(0)).unwrap();
        choose_codec(&mut registry, &clock, InstanceId(1)).unwrap();

        let action = dispatcher.dispatch(
            &mut registry,
            &clock,
            &envelope(
                0,
                BusMessage::Error {
                    src: "h264parse0".into(),
                    message: "late error".into(),
                    debug: None,
                },
            ),
        );
        assert_eq!(action, DispatchAction::Continue);
        assert!(!registry.get(InstanceId(0)).unwrap().is_terminated());
    }

    #[test]
    fn test_drain_restart_without_bus_message() {
        let engine = MockEngine::new();
        let mut registry = session(&engine, &SessionConfig::default());
        let clock = PresentationClock::new(true);
        let dispatcher = BusDispatcher::new(false, false);
        let graph = engine.graph(0);
        graph.set_defer_null(true);

        choose_codec(&mut registry, &clock, InstanceId(0)).unwrap();
        choose_codec(&mut registry, &clock, InstanceId(1)).unwrap();
        choose_codec(&mut registry, &clock, InstanceId(0)).unwrap();
        assert_eq!(
            registry.get(InstanceId(0)).unwrap().state(),
            InstanceState::Draining { restart: true }
        );

        // graph 1 reached null at once, graph 0 is still on its way
        assert_eq!(dispatcher.poll_drains(&mut registry, &clock), 1);
        assert_eq!(registry.get(InstanceId(1)).unwrap().state(), InstanceState::Null);
        assert_eq!(
            registry.get(InstanceId(0)).unwrap().state(),
            InstanceState::Draining { restart: true }
        );

        graph.complete_null();
        graph.set_defer_null(false);
        graph.set_base_time(Some(Timestamp::from_millis(9_000)));
        graph.clear_calls();
        assert_eq!(dispatcher.poll_drains(&mut registry, &clock), 1);

        let instance = registry.get(InstanceId(0)).unwrap();
        assert_eq!(instance.state(), InstanceState::Playing);
        assert!(!instance.bus_flushing());
        assert!(instance.accepts_frames());
        assert_eq!(clock.base(), Some(Timestamp::from_millis(9_000)));
        assert_eq!(
            graph.calls(),
            vec![
                Call::BusFlushing(false),
                Call::SetState(GraphState::Ready),
                Call::SetState(GraphState::Playing)
            ]
        );
    }

    #[test]
    fn test_drain_completion_without_restart() {
        let engine = MockEngine::new();
        let mut registry = session(&engine, &SessionConfig::default());
        let clock = PresentationClock::new(true);
        let dispatcher = BusDispatcher::new(false, false);

        choose_codec(&mut registry, &clock, InstanceId(0)).unwrap();
        choose_codec(&mut registry, &clock, InstanceId(1)).unwrap();
        let refreshes = clock.refreshes();

        assert_eq!(dispatcher.poll_drains(&mut registry, &clock), 1);
        assert_eq!(registry.get(InstanceId(0)).unwrap().state(), InstanceState::Null);
        assert_eq!(engine.graph(0).set_state_calls(GraphState::Playing), 1);
        assert_eq!(clock.refreshes(), refreshes);
        // nothing left to confirm
        assert_eq!(dispatcher.poll_drains(&mut registry, &clock), 0);
    }

    #[test]
    fn test_drained_graph_drops_bus_messages() {
        let engine = MockEngine::new();
        let mut registry = session(&engine, &SessionConfig::default());
        let clock = PresentationClock::new(true);
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let _watch = registry.get(InstanceId(0)).unwrap().watch_bus(tx).unwrap();

        choose_codec(&mut registry, &clock, InstanceId(0)).unwrap();
        choose_codec(&mut registry, &clock, InstanceId(1)).unwrap();

        let graph = engine.graph(0);
        assert!(graph.bus_flushing());
        assert!(!graph.emit(graph.state_changed(GraphState::Ready, GraphState::Null)));
    }

    #[test]
    fn test_active_playing_refreshes_clock() {
        let engine = MockEngine::new();
        let mut registry = session(&engine, &SessionConfig::default());
        let clock = PresentationClock::new(true);
        let dispatcher = BusDispatcher::new(false, false);

        choose_codec(&mut registry, &clock, InstanceId(1)).unwrap();
        engine.graph(1).set_base_time(Some(Timestamp::from_millis(7_000)));

        let message = engine.graph(1).state_changed(GraphState::Paused, GraphState::Playing);
        dispatcher.dispatch(&mut registry, &clock, &envelope(1, message));
        assert_eq!(clock.base(), Some(Timestamp::from_millis(7_000)));

        // inactive instances never move the clock
        let message = engine.graph(0).state_changed(GraphState::Paused, GraphState::Playing);
        dispatcher.dispatch(&mut registry, &clock, &envelope(0, message));
        assert_eq!(clock.base(), Some(Timestamp::from_millis(7_000)));
    }

    #[test]
    fn test_auto_sink_recorded_once() {
        let engine = MockEngine::new();
        let mut registry = session(&engine, &SessionConfig::default());
        let clock = PresentationClock::new(true);
        let dispatcher = BusDispatcher::new(false, false);

        let changed = |src: &str| BusMessage::StateChanged {
            src: src.into(),
            old: GraphState::Ready,
            current: GraphState::Paused,
        };
        dispatcher.dispatch(&mut registry, &clock, &envelope(0, changed("autovideosink_h264-actual-sink-vaapi")));
        dispatcher.dispatch(&mut registry, &clock, &envelope(0, changed("autovideosink_h264-actual-sink-xvimage")));

        assert_eq!(registry.get(InstanceId(0)).unwrap().detected_sink(), Some("vaapisink"));
        assert_eq!(registry.get(InstanceId(1)).unwrap().detected_sink(), None);
    }

    #[test]
    fn test_duration_change_invalidates_cache() {
        let engine = MockEngine::new();
        let mut registry = session(&engine, &on_demand());
        let clock = PresentationClock::new(false);
        let dispatcher = BusDispatcher::new(true, false);

        engine.graph(0).set_duration(Some(Timestamp::from_millis(60_000)));
        registry.get_mut(InstanceId(0)).unwrap().duration();
        dispatcher.dispatch(&mut registry, &clock, &envelope(0, BusMessage::DurationChanged));
        assert_eq!(registry.get(InstanceId(0)).unwrap().cached_duration(), None);
    }
}
