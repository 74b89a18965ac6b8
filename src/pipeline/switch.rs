//! Codec hot-swap between the session's instances

use log::{debug, info};

use super::clock::PresentationClock;
use super::instance::PipelineInstance;
use super::registry::Registry;
use super::state::InstanceState;
use super::types::{GraphState, InstanceId};
use super::{RendererError, STATE_WAIT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// The requested instance was already active
    Unchanged(InstanceId),
    Switched {
        from: Option<InstanceId>,
        to: InstanceId,
    },
}

/// Make `requested` the active instance.
///
/// The new instance is brought to playing and becomes the clock reference;
/// the previous one is drained without waiting for its teardown.
pub fn choose_codec(
    registry: &mut Registry,
    clock: &PresentationClock,
    requested: InstanceId,
) -> Result<SwitchOutcome, RendererError> {
    if registry.active_id() == Some(requested) {
        return Ok(SwitchOutcome::Unchanged(requested));
    }

    let target = registry
        .get_mut(requested)
        .ok_or(RendererError::InvalidInstance(requested))?;
    reactivate(target)?;
    let base = target.base_time();
    let codec = target.codec();

    let previous = registry.active_id();
    registry.set_active(Some(requested));
    clock.refresh(base);

    if let Some(prev) = previous.and_then(|id| registry.get_mut(id)) {
        prev.drain();
    }

    info!(
        "Video codec switched to {} (instance {}), clock base {}",
        codec,
        requested,
        base.map(|b| b.to_string()).unwrap_or_else(|| "none".into())
    );
    Ok(SwitchOutcome::Switched {
        from: previous,
        to: requested,
    })
}

/// Bring an instance back to playing. A drained instance must be seen in
/// null first; if it is not there within the bounded wait, the restart is
/// left to the dispatcher.
fn reactivate(instance: &mut PipelineInstance) -> Result<(), RendererError> {
    match instance.state() {
        InstanceState::Playing => Ok(()),
        InstanceState::Ready | InstanceState::Paused | InstanceState::Null => instance.play(),
        InstanceState::Draining { .. } => {
            if instance.graph().current_state(STATE_WAIT) == Some(GraphState::Null) {
                instance.confirm_null();
                instance.play()
            } else {
                debug!("{}: still draining, restart deferred", instance.name());
                instance.request_restart();
                Ok(())
            }
        }
        InstanceState::Failed => Err(RendererError::Unusable(instance.id())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::pipeline::launch;
    use crate::pipeline::testing::{Call, MockEngine};
    use crate::pipeline::types::{CodecKind, Timestamp};
    use crate::pipeline::state::DrainState;

    fn mirror(engine: &MockEngine) -> Registry {
        let config = SessionConfig {
            h265_support: true,
            ..Default::default()
        };
        let instances = [CodecKind::H264, CodecKind::H265]
            .into_iter()
            .enumerate()
            .map(|(i, codec)| {
                let mut instance = PipelineInstance::instantiate(
                    InstanceId(i),
                    codec,
                    &launch::describe(&config, codec),
                    engine,
                    None,
                    false,
                )
                .unwrap();
                instance.play().unwrap();
                instance
            })
            .collect();
        Registry::new(instances)
    }

    #[test]
    fn test_first_choice_has_no_drain() {
        let engine = MockEngine::new();
        let mut registry = mirror(&engine);
        let clock = PresentationClock::new(true);

        let outcome = choose_codec(&mut registry, &clock, InstanceId(0)).unwrap();
        assert_eq!(outcome, SwitchOutcome::Switched { from: None, to: InstanceId(0) });
        assert_eq!(clock.base(), Some(Timestamp::from_millis(1_000)));
        assert_eq!(engine.graph(1).count(&Call::Eos), 0);
    }

    #[test]
    fn test_same_codec_is_idempotent() {
        let engine = MockEngine::new();
        let mut registry = mirror(&engine);
        let clock = PresentationClock::new(true);

        choose_codec(&mut registry, &clock, InstanceId(1)).unwrap();
        let refreshes = clock.refreshes();
        for _ in 0..3 {
            assert_eq!(
                choose_codec(&mut registry, &clock, InstanceId(1)).unwrap(),
                SwitchOutcome::Unchanged(InstanceId(1))
            );
        }
        assert_eq!(clock.refreshes(), refreshes);
        assert_eq!(engine.graph(0).count(&Call::Eos), 0);
    }

    #[test]
    fn test_switch_drains_previous() {
        let engine = MockEngine::new();
        let mut registry = mirror(&engine);
        let clock = PresentationClock::new(true);

        choose_codec(&mut registry, &clock, InstanceId(0)).unwrap();
        let outcome = choose_codec(&mut registry, &clock, InstanceId(1)).unwrap();

        assert_eq!(
            outcome,
            SwitchOutcome::Switched {
                from: Some(InstanceId(0)),
                to: InstanceId(1)
            }
        );
        assert_eq!(clock.base(), Some(Timestamp::from_millis(2_000)));

        let old = registry.get(InstanceId(0)).unwrap();
        assert_eq!(old.drain_state(), DrainState::Draining);
        let graph = engine.graph(0);
        assert_eq!(graph.count(&Call::Eos), 1);
        assert_eq!(graph.count(&Call::BusFlushing(true)), 1);
        assert_eq!(graph.set_state_calls(GraphState::Null), 1);
    }

    #[test]
    fn test_switch_back_to_null_instance_goes_through_ready() {
        let engine = MockEngine::new();
        let mut registry = mirror(&engine);
        let clock = PresentationClock::new(true);

        choose_codec(&mut registry, &clock, InstanceId(0)).unwrap();
        choose_codec(&mut registry, &clock, InstanceId(1)).unwrap();
        engine.graph(0).clear_calls();

        // the mock completes the null request at once
        choose_codec(&mut registry, &clock, InstanceId(0)).unwrap();

        let calls = engine.graph(0).calls();
        assert_eq!(
            calls,
            vec![
                Call::BusFlushing(false),
                Call::SetState(GraphState::Ready),
                Call::SetState(GraphState::Playing)
            ]
        );
        assert_eq!(registry.get(InstanceId(0)).unwrap().state(), InstanceState::Playing);
        assert_eq!(registry.get(InstanceId(1)).unwrap().drain_state(), DrainState::Draining);
    }

    #[test]
    fn test_switch_back_while_drain_pending_defers_restart() {
        let engine = MockEngine::new();
        let mut registry = mirror(&engine);
        let clock = PresentationClock::new(true);
        engine.graph(0).set_defer_null(true);

        choose_codec(&mut registry, &clock, InstanceId(0)).unwrap();
        choose_codec(&mut registry, &clock, InstanceId(1)).unwrap();
        choose_codec(&mut registry, &clock, InstanceId(0)).unwrap();

        let instance = registry.get(InstanceId(0)).unwrap();
        assert_eq!(instance.state(), InstanceState::Draining { restart: true });
        assert_eq!(registry.active_id(), Some(InstanceId(0)));
        assert!(!instance.accepts_frames());
        assert_eq!(engine.graph(0).set_state_calls(GraphState::Playing), 1);
    }

    #[test]
    fn test_unknown_instance() {
        let engine = MockEngine::new();
        let mut registry = mirror(&engine);
        let clock = PresentationClock::new(true);

        assert!(matches!(
            choose_codec(&mut registry, &clock, InstanceId(5)),
            Err(RendererError::InvalidInstance(InstanceId(5)))
        ));
        assert_eq!(clock.refreshes(), 0);
    }
}
