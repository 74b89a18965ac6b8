//! Renderer session: the context every inbound call goes through
//!
//! A [`VideoSession`] owns the instance arena, the presentation clock and
//! the bus channel. Frame injection takes the registry read lock; codec
//! switches, lifecycle calls and bus dispatch take the write lock.

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::SessionConfig;
use crate::forward::FrameForwarder;
use crate::pipeline::dispatcher::{BusDispatcher, DispatchAction};
use crate::pipeline::engine::{BusEnvelope, BusReceiver, BusSender, BusWatch, MediaEngine};
use crate::pipeline::injector::{FrameInjector, PushOutcome};
use crate::pipeline::playback::{self, PlaybackInfo};
use crate::pipeline::switch::{self, SwitchOutcome};
use crate::pipeline::types::DisplaySize;
use crate::pipeline::{
    CodecKind, InstanceId, InstanceState, PipelineInstance, PipelineStage, PresentationClock, Registry,
    RendererError, SessionHealth, Timestamp, launch,
};
use crate::utils::sos::SignalOfStop;

/// How often the reset flag is polled by the dispatch loop
pub const RESET_CHECK_INTERVAL: Duration = Duration::from_millis(100);
/// How often the dispatch loop logs the health summary
pub const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

struct SessionShared {
    config: SessionConfig,
    registry: RwLock<Registry>,
    clock: PresentationClock,
    health: Arc<SessionHealth>,
    injector: FrameInjector,
    dispatcher: BusDispatcher,
    quit: SignalOfStop,
    reset_requested: AtomicBool,
    destroyed: AtomicBool,
    bus_tx: BusSender,
    bus_rx: Mutex<Option<BusReceiver>>,
    size: Mutex<Option<DisplaySize>>,
}

/// Handle on a renderer session, cheap to clone and shareable between the
/// transport threads and the runtime.
#[derive(Clone)]
pub struct VideoSession {
    shared: Arc<SessionShared>,
}

impl VideoSession {
    /// Build every pipeline instance the configuration asks for and bring
    /// each one to ready.
    pub fn init(
        config: SessionConfig,
        engine: &dyn MediaEngine,
        forwarder: &FrameForwarder,
    ) -> Result<Self, RendererError> {
        config.validate()?;

        let codecs: &[CodecKind] = match (config.is_on_demand(), config.h265_support) {
            (true, _) => &[CodecKind::HlsPassthrough],
            (false, false) => &[CodecKind::H264],
            (false, true) => &[CodecKind::H264, CodecKind::H265],
        };

        let mut instances = Vec::with_capacity(codecs.len());
        for (index, codec) in codecs.iter().copied().enumerate() {
            let tap = (codec.is_elementary() && config.forward.enabled).then(|| forwarder.tap());
            let built = PipelineInstance::instantiate(
                InstanceId(index),
                codec,
                &launch::describe(&config, codec),
                engine,
                tap,
                config.auto_video_sink(),
            );

            let failure = match built {
                Ok(instance) if instance.state().is_usable() => {
                    instances.push(instance);
                    continue;
                }
                Ok(instance) => {
                    let name = instance.name().to_string();
                    instance.destroy();
                    RendererError::InitTimeout(name)
                }
                Err(e) => e,
            };

            error!("Video renderer initialization failed: {}", failure);
            for instance in instances {
                instance.destroy();
            }
            return Err(failure);
        }

        let mut registry = Registry::new(instances);
        if config.is_on_demand() {
            registry.set_active(Some(InstanceId::PRIMARY));
        }

        let (bus_tx, bus_rx) = mpsc::unbounded_channel();
        info!("Video renderer initialized: {}", config);

        Ok(Self {
            shared: Arc::new(SessionShared {
                clock: PresentationClock::new(config.sync),
                dispatcher: BusDispatcher::new(config.is_on_demand(), config.debug_bus),
                config,
                registry: RwLock::new(registry),
                health: forwarder.health(),
                injector: FrameInjector::new(),
                quit: SignalOfStop::new(),
                reset_requested: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
                bus_tx,
                bus_rx: Mutex::new(Some(bus_rx)),
                size: Mutex::new(None),
            }),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.shared.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.shared.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn clock(&self) -> &PresentationClock {
        &self.shared.clock
    }

    pub fn health(&self) -> Arc<SessionHealth> {
        self.shared.health.clone()
    }

    pub fn quit_signal(&self) -> SignalOfStop {
        self.shared.quit.clone()
    }

    pub fn instance_count(&self) -> usize {
        self.read().len()
    }

    pub fn active_instance(&self) -> Option<InstanceId> {
        self.read().active_id()
    }

    pub fn active_codec(&self) -> Option<CodecKind> {
        self.read().active().map(|i| i.codec())
    }

    pub fn instance_state(&self, id: InstanceId) -> Option<InstanceState> {
        self.read().get(id).map(|i| i.state())
    }

    pub fn detected_sink(&self, id: InstanceId) -> Option<String> {
        self.read().get(id).and_then(|i| i.detected_sink().map(str::to_string))
    }

    /// Start playback. In mirror mode every instance plays and none is
    /// active until the first codec notification.
    pub fn start(&self) -> Result<(), RendererError> {
        let mut registry = self.write();

        if self.shared.config.is_on_demand() {
            let instance = registry.active_mut().ok_or(RendererError::NoActiveInstance)?;
            return instance.play();
        }

        for instance in registry.iter_mut() {
            if let Err(e) = instance.play() {
                error!("{}: failed to start: {}", instance.name(), e);
            }
        }
        registry.set_active(None);
        self.shared.injector.rearm();
        Ok(())
    }

    pub fn pause(&self) -> Result<(), RendererError> {
        let mut registry = self.write();
        let instance = registry.active_mut().ok_or(RendererError::NoActiveInstance)?;
        instance.pause()
    }

    pub fn resume(&self) -> Result<(), RendererError> {
        let mut registry = self.write();
        let instance = registry.active_mut().ok_or(RendererError::NoActiveInstance)?;
        instance.play()?;
        if instance.has_ingestion() {
            self.shared.clock.refresh(instance.base_time());
        }
        Ok(())
    }

    /// End-of-stream and null on the active instance, if any.
    pub fn stop(&self) -> Result<(), RendererError> {
        let mut registry = self.write();
        match registry.active_mut() {
            Some(instance) => instance.stop(),
            None => Ok(()),
        }
    }

    /// Release every instance. Safe to call more than once and in any state.
    pub fn destroy(&self) {
        if self.shared.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let instances = self.write().take_all();
        for instance in instances {
            instance.destroy();
        }
        info!("Video renderer destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.destroyed.load(Ordering::SeqCst)
    }

    /// Inject one compressed frame stamped with its absolute time in
    /// nanoseconds.
    pub fn push_frame(&self, data: &[u8], ntp_time: u64) -> PushOutcome {
        let registry = self.read();
        self.shared.injector.inject(
            &registry,
            &self.shared.clock,
            &self.shared.health,
            data,
            Timestamp::from_nanos(ntp_time),
        )
    }

    /// The sender switched codec; `is_alternate` selects the h265 instance.
    pub fn notify_codec(&self, is_alternate: bool) -> Result<SwitchOutcome, RendererError> {
        if self.shared.config.is_on_demand() {
            return Err(RendererError::NotMirror);
        }

        let (codec, slot) = if is_alternate {
            (CodecKind::H265, InstanceId::ALTERNATE)
        } else {
            (CodecKind::H264, InstanceId::PRIMARY)
        };

        let mut registry = self.write();
        let requested = registry
            .find_codec(codec)
            .ok_or(RendererError::InvalidInstance(slot))?;
        let outcome = switch::choose_codec(&mut registry, &self.shared.clock, requested)?;
        if let SwitchOutcome::Switched { .. } = outcome {
            self.shared.health.record_codec_switch();
        }
        Ok(outcome)
    }

    pub fn seek(&self, position_secs: f64) -> Result<Timestamp, RendererError> {
        if !self.shared.config.is_on_demand() {
            return Err(RendererError::NotOnDemand);
        }
        let mut registry = self.write();
        let instance = registry.active_mut().ok_or(RendererError::NoActiveInstance)?;
        playback::seek(instance, position_secs)
    }

    pub fn query_playback(&self) -> Result<PlaybackInfo, RendererError> {
        if !self.shared.config.is_on_demand() {
            return Err(RendererError::NotOnDemand);
        }
        let mut registry = self.write();
        Ok(registry.active_mut().map(playback::query).unwrap_or_default())
    }

    pub fn is_paused(&self) -> bool {
        self.read().active().is_some_and(|i| i.state().is_paused())
    }

    /// Record the stream dimensions announced by the sender.
    pub fn set_size(&self, source_width: f32, source_height: f32, width: f32, height: f32) {
        let size = DisplaySize {
            source_width,
            source_height,
            width,
            height,
        };
        debug!(
            "Begin video stream wxh = {}x{}; source {}x{}",
            width as u16, height as u16, source_width as u16, source_height as u16
        );
        *self.shared.size.lock().unwrap_or_else(PoisonError::into_inner) = Some(size);
    }

    pub fn size(&self) -> Option<DisplaySize> {
        *self.shared.size.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forward the bus messages of instance `id` into the dispatch loop.
    pub fn register_bus_watch(&self, id: InstanceId) -> Result<BusWatch, RendererError> {
        let registry = self.read();
        let instance = registry.get(id).ok_or(RendererError::InvalidInstance(id))?;
        instance.watch_bus(self.shared.bus_tx.clone())
    }

    /// Handle one bus message; a fatal one also requests the loop to quit.
    pub fn handle_bus_message(&self, envelope: &BusEnvelope) -> DispatchAction {
        if self.is_destroyed() {
            return DispatchAction::Continue;
        }

        let action = {
            let mut registry = self.write();
            self.shared
                .dispatcher
                .dispatch(&mut registry, &self.shared.clock, envelope)
        };
        if action == DispatchAction::Quit {
            self.shared.quit.cancel();
        }
        action
    }

    /// Confirm drains whose graph reached null; their bus is flushing, so
    /// no message will report it.
    pub fn poll_drains(&self) -> usize {
        if self.is_destroyed() {
            return 0;
        }
        let mut registry = self.write();
        self.shared.dispatcher.poll_drains(&mut registry, &self.shared.clock)
    }

    /// Ask the dispatch loop to tear down the active instance and exit.
    pub fn request_reset(&self) {
        self.shared.reset_requested.store(true, Ordering::SeqCst);
    }

    /// Perform a pending reset. Returns whether one was performed.
    pub fn reset_check(&self) -> bool {
        if !self.shared.reset_requested.swap(false, Ordering::SeqCst) {
            return false;
        }

        {
            let mut registry = self.write();
            if let Some(instance) = registry.active_mut() {
                if let Err(e) = instance.signal_end_of_stream() {
                    warn!("{}: end-of-stream on reset failed: {}", instance.name(), e);
                }
                instance.set_bus_flushing(true);
                if let Err(e) = instance.stop() {
                    warn!("{}: reset failed: {}", instance.name(), e);
                }
            }
        }
        info!("Video renderer reset requested, leaving the dispatch loop");
        self.shared.quit.cancel();
        true
    }

    /// The loop servicing the bus channel; available once per session.
    pub fn dispatch_loop(&self) -> Option<DispatchLoop> {
        let rx = self
            .shared
            .bus_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        Some(DispatchLoop {
            session: self.clone(),
            rx,
            reset_interval: RESET_CHECK_INTERVAL,
            health_interval: HEALTH_LOG_INTERVAL,
        })
    }
}

/// Cooperative loop over the bus messages of all instances, the periodic
/// reset check and the health log.
pub struct DispatchLoop {
    session: VideoSession,
    rx: BusReceiver,
    reset_interval: Duration,
    health_interval: Duration,
}

impl DispatchLoop {
    pub fn with_reset_interval(mut self, interval: Duration) -> Self {
        self.reset_interval = interval;
        self
    }

    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }
}

#[async_trait]
impl PipelineStage for DispatchLoop {
    async fn run(&mut self) -> Result<()> {
        let quit = self.session.quit_signal();
        let mut reset_tick = tokio::time::interval(self.reset_interval);
        let mut health_tick = tokio::time::interval(self.health_interval);
        health_tick.tick().await;

        loop {
            tokio::select! {
                _ = quit.cancelled_async() => break,
                envelope = self.rx.recv() => {
                    let Some(envelope) = envelope else { break };
                    // graph calls may wait on state changes
                    let session = self.session.clone();
                    let action = tokio::task::spawn_blocking(move || session.handle_bus_message(&envelope)).await?;
                    if action == DispatchAction::Quit {
                        break;
                    }
                }
                _ = reset_tick.tick() => {
                    let session = self.session.clone();
                    let reset = tokio::task::spawn_blocking(move || {
                        session.poll_drains();
                        session.reset_check()
                    })
                    .await?;
                    if reset {
                        break;
                    }
                }
                _ = health_tick.tick() => {
                    let health = self.session.health();
                    info!("{}", health.summary());
                    if health.frames_pushed() > 0 && health.is_stalled(self.health_interval) {
                        warn!("No video frame pushed for {:?}", self.health_interval);
                    }
                }
            }
        }

        info!("Dispatch loop finished ({} quit request(s))", quit.requests());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "DispatchLoop"
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.session.quit_signal().cancel();
        Ok(())
    }
}
