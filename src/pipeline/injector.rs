//! Compressed frame ingestion into the active instance

use log::{error, info, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};

use super::clock::PresentationClock;
use super::health::SessionHealth;
use super::registry::Registry;
use super::types::Timestamp;

/// What happened to one injected frame. Per-frame faults are values, not
/// errors: the stream goes on either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// Zero-length payload
    Empty,
    /// The transport flagged the payload as not decrypted
    DecryptionFailed,
    /// Timestamp before the clock base
    ClockFault,
    NoActiveInstance,
    /// The active instance is draining, stopped or terminated
    NotAccepting,
    /// The engine refused the buffer
    PushFailed,
}

impl PushOutcome {
    pub fn is_pushed(self) -> bool {
        matches!(self, PushOutcome::Pushed)
    }
}

/// Validates frames and pushes them into whatever instance is active.
#[derive(Debug)]
pub struct FrameInjector {
    first_packet: AtomicBool,
}

impl FrameInjector {
    pub fn new() -> Self {
        Self {
            first_packet: AtomicBool::new(true),
        }
    }

    /// The next pushed frame logs the start of streaming again.
    pub fn rearm(&self) {
        self.first_packet.store(true, Ordering::Relaxed);
    }

    /// Inject one frame. The first payload byte carries the decryption
    /// status; the payload is pushed whole (the flag doubles as the leading
    /// zero of the Annex-B start code).
    pub fn inject(
        &self,
        registry: &Registry,
        clock: &PresentationClock,
        health: &SessionHealth,
        data: &[u8],
        absolute: Timestamp,
    ) -> PushOutcome {
        let Some(&flag) = data.first() else {
            health.record_rejected();
            return PushOutcome::Empty;
        };

        if flag != 0 {
            error!("*** ERROR decryption of video packet failed");
            health.record_decrypt_failure();
            return PushOutcome::DecryptionFailed;
        }

        let Some(instance) = registry.active() else {
            trace!("No active video instance, frame dropped");
            health.record_rejected();
            return PushOutcome::NoActiveInstance;
        };

        if !instance.accepts_frames() {
            trace!("{} is {}, frame dropped", instance.name(), instance.state());
            health.record_rejected();
            return PushOutcome::NotAccepting;
        }

        let pts = match clock.presentation_time(absolute) {
            Ok(pts) => pts,
            Err(fault) => {
                error!("*** invalid frame time: {}", fault);
                health.record_clock_fault();
                return PushOutcome::ClockFault;
            }
        };

        if self.first_packet.swap(false, Ordering::Relaxed) {
            info!("Begin streaming to GStreamer video pipeline");
        }

        match instance.push_compressed_frame(data, pts) {
            Ok(()) => {
                health.record_push(data.len());
                PushOutcome::Pushed
            }
            Err(e) => {
                warn!("{}", e);
                health.record_rejected();
                PushOutcome::PushFailed
            }
        }
    }
}

impl Default for FrameInjector {
    fn default() -> Self {
        Self::new()
    }
}
