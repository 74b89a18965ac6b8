//! Health counters for a renderer session

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

/// Health metrics for a session
///
/// All fields use atomic operations: the producer thread, the dispatch
/// loop and the side channel update them concurrently.
pub struct SessionHealth {
    /// Frames pushed into an ingestion endpoint
    pub frames_pushed: AtomicU64,

    /// Total bytes pushed
    pub bytes_pushed: AtomicU64,

    /// Frames dropped because their decryption flag was set
    pub decrypt_failures: AtomicU64,

    /// Frames dropped because their timestamp preceded the clock base
    pub clock_faults: AtomicU64,

    /// Frames dropped because no instance could take them
    pub frames_rejected: AtomicU64,

    /// Decoded frames handed to the side channel
    pub frames_forwarded: AtomicU64,

    /// Decoded frames dropped by the side channel (disconnected or full)
    pub forward_drops: AtomicU64,

    /// Failed side-channel transmissions
    pub send_failures: AtomicU64,

    /// Codec switches performed
    pub codec_switches: AtomicU64,

    /// Timestamp (as Unix microseconds) of the last pushed frame
    pub last_frame_time: AtomicU64,
}

impl SessionHealth {
    pub fn new() -> Self {
        Self {
            frames_pushed: AtomicU64::new(0),
            bytes_pushed: AtomicU64::new(0),
            decrypt_failures: AtomicU64::new(0),
            clock_faults: AtomicU64::new(0),
            frames_rejected: AtomicU64::new(0),
            frames_forwarded: AtomicU64::new(0),
            forward_drops: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            codec_switches: AtomicU64::new(0),
            last_frame_time: AtomicU64::new(now_micros()),
        }
    }

    /// Record a frame pushed into the active instance
    pub fn record_push(&self, size: usize) {
        self.last_frame_time.store(now_micros(), Ordering::Relaxed);
        self.frames_pushed.fetch_add(1, Ordering::Relaxed);
        self.bytes_pushed.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn record_decrypt_failure(&self) {
        self.decrypt_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_clock_fault(&self) {
        self.clock_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self) {
        self.frames_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forward_drop(&self) {
        self.forward_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_codec_switch(&self) {
        self.codec_switches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_pushed(&self) -> u64 {
        self.frames_pushed.load(Ordering::Relaxed)
    }

    pub fn decrypt_failures(&self) -> u64 {
        self.decrypt_failures.load(Ordering::Relaxed)
    }

    pub fn clock_faults(&self) -> u64 {
        self.clock_faults.load(Ordering::Relaxed)
    }

    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected.load(Ordering::Relaxed)
    }

    pub fn frames_forwarded(&self) -> u64 {
        self.frames_forwarded.load(Ordering::Relaxed)
    }

    pub fn forward_drops(&self) -> u64 {
        self.forward_drops.load(Ordering::Relaxed)
    }

    pub fn send_failures(&self) -> u64 {
        self.send_failures.load(Ordering::Relaxed)
    }

    pub fn codec_switches(&self) -> u64 {
        self.codec_switches.load(Ordering::Relaxed)
    }

    /// Total frames dropped before reaching a graph
    pub fn frames_dropped(&self) -> u64 {
        self.decrypt_failures() + self.clock_faults() + self.frames_rejected()
    }

    /// Check if no frame was pushed for the given duration
    pub fn is_stalled(&self, threshold: Duration) -> bool {
        let last_frame = self.last_frame_time.load(Ordering::Relaxed);
        now_micros().saturating_sub(last_frame) > threshold.as_micros() as u64
    }

    /// Get a summary of health metrics
    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            frames_pushed: self.frames_pushed(),
            bytes_pushed: self.bytes_pushed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped(),
            decrypt_failures: self.decrypt_failures(),
            clock_faults: self.clock_faults(),
            frames_forwarded: self.frames_forwarded(),
            forward_drops: self.forward_drops(),
            send_failures: self.send_failures(),
            codec_switches: self.codec_switches(),
        }
    }
}

impl Default for SessionHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSummary {
    pub frames_pushed: u64,
    pub bytes_pushed: u64,
    pub frames_dropped: u64,
    pub decrypt_failures: u64,
    pub clock_faults: u64,
    pub frames_forwarded: u64,
    pub forward_drops: u64,
    pub send_failures: u64,
    pub codec_switches: u64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} frames pushed ({} bytes), {} dropped ({} decrypt, {} clock), {} forwarded ({} dropped, {} send failures), {} codec switches",
            self.frames_pushed,
            self.bytes_pushed,
            self.frames_dropped,
            self.decrypt_failures,
            self.clock_faults,
            self.frames_forwarded,
            self.forward_drops,
            self.send_failures,
            self.codec_switches
        )
    }
}
