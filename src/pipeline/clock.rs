//! Presentation clock for injected frames

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::types::Timestamp;

const BASE_NONE: u64 = u64::MAX;

/// Frame whose absolute timestamp lies before the clock base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockFault {
    pub absolute: Timestamp,
    /// `None` when no base was captured yet
    pub base: Option<Timestamp>,
}

impl std::fmt::Display for ClockFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.base {
            Some(base) => write!(f, "timestamp {} precedes clock base {}", self.absolute, base),
            None => write!(f, "timestamp {} arrived before a clock base was set", self.absolute),
        }
    }
}

/// Converts absolute stream timestamps into times relative to the active
/// graph's base time.
///
/// # Thread Safety
///
/// The base is a single atomic word: the producer reads it for every frame
/// while the switch controller and the dispatcher refresh it.
#[derive(Clone)]
pub struct PresentationClock {
    base: Arc<AtomicU64>,

    /// Presentation timestamps are attached only when set
    sync: Arc<AtomicBool>,

    /// Number of base refreshes so far
    refreshes: Arc<AtomicU64>,
}

impl PresentationClock {
    pub fn new(sync: bool) -> Self {
        Self {
            base: Arc::new(AtomicU64::new(BASE_NONE)),
            sync: Arc::new(AtomicBool::new(sync)),
            refreshes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Replace the base with the one captured from the active graph.
    pub fn refresh(&self, base: Option<Timestamp>) {
        let raw = base.map(|b| b.nanos).unwrap_or(BASE_NONE);
        self.base.store(raw, Ordering::Release);
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn base(&self) -> Option<Timestamp> {
        match self.base.load(Ordering::Acquire) {
            BASE_NONE => None,
            raw => Some(Timestamp::from_nanos(raw)),
        }
    }

    pub fn refreshes(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    pub fn sync_enabled(&self) -> bool {
        self.sync.load(Ordering::Relaxed)
    }

    /// Presentation time for a frame stamped `absolute`.
    ///
    /// `Ok(None)` means the frame goes in without a timestamp (sync off).
    pub fn presentation_time(&self, absolute: Timestamp) -> Result<Option<Timestamp>, ClockFault> {
        if !self.sync_enabled() {
            return Ok(None);
        }

        let base = self.base();
        match base.and_then(|base| absolute.checked_since(base)) {
            Some(pts) => Ok(Some(pts)),
            None => Err(ClockFault { absolute, base }),
        }
    }
}

impl std::fmt::Debug for PresentationClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresentationClock")
            .field("base", &self.base())
            .field("sync", &self.sync_enabled())
            .field("refreshes", &self.refreshes())
            .finish()
    }
}
