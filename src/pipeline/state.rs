//! Pipeline instance state management

/// Lifecycle of a pipeline instance.
///
/// `Draining` carries whether the instance was asked to play again before
/// its graph confirmed the null state, so a restart can never be requested
/// on an instance that is not draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Graph built and prerolled to ready
    Ready,

    /// Actively decoding
    Playing,

    /// Paused (on-demand playback or buffering)
    Paused,

    /// Retired by a codec switch, waiting for the graph to report null
    Draining {
        /// Play again as soon as null is observed
        restart: bool,
    },

    /// Graph is in the null state
    Null,

    /// Graph never reached ready, the instance is unusable
    Failed,
}

/// Hot-swap view of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    Active,
    Draining,
    Retired,
}

impl InstanceState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &InstanceState) -> bool {
        use InstanceState::*;

        match (self, target) {
            // Failed instances only get released
            (Failed, Null) => true,
            (Failed, _) => false,
            (_, Failed) => matches!(self, Ready | Null),

            // From Null only through Ready
            (Null, Ready) => true,
            (Null, Null) => true,
            (Null, _) => false,

            // Draining waits for the null confirmation
            (Draining { .. }, Draining { .. }) => true,
            (Draining { .. }, Null) => true,
            (Draining { .. }, Ready) => true,
            (Draining { .. }, _) => false,

            // Ready, Playing and Paused move freely between each other
            (Ready | Playing | Paused, Ready | Playing | Paused) => true,
            (Ready | Playing | Paused, Draining { restart: false }) => true,
            (Ready | Playing | Paused, Draining { restart: true }) => false,
            (Ready | Playing | Paused, Null) => true,
        }
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            InstanceState::Ready => "Ready",
            InstanceState::Playing => "Playing",
            InstanceState::Paused => "Paused",
            InstanceState::Draining { .. } => "Draining",
            InstanceState::Null => "Null",
            InstanceState::Failed => "Failed",
        }
    }

    pub fn drain_state(&self) -> DrainState {
        match self {
            InstanceState::Draining { .. } => DrainState::Draining,
            InstanceState::Null | InstanceState::Failed => DrainState::Retired,
            _ => DrainState::Active,
        }
    }

    /// Whether the ingestion endpoint may be fed in this state
    pub fn accepts_frames(&self) -> bool {
        matches!(self, InstanceState::Playing | InstanceState::Paused)
    }

    pub fn is_usable(&self) -> bool {
        !matches!(self, InstanceState::Failed)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, InstanceState::Paused)
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceState::Draining { restart: true } => write!(f, "Draining (restart pending)"),
            other => write!(f, "{}", other.description()),
        }
    }
}
