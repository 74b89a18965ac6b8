//! Core types for the pipeline system

use std::fmt;
use std::time::Duration;

/// Timestamp representation on the media clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    /// Nanoseconds
    pub nanos: u64,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { nanos: 0 };

    /// Create a new timestamp from nanoseconds
    pub const fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self {
            nanos: millis * 1_000_000,
        }
    }

    /// Create a timestamp from (possibly negative) seconds, saturating at zero
    pub fn from_secs_f64(secs: f64) -> Self {
        if !secs.is_finite() || secs <= 0.0 {
            return Self::ZERO;
        }
        Self {
            nanos: (secs * 1e9) as u64,
        }
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.nanos as f64 / 1e9
    }

    /// Convert to duration
    pub fn as_duration(&self) -> Duration {
        Duration::from_nanos(self.nanos)
    }

    /// `self - earlier`, or `None` when `earlier` is later than `self`
    pub fn checked_since(&self, earlier: Timestamp) -> Option<Timestamp> {
        self.nanos.checked_sub(earlier.nanos).map(Timestamp::from_nanos)
    }
}

impl From<Duration> for Timestamp {
    fn from(duration: Duration) -> Self {
        Self {
            nanos: duration.as_nanos() as u64,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}

/// Index of a pipeline instance inside the session arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub usize);

impl InstanceId {
    pub const PRIMARY: InstanceId = InstanceId(0);
    pub const ALTERNATE: InstanceId = InstanceId(1);

    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of stream a pipeline instance decodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    H264,
    H265,
    /// Container playback from a URI, no elementary ingestion
    HlsPassthrough,
}

impl CodecKind {
    /// Short tag used in element and pipeline names
    pub fn tag(&self) -> &'static str {
        match self {
            CodecKind::H264 => "h264",
            CodecKind::H265 => "h265",
            CodecKind::HlsPassthrough => "hls",
        }
    }

    /// Whether frames of this codec are pushed into the graph by us.
    pub fn is_elementary(&self) -> bool {
        !matches!(self, CodecKind::HlsPassthrough)
    }

    /// Caps announced by the ingestion endpoint
    pub fn caps(&self) -> Option<&'static str> {
        match self {
            CodecKind::H264 => Some("video/x-h264,stream-format=(string)byte-stream,alignment=(string)au"),
            CodecKind::H265 => Some("video/x-h265,stream-format=(string)byte-stream,alignment=(string)au"),
            CodecKind::HlsPassthrough => None,
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecKind::HlsPassthrough => write!(f, "hls-passthrough"),
            other => write!(f, "{}", other.tag()),
        }
    }
}

/// State of the underlying media graph, as the engine reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphState {
    VoidPending,
    Null,
    Ready,
    Paused,
    Playing,
}

impl fmt::Display for GraphState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GraphState::VoidPending => "VOID_PENDING",
            GraphState::Null => "NULL",
            GraphState::Ready => "READY",
            GraphState::Paused => "PAUSED",
            GraphState::Playing => "PLAYING",
        };
        write!(f, "{name}")
    }
}

/// Stream dimensions announced by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DisplaySize {
    pub source_width: f32,
    pub source_height: f32,
    pub width: f32,
    pub height: f32,
}
