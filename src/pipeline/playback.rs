//! Duration/position queries and seeking for on-demand playback

use log::{debug, info, warn};
use std::time::Duration;

use super::RendererError;
use super::instance::PipelineInstance;
use super::types::{GraphState, Timestamp};

/// Closest a seek may get to either end of the media
pub const SEEK_MARGIN: Timestamp = Timestamp::from_millis(1);

/// Snapshot reported to the remote controller.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlaybackInfo {
    /// Seconds, 0.0 while unknown
    pub duration: f64,
    /// Seconds, only reported once the duration is known
    pub position: Option<f64>,
    /// 1.0 while playing, 0.0 otherwise
    pub rate: f32,
}

/// Query duration (cached), position (live) and rate of `instance`.
pub fn query(instance: &mut PipelineInstance) -> PlaybackInfo {
    let mut info = PlaybackInfo::default();

    let state = instance.graph().current_state(Duration::ZERO);
    if state == Some(GraphState::Playing) {
        info.rate = 1.0;
    }

    let Some(duration) = instance.duration() else {
        return info;
    };
    info.duration = duration.as_secs_f64();

    if duration.nanos > 0 {
        info.position = instance.position().map(|p| p.as_secs_f64());
    }

    debug!(
        "Playback info: position {:?} duration {} {}",
        info.position,
        duration,
        state.map(|s| s.to_string()).unwrap_or_else(|| "unknown".into())
    );
    info
}

/// Clamp a requested seek position to `[1ms, duration - 1ms]`; only the
/// lower bound applies while the duration is unknown.
pub fn clamp_seek(position_secs: f64, duration: Option<Timestamp>) -> Timestamp {
    let mut target = Timestamp::from_secs_f64(position_secs).max(SEEK_MARGIN);

    if let Some(duration) = duration.filter(|d| d.nanos > 0) {
        let upper = Timestamp::from_nanos(duration.nanos.saturating_sub(SEEK_MARGIN.nanos));
        if target > upper {
            target = upper;
        }
    }
    target
}

/// Flushing key-unit seek. On success playback resumes; on failure the
/// instance is left as it was.
pub fn seek(instance: &mut PipelineInstance, position_secs: f64) -> Result<Timestamp, RendererError> {
    let duration = instance.duration();
    let target = clamp_seek(position_secs, duration);

    info!(
        "Seek to {:.3}s = {}, duration {}",
        position_secs,
        target,
        duration.map(|d| d.to_string()).unwrap_or_else(|| "unknown".into())
    );

    if !instance.graph().seek_simple(target) {
        warn!("{}: seek to {} failed", instance.name(), target);
        return Err(RendererError::Seek(target));
    }

    instance.play()?;
    Ok(target)
}
