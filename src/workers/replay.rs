//! Replay of a captured mirror stream into a session
//!
//! Record layout, big endian: `codec u8 | len u32 | ntp u64 | payload`.
//! Codec 0 is h264 and 1 is h265; `ntp` is the absolute frame time in
//! nanoseconds and the payload still carries the decryption flag byte.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::{debug, info, warn};
use std::io::{self, Read};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::pipeline::injector::PushOutcome;
use crate::pipeline::{CodecKind, RendererError};
use crate::session::VideoSession;
use crate::utils::sos::SignalOfStop;
use crate::workers::WorkerClose;

pub const RECORD_HEADER_LEN: usize = 13;
/// Larger payloads are treated as a corrupt file
pub const MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayRecord {
    pub codec: CodecKind,
    pub ntp: u64,
    pub payload: Bytes,
}

impl ReplayRecord {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RECORD_HEADER_LEN + self.payload.len());
        buf.put_u8(match self.codec {
            CodecKind::H265 => 1,
            _ => 0,
        });
        buf.put_u32(self.payload.len() as u32);
        buf.put_u64(self.ntp);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

/// Iterates over the records of a capture.
pub struct ReplayReader<R> {
    inner: R,
    done: bool,
}

impl<R: Read> ReplayReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, done: false }
    }

    /// `None` on a clean end of file, an error on a truncated record.
    pub fn next_record(&mut self) -> Result<Option<ReplayRecord>, RendererError> {
        let mut header = [0u8; RECORD_HEADER_LEN];
        let mut filled = 0;
        while filled < RECORD_HEADER_LEN {
            match self.inner.read(&mut header[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let mut header = &header[..];
        let codec = match header.get_u8() {
            0 => CodecKind::H264,
            1 => CodecKind::H265,
            other => return Err(RendererError::Config(format!("unknown codec {other} in capture"))),
        };
        let len = header.get_u32();
        let ntp = header.get_u64();

        if len > MAX_PAYLOAD_LEN {
            return Err(RendererError::Config(format!("record of {len} bytes in capture")));
        }

        let mut payload = vec![0u8; len as usize];
        self.inner.read_exact(&mut payload)?;

        Ok(Some(ReplayRecord {
            codec,
            ntp,
            payload: Bytes::from(payload),
        }))
    }
}

impl<R: Read> Iterator for ReplayReader<R> {
    type Item = Result<ReplayRecord, RendererError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.next_record().transpose();
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReplayOptions {
    /// Sleep between records to follow their recorded spacing
    pub pacing: bool,
    /// Rebase record times onto the wall clock at replay start
    pub restamp: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            pacing: true,
            restamp: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub records: u64,
    pub pushed: u64,
    pub dropped: u64,
    pub codec_switches: u64,
}

fn wall_clock_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

/// Feed every record of `reader` into `session` until the capture ends or
/// `stop` is requested.
pub fn replay<R: Read>(
    session: &VideoSession,
    reader: ReplayReader<R>,
    options: ReplayOptions,
    stop: &SignalOfStop,
) -> ReplayStats {
    let mut stats = ReplayStats::default();
    let mut current = None;
    let mut first_ntp = None;
    let origin = wall_clock_nanos();
    let started = Instant::now();

    for record in reader {
        if stop.cancelled() {
            break;
        }
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!("Replay stopped: {}", e);
                break;
            }
        };
        stats.records += 1;

        if current != Some(record.codec) {
            match session.notify_codec(record.codec == CodecKind::H265) {
                Ok(_) => {
                    current = Some(record.codec);
                    stats.codec_switches += 1;
                }
                Err(e) => {
                    warn!("Replay cannot switch to {}: {}", record.codec, e);
                    stats.dropped += 1;
                    continue;
                }
            }
        }

        let offset = record.ntp.saturating_sub(*first_ntp.get_or_insert(record.ntp));
        if options.pacing {
            let due = started + Duration::from_nanos(offset);
            let wait = due.saturating_duration_since(Instant::now());
            if !wait.is_zero() && stop.wait_timeout(wait) {
                break;
            }
        }

        let ntp = if options.restamp { origin + offset } else { record.ntp };
        match session.push_frame(&record.payload, ntp) {
            PushOutcome::Pushed => stats.pushed += 1,
            outcome => {
                debug!("Replay record {} not pushed: {:?}", stats.records, outcome);
                stats.dropped += 1;
            }
        }
    }

    info!(
        "Replay finished: {} records, {} pushed, {} dropped",
        stats.records, stats.pushed, stats.dropped
    );
    stats
}

/// Runs [`replay`] on its own thread.
pub struct ReplayWorker {
    stop: SignalOfStop,
    handle: Option<JoinHandle<ReplayStats>>,
}

impl ReplayWorker {
    pub fn spawn<R: Read + Send + 'static>(
        session: VideoSession,
        reader: ReplayReader<R>,
        options: ReplayOptions,
    ) -> Self {
        let stop = SignalOfStop::new();
        let thread_stop = stop.clone();
        let handle = std::thread::spawn(move || replay(&session, reader, options, &thread_stop));
        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Wait for the replay to end on its own.
    pub fn join(mut self) -> Option<ReplayStats> {
        self.handle.take().and_then(|h| h.join().ok())
    }
}

impl WorkerClose for ReplayWorker {
    fn close(&mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ReplayWorker {
    fn drop(&mut self) {
        self.close();
    }
}
