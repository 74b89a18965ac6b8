use futures_util::StreamExt;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer::MessageView;
use gstreamer_app as gst_app;
use log::trace;
use std::time::Duration;

use crate::pipeline::engine::{BusEnvelope, BusMessage, BusSender, BusWatch, Graph};
use crate::pipeline::launch::SOURCE_NAME;
use crate::pipeline::{GraphState, InstanceId, RendererError, Timestamp};

/// A GStreamer pipeline behind the [`Graph`] boundary.
pub struct GstGraph {
    name: String,
    pipeline: gst::Pipeline,
    appsrc: Option<gst_app::AppSrc>,
}

impl GstGraph {
    pub fn new(name: &str, pipeline: gst::Pipeline) -> Self {
        let appsrc = pipeline
            .by_name(SOURCE_NAME)
            .and_then(|elem| elem.downcast::<gst_app::AppSrc>().ok());
        Self {
            name: name.to_string(),
            pipeline,
            appsrc,
        }
    }

    fn ingestion(&self) -> Result<&gst_app::AppSrc, RendererError> {
        self.appsrc
            .as_ref()
            .ok_or_else(|| RendererError::NoIngestion(self.name.clone()))
    }
}

impl Drop for GstGraph {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

fn to_gst(state: GraphState) -> gst::State {
    match state {
        GraphState::VoidPending => gst::State::VoidPending,
        GraphState::Null => gst::State::Null,
        GraphState::Ready => gst::State::Ready,
        GraphState::Paused => gst::State::Paused,
        GraphState::Playing => gst::State::Playing,
    }
}

fn from_gst(state: gst::State) -> GraphState {
    match state {
        gst::State::Null => GraphState::Null,
        gst::State::Ready => GraphState::Ready,
        gst::State::Paused => GraphState::Paused,
        gst::State::Playing => GraphState::Playing,
        _ => GraphState::VoidPending,
    }
}

fn to_clock_time(ts: Timestamp) -> gst::ClockTime {
    gst::ClockTime::from_nseconds(ts.nanos)
}

fn from_clock_time(time: gst::ClockTime) -> Timestamp {
    Timestamp::from_nanos(time.nseconds())
}

/// Reduce a bus message to the parts the dispatcher acts on.
fn convert(msg: &gst::Message) -> BusMessage {
    let src = msg.src().map(|s| s.name().to_string()).unwrap_or_default();

    match msg.view() {
        MessageView::Error(err) => BusMessage::Error {
            src,
            message: err.error().to_string(),
            debug: err.debug().map(|d| d.to_string()),
        },
        MessageView::Eos(_) => BusMessage::Eos,
        MessageView::Buffering(buffering) => BusMessage::Buffering {
            percent: buffering.percent(),
        },
        MessageView::StateChanged(changed) => BusMessage::StateChanged {
            src,
            old: from_gst(changed.old()),
            current: from_gst(changed.current()),
        },
        MessageView::DurationChanged(_) => BusMessage::DurationChanged,
        _ => BusMessage::Other {
            src,
            kind: format!("{:?}", msg.type_()),
        },
    }
}

impl Graph for GstGraph {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_ingestion(&self) -> bool {
        self.appsrc.is_some()
    }

    fn set_state(&self, target: GraphState) -> Result<(), RendererError> {
        self.pipeline
            .set_state(to_gst(target))
            .map(|_| ())
            .map_err(|_| RendererError::StateChange {
                name: self.name.clone(),
                target,
            })
    }

    fn current_state(&self, timeout: Duration) -> Option<GraphState> {
        let timeout = gst::ClockTime::from_nseconds(timeout.as_nanos() as u64);
        let (result, current, _pending) = self.pipeline.state(timeout);
        result.ok().map(|_| from_gst(current))
    }

    fn push_buffer(&self, data: &[u8], pts: Option<Timestamp>) -> Result<(), RendererError> {
        let appsrc = self.ingestion()?;

        let mut buffer = gst::Buffer::from_slice(data.to_vec());
        if let Some(buffer) = buffer.get_mut() {
            buffer.set_pts(pts.map(to_clock_time));
        }

        appsrc
            .push_buffer(buffer)
            .map(|_| ())
            .map_err(|e| RendererError::Push {
                name: self.name.clone(),
                reason: format!("{:?}", e),
            })
    }

    fn end_of_stream(&self) -> Result<(), RendererError> {
        self.ingestion()?
            .end_of_stream()
            .map(|_| ())
            .map_err(|e| RendererError::Push {
                name: self.name.clone(),
                reason: format!("end-of-stream: {:?}", e),
            })
    }

    fn query_duration(&self) -> Option<Timestamp> {
        self.pipeline.query_duration::<gst::ClockTime>().map(from_clock_time)
    }

    fn query_position(&self) -> Option<Timestamp> {
        self.pipeline.query_position::<gst::ClockTime>().map(from_clock_time)
    }

    fn seek_simple(&self, position: Timestamp) -> bool {
        self.pipeline
            .seek_simple(gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT, to_clock_time(position))
            .is_ok()
    }

    fn base_time(&self) -> Option<Timestamp> {
        self.pipeline.base_time().map(from_clock_time)
    }

    fn set_bus_flushing(&self, flushing: bool) {
        if let Some(bus) = self.pipeline.bus() {
            bus.set_flushing(flushing);
        }
    }

    fn watch_bus(&self, instance: InstanceId, tx: BusSender) -> Result<BusWatch, RendererError> {
        let bus = self
            .pipeline
            .bus()
            .ok_or_else(|| RendererError::Bus(self.name.clone()))?;
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| RendererError::Bus(self.name.clone()))?;

        let watch = BusWatch::new(instance);
        let token = watch.token();
        let mut messages = bus.stream();
        let name = self.name.clone();

        runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    msg = messages.next() => {
                        let Some(msg) = msg else { break };
                        let envelope = BusEnvelope {
                            instance,
                            message: convert(&msg),
                        };
                        if tx.send(envelope).is_err() {
                            break;
                        }
                    }
                }
            }
            trace!("{}: bus watch removed", name);
        });

        Ok(watch)
    }
}
