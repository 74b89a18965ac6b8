//! GStreamer media engine

mod graph;

pub use graph::GstGraph;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use log::{debug, info};
use std::str::FromStr;

use crate::config::SessionConfig;
use crate::forward::FrameTap;
use crate::pipeline::engine::{Graph, GraphDescription, MediaEngine, SinkSpec};
use crate::pipeline::launch::{FORWARD_SINK_NAME, PLAYER_NAME, SOURCE_NAME};
use crate::pipeline::RendererError;

const FULLSCREEN_PROPERTY: &str = "fullscreen";

/// Builds graphs through the GStreamer parse-launch and playbin3 factories.
#[derive(Debug)]
pub struct GstEngine {
    fullscreen: bool,
}

impl GstEngine {
    pub fn new(config: &SessionConfig) -> Result<Self, RendererError> {
        gst::init().map_err(|e| RendererError::Launch {
            name: "gstreamer".into(),
            reason: e.to_string(),
        })?;
        if glib::application_name().as_deref() != Some(config.server_name.as_str()) {
            glib::set_application_name(&config.server_name);
        }
        info!("GStreamer {} initialized", gst::version_string());
        Ok(GstEngine {
            fullscreen: config.fullscreen,
        })
    }

    /// Sinks exposing a fullscreen property start in fullscreen when asked to.
    fn apply_fullscreen(&self, sink: &gst::Element) {
        if self.fullscreen && sink.find_property(FULLSCREEN_PROPERTY).is_some() {
            sink.set_property_from_str(FULLSCREEN_PROPERTY, "true");
        }
    }

    fn elementary(
        &self,
        name: &str,
        launch: &str,
        caps: &str,
        tap: Option<FrameTap>,
    ) -> Result<gst::Pipeline, RendererError> {
        let launch_error = |reason: String| RendererError::Launch {
            name: name.to_string(),
            reason,
        };

        let pipeline = gst::parse::launch(launch)
            .map_err(|e| launch_error(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| launch_error("launch line is not a pipeline".into()))?;
        pipeline.set_property("name", name);

        let clock = gst::SystemClock::obtain();
        clock.set_property("clock-type", gst::ClockType::Realtime);
        pipeline.use_clock(Some(&clock));

        let appsrc = pipeline
            .by_name(SOURCE_NAME)
            .and_then(|elem| elem.downcast::<gst_app::AppSrc>().ok())
            .ok_or_else(|| launch_error(format!("no appsrc named '{SOURCE_NAME}'")))?;
        let caps = gst::Caps::from_str(caps).map_err(|e| launch_error(e.to_string()))?;
        appsrc.set_caps(Some(&caps));
        appsrc.set_stream_type(gst_app::AppStreamType::Stream);
        appsrc.set_is_live(true);
        appsrc.set_format(gst::Format::Time);

        let _ = pipeline.iterate_sinks().foreach(|sink| self.apply_fullscreen(&sink));

        if let Some(tap) = tap {
            if let Some(appsink) = pipeline
                .by_name(FORWARD_SINK_NAME)
                .and_then(|elem| elem.downcast::<gst_app::AppSink>().ok())
            {
                appsink.set_callbacks(
                    gst_app::AppSinkCallbacks::builder()
                        .new_sample(move |sink| {
                            let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                            let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                            let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                            tap.push(map.as_slice());
                            Ok(gst::FlowSuccess::Ok)
                        })
                        .build(),
                );
                debug!("{}: decoded frames tapped at '{}'", name, FORWARD_SINK_NAME);
            }
        }

        Ok(pipeline)
    }

    fn player(&self, name: &str, uri: &str, video_sink: Option<&SinkSpec>) -> Result<gst::Pipeline, RendererError> {
        let launch_error = |reason: String| RendererError::Launch {
            name: name.to_string(),
            reason,
        };

        let playbin = gst::ElementFactory::make("playbin3")
            .name(PLAYER_NAME)
            .property("uri", uri)
            .build()
            .map_err(|e| launch_error(e.to_string()))?;

        if let Some(requested) = video_sink {
            let sink = gst::ElementFactory::make(&requested.factory)
                .build()
                .map_err(|e| launch_error(format!("video sink {}: {}", requested.factory, e)))?;
            for (key, value) in &requested.properties {
                if sink.find_property(key).is_none() {
                    return Err(launch_error(format!("{} has no property '{}'", requested.factory, key)));
                }
                sink.set_property_from_str(key, value);
            }
            self.apply_fullscreen(&sink);
            playbin.set_property("video-sink", &sink);
        }

        playbin
            .downcast::<gst::Pipeline>()
            .map_err(|_| launch_error("playbin3 is not a pipeline".into()))
    }
}

impl MediaEngine for GstEngine {
    fn instantiate(
        &self,
        name: &str,
        description: &GraphDescription,
        tap: Option<FrameTap>,
    ) -> Result<Box<dyn Graph>, RendererError> {
        let pipeline = match description {
            GraphDescription::Elementary { launch, caps } => self.elementary(name, launch, caps, tap)?,
            GraphDescription::Player { uri, video_sink } => self.player(name, uri, video_sink.as_ref())?,
        };
        Ok(Box::new(GstGraph::new(name, pipeline)))
    }
}
