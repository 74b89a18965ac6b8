//! Graph descriptions for the session's pipeline instances

use super::engine::{GraphDescription, SinkSpec};
use super::types::CodecKind;
use crate::config::{ForwardConfig, Rotation, SessionConfig, VideoFlip};

/// Name of the ingestion endpoint inside elementary launch lines
pub const SOURCE_NAME: &str = "video_source";
/// Name of the appsink feeding the side channel
pub const FORWARD_SINK_NAME: &str = "forward_sink";
/// Name of the player element in on-demand mode
pub const PLAYER_NAME: &str = "hls-playbin3";

/// `videoflip` direction for a flip/rotation pair, `None` for identity.
pub fn videoflip_direction(flip: VideoFlip, rotation: Rotation) -> Option<&'static str> {
    let direction = match (flip, rotation) {
        (VideoFlip::Invert, Rotation::Left) => "GST_VIDEO_ORIENTATION_90R",
        (VideoFlip::Invert, Rotation::Right) => "GST_VIDEO_ORIENTATION_90L",
        (VideoFlip::Invert, Rotation::None) => "GST_VIDEO_ORIENTATION_180",
        (VideoFlip::HFlip, Rotation::Left) => "GST_VIDEO_ORIENTATION_UL_LR",
        (VideoFlip::HFlip, Rotation::Right) => "GST_VIDEO_ORIENTATION_UR_LL",
        (VideoFlip::HFlip, Rotation::None) => "GST_VIDEO_ORIENTATION_HORIZ",
        (VideoFlip::VFlip, Rotation::Left) => "GST_VIDEO_ORIENTATION_UR_LL",
        (VideoFlip::VFlip, Rotation::Right) => "GST_VIDEO_ORIENTATION_UL_LR",
        (VideoFlip::VFlip, Rotation::None) => "GST_VIDEO_ORIENTATION_VERT",
        (VideoFlip::None, Rotation::Left) => "GST_VIDEO_ORIENTATION_90L",
        (VideoFlip::None, Rotation::Right) => "GST_VIDEO_ORIENTATION_90R",
        (VideoFlip::None, Rotation::None) => return None,
    };
    Some(direction)
}

/// Rewrite codec references so a launch line built from shared settings
/// targets `codec` (e.g. `vaapih265dec` becomes `vaapih264dec`).
pub fn retarget_codec(launch: &str, codec: CodecKind) -> String {
    match codec {
        CodecKind::H264 => launch.replace("h265", "h264"),
        CodecKind::H265 => launch.replace("h264", "h265"),
        CodecKind::HlsPassthrough => launch.to_string(),
    }
}

fn forward_branch(forward: &ForwardConfig) -> String {
    format!(
        "tee name=videotee ! \
         queue max-size-buffers=2 max-size-bytes=0 max-size-time=0 leaky=downstream ! \
         videoscale ! videorate max-rate={rate} ! videoconvert ! \
         video/x-raw,format={format},framerate={rate}/1 ! \
         appsink name={sink} sync=false max-buffers=2 drop=true enable-last-sample=false emit-signals=true \
         videotee. ! queue ! ",
        rate = forward.max_rate,
        format = forward.format,
        sink = FORWARD_SINK_NAME,
    )
}

/// Launch line for an elementary-stream instance.
pub fn elementary_launch(config: &SessionConfig, codec: CodecKind) -> String {
    let mut launch = format!("appsrc name={SOURCE_NAME} ! {} ! {} ! ", config.parser, config.decoder);

    if let Some(direction) = videoflip_direction(config.flip, config.rotation) {
        launch.push_str("videoflip video-direction=");
        launch.push_str(direction);
        launch.push_str(" ! ");
    }

    launch.push_str(&config.converter);
    launch.push_str(" ! ");

    if config.forward.enabled {
        launch.push_str(&forward_branch(&config.forward));
    }

    launch.push_str("videoscale ! ");
    launch.push_str(&config.video_sink);
    launch.push_str(" name=");
    launch.push_str(&config.video_sink);
    launch.push('_');
    launch.push_str(codec.tag());

    let options = config.sink_options.trim_end();
    if !options.trim_start().is_empty() {
        if !options.starts_with(char::is_whitespace) {
            launch.push(' ');
        }
        launch.push_str(options);
    }

    retarget_codec(&launch, codec)
}

/// Graph description of the instance decoding `codec` under `config`.
pub fn describe(config: &SessionConfig, codec: CodecKind) -> GraphDescription {
    match (codec.caps(), &config.uri) {
        (Some(caps), _) => GraphDescription::Elementary {
            launch: elementary_launch(config, codec),
            caps,
        },
        (None, uri) => GraphDescription::Player {
            uri: uri.clone().unwrap_or_default(),
            // the player picks its own sink unless told otherwise
            video_sink: (config.video_sink != "autovideosink").then(|| SinkSpec {
                factory: config.video_sink.clone(),
                properties: config.sink_properties(),
            }),
        },
    }
}

/// Name given to the instance's top-level graph.
pub fn graph_name(codec: CodecKind) -> String {
    match codec {
        CodecKind::HlsPassthrough => PLAYER_NAME.to_string(),
        other => format!("{}-pipeline", other.tag()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_launch() {
        let config = SessionConfig::default();
        let launch = elementary_launch(&config, CodecKind::H264);

        assert!(launch.starts_with("appsrc name=video_source ! h264parse ! decodebin ! videoconvert ! tee name=videotee ! "));
        assert!(launch.contains("videorate max-rate=30 ! videoconvert ! video/x-raw,format=RGBA,framerate=30/1 ! appsink name=forward_sink sync=false"));
        assert!(launch.ends_with("videotee. ! queue ! videoscale ! autovideosink name=autovideosink_h264"));
        assert!(!launch.contains("videoflip"));
    }

    #[test]
    fn test_retarget_for_second_instance() {
        let config = SessionConfig {
            h265_support: true,
            decoder: "vaapih264dec".into(),
            ..Default::default()
        };

        let launch = elementary_launch(&config, CodecKind::H265);
        assert!(launch.contains("! h265parse ! vaapih265dec ! "));
        assert!(launch.ends_with("autovideosink name=autovideosink_h265"));
        assert!(!launch.contains("h264"));

        assert_eq!(retarget_codec("h265parse ! avdec_h265", CodecKind::H264), "h264parse ! avdec_h264");
    }

    #[test]
    fn test_orientation_and_options() {
        let config = SessionConfig {
            flip: VideoFlip::HFlip,
            rotation: Rotation::Right,
            video_sink: "glimagesink".into(),
            sink_options: "sync=false".into(),
            ..Default::default()
        };

        let launch = elementary_launch(&config, CodecKind::H264);
        assert!(launch.contains("decodebin ! videoflip video-direction=GST_VIDEO_ORIENTATION_UR_LL ! videoconvert ! "));
        assert!(launch.ends_with("glimagesink name=glimagesink_h264 sync=false"));
    }

    #[test]
    fn test_orientation_table() {
        assert_eq!(videoflip_direction(VideoFlip::None, Rotation::None), None);
        assert_eq!(
            videoflip_direction(VideoFlip::Invert, Rotation::None),
            Some("GST_VIDEO_ORIENTATION_180")
        );
        assert_eq!(
            videoflip_direction(VideoFlip::Invert, Rotation::Left),
            Some("GST_VIDEO_ORIENTATION_90R")
        );
        assert_eq!(
            videoflip_direction(VideoFlip::VFlip, Rotation::Left),
            Some("GST_VIDEO_ORIENTATION_UR_LL")
        );
        assert_eq!(
            videoflip_direction(VideoFlip::None, Rotation::Right),
            Some("GST_VIDEO_ORIENTATION_90R")
        );
    }

    #[test]
    fn test_forward_branch_follows_config() {
        let mut config = SessionConfig::default();
        config.forward.max_rate = 15;
        config.forward.format = "BGRx".into();
        let launch = elementary_launch(&config, CodecKind::H264);
        assert!(launch.contains("videorate max-rate=15 ! videoconvert ! video/x-raw,format=BGRx,framerate=15/1"));

        config.forward.enabled = false;
        let launch = elementary_launch(&config, CodecKind::H264);
        assert!(!launch.contains("tee"));
        assert!(launch.contains("videoconvert ! videoscale ! autovideosink"));
    }

    #[test]
    fn test_player_description() {
        let config = SessionConfig {
            uri: Some("http://localhost/master.m3u8".into()),
            ..Default::default()
        };
        let GraphDescription::Player { uri, video_sink } = describe(&config, CodecKind::HlsPassthrough) else {
            panic!("expected a player description");
        };
        assert_eq!(uri, "http://localhost/master.m3u8");
        assert!(video_sink.is_none());

        let config = SessionConfig {
            video_sink: "waylandsink".into(),
            sink_options: "fullscreen=true ! ignored=1".into(),
            ..config
        };
        match describe(&config, CodecKind::HlsPassthrough) {
            GraphDescription::Player { video_sink: Some(sink), .. } => {
                assert_eq!(sink.factory, "waylandsink");
                assert_eq!(sink.properties, vec![("fullscreen".to_string(), "true".to_string())]);
            }
            other => panic!("unexpected description {other:?}"),
        }
        assert_eq!(graph_name(CodecKind::HlsPassthrough), "hls-playbin3");
        assert_eq!(graph_name(CodecKind::H265), "h265-pipeline");
    }
}
