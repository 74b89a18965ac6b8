use crate::pipeline::RendererError;
use crate::utils::options::parse_sink_options;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Mirror/flip transform requested for the decoded picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VideoFlip {
    #[default]
    None,
    Invert,
    HFlip,
    VFlip,
}

/// Quarter-turn rotation requested for the decoded picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rotation {
    #[default]
    None,
    Left,
    Right,
}

impl FromStr for VideoFlip {
    type Err = RendererError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(VideoFlip::None),
            "invert" | "i" => Ok(VideoFlip::Invert),
            "hflip" | "h-flip" | "h" => Ok(VideoFlip::HFlip),
            "vflip" | "v-flip" | "v" => Ok(VideoFlip::VFlip),
            other => Err(RendererError::Config(format!("unknown flip '{other}'"))),
        }
    }
}

impl FromStr for Rotation {
    type Err = RendererError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Rotation::None),
            "left" | "l" => Ok(Rotation::Left),
            "right" | "r" => Ok(Rotation::Right),
            other => Err(RendererError::Config(format!("unknown rotation '{other}'"))),
        }
    }
}

/// Settings of the decoded-frame side channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardConfig {
    pub enabled: bool,
    /// Websocket endpoint the raw frames are pushed to
    pub url: String,
    /// Upper bound of forwarded frames per second
    pub max_rate: u32,
    /// Raw pixel format of the forwarded frames
    pub format: String,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        ForwardConfig {
            enabled: true,
            url: "ws://localhost:8081".to_string(),
            max_rate: 30,
            format: "RGBA".to_string(),
        }
    }
}

/// Session-wide settings, immutable once the session is initialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Instantiate a second (h265) pipeline next to the h264 one
    pub h265_support: bool,
    /// When set, the session runs in on-demand mode and plays this URI
    pub uri: Option<String>,
    pub flip: VideoFlip,
    pub rotation: Rotation,
    pub parser: String,
    pub decoder: String,
    pub converter: String,
    pub video_sink: String,
    /// Extra `key=value` properties for the video sink, whitespace separated
    pub sink_options: String,
    pub fullscreen: bool,
    /// Stamp injected frames with pipeline-relative presentation times
    pub sync: bool,
    /// Log every bus message, and the position in on-demand mode
    pub debug_bus: bool,
    pub server_name: String,
    pub forward: ForwardConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            h265_support: false,
            uri: None,
            flip: VideoFlip::None,
            rotation: Rotation::None,
            parser: "h264parse".to_string(),
            decoder: "decodebin".to_string(),
            converter: "videoconvert".to_string(),
            video_sink: "autovideosink".to_string(),
            sink_options: String::new(),
            fullscreen: false,
            sync: true,
            debug_bus: false,
            server_name: app_name().to_string(),
            forward: ForwardConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Load a configuration from a JSON file; missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RendererError> {
        let raw = std::fs::read_to_string(path)?;
        let config: SessionConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn is_on_demand(&self) -> bool {
        self.uri.is_some()
    }

    /// Number of elementary-stream pipelines the session owns in mirror mode.
    pub fn codec_count(&self) -> usize {
        if self.h265_support { 2 } else { 1 }
    }

    /// The display sink auto-selects a concrete sink we want to report once.
    pub fn auto_video_sink(&self) -> bool {
        self.video_sink.contains("autovideosink") || self.video_sink.contains("fpsdisplaysink")
    }

    pub fn sink_properties(&self) -> Vec<(String, String)> {
        parse_sink_options(&self.sink_options)
    }

    pub fn validate(&self) -> Result<(), RendererError> {
        let elements = [
            ("parser", &self.parser),
            ("decoder", &self.decoder),
            ("converter", &self.converter),
            ("video_sink", &self.video_sink),
        ];
        for (field, value) in elements {
            if value.trim().is_empty() {
                return Err(RendererError::Config(format!("{field} must not be empty")));
            }
        }

        if let Some(uri) = &self.uri {
            if uri.trim().is_empty() {
                return Err(RendererError::Config("uri must not be empty".into()));
            }
        }

        if self.forward.enabled {
            if self.forward.max_rate == 0 {
                return Err(RendererError::Config("forward max_rate must be positive".into()));
            }
            if self.forward.format.trim().is_empty() {
                return Err(RendererError::Config("forward format must not be empty".into()));
            }
        }

        Ok(())
    }
}

impl fmt::Display for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.uri {
            Some(uri) => write!(f, "on-demand '{}' -> {}", uri, self.video_sink),
            None => write!(
                f,
                "mirror {} codec(s): {} ! {} ! {} ! {} (sync {})",
                self.codec_count(),
                self.parser,
                self.decoder,
                self.converter,
                self.video_sink,
                if self.sync { "on" } else { "off" }
            ),
        }
    }
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}
