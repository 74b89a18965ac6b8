//! Mirror-stream video renderer
//!
//! Decodes an incoming compressed video stream through swappable media
//! graphs (one per codec), or plays a URI on demand, and forwards decoded
//! frames to a websocket consumer.

#[cfg(feature = "gst")]
pub mod backend;
pub mod config;
pub mod forward;
pub mod pipeline;
pub mod session;
pub mod utils;
pub mod workers;
