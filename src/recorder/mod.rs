//! Screen and audio recording core
//!
//! The controller owns the lifecycle state machine; the capture source feeds
//! timestamped samples over a bounded channel to a single delivery thread,
//! which drives the muxing writer; the encode pipeline turns both streams
//! into one container file via GStreamer.

mod controller;
pub mod encoder;
mod pipeline;
mod sample;
mod source;
mod writer;

pub use controller::{Recorder, RecorderState};
pub use encoder::{Codec, EncoderInfo, detect_encoders, encoder_for_codec};
pub use pipeline::EncodePipeline;
pub use sample::{MediaKind, SampleBuffer};
pub use source::CaptureSource;
pub use writer::{MediaSink, MuxWriter};
