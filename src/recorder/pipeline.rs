//! GStreamer encode/mux pipeline construction and management
//!
//! Two live appsrc elements (video, audio) feed independent encoder chains
//! into a single muxer and filesink. The audio track slot is always created,
//! even when no audio device is configured, so the container topology does
//! not depend on what the capture source ends up delivering.

use anyhow::{Context, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use std::path::PathBuf;
use std::time::Duration;

use super::encoder::{self, EncoderInfo};
use super::sample::MediaKind;
use super::writer::MediaSink;
use crate::error::{RecorderError, RecorderResult};
use crate::options::{Container, RecordingOptions};

/// Audio is normalized to CD-quality stereo before encoding
pub const AUDIO_RATE: i32 = 44_100;
pub const AUDIO_CHANNELS: i32 = 2;

/// How many raw video frames an appsrc may hold before its track reports
/// not-ready
const VIDEO_QUEUE_FRAMES: u64 = 8;
const AUDIO_QUEUE_BYTES: u64 = 1 << 20;

/// GStreamer pipeline encoding both tracks into one container file
pub struct EncodePipeline {
    pipeline: gst::Pipeline,
    video_src: gst_app::AppSrc,
    audio_src: gst_app::AppSrc,
    /// Tracks that have not yet received end-of-stream
    video_open: bool,
    audio_open: bool,
    output_path: PathBuf,
}

impl EncodePipeline {
    /// Create the encode pipeline for the given options
    ///
    /// Track add/link rejections by the muxer are configuration errors,
    /// reported before any capture starts.
    pub fn new(options: &RecordingOptions, video_encoder: &EncoderInfo) -> RecorderResult<Self> {
        gst::init()
            .map_err(|e| RecorderError::Configuration(format!("GStreamer init failed: {e}")))?;

        let container = options.container();
        let pipeline = gst::Pipeline::new();

        let video_caps = Self::video_caps(options.width, options.height, options.fps)
            .map_err(|e| RecorderError::Configuration(format!("bad video geometry: {e:#}")))?;
        let video_src = gst_app::AppSrc::builder()
            .name("video-track")
            .is_live(true)
            .format(gst::Format::Time)
            .build();
        video_src.set_caps(Some(&video_caps));
        let frame_bytes = u64::from(options.width) * u64::from(options.height) * 4;
        video_src.set_max_bytes(frame_bytes * VIDEO_QUEUE_FRAMES);

        let audio_src = gst_app::AppSrc::builder()
            .name("audio-track")
            .is_live(true)
            .format(gst::Format::Time)
            .build();
        audio_src.set_caps(Some(&Self::audio_caps()));
        audio_src.set_max_bytes(AUDIO_QUEUE_BYTES);

        let videoconvert = gst::ElementFactory::make("videoconvert")
            .build()
            .map_err(|_| RecorderError::Configuration("videoconvert element missing".into()))?;
        let video_enc = video_encoder
            .build_element(options.video_bitrate)
            .map_err(|e| RecorderError::Configuration(format!("{e:#}")))?;
        let video_queue = gst::ElementFactory::make("queue")
            .build()
            .map_err(|_| RecorderError::Configuration("queue element missing".into()))?;

        let audioconvert = gst::ElementFactory::make("audioconvert")
            .build()
            .map_err(|_| RecorderError::Configuration("audioconvert element missing".into()))?;
        let audioresample = gst::ElementFactory::make("audioresample")
            .build()
            .map_err(|_| RecorderError::Configuration("audioresample element missing".into()))?;
        let audio_enc =
            encoder::build_audio_encoder(container.audio_encoder_element(), options.audio_bitrate)?;
        let audio_queue = gst::ElementFactory::make("queue")
            .build()
            .map_err(|_| RecorderError::Configuration("queue element missing".into()))?;

        let muxer = gst::ElementFactory::make(container.muxer_element())
            .build()
            .map_err(|_| {
                RecorderError::Configuration(format!(
                    "muxer '{}' not available",
                    container.muxer_element()
                ))
            })?;
        if container == Container::Mp4 {
            // Write the index up front so the file streams well
            muxer.set_property("faststart", true);
        }

        let location = options.destination.to_string_lossy().to_string();
        let filesink = gst::ElementFactory::make("filesink")
            .property("location", &location)
            .build()
            .map_err(|_| RecorderError::Configuration("filesink element missing".into()))?;

        pipeline
            .add_many([
                video_src.upcast_ref(),
                audio_src.upcast_ref(),
                &videoconvert,
                &video_enc,
                &video_queue,
                &audioconvert,
                &audioresample,
                &audio_enc,
                &audio_queue,
                &muxer,
                &filesink,
            ])
            .map_err(|e| RecorderError::Configuration(format!("pipeline assembly failed: {e}")))?;

        gst::Element::link_many([
            video_src.upcast_ref(),
            &videoconvert,
            &video_enc,
            &video_queue,
            &muxer,
        ])
        .map_err(|e| {
            RecorderError::Configuration(format!("container rejected video track: {e}"))
        })?;

        gst::Element::link_many([
            audio_src.upcast_ref(),
            &audioconvert,
            &audioresample,
            &audio_enc,
            &audio_queue,
            &muxer,
        ])
        .map_err(|e| {
            RecorderError::Configuration(format!("container rejected audio track: {e}"))
        })?;

        muxer
            .link(&filesink)
            .map_err(|e| RecorderError::Configuration(format!("muxer link failed: {e}")))?;

        Ok(Self {
            pipeline,
            video_src,
            audio_src,
            video_open: true,
            audio_open: true,
            output_path: options.destination.clone(),
        })
    }

    /// Raw video caps the capture source must deliver
    pub fn video_caps(width: u32, height: u32, fps: u32) -> Result<gst::Caps> {
        let info = gst_video::VideoInfo::builder(gst_video::VideoFormat::Bgrx, width, height)
            .fps(gst::Fraction::new(fps as i32, 1))
            .build()
            .context("Failed to build video info")?;
        info.to_caps().context("Failed to build video caps")
    }

    /// Raw audio caps the capture source must deliver
    pub fn audio_caps() -> gst::Caps {
        gst::Caps::builder("audio/x-raw")
            .field("format", "S16LE")
            .field("rate", AUDIO_RATE)
            .field("channels", AUDIO_CHANNELS)
            .field("layout", "interleaved")
            .build()
    }

    fn appsrc(&self, kind: MediaKind) -> &gst_app::AppSrc {
        match kind {
            MediaKind::Video => &self.video_src,
            MediaKind::Audio => &self.audio_src,
        }
    }

    /// Verify that the output file exists and has data
    fn verify_output(&self) -> Result<()> {
        if !self.output_path.exists() {
            anyhow::bail!(
                "Output file was not created: {}",
                self.output_path.display()
            );
        }

        let metadata = std::fs::metadata(&self.output_path).with_context(|| {
            format!(
                "Failed to read output file metadata: {}",
                self.output_path.display()
            )
        })?;

        if metadata.len() == 0 {
            anyhow::bail!("Output file is empty: {}", self.output_path.display());
        }

        log::info!(
            "Output file verified: {} ({} bytes)",
            self.output_path.display(),
            metadata.len()
        );

        Ok(())
    }
}

impl MediaSink for EncodePipeline {
    fn begin(&mut self) -> RecorderResult<()> {
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| RecorderError::WriteStart(format!("pipeline refused to play: {e}")))?;
        Ok(())
    }

    fn track_ready(&self, kind: MediaKind) -> bool {
        let src = self.appsrc(kind);
        src.current_level_bytes() < src.max_bytes()
    }

    /// Send end-of-stream on a track; the muxer stops waiting for its data
    fn close_track(&mut self, kind: MediaKind) -> Result<()> {
        let open = match kind {
            MediaKind::Video => &mut self.video_open,
            MediaKind::Audio => &mut self.audio_open,
        };
        if !*open {
            return Ok(());
        }
        *open = false;

        self.appsrc(kind)
            .end_of_stream()
            .map_err(|_| anyhow::anyhow!("Failed to close {} track", kind.name()))?;
        log::debug!("{} track closed", kind.name());
        Ok(())
    }

    fn append(&mut self, kind: MediaKind, pts: Duration, data: &[u8]) -> Result<()> {
        let mut buffer =
            gst::Buffer::with_size(data.len()).context("Failed to allocate GStreamer buffer")?;

        {
            let buffer_mut = buffer
                .get_mut()
                .context("Failed to get writable buffer reference")?;
            buffer_mut.set_pts(gst::ClockTime::from_nseconds(pts.as_nanos() as u64));
            let mut map = buffer_mut
                .map_writable()
                .context("Failed to map buffer for writing")?;
            map.copy_from_slice(data);
        }

        self.appsrc(kind)
            .push_buffer(buffer)
            .map_err(|e| anyhow::anyhow!("{} track rejected buffer: {e:?}", kind.name()))?;

        Ok(())
    }

    /// Signal end of stream on both tracks and finalize the container
    ///
    /// Returns only once the EOS message has propagated through the muxer and
    /// the file is fully written, or after a bounded wait.
    fn finalize(&mut self) -> Result<()> {
        log::info!("Sending EOS to open tracks...");
        self.close_track(MediaKind::Video)?;
        self.close_track(MediaKind::Audio)?;

        // Wait for EOS to propagate through the pipeline (30 seconds for long
        // recordings)
        log::info!("Waiting for pipeline to finish (up to 30 seconds)...");
        let bus = self.pipeline.bus().context("pipeline has no bus")?;
        let mut eos_received = false;
        for msg in bus.iter_timed(gst::ClockTime::from_seconds(30)) {
            use gst::MessageView;
            match msg.view() {
                MessageView::Eos(..) => {
                    log::info!("EOS received, finalizing...");
                    eos_received = true;
                    break;
                }
                MessageView::Error(err) => {
                    anyhow::bail!(
                        "Pipeline error: {} ({})",
                        err.error(),
                        err.debug().unwrap_or_default()
                    );
                }
                _ => {}
            }
        }

        if !eos_received {
            log::warn!("EOS timeout reached, forcing pipeline shutdown");
        }

        self.pipeline
            .set_state(gst::State::Null)
            .context("Failed to stop pipeline")?;

        self.verify_output()?;

        Ok(())
    }
}
