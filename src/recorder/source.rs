//! Capture source: binds one display and one audio device to live sample
//! delivery
//!
//! Each stream is an appsink-terminated capture pipeline whose callback copies
//! the mapped buffer and forwards it into the bounded delivery channel. Both
//! pipelines share the system clock with a zero base time, so buffer
//! timestamps from the two streams are mutually comparable monotonic times —
//! which is what lets the writer anchor the session on whichever stream
//! delivers first.

use crossbeam_channel::Sender;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use std::time::Duration;

use super::pipeline::EncodePipeline;
use super::sample::{MediaKind, SampleBuffer};
use crate::error::{RecorderError, RecorderResult};
use crate::options::{CropRect, RecordingOptions};

/// Live binding between one display, at most one audio device, and the
/// delivery channel
pub struct CaptureSource {
    video: gst::Pipeline,
    audio: Option<gst::Pipeline>,
}

impl CaptureSource {
    /// Build the capture topology; no samples flow until [`start`]
    ///
    /// Device and display resolution failures are reported synchronously
    /// here, before capture starts.
    ///
    /// [`start`]: CaptureSource::start
    pub fn build(
        options: &RecordingOptions,
        display_name: &str,
        audio_device: Option<&gst::Device>,
        tx: Sender<SampleBuffer>,
    ) -> RecorderResult<Self> {
        gst::init()
            .map_err(|e| RecorderError::Configuration(format!("GStreamer init failed: {e}")))?;

        let video = Self::build_video_pipeline(options, display_name, tx.clone())?;
        let audio = match audio_device {
            Some(device) => Some(Self::build_audio_pipeline(device, tx)?),
            None => None,
        };

        Ok(Self { video, audio })
    }

    fn build_video_pipeline(
        options: &RecordingOptions,
        display_name: &str,
        tx: Sender<SampleBuffer>,
    ) -> RecorderResult<gst::Pipeline> {
        let pipeline = gst::Pipeline::new();
        share_session_clock(&pipeline);

        let src = gst::ElementFactory::make("ximagesrc")
            .property("display-name", display_name)
            .property("show-pointer", options.show_cursor)
            .property("use-damage", false)
            .build()
            .map_err(|_| {
                RecorderError::Configuration(
                    "screen capture element 'ximagesrc' not available".into(),
                )
            })?;

        if options.highlight_clicks {
            log::debug!("click highlighting requested but not supported by this capture source");
        }

        if let Some(crop) = &options.crop_rect {
            let (startx, starty, endx, endy) = crop_bounds(crop);
            src.set_property("startx", startx);
            src.set_property("starty", starty);
            src.set_property("endx", endx);
            src.set_property("endy", endy);
        }

        let videoconvert = element("videoconvert")?;
        let videorate = element("videorate")?;
        let videoscale = element("videoscale")?;

        let caps = EncodePipeline::video_caps(options.width, options.height, options.fps)
            .map_err(|e| RecorderError::Configuration(format!("bad video geometry: {e:#}")))?;
        let appsink = gst_app::AppSink::builder().caps(&caps).build();
        appsink.set_property("sync", false);
        attach_forwarder(&appsink, MediaKind::Video, tx);

        pipeline
            .add_many([&src, &videoconvert, &videorate, &videoscale, appsink.upcast_ref()])
            .map_err(|e| RecorderError::Configuration(format!("capture assembly failed: {e}")))?;
        gst::Element::link_many([&src, &videoconvert, &videorate, &videoscale, appsink.upcast_ref()])
            .map_err(|e| {
                RecorderError::Configuration(format!("screen capture link failed: {e}"))
            })?;

        Ok(pipeline)
    }

    fn build_audio_pipeline(
        device: &gst::Device,
        tx: Sender<SampleBuffer>,
    ) -> RecorderResult<gst::Pipeline> {
        let pipeline = gst::Pipeline::new();
        share_session_clock(&pipeline);

        let src = device.create_element(None).map_err(|e| {
            RecorderError::Configuration(format!(
                "audio device '{}' could not be opened: {e}",
                device.display_name()
            ))
        })?;

        let audioconvert = element("audioconvert")?;
        let audioresample = element("audioresample")?;

        let appsink = gst_app::AppSink::builder()
            .caps(&EncodePipeline::audio_caps())
            .build();
        appsink.set_property("sync", false);
        attach_forwarder(&appsink, MediaKind::Audio, tx);

        pipeline
            .add_many([&src, &audioconvert, &audioresample, appsink.upcast_ref()])
            .map_err(|e| RecorderError::Configuration(format!("capture assembly failed: {e}")))?;
        gst::Element::link_many([&src, &audioconvert, &audioresample, appsink.upcast_ref()])
            .map_err(|e| {
                RecorderError::Configuration(format!("audio capture link failed: {e}"))
            })?;

        Ok(pipeline)
    }

    /// Begin delivering samples
    pub fn start(&self) -> RecorderResult<()> {
        self.video
            .set_state(gst::State::Playing)
            .map_err(|e| RecorderError::WriteStart(format!("screen capture failed: {e}")))?;
        if let Some(audio) = &self.audio {
            audio
                .set_state(gst::State::Playing)
                .map_err(|e| RecorderError::WriteStart(format!("audio capture failed: {e}")))?;
        }
        Ok(())
    }

    /// Tear down both delivery taps; no further samples are produced
    pub fn detach(self) {
        if let Err(e) = self.video.set_state(gst::State::Null) {
            log::warn!("screen capture did not stop cleanly: {e}");
        }
        if let Some(audio) = &self.audio {
            if let Err(e) = audio.set_state(gst::State::Null) {
                log::warn!("audio capture did not stop cleanly: {e}");
            }
        }
    }
}

/// Inclusive capture bounds for a crop rectangle
///
/// Decoded crop values are unvalidated against the display geometry, so the
/// bounds saturate instead of overflowing; the capture element clamps them
/// to the actual screen.
fn crop_bounds(crop: &CropRect) -> (u32, u32, u32, u32) {
    let startx = crop.x.max(0) as u32;
    let starty = crop.y.max(0) as u32;
    let endx = startx.saturating_add(crop.width).saturating_sub(1);
    let endy = starty.saturating_add(crop.height).saturating_sub(1);
    (startx, starty, endx, endy)
}

fn element(name: &str) -> RecorderResult<gst::Element> {
    gst::ElementFactory::make(name)
        .build()
        .map_err(|_| RecorderError::Configuration(format!("element '{name}' not available")))
}

/// Run both capture pipelines off the shared system clock with a zero base
/// time, so buffer timestamps are absolute monotonic times
fn share_session_clock(pipeline: &gst::Pipeline) {
    let clock = gst::SystemClock::obtain();
    pipeline.use_clock(Some(&clock));
    pipeline.set_base_time(gst::ClockTime::ZERO);
    pipeline.set_start_time(gst::ClockTime::NONE);
}

/// Forward every appsink sample into the delivery channel
///
/// The callback runs on the stream's own thread and must not block: if the
/// delivery channel is full the sample is dropped.
fn attach_forwarder(appsink: &gst_app::AppSink, kind: MediaKind, tx: Sender<SampleBuffer>) {
    appsink.set_callbacks(
        gst_app::AppSinkCallbacks::builder()
            .new_sample(move |sink| {
                let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                let Some(buffer) = sample.buffer() else {
                    return Ok(gst::FlowSuccess::Ok);
                };
                let Some(pts) = buffer.pts() else {
                    log::trace!("{} sample without timestamp skipped", kind.name());
                    return Ok(gst::FlowSuccess::Ok);
                };
                let Ok(map) = buffer.map_readable() else {
                    log::warn!("{} sample could not be mapped", kind.name());
                    return Ok(gst::FlowSuccess::Ok);
                };

                let sample = SampleBuffer::new(
                    kind,
                    Duration::from_nanos(pts.nseconds()),
                    map.as_slice().to_vec(),
                );
                if tx.try_send(sample).is_err() {
                    log::trace!("{} sample dropped: delivery queue full", kind.name());
                }
                Ok(gst::FlowSuccess::Ok)
            })
            .build(),
    );
}
