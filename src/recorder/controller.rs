//! Recorder controller: lifecycle authority over one recording
//!
//! One controller exists per process invocation, explicitly owned by the
//! caller. Two execution contexts exist: the control thread (lifecycle and
//! signal handling) and a single delivery thread that drains the sample
//! channel and performs every readiness check and append into the writer.
//! That serialization is what keeps the writer's anchor and track state
//! race-free without locks.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::encoder;
use super::pipeline::EncodePipeline;
use super::sample::SampleBuffer;
use super::source::CaptureSource;
use super::writer::{MediaSink, MuxWriter};
use crate::devices;
use crate::error::{RecorderError, RecorderResult};
use crate::options::RecordingOptions;

/// Capacity of the channel between capture callbacks and the delivery
/// thread; a full channel drops samples rather than growing
const DELIVERY_QUEUE: usize = 64;
const DELIVERY_POLL: Duration = Duration::from_millis(50);
const STOP_POLL: Duration = Duration::from_millis(100);

/// Global flag set by the signal handlers to request a graceful stop
static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Lifecycle state of the recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecorderState {
    #[default]
    Idle,
    Configuring,
    Capturing,
    Stopping,
    Finalized,
    Failed,
}

/// Owns the capture source and the muxing writer for one recording
pub struct Recorder<S: MediaSink + Send + 'static> {
    state: RecorderState,
    /// Present until `start()` hands it to the delivery thread
    writer: Option<MuxWriter<S>>,
    source: Option<CaptureSource>,
    rx: Option<Receiver<SampleBuffer>>,
    delivery: Option<JoinHandle<MuxWriter<S>>>,
    detached: Arc<AtomicBool>,
}

impl Recorder<EncodePipeline> {
    /// Construct the capture topology and output writer from options
    ///
    /// Removes any pre-existing file at the destination. Fails before any
    /// capture starts if a device cannot be resolved, the codec is
    /// unsupported, or the container rejects a track.
    pub fn configure(options: &RecordingOptions) -> RecorderResult<Self> {
        log::info!(
            "Configuring recording: destination={}, display={}, fps={}",
            options.destination.display(),
            options.display_id,
            options.fps
        );

        remove_stale_destination(&options.destination)?;

        let display = devices::resolve_display(&options.display_id)?;
        devices::probe_display(&display)?;
        let audio_device = match &options.audio_device_id {
            Some(id) => Some(devices::find_audio_device(id)?),
            None => None,
        };

        let video_encoder = encoder::encoder_for_codec(&options.video_codec)?;
        log::info!(
            "Using encoder: {} ({})",
            video_encoder.name,
            video_encoder.gst_element
        );

        let sink = EncodePipeline::new(options, &video_encoder)?;
        let (tx, rx) = crossbeam_channel::bounded(DELIVERY_QUEUE);
        let source = CaptureSource::build(options, &display, audio_device.as_ref(), tx)?;

        Ok(Self::assemble(
            MuxWriter::new(sink, audio_device.is_some()),
            rx,
            Some(source),
        ))
    }
}

impl<S: MediaSink + Send + 'static> Recorder<S> {
    /// Wire a configured writer, delivery receiver and capture source
    pub(crate) fn assemble(
        writer: MuxWriter<S>,
        rx: Receiver<SampleBuffer>,
        source: Option<CaptureSource>,
    ) -> Self {
        Self {
            state: RecorderState::Configuring,
            writer: Some(writer),
            source,
            rx: Some(rx),
            delivery: None,
            detached: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// Begin encoding and attach sample delivery
    pub fn start(&mut self) -> RecorderResult<()> {
        if self.state != RecorderState::Configuring {
            return Err(RecorderError::WriteStart(format!(
                "cannot start from state {:?}",
                self.state
            )));
        }

        let mut writer = self.writer.take().expect("writer present while configuring");
        if let Err(e) = writer.begin() {
            self.state = RecorderState::Failed;
            return Err(e);
        }

        let rx = self.rx.take().expect("receiver present while configuring");
        let detached = self.detached.clone();
        let delivery = thread::Builder::new()
            .name("delivery".into())
            .spawn(move || deliver(writer, rx, detached))
            .map_err(|e| RecorderError::WriteStart(format!("delivery thread: {e}")))?;
        self.delivery = Some(delivery);

        if let Some(source) = &self.source {
            if let Err(e) = source.start() {
                // Capture never began; tear the delivery thread down and fail
                self.state = RecorderState::Failed;
                self.detached.store(true, Ordering::Relaxed);
                if let Some(handle) = self.delivery.take() {
                    let _ = handle.join();
                }
                return Err(e);
            }
        }

        self.state = RecorderState::Capturing;
        log::info!("Recording started");
        Ok(())
    }

    /// The single designated shutdown path, regardless of trigger
    ///
    /// Detaches delivery first, then finalizes the writer, blocking until the
    /// container is fully written. Idempotent: at most one finalize ever
    /// runs. The process must not exit before this returns.
    pub fn stop(&mut self) -> anyhow::Result<()> {
        match self.state {
            RecorderState::Capturing => {}
            RecorderState::Configuring => {
                // Stopped before start: still leave a valid, empty-duration
                // container at the destination
                self.state = RecorderState::Stopping;
                let mut writer = self.writer.take().expect("writer present while configuring");
                let begun = writer.begin().map_err(anyhow::Error::from);
                if let Err(e) = begun.and_then(|()| writer.finalize()) {
                    self.state = RecorderState::Failed;
                    return Err(e);
                }
                self.state = RecorderState::Finalized;
                return Ok(());
            }
            _ => return Ok(()),
        }

        self.state = RecorderState::Stopping;
        log::info!("Stopping recording...");

        // Detach the delivery taps first: no further samples are accepted
        if let Some(source) = self.source.take() {
            source.detach();
        }
        self.detached.store(true, Ordering::Relaxed);

        let mut writer = match self.delivery.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow::anyhow!("delivery thread panicked"))?,
            None => self.writer.take().expect("writer present without delivery"),
        };

        match writer.finalize() {
            Ok(()) => {
                self.state = RecorderState::Finalized;
                log::info!("Recording finalized");
                Ok(())
            }
            Err(e) => {
                self.state = RecorderState::Failed;
                Err(e)
            }
        }
    }

    /// Block until a termination signal or stop request, then stop
    ///
    /// SIGHUP, SIGINT, SIGTERM and SIGQUIT all funnel into the same graceful
    /// stop; none terminate the process directly.
    pub fn run_until_stopped(&mut self) -> anyhow::Result<()> {
        install_signal_handlers();
        while self.state == RecorderState::Capturing && !STOP_REQUESTED.load(Ordering::Relaxed) {
            thread::sleep(STOP_POLL);
        }
        self.stop()
    }
}

/// Delivery loop: the one context that touches the writer while capturing
fn deliver<S: MediaSink>(
    mut writer: MuxWriter<S>,
    rx: Receiver<SampleBuffer>,
    detached: Arc<AtomicBool>,
) -> MuxWriter<S> {
    loop {
        match rx.recv_timeout(DELIVERY_POLL) {
            Ok(sample) => writer.ingest(sample),
            Err(RecvTimeoutError::Timeout) => {
                if detached.load(Ordering::Relaxed) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    writer
}

/// Remove any pre-existing file at the destination
///
/// Destructive by contract: the path is exclusively the writer's from
/// configuration through finalize.
fn remove_stale_destination(path: &std::path::Path) -> RecorderResult<()> {
    if path.exists() {
        log::warn!("Overwriting existing file at {}", path.display());
        std::fs::remove_file(path)?;
    }
    Ok(())
}

/// Request a graceful stop, as the signal handlers do
pub fn request_stop() {
    STOP_REQUESTED.store(true, Ordering::Relaxed);
}

/// Remap every termination signal to a stop request
fn install_signal_handlers() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| unsafe {
        let handler = stop_signal_handler as extern "C" fn(libc::c_int) as libc::sighandler_t;
        libc::signal(libc::SIGHUP, handler);
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
        libc::signal(libc::SIGQUIT, handler);
    });
}

extern "C" fn stop_signal_handler(_: libc::c_int) {
    // Only async-signal-safe work here
    request_stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::sample::{MediaKind, SampleBuffer};
    use crate::recorder::writer::mock::{MockSink, SinkEvent};
    use crossbeam_channel::Sender;
    use std::sync::Mutex;

    fn recorder_with_audio(audio_expected: bool) -> (
        Recorder<MockSink>,
        Sender<SampleBuffer>,
        Arc<Mutex<Vec<SinkEvent>>>,
    ) {
        let (sink, events) = MockSink::new();
        let (tx, rx) = crossbeam_channel::bounded(DELIVERY_QUEUE);
        let recorder = Recorder::assemble(MuxWriter::new(sink, audio_expected), rx, None);
        (recorder, tx, events)
    }

    fn recorder_with_mock() -> (
        Recorder<MockSink>,
        Sender<SampleBuffer>,
        Arc<Mutex<Vec<SinkEvent>>>,
    ) {
        recorder_with_audio(true)
    }

    fn sample(kind: MediaKind, millis: u64) -> SampleBuffer {
        SampleBuffer::new(kind, Duration::from_millis(millis), vec![0u8; 8])
    }

    #[test]
    fn test_lifecycle_transitions() {
        let (mut recorder, _tx, _) = recorder_with_mock();
        assert_eq!(recorder.state(), RecorderState::Configuring);

        recorder.start().unwrap();
        assert_eq!(recorder.state(), RecorderState::Capturing);

        recorder.stop().unwrap();
        assert_eq!(recorder.state(), RecorderState::Finalized);
    }

    #[test]
    fn test_start_twice_fails() {
        let (mut recorder, _tx, _) = recorder_with_mock();
        recorder.start().unwrap();
        assert!(recorder.start().is_err());
        // A failed re-start must not disturb an active recording
        assert_eq!(recorder.state(), RecorderState::Capturing);
    }

    #[test]
    fn test_stop_twice_finalizes_once() {
        let (mut recorder, tx, events) = recorder_with_mock();
        recorder.start().unwrap();
        tx.send(sample(MediaKind::Video, 0)).unwrap();

        recorder.stop().unwrap();
        recorder.stop().unwrap();

        let finalizes = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| **e == SinkEvent::Finalize)
            .count();
        assert_eq!(finalizes, 1);
        assert_eq!(recorder.state(), RecorderState::Finalized);
    }

    #[test]
    fn test_shutdown_orders_appends_before_finalize() {
        let (mut recorder, tx, events) = recorder_with_mock();
        recorder.start().unwrap();
        for i in 0..5 {
            tx.send(sample(MediaKind::Video, i * 33)).unwrap();
        }

        // stop() blocks until finalization has completed
        recorder.stop().unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.first(), Some(&SinkEvent::Begin));
        assert_eq!(events.last(), Some(&SinkEvent::Finalize));
        let appends = events
            .iter()
            .filter(|e| matches!(e, SinkEvent::Append(..)))
            .count();
        assert_eq!(appends, 5);
    }

    #[test]
    fn test_stop_before_start_still_finalizes() {
        let (mut recorder, _tx, events) = recorder_with_mock();

        recorder.stop().unwrap();

        assert_eq!(recorder.state(), RecorderState::Finalized);
        // The sink was begun and finalized so the container exists and is
        // valid even with zero samples
        assert_eq!(
            *events.lock().unwrap(),
            vec![SinkEvent::Begin, SinkEvent::Finalize]
        );
    }

    #[test]
    fn test_mixed_streams_scenario() {
        let (mut recorder, tx, events) = recorder_with_mock();
        recorder.start().unwrap();

        // 30 video frames and 10 audio samples over one second
        for i in 0..30u64 {
            tx.send(sample(MediaKind::Video, i * 33)).unwrap();
            if i % 3 == 0 {
                tx.send(sample(MediaKind::Audio, i * 33 + 5)).unwrap();
            }
            // Stay under the bounded channel capacity
            if i % 10 == 9 {
                thread::sleep(Duration::from_millis(20));
            }
        }

        recorder.stop().unwrap();

        let events = events.lock().unwrap();
        let appends = events
            .iter()
            .filter(|e| matches!(e, SinkEvent::Append(..)))
            .count();
        assert_eq!(appends, 40);
        let finalizes = events.iter().filter(|e| **e == SinkEvent::Finalize).count();
        assert_eq!(finalizes, 1);
        // First append anchors at zero
        assert_eq!(
            events.get(1),
            Some(&SinkEvent::Append(MediaKind::Video, Duration::ZERO))
        );
    }

    #[test]
    fn test_video_only_recording_closes_audio_track_at_start() {
        let (mut recorder, tx, events) = recorder_with_audio(false);
        recorder.start().unwrap();
        for i in 0..10 {
            tx.send(sample(MediaKind::Video, i * 33)).unwrap();
        }

        recorder.stop().unwrap();

        // With no audio device configured the audio slot is closed right
        // after begin, so the container never stalls waiting for audio data
        // and every video sample still lands
        let events = events.lock().unwrap();
        assert_eq!(events.first(), Some(&SinkEvent::Begin));
        assert_eq!(
            events.get(1),
            Some(&SinkEvent::CloseTrack(MediaKind::Audio))
        );
        let appends = events
            .iter()
            .filter(|e| matches!(e, SinkEvent::Append(..)))
            .count();
        assert_eq!(appends, 10);
        assert_eq!(events.last(), Some(&SinkEvent::Finalize));
    }

    #[test]
    fn test_remove_stale_destination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mp4");
        std::fs::write(&path, b"stale").unwrap();

        remove_stale_destination(&path).unwrap();
        assert!(!path.exists());

        // A path with no file is not an error
        remove_stale_destination(&path).unwrap();
    }

    #[test]
    fn test_run_until_stopped_honors_stop_request() {
        let (mut recorder, _tx, _) = recorder_with_mock();
        recorder.start().unwrap();

        let stopper = thread::spawn(|| {
            thread::sleep(Duration::from_millis(150));
            request_stop();
        });

        recorder.run_until_stopped().unwrap();
        stopper.join().unwrap();
        assert_eq!(recorder.state(), RecorderState::Finalized);
    }
}
