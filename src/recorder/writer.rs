//! Muxing writer: merges two real-time sample streams into one output
//!
//! The writer owns the ordering policy of the recording: the session zero
//! point is anchored to the first sample ever ingested (across either track),
//! a track that is not ready for more data causes an immediate silent drop
//! rather than queueing or blocking, and finalize runs at most once. The
//! actual encode layer sits behind the [`MediaSink`] trait.

use std::time::Duration;

use super::sample::{MediaKind, SampleBuffer};
use crate::error::{RecorderError, RecorderResult};

/// The encode layer under the writer: two encoding tracks feeding one
/// container file
pub trait MediaSink {
    /// Begin encoding; called once before any append
    fn begin(&mut self) -> RecorderResult<()>;

    /// Whether the given track can accept more data right now
    fn track_ready(&self, kind: MediaKind) -> bool;

    /// Mark a track as complete: no samples will ever arrive for it. The
    /// container still carries the (empty) track.
    fn close_track(&mut self, kind: MediaKind) -> anyhow::Result<()>;

    /// Append one sample to its track, timestamped relative to session start
    fn append(&mut self, kind: MediaKind, pts: Duration, data: &[u8]) -> anyhow::Result<()>;

    /// Flush both tracks and close the container; returns only once the file
    /// is fully written and valid on disk
    fn finalize(&mut self) -> anyhow::Result<()>;
}

/// Per-track ingest counters
#[derive(Debug, Clone, Copy, Default)]
struct TrackStats {
    appended: u64,
    dropped: u64,
    failed: u64,
}

/// Writer state: session anchor, finalize guard, ingest accounting
pub struct MuxWriter<S: MediaSink> {
    sink: S,
    /// Whether audio capture is configured for this session
    audio_expected: bool,
    anchor: Option<Duration>,
    finalized: bool,
    video: TrackStats,
    audio: TrackStats,
}

impl<S: MediaSink> MuxWriter<S> {
    pub fn new(sink: S, audio_expected: bool) -> Self {
        Self {
            sink,
            audio_expected,
            anchor: None,
            finalized: false,
            video: TrackStats::default(),
            audio: TrackStats::default(),
        }
    }

    /// Begin encoding on the underlying sink
    ///
    /// When no audio capture is configured the audio track is closed up
    /// front, so the container never interleaves against data that will not
    /// arrive.
    pub fn begin(&mut self) -> RecorderResult<()> {
        self.sink.begin()?;
        if !self.audio_expected {
            self.sink
                .close_track(MediaKind::Audio)
                .map_err(|e| RecorderError::WriteStart(format!("{e:#}")))?;
        }
        Ok(())
    }

    /// Ingest one arriving sample
    ///
    /// Never blocks: a sample whose track is not ready is discarded. Append
    /// failures are logged and absorbed; recording continues best-effort.
    pub fn ingest(&mut self, sample: SampleBuffer) {
        if self.finalized {
            return;
        }

        // The first sample of either kind anchors the session start, exactly
        // once. A later first sample on the other track must not re-anchor.
        let anchor = *self.anchor.get_or_insert(sample.pts);

        let stats = match sample.kind {
            MediaKind::Video => &mut self.video,
            MediaKind::Audio => &mut self.audio,
        };

        if !self.sink.track_ready(sample.kind) {
            stats.dropped += 1;
            log::trace!("{} track not ready, sample dropped", sample.kind.name());
            return;
        }

        let pts = sample.pts.saturating_sub(anchor);
        match self.sink.append(sample.kind, pts, &sample.data) {
            Ok(()) => stats.appended += 1,
            Err(e) => {
                stats.failed += 1;
                log::warn!("failed to append {} sample: {e:#}", sample.kind.name());
            }
        }
    }

    /// Flush and close the container; at most one finalize ever runs
    ///
    /// Valid with no samples ingested: the sink still produces an
    /// empty-duration container.
    pub fn finalize(&mut self) -> anyhow::Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        log::debug!(
            "finalizing: video appended={} dropped={} failed={}, audio appended={} dropped={} failed={}",
            self.video.appended,
            self.video.dropped,
            self.video.failed,
            self.audio.appended,
            self.audio.dropped,
            self.audio.failed,
        );
        self.sink.finalize()
    }

    /// Session anchor time, if any sample has arrived
    pub fn anchor(&self) -> Option<Duration> {
        self.anchor
    }

    /// Appended sample count for a track
    pub fn appended(&self, kind: MediaKind) -> u64 {
        match kind {
            MediaKind::Video => self.video.appended,
            MediaKind::Audio => self.audio.appended,
        }
    }

    /// Backpressure drop count for a track
    pub fn dropped(&self, kind: MediaKind) -> u64 {
        match kind {
            MediaKind::Video => self.video.dropped,
            MediaKind::Audio => self.audio.dropped,
        }
    }

    /// Failed append count for a track
    pub fn failed(&self, kind: MediaKind) -> u64 {
        match kind {
            MediaKind::Video => self.video.failed,
            MediaKind::Audio => self.audio.failed,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mock::{MockSink, SinkEvent};
    use super::*;

    fn sample(kind: MediaKind, millis: u64) -> SampleBuffer {
        SampleBuffer::new(kind, Duration::from_millis(millis), vec![0u8; 16])
    }

    #[test]
    fn test_begin_without_audio_closes_audio_track() {
        let (sink, events) = MockSink::new();
        let mut writer = MuxWriter::new(sink, false);

        writer.begin().unwrap();

        // The audio slot must be closed before any video flows, or the
        // container would wait forever on a track nothing feeds
        assert_eq!(
            *events.lock().unwrap(),
            vec![SinkEvent::Begin, SinkEvent::CloseTrack(MediaKind::Audio)]
        );
    }

    #[test]
    fn test_begin_with_audio_keeps_audio_track_open() {
        let (sink, events) = MockSink::new();
        let mut writer = MuxWriter::new(sink, true);

        writer.begin().unwrap();

        assert_eq!(*events.lock().unwrap(), vec![SinkEvent::Begin]);
    }

    #[test]
    fn test_anchor_set_by_first_sample_video_first() {
        let (sink, events) = MockSink::new();
        let mut writer = MuxWriter::new(sink, true);

        writer.ingest(sample(MediaKind::Video, 500));
        writer.ingest(sample(MediaKind::Audio, 520));

        assert_eq!(writer.anchor(), Some(Duration::from_millis(500)));
        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                SinkEvent::Append(MediaKind::Video, Duration::ZERO),
                SinkEvent::Append(MediaKind::Audio, Duration::from_millis(20)),
            ]
        );
    }

    #[test]
    fn test_anchor_set_by_first_sample_audio_first() {
        let (sink, _) = MockSink::new();
        let mut writer = MuxWriter::new(sink, true);

        writer.ingest(sample(MediaKind::Audio, 300));
        writer.ingest(sample(MediaKind::Video, 310));
        writer.ingest(sample(MediaKind::Audio, 320));

        // The later-arriving video stream must not re-anchor
        assert_eq!(writer.anchor(), Some(Duration::from_millis(300)));
    }

    #[test]
    fn test_anchor_survives_dropped_first_sample() {
        let (mut sink, _) = MockSink::new();
        sink.video_ready = false;
        let mut writer = MuxWriter::new(sink, true);

        // Even a sample that is dropped under backpressure anchors the session
        writer.ingest(sample(MediaKind::Video, 100));
        assert_eq!(writer.anchor(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_not_ready_track_drops_without_queueing() {
        let (mut sink, events) = MockSink::new();
        sink.audio_ready = false;
        let mut writer = MuxWriter::new(sink, true);

        for i in 0..1000 {
            writer.ingest(sample(MediaKind::Audio, i));
        }

        assert_eq!(writer.appended(MediaKind::Audio), 0);
        assert_eq!(writer.dropped(MediaKind::Audio), 1000);
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_backpressure_on_one_track_leaves_other_flowing() {
        let (mut sink, _) = MockSink::new();
        sink.audio_ready = false;
        let mut writer = MuxWriter::new(sink, true);

        writer.ingest(sample(MediaKind::Video, 0));
        writer.ingest(sample(MediaKind::Audio, 5));
        writer.ingest(sample(MediaKind::Video, 33));

        assert_eq!(writer.appended(MediaKind::Video), 2);
        assert_eq!(writer.dropped(MediaKind::Audio), 1);
    }

    #[test]
    fn test_append_failure_is_absorbed() {
        let (mut sink, _) = MockSink::new();
        sink.fail_appends = true;
        let mut writer = MuxWriter::new(sink, true);

        writer.ingest(sample(MediaKind::Video, 0));
        writer.ingest(sample(MediaKind::Video, 33));

        assert_eq!(writer.failed(MediaKind::Video), 2);
        // Recording continues: finalize still succeeds
        assert!(writer.finalize().is_ok());
    }

    #[test]
    fn test_finalize_runs_at_most_once() {
        let (sink, events) = MockSink::new();
        let mut writer = MuxWriter::new(sink, true);

        writer.ingest(sample(MediaKind::Video, 0));
        writer.finalize().unwrap();
        writer.finalize().unwrap();

        let finalizes = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| **e == SinkEvent::Finalize)
            .count();
        assert_eq!(finalizes, 1);
    }

    #[test]
    fn test_ingest_after_finalize_is_ignored() {
        let (sink, events) = MockSink::new();
        let mut writer = MuxWriter::new(sink, true);

        writer.finalize().unwrap();
        writer.ingest(sample(MediaKind::Video, 0));

        assert_eq!(writer.anchor(), None);
        assert_eq!(*events.lock().unwrap(), vec![SinkEvent::Finalize]);
    }

    #[test]
    fn test_finalize_with_no_samples_is_valid() {
        let (sink, events) = MockSink::new();
        let mut writer = MuxWriter::new(sink, true);

        assert!(writer.finalize().is_ok());
        assert_eq!(*events.lock().unwrap(), vec![SinkEvent::Finalize]);
    }

    #[test]
    fn test_pts_rebased_against_anchor() {
        let (sink, events) = MockSink::new();
        let mut writer = MuxWriter::new(sink, true);

        writer.ingest(sample(MediaKind::Audio, 1000));
        writer.ingest(sample(MediaKind::Video, 1033));
        writer.ingest(sample(MediaKind::Audio, 1066));

        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                SinkEvent::Append(MediaKind::Audio, Duration::ZERO),
                SinkEvent::Append(MediaKind::Video, Duration::from_millis(33)),
                SinkEvent::Append(MediaKind::Audio, Duration::from_millis(66)),
            ]
        );
    }
}
