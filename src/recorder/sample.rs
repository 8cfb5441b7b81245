//! Timestamped capture samples

use std::time::Duration;

/// Media kind of a captured sample, selecting its output track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn name(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

/// One timestamped unit of captured audio or video data
///
/// Ownership passes from the capture callback through the delivery channel to
/// the writer for a single write attempt; a sample is never retained beyond
/// that attempt.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    pub kind: MediaKind,
    /// Presentation time on the capture clock, shared by both streams
    pub pts: Duration,
    pub data: Vec<u8>,
}

impl SampleBuffer {
    pub fn new(kind: MediaKind, pts: Duration, data: Vec<u8>) -> Self {
        Self { kind, pts, data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_name() {
        assert_eq!(MediaKind::Video.name(), "video");
        assert_eq!(MediaKind::Audio.name(), "audio");
    }
}
