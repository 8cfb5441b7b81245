//! Recording options decoded from the single JSON CLI argument

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{RecorderError, RecorderResult};

/// Everything a recording needs, constructed once from external input
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingOptions {
    /// Output file path; any pre-existing file here is removed before writing
    pub destination: PathBuf,
    /// Frames per second
    pub fps: u32,
    /// Region of the display to record; absent means the full display
    #[serde(default)]
    pub crop_rect: Option<CropRect>,
    /// Whether the cursor is visible in the recording
    pub show_cursor: bool,
    /// Whether mouse clicks are visually highlighted
    pub highlight_clicks: bool,
    /// Display to record: "main" for the primary display, or a numeric id
    pub display_id: String,
    /// Audio input device id; absent means no audio is captured
    #[serde(default)]
    pub audio_device_id: Option<String>,
    /// Video codec identifier (e.g. "avc1", "hvc1", "vp9")
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    /// Output video width in pixels
    pub width: u32,
    /// Output video height in pixels
    pub height: u32,
    /// Audio bitrate in bits per second
    pub audio_bitrate: u32,
    /// Video bitrate in bits per second
    pub video_bitrate: u32,
}

fn default_video_codec() -> String {
    "avc1".to_string()
}

impl RecordingOptions {
    /// Decode and validate options from the JSON CLI argument
    pub fn from_json(json: &str) -> RecorderResult<Self> {
        let options: Self = serde_json::from_str(json)
            .map_err(|e| RecorderError::Configuration(format!("bad options JSON: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    fn validate(&self) -> RecorderResult<()> {
        if self.fps == 0 {
            return Err(RecorderError::Configuration("fps must be positive".into()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(RecorderError::Configuration(
                "width and height must be positive".into(),
            ));
        }
        if self.video_bitrate == 0 || self.audio_bitrate == 0 {
            return Err(RecorderError::Configuration(
                "bitrates must be positive".into(),
            ));
        }
        if let Some(crop) = &self.crop_rect {
            if crop.width == 0 || crop.height == 0 {
                return Err(RecorderError::Configuration(
                    "crop rectangle must have positive size".into(),
                ));
            }
        }
        Ok(())
    }

    /// Container format inferred from the destination extension
    pub fn container(&self) -> Container {
        Container::from_path(&self.destination)
    }
}

/// Crop region in display coordinates, decoded from `[x, y, width, height]`
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(from = "[f64; 4]")]
pub struct CropRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl From<[f64; 4]> for CropRect {
    fn from(values: [f64; 4]) -> Self {
        Self {
            x: values[0].round() as i32,
            y: values[1].round() as i32,
            width: values[2].max(0.0).round() as u32,
            height: values[3].max(0.0).round() as u32,
        }
    }
}

/// Video container format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Container {
    #[default]
    Mp4,
    Webm,
    Mkv,
}

impl Container {
    /// Infer the container from a destination path, defaulting to MP4
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("webm") => Container::Webm,
            Some("mkv") => Container::Mkv,
            _ => Container::Mp4,
        }
    }

    /// Get GStreamer muxer element name
    pub fn muxer_element(&self) -> &'static str {
        match self {
            Container::Mp4 => "mp4mux",
            Container::Webm => "webmmux",
            Container::Mkv => "matroskamux",
        }
    }

    /// Get GStreamer audio encoder element name for this container
    pub fn audio_encoder_element(&self) -> &'static str {
        match self {
            Container::Mp4 => "avenc_aac",
            Container::Webm | Container::Mkv => "opusenc",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_json() -> serde_json::Value {
        serde_json::json!({
            "destination": "/tmp/out.mp4",
            "fps": 30,
            "showCursor": true,
            "highlightClicks": false,
            "displayId": "main",
            "width": 1920,
            "height": 1080,
            "audioBitrate": 192000,
            "videoBitrate": 5000000
        })
    }

    #[test]
    fn test_decode_minimal_options() {
        let options = RecordingOptions::from_json(&base_json().to_string()).unwrap();
        assert_eq!(options.fps, 30);
        assert_eq!(options.display_id, "main");
        assert!(options.crop_rect.is_none());
        assert!(options.audio_device_id.is_none());
        // Unspecified codec falls back to H.264
        assert_eq!(options.video_codec, "avc1");
    }

    #[test]
    fn test_decode_crop_rect_from_four_numbers() {
        let mut json = base_json();
        json["cropRect"] = serde_json::json!([10.0, 20.0, 640.0, 480.0]);
        let options = RecordingOptions::from_json(&json.to_string()).unwrap();
        let crop = options.crop_rect.unwrap();
        assert_eq!(crop.x, 10);
        assert_eq!(crop.y, 20);
        assert_eq!(crop.width, 640);
        assert_eq!(crop.height, 480);
    }

    #[test]
    fn test_audio_device_and_codec_fields() {
        let mut json = base_json();
        json["audioDeviceId"] = serde_json::json!("alsa_input.usb-mic");
        json["videoCodec"] = serde_json::json!("vp9");
        let options = RecordingOptions::from_json(&json.to_string()).unwrap();
        assert_eq!(options.audio_device_id.as_deref(), Some("alsa_input.usb-mic"));
        assert_eq!(options.video_codec, "vp9");
    }

    #[test]
    fn test_rejects_zero_fps() {
        let mut json = base_json();
        json["fps"] = serde_json::json!(0);
        let err = RecordingOptions::from_json(&json.to_string()).unwrap_err();
        assert!(err.to_string().contains("fps"));
    }

    #[test]
    fn test_rejects_zero_dimensions() {
        let mut json = base_json();
        json["width"] = serde_json::json!(0);
        assert!(RecordingOptions::from_json(&json.to_string()).is_err());
    }

    #[test]
    fn test_rejects_empty_crop() {
        let mut json = base_json();
        json["cropRect"] = serde_json::json!([0.0, 0.0, 0.0, 100.0]);
        assert!(RecordingOptions::from_json(&json.to_string()).is_err());
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(RecordingOptions::from_json("not json").is_err());
    }

    #[test]
    fn test_container_from_extension() {
        assert_eq!(Container::from_path(Path::new("a.mp4")), Container::Mp4);
        assert_eq!(Container::from_path(Path::new("a.webm")), Container::Webm);
        assert_eq!(Container::from_path(Path::new("a.mkv")), Container::Mkv);
        // Unknown or missing extensions default to MP4
        assert_eq!(Container::from_path(Path::new("a.mov")), Container::Mp4);
        assert_eq!(Container::from_path(Path::new("a")), Container::Mp4);
    }

    #[test]
    fn test_container_elements() {
        assert_eq!(Container::Mp4.muxer_element(), "mp4mux");
        assert_eq!(Container::Webm.muxer_element(), "webmmux");
        assert_eq!(Container::Mkv.muxer_element(), "matroskamux");
        assert_eq!(Container::Mp4.audio_encoder_element(), "avenc_aac");
        assert_eq!(Container::Webm.audio_encoder_element(), "opusenc");
    }
}
