//! Encoder detection and selection
//!
//! Queries GStreamer for available video encoders and prioritizes
//! hardware-accelerated ones. The requested codec identifier from the options
//! record is matched against what is actually installed; an identifier with
//! no available encoder is a configuration error.

use anyhow::{Context, Result};
use gstreamer as gst;
use gstreamer::prelude::*;

use crate::error::{RecorderError, RecorderResult};

/// Codec type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    H264,
    H265,
    VP9,
    AV1,
}

impl Codec {
    pub fn name(&self) -> &'static str {
        match self {
            Codec::H264 => "H.264",
            Codec::H265 => "H.265",
            Codec::VP9 => "VP9",
            Codec::AV1 => "AV1",
        }
    }

    /// Parse an options-record codec identifier
    ///
    /// Accepts both the FourCC-style identifiers the original CLI surface
    /// used ("avc1", "hvc1") and plain codec names.
    pub fn from_identifier(id: &str) -> Option<Codec> {
        match id.to_ascii_lowercase().as_str() {
            "avc1" | "avc" | "h264" => Some(Codec::H264),
            "hvc1" | "hevc" | "h265" => Some(Codec::H265),
            "vp9" => Some(Codec::VP9),
            "av1" => Some(Codec::AV1),
            _ => None,
        }
    }
}

/// Information about an available encoder
#[derive(Debug, Clone)]
pub struct EncoderInfo {
    /// Human-readable name (e.g., "VA-API H.264")
    pub name: String,
    /// GStreamer element name (e.g., "vaapih264enc")
    pub gst_element: String,
    /// Codec type
    pub codec: Codec,
    /// Whether this is hardware-accelerated
    pub hardware: bool,
    /// Priority (lower = better, hardware encoders have lower priority)
    pub priority: u8,
}

impl EncoderInfo {
    /// Build the encoder element with its bitrate configured
    pub fn build_element(&self, bitrate_bps: u32) -> Result<gst::Element> {
        let element = gst::ElementFactory::make(&self.gst_element)
            .build()
            .with_context(|| format!("Failed to create encoder: {}", self.gst_element))?;
        configure_bitrate(&element, &self.gst_element, bitrate_bps);
        Ok(element)
    }
}

/// Set the target bitrate on an encoder element
///
/// Property name and unit vary by element: x264enc/nvenc/vaapi take kbit/s as
/// "bitrate", the VP9/AV1 encoders take bit/s as "target-bitrate", and the
/// audio encoders take bit/s as "bitrate".
fn configure_bitrate(element: &gst::Element, element_name: &str, bitrate_bps: u32) {
    match element_name {
        "x264enc" | "nvh264enc" | "nvh265enc" | "vaapih264enc" | "vaapih265enc" => {
            element.set_property("bitrate", bitrate_bps / 1000);
        }
        "vp9enc" | "vaapivp9enc" => {
            element.set_property("target-bitrate", bitrate_bps as i32);
        }
        "avenc_aac" => {
            element.set_property("bitrate", bitrate_bps as i64);
        }
        "opusenc" => {
            element.set_property("bitrate", bitrate_bps as i32);
        }
        other => {
            log::debug!("no bitrate mapping for encoder '{other}', using element defaults");
        }
    }
}

/// Build the audio encoder element for a container, with its bitrate set
pub fn build_audio_encoder(element_name: &str, bitrate_bps: u32) -> RecorderResult<gst::Element> {
    let element = gst::ElementFactory::make(element_name)
        .build()
        .map_err(|_| {
            RecorderError::Configuration(format!("audio encoder '{element_name}' not available"))
        })?;
    configure_bitrate(&element, element_name, bitrate_bps);
    Ok(element)
}

/// Detect available video encoders
pub fn detect_encoders() -> Result<Vec<EncoderInfo>> {
    gst::init().context("Failed to initialize GStreamer")?;

    let mut encoders = Vec::new();

    // VA-API encoders (Intel/AMD) - priority 10
    if encoder_available("vaapih264enc") {
        encoders.push(EncoderInfo {
            name: "VA-API H.264".to_string(),
            gst_element: "vaapih264enc".to_string(),
            codec: Codec::H264,
            hardware: true,
            priority: 10,
        });
    }
    if encoder_available("vaapih265enc") {
        encoders.push(EncoderInfo {
            name: "VA-API H.265".to_string(),
            gst_element: "vaapih265enc".to_string(),
            codec: Codec::H265,
            hardware: true,
            priority: 11,
        });
    }
    if encoder_available("vaapivp9enc") {
        encoders.push(EncoderInfo {
            name: "VA-API VP9".to_string(),
            gst_element: "vaapivp9enc".to_string(),
            codec: Codec::VP9,
            hardware: true,
            priority: 12,
        });
    }

    // NVENC encoders (NVIDIA) - priority 20
    if encoder_available("nvh264enc") {
        encoders.push(EncoderInfo {
            name: "NVENC H.264".to_string(),
            gst_element: "nvh264enc".to_string(),
            codec: Codec::H264,
            hardware: true,
            priority: 20,
        });
    }
    if encoder_available("nvh265enc") {
        encoders.push(EncoderInfo {
            name: "NVENC H.265".to_string(),
            gst_element: "nvh265enc".to_string(),
            codec: Codec::H265,
            hardware: true,
            priority: 21,
        });
    }

    // Software fallbacks - priority 100+
    if encoder_available("x264enc") {
        encoders.push(EncoderInfo {
            name: "x264 H.264".to_string(),
            gst_element: "x264enc".to_string(),
            codec: Codec::H264,
            hardware: false,
            priority: 100,
        });
    }
    if encoder_available("vp9enc") {
        encoders.push(EncoderInfo {
            name: "VP9".to_string(),
            gst_element: "vp9enc".to_string(),
            codec: Codec::VP9,
            hardware: false,
            priority: 101,
        });
    }
    if encoder_available("av1enc") {
        encoders.push(EncoderInfo {
            name: "AV1".to_string(),
            gst_element: "av1enc".to_string(),
            codec: Codec::AV1,
            hardware: false,
            priority: 102,
        });
    }

    // Sort by priority (lower first)
    encoders.sort_by_key(|e| e.priority);

    Ok(encoders)
}

/// Check if a GStreamer encoder element is available
fn encoder_available(element_name: &str) -> bool {
    gst::ElementFactory::find(element_name).is_some()
}

/// Pick the best available encoder for the requested codec identifier
pub fn encoder_for_codec(identifier: &str) -> RecorderResult<EncoderInfo> {
    let codec = Codec::from_identifier(identifier).ok_or_else(|| {
        RecorderError::Configuration(format!("unsupported video codec '{identifier}'"))
    })?;

    let encoders = detect_encoders()
        .map_err(|e| RecorderError::Configuration(format!("encoder detection failed: {e:#}")))?;

    encoders
        .into_iter()
        .find(|e| e.codec == codec)
        .ok_or_else(|| {
            RecorderError::Configuration(format!(
                "no encoder available for {} (install GStreamer plugins)",
                codec.name()
            ))
        })
}
