//! Device directory: read-only queries for audio inputs and displays
//!
//! Consumed once at configure time to resolve the requested device ids, and
//! by the `list-audio-devices` / `list-displays` CLI commands. Pure queries,
//! no side effects on any recording lifecycle.

use anyhow::{Context, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use serde::Serialize;

use crate::error::{RecorderError, RecorderResult};

/// One entry in a device or display listing
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
}

/// List available audio input devices
pub fn list_audio_devices() -> Result<Vec<DeviceInfo>> {
    let devices = probe_audio_sources()?;
    Ok(devices
        .iter()
        .enumerate()
        .map(|(index, device)| DeviceInfo {
            id: device_id(device, index),
            name: device.display_name().to_string(),
        })
        .collect())
}

/// List available displays
///
/// The session display is always first (aliased as "main"); any additional
/// screens it exposes follow by index.
pub fn list_displays() -> Result<Vec<DeviceInfo>> {
    let mut entries = vec![DeviceInfo {
        id: "main".to_string(),
        name: session_display(),
    }];
    for screen in 0..MAX_SCREENS {
        let id = screen.to_string();
        let name = resolve_display(&id)?;
        if probe_display(&name).is_ok() {
            entries.push(DeviceInfo { id, name });
        }
    }
    Ok(entries)
}

/// Highest screen index probed when listing displays
const MAX_SCREENS: u32 = 8;

/// Resolve a display identifier to the display name the capture source opens
///
/// `"main"` is a sentinel for the primary display; a numeric id selects a
/// screen of the session display.
pub fn resolve_display(id: &str) -> RecorderResult<String> {
    let base = session_display();
    if id == "main" {
        return Ok(base);
    }
    let screen: u32 = id
        .parse()
        .map_err(|_| RecorderError::Configuration(format!("unknown display id '{id}'")))?;
    // Screens address as <display>.<n>; strip any existing screen suffix first
    let root = match base.rfind('.') {
        Some(pos) if base[pos + 1..].chars().all(|c| c.is_ascii_digit()) => &base[..pos],
        _ => base.as_str(),
    };
    Ok(format!("{root}.{screen}"))
}

/// Verify that a display name can actually be opened for capture
///
/// `ximagesrc` only opens the display once it starts, so an out-of-range
/// screen index would otherwise surface after the whole recording topology
/// is built. Probing with a short-lived source element keeps it a
/// configuration-time failure.
pub fn probe_display(display_name: &str) -> RecorderResult<()> {
    gst::init()
        .map_err(|e| RecorderError::Configuration(format!("GStreamer init failed: {e}")))?;

    let src = gst::ElementFactory::make("ximagesrc")
        .property("display-name", display_name)
        .build()
        .map_err(|_| {
            RecorderError::Configuration("screen capture element 'ximagesrc' not available".into())
        })?;

    let opened = src.set_state(gst::State::Paused);
    let _ = src.set_state(gst::State::Null);
    opened.map_err(|_| {
        RecorderError::Configuration(format!("display '{display_name}' cannot be opened"))
    })?;
    Ok(())
}

/// Find an audio input device by id (or display name)
///
/// A device that is not present is a configuration error, reported before
/// any capture starts.
pub fn find_audio_device(id: &str) -> RecorderResult<gst::Device> {
    let devices = probe_audio_sources()
        .map_err(|e| RecorderError::Configuration(format!("audio device probe failed: {e:#}")))?;
    devices
        .iter()
        .enumerate()
        .find(|(index, device)| {
            device_id(device, *index) == id || device.display_name() == id
        })
        .map(|(_, device)| device.clone())
        .ok_or_else(|| RecorderError::Configuration(format!("audio device '{id}' not found")))
}

fn probe_audio_sources() -> Result<Vec<gst::Device>> {
    gst::init().context("Failed to initialize GStreamer")?;

    let monitor = gst::DeviceMonitor::new();
    monitor.add_filter(Some("Audio/Source"), None);
    monitor.start().context("Failed to start device monitor")?;
    let devices: Vec<gst::Device> = monitor.devices().into_iter().collect();
    monitor.stop();
    Ok(devices)
}

/// Stable identifier for a device, preferring the platform node name
fn device_id(device: &gst::Device, index: usize) -> String {
    if let Some(props) = device.properties() {
        for key in ["node.name", "device.id", "device.bus-path"] {
            if let Ok(value) = props.get::<String>(key) {
                return value;
            }
        }
    }
    index.to_string()
}

fn session_display() -> String {
    std::env::var("DISPLAY").unwrap_or_else(|_| ":0".to_string())
}
