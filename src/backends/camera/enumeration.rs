// SPDX-License-Identifier: GPL-3.0-only

//! Capture device discovery through the GStreamer device monitor

use super::types::{CameraPosition, CaptureDevice, MediaKind};
use gstreamer as gst;
use gstreamer::prelude::*;
use tracing::{debug, warn};

/// Device properties that may carry the camera location
const LOCATION_PROPERTIES: [&str; 3] = [
    "api.libcamera.location",
    "device.location",
    "camera.location",
];

/// GStreamer device class for a media kind
pub fn device_class(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Video => "Video/Source",
        MediaKind::Audio => "Audio/Source",
    }
}

/// List capture devices of one kind
pub fn list_devices(kind: MediaKind) -> Vec<CaptureDevice> {
    enumerate(kind).into_iter().map(|(info, _)| info).collect()
}

/// Pick the device to open for `kind`.
///
/// Video prefers a device at `position` and falls back to the first one.
pub(crate) fn find_device(
    kind: MediaKind,
    position: CameraPosition,
) -> Option<(CaptureDevice, gst::Device)> {
    let mut devices = enumerate(kind);

    if kind == MediaKind::Video
        && let Some(index) = devices
            .iter()
            .position(|(info, _)| info.position == Some(position))
    {
        return Some(devices.swap_remove(index));
    }

    devices.into_iter().next()
}

fn enumerate(kind: MediaKind) -> Vec<(CaptureDevice, gst::Device)> {
    if let Err(e) = gst::init() {
        warn!(error = %e, "Failed to initialize GStreamer");
        return Vec::new();
    }

    let class = device_class(kind);
    let monitor = gst::DeviceMonitor::new();
    monitor.add_filter(Some(class), None);

    if let Err(e) = monitor.start() {
        warn!(class, error = %e, "Failed to start device monitor");
        return Vec::new();
    }

    let mut devices = Vec::new();
    for device in monitor.devices() {
        let device_class = device.device_class().to_string();
        if !device_class.contains(class) {
            continue;
        }

        let position = device.properties().and_then(|props| {
            LOCATION_PROPERTIES
                .iter()
                .find_map(|key| props.get::<String>(*key).ok())
                .and_then(|location| CameraPosition::from_location(&location))
        });

        let info = CaptureDevice {
            name: device.display_name().to_string(),
            kind,
            device_class,
            position,
        };

        debug!(name = %info.name, ?position, %kind, "Found capture device");
        devices.push((info, device));
    }

    monitor.stop();
    devices
}
