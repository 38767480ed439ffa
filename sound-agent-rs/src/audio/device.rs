//! Audio device data models.
//!
//! Defines the merged device value, its flow direction, the events raised by
//! the collection, and the audio error taxonomy.

use std::fmt;

use thiserror::Error;

/// Separator used when the names of merged endpoints are joined.
pub const NAME_SEPARATOR: char = '/';

/// Upper bound of the integer volume scale.
pub const MAX_VOLUME_LEVEL: u16 = 1000;

/// Data flow direction of an endpoint or a merged device.
///
/// The discriminants are part of the HTTP wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum FlowType {
    #[default]
    None = 0,
    Render = 1,
    Capture = 2,
    RenderAndCapture = 3,
}

impl FlowType {
    /// True if the flow covers rendering (speakers, headphones).
    pub fn has_render(self) -> bool {
        matches!(self, FlowType::Render | FlowType::RenderAndCapture)
    }

    /// True if the flow covers capturing (microphones).
    pub fn has_capture(self) -> bool {
        matches!(self, FlowType::Capture | FlowType::RenderAndCapture)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FlowType::None => "None",
            FlowType::Render => "Render",
            FlowType::Capture => "Capture",
            FlowType::RenderAndCapture => "RenderAndCapture",
        }
    }
}

impl fmt::Display for FlowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events raised by the device collection to its observers.
///
/// The first five discriminants are part of the HTTP wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeviceEventType {
    /// Device reported by the startup walk over the collection
    Confirmed = 0,

    /// Endpoint arrived and was merged into the collection
    Discovered = 1,

    /// Endpoint left the collection
    Detached = 2,

    VolumeRenderChanged = 3,
    VolumeCaptureChanged = 4,

    /// OS default render endpoint changed
    DefaultRenderChanged = 5,

    /// OS default capture endpoint changed
    DefaultCaptureChanged = 6,
}

impl DeviceEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceEventType::Confirmed => "Confirmed",
            DeviceEventType::Discovered => "Discovered",
            DeviceEventType::Detached => "Detached",
            DeviceEventType::VolumeRenderChanged => "VolumeRenderChanged",
            DeviceEventType::VolumeCaptureChanged => "VolumeCaptureChanged",
            DeviceEventType::DefaultRenderChanged => "DefaultRenderChanged",
            DeviceEventType::DefaultCaptureChanged => "DefaultCaptureChanged",
        }
    }
}

impl fmt::Display for DeviceEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OS endpoint state carried by state-change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Endpoint is active and available for use
    Active,

    /// Endpoint is disabled in Windows Sound settings
    Disabled,

    /// Endpoint is not present (driver issue)
    NotPresent,

    /// Endpoint is unplugged (for pluggable devices)
    Unplugged,
}

/// One logical device, possibly merged from a render and a capture endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SoundDevice {
    /// Container id shared by every endpoint of the same physical device
    pub group_id: String,

    /// Display name, `/`-joined set of endpoint names when merged
    pub name: String,

    pub flow: FlowType,

    /// 0 to 1000, zero unless the flow includes Render
    pub render_volume: u16,

    /// 0 to 1000, zero unless the flow includes Capture
    pub capture_volume: u16,
}

impl SoundDevice {
    pub fn new(
        group_id: impl Into<String>,
        name: impl Into<String>,
        flow: FlowType,
        render_volume: u16,
        capture_volume: u16,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            name: name.into(),
            flow,
            render_volume,
            capture_volume,
        }
    }

    /// Build a single-direction device from one endpoint's volume reading.
    ///
    /// The level lands on the field matching `flow`; the other stays zero.
    pub fn from_endpoint(
        group_id: impl Into<String>,
        name: impl Into<String>,
        flow: FlowType,
        level: u16,
    ) -> Self {
        let (render_volume, capture_volume) = match flow {
            FlowType::Render => (level, 0),
            FlowType::Capture => (0, level),
            FlowType::None | FlowType::RenderAndCapture => (0, 0),
        };
        Self::new(group_id, name, flow, render_volume, capture_volume)
    }

    /// Volume of the given single direction.
    pub fn volume_for(&self, flow: FlowType) -> u16 {
        match flow {
            FlowType::Render => self.render_volume,
            FlowType::Capture => self.capture_volume,
            FlowType::None | FlowType::RenderAndCapture => 0,
        }
    }
}

impl fmt::Display for SoundDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, \"{}\", {}, Volume {} / {}",
            self.group_id, self.name, self.flow, self.render_volume, self.capture_volume
        )
    }
}

/// Audio service error types.
#[derive(Debug, Clone, Error)]
pub enum AudioError {
    #[error("Device not found: {device_id}")]
    DeviceNotFound { device_id: String },

    #[error("Endpoint not found: {endpoint_id}")]
    EndpointNotFound { endpoint_id: String },

    #[error("Endpoint provider call failed: {0}")]
    Provider(String),

    #[cfg(windows)]
    #[error("COM initialization failed: {0}")]
    ComInitFailed(#[source] windows::core::Error),

    #[cfg(windows)]
    #[error("Failed to enumerate devices: {0}")]
    EnumerationFailed(#[source] windows::core::Error),

    #[error("Volume control not available for endpoint")]
    VolumeNotAvailable,

    #[cfg(windows)]
    #[error("Windows API error: {0}")]
    WindowsError(#[source] windows::core::Error),

    #[error("String conversion error: {0}")]
    StringConversion(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_endpoint_places_level_on_own_direction() {
        let render = SoundDevice::from_endpoint("G1", "Speakers", FlowType::Render, 800);
        assert_eq!(render.render_volume, 800);
        assert_eq!(render.capture_volume, 0);

        let capture = SoundDevice::from_endpoint("G1", "Microphone", FlowType::Capture, 500);
        assert_eq!(capture.render_volume, 0);
        assert_eq!(capture.capture_volume, 500);
    }

    #[test]
    fn test_flow_direction_queries() {
        assert!(FlowType::RenderAndCapture.has_render());
        assert!(FlowType::RenderAndCapture.has_capture());
        assert!(!FlowType::Capture.has_render());
        assert!(!FlowType::None.has_capture());
    }

    #[test]
    fn test_wire_discriminants() {
        assert_eq!(FlowType::RenderAndCapture as u8, 3);
        assert_eq!(DeviceEventType::Confirmed as u8, 0);
        assert_eq!(DeviceEventType::VolumeCaptureChanged as u8, 4);
    }
}
