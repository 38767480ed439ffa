//! Endpoint provider boundary.
//!
//! The collection never talks to the OS directly. It consumes an
//! [`EndpointProvider`] that enumerates endpoints, reads their properties and
//! delivers notifications to an [`EndpointNotificationSink`]. Registrations are
//! RAII handles: dropping one unregisters the callback.

use std::fmt;
use std::sync::Weak;

use tracing::warn;

use super::device::{AudioError, EndpointState, FlowType, SoundDevice, MAX_VOLUME_LEVEL};

/// Which endpoints an enumeration covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumerationScope {
    RenderOnly,
    RenderAndCapture,
}

/// Snapshot of one OS audio endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEndpoint {
    /// Opaque OS endpoint id
    pub id: String,

    /// Container id without braces, shared by endpoints of one physical device
    pub group_id: String,

    pub name: String,

    /// Render or Capture; a single endpoint never reports both
    pub flow: FlowType,

    pub muted: bool,

    /// Master volume scalar (0.0 to 1.0)
    pub volume_scalar: f32,
}

impl RawEndpoint {
    /// Volume on the 0..=1000 scale; a muted endpoint reports zero.
    pub fn volume_level(&self) -> u16 {
        if self.muted {
            0
        } else {
            scalar_to_level(self.volume_scalar)
        }
    }

    /// Single-direction device model for this endpoint.
    pub fn to_device(&self) -> SoundDevice {
        SoundDevice::from_endpoint(
            self.group_id.clone(),
            self.name.clone(),
            self.flow,
            self.volume_level(),
        )
    }
}

/// Convert a master volume scalar to the integer 0..=1000 scale.
pub fn scalar_to_level(scalar: f32) -> u16 {
    let clamped = scalar.clamp(0.0, 1.0);
    ((clamped * f32::from(MAX_VOLUME_LEVEL)).round() as u16).min(MAX_VOLUME_LEVEL)
}

/// Collect the ids of `count` enumerated endpoints.
///
/// An endpoint whose id cannot be read is logged and skipped; the rest of the
/// enumeration still counts.
pub fn collect_endpoint_ids<E, F>(count: u32, mut id_at: F) -> Vec<String>
where
    E: fmt::Display,
    F: FnMut(u32) -> Result<String, E>,
{
    let mut ids = Vec::with_capacity(count as usize);
    for index in 0..count {
        match id_at(index) {
            Ok(id) => ids.push(id),
            Err(e) => warn!(index, error = %e, "Cannot get endpoint id, skipping"),
        }
    }
    ids
}

/// Callbacks from the endpoint provider into the collection.
///
/// Called on provider threads.
pub trait EndpointNotificationSink: Send + Sync {
    fn on_device_added(&self, endpoint_id: &str);

    fn on_device_removed(&self, endpoint_id: &str);

    fn on_device_state_changed(&self, endpoint_id: &str, state: EndpointState);

    /// `endpoint_id` is `None` when no default endpoint remains.
    fn on_default_device_changed(&self, flow: FlowType, endpoint_id: Option<&str>);

    /// Volume or mute state of a registered endpoint changed.
    fn on_volume_notify(&self, endpoint_id: &str);
}

/// Handle for a registered callback. Dropping it unregisters.
pub trait NotificationRegistration: Send {}

/// Source of audio endpoints and their notifications.
pub trait EndpointProvider: Send + Sync {
    /// Ids of all active endpoints within `scope`, in OS enumeration order.
    fn active_endpoint_ids(&self, scope: EnumerationScope) -> Result<Vec<String>, AudioError>;

    /// Read a full snapshot of one endpoint.
    fn read_endpoint(&self, endpoint_id: &str) -> Result<RawEndpoint, AudioError>;

    /// Id of the OS default endpoint for a single direction.
    fn default_endpoint_id(&self, flow: FlowType) -> Option<String>;

    /// Subscribe to endpoint arrival, removal, state and default changes.
    fn register_endpoint_notifications(
        &self,
        sink: Weak<dyn EndpointNotificationSink>,
    ) -> Result<Box<dyn NotificationRegistration>, AudioError>;

    /// Subscribe to volume and mute changes of one endpoint.
    fn register_volume_notify(
        &self,
        endpoint_id: &str,
        sink: Weak<dyn EndpointNotificationSink>,
    ) -> Result<Box<dyn NotificationRegistration>, AudioError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(flow: FlowType, muted: bool, scalar: f32) -> RawEndpoint {
        RawEndpoint {
            id: "{0.0.0.00000000}.{abc}".to_string(),
            group_id: "G1".to_string(),
            name: "Speakers".to_string(),
            flow,
            muted,
            volume_scalar: scalar,
        }
    }

    #[test]
    fn test_scalar_to_level_rounds_and_clamps() {
        assert_eq!(scalar_to_level(0.8), 800);
        assert_eq!(scalar_to_level(0.1234), 123);
        assert_eq!(scalar_to_level(0.9996), 1000);
        assert_eq!(scalar_to_level(1.7), 1000);
        assert_eq!(scalar_to_level(-0.2), 0);
    }

    #[test]
    fn test_muted_endpoint_reports_zero() {
        assert_eq!(endpoint(FlowType::Render, true, 0.8).volume_level(), 0);
        assert_eq!(endpoint(FlowType::Render, false, 0.8).volume_level(), 800);
    }

    #[test]
    fn test_collect_endpoint_ids_skips_failures() {
        let ids = collect_endpoint_ids(5, |index| {
            if index == 2 {
                Err(AudioError::Provider("Item failed".to_string()))
            } else {
                Ok(format!("endpoint-{index}"))
            }
        });
        assert_eq!(ids, vec!["endpoint-0", "endpoint-1", "endpoint-3", "endpoint-4"]);
    }

    #[test]
    fn test_to_device_uses_own_direction() {
        let device = endpoint(FlowType::Capture, false, 0.5).to_device();
        assert_eq!(device.flow, FlowType::Capture);
        assert_eq!(device.capture_volume, 500);
        assert_eq!(device.render_volume, 0);
    }
}
