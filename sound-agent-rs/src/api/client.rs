//! Builds the audio-device REST requests and hands them to a dispatcher.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use super::processor::HttpRequestDispatcher;
use super::request::{RequestItem, RequestMethod};
use crate::audio::{DeviceEventType, FlowType, SoundDevice};
use crate::platform::HostIdentity;

/// Path appended to the configured server URL.
pub const AUDIO_DEVICES_PATH: &str = "/api/AudioDevices";

/// Body of `POST /api/AudioDevices`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePayload<'a> {
    pub pnp_id: &'a str,
    pub host_name: &'a str,
    pub name: &'a str,
    pub operation_system_name: &'a str,
    pub flow_type: u8,
    pub render_volume: u16,
    pub capture_volume: u16,
    pub update_date: String,
    pub device_message_type: u8,
}

/// Body of `PUT /api/AudioDevices/{pnpId}/{hostName}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeChangePayload {
    pub device_message_type: u8,
    pub volume: u16,
    pub update_date: String,
}

/// ISO-8601 UTC with microseconds and a trailing `Z`.
pub fn format_update_date(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Append the REST path to a server URL, dropping any trailing slash.
pub fn devices_endpoint(server_url: &str) -> String {
    format!("{}{}", server_url.trim_end_matches('/'), AUDIO_DEVICES_PATH)
}

pub struct AudioDeviceApiClient {
    dispatcher: Arc<dyn HttpRequestDispatcher>,
    host: HostIdentity,
}

impl AudioDeviceApiClient {
    pub fn new(dispatcher: Arc<dyn HttpRequestDispatcher>, host: HostIdentity) -> Self {
        Self { dispatcher, host }
    }

    pub fn host(&self) -> &HostIdentity {
        &self.host
    }

    /// Queue a POST describing the whole device.
    pub fn post_device(&self, event: DeviceEventType, device: &SoundDevice, hint_prefix: &str) {
        let now = Utc::now();
        let payload = DevicePayload {
            pnp_id: &device.group_id,
            host_name: &self.host.host_name,
            name: &device.name,
            operation_system_name: &self.host.os_name,
            flow_type: device.flow as u8,
            render_volume: device.render_volume,
            capture_volume: device.capture_volume,
            update_date: format_update_date(&now),
            device_message_type: event as u8,
        };
        let body = match serde_json::to_string(&payload) {
            Ok(body) => body,
            Err(e) => {
                error!(group_id = %device.group_id, error = %e, "Cannot serialize device payload");
                return;
            }
        };

        let hint = format!("{hint_prefix}Post a device. {}", device.group_id);
        info!(hint = %hint, "Enqueueing");
        let mut item = RequestItem::new(RequestMethod::Post, "", body, hint);
        item.time = now;
        self.dispatcher.enqueue_request(item);
    }

    /// Queue a PUT with the new volume of one direction.
    ///
    /// `flow` must be `Render` or `Capture`.
    pub fn put_volume_change(&self, group_id: &str, flow: FlowType, volume: u16, hint_prefix: &str) {
        let event = match flow {
            FlowType::Render => DeviceEventType::VolumeRenderChanged,
            FlowType::Capture => DeviceEventType::VolumeCaptureChanged,
            FlowType::None | FlowType::RenderAndCapture => {
                error!(group_id, %flow, "Volume change needs a single direction");
                return;
            }
        };

        let now = Utc::now();
        let payload = VolumeChangePayload {
            device_message_type: event as u8,
            volume,
            update_date: format_update_date(&now),
        };
        let body = match serde_json::to_string(&payload) {
            Ok(body) => body,
            Err(e) => {
                error!(group_id, error = %e, "Cannot serialize volume payload");
                return;
            }
        };

        let hint = format!("{hint_prefix}Volume change (PUT) for a device: {group_id}");
        info!(hint = %hint, "Enqueueing");
        let suffix = format!("/{group_id}/{}", self.host.host_name);
        let mut item = RequestItem::new(RequestMethod::Put, suffix, body, hint);
        item.time = now;
        self.dispatcher.enqueue_request(item);
    }
}
