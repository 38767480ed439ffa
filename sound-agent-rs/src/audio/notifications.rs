//! COM notification clients.
//!
//! `EndpointNotificationClient` implements IMMNotificationClient and
//! `VolumeNotificationClient` implements IAudioEndpointVolumeCallback. Both
//! forward into a weak [`EndpointNotificationSink`] so a dropped collection is
//! never called back. Registrations unregister on drop.

use std::sync::Weak;

use tracing::debug;
use windows::core::{implement, PCWSTR};
use windows::Win32::Media::Audio::Endpoints::{
    IAudioEndpointVolume, IAudioEndpointVolumeCallback, IAudioEndpointVolumeCallback_Impl,
};
use windows::Win32::Media::Audio::{
    eCapture, eConsole, eRender, EDataFlow, ERole, IMMDeviceEnumerator, IMMNotificationClient,
    IMMNotificationClient_Impl, AUDIO_VOLUME_NOTIFICATION_DATA, DEVICE_STATE,
};
use windows::Win32::UI::Shell::PropertiesSystem::PROPERTYKEY;
// Re-export windows_core so the implement macro can find it
#[allow(unused_imports)]
use windows_core;

use super::device::{EndpointState, FlowType};
use super::provider::{EndpointNotificationSink, NotificationRegistration};

/// Forwards endpoint arrival, removal, state and default changes.
#[implement(IMMNotificationClient)]
pub struct EndpointNotificationClient {
    sink: Weak<dyn EndpointNotificationSink>,
}

impl EndpointNotificationClient {
    pub fn new(sink: Weak<dyn EndpointNotificationSink>) -> Self {
        Self { sink }
    }

    /// Register with the enumerator. The returned handle unregisters on drop.
    pub fn register(
        self,
        enumerator: &IMMDeviceEnumerator,
    ) -> Result<EndpointRegistration, windows::core::Error> {
        unsafe {
            let client: IMMNotificationClient = self.into();
            enumerator.RegisterEndpointNotificationCallback(&client)?;
            Ok(EndpointRegistration {
                enumerator: enumerator.clone(),
                client,
            })
        }
    }

    fn convert_state(state: DEVICE_STATE) -> EndpointState {
        match state.0 {
            1 => EndpointState::Active,
            2 => EndpointState::Disabled,
            8 => EndpointState::Unplugged,
            _ => EndpointState::NotPresent,
        }
    }

    fn convert_flow(flow: EDataFlow) -> FlowType {
        if flow == eRender {
            FlowType::Render
        } else if flow == eCapture {
            FlowType::Capture
        } else {
            FlowType::None
        }
    }
}

fn pcwstr_to_string(value: &PCWSTR) -> Option<String> {
    if value.is_null() {
        return None;
    }
    unsafe { value.to_string().ok() }
}

impl IMMNotificationClient_Impl for EndpointNotificationClient_Impl {
    fn OnDeviceStateChanged(
        &self,
        pwstrdeviceid: &PCWSTR,
        dwnewstate: DEVICE_STATE,
    ) -> windows::core::Result<()> {
        if let (Some(id), Some(sink)) = (pcwstr_to_string(pwstrdeviceid), self.sink.upgrade()) {
            sink.on_device_state_changed(&id, EndpointNotificationClient::convert_state(dwnewstate));
        }
        Ok(())
    }

    fn OnDeviceAdded(&self, pwstrdeviceid: &PCWSTR) -> windows::core::Result<()> {
        if let (Some(id), Some(sink)) = (pcwstr_to_string(pwstrdeviceid), self.sink.upgrade()) {
            sink.on_device_added(&id);
        }
        Ok(())
    }

    fn OnDeviceRemoved(&self, pwstrdeviceid: &PCWSTR) -> windows::core::Result<()> {
        if let (Some(id), Some(sink)) = (pcwstr_to_string(pwstrdeviceid), self.sink.upgrade()) {
            sink.on_device_removed(&id);
        }
        Ok(())
    }

    fn OnDefaultDeviceChanged(
        &self,
        flow: EDataFlow,
        role: ERole,
        pwstrdefaultdeviceid: &PCWSTR,
    ) -> windows::core::Result<()> {
        // Each change fires once per role; console alone is enough.
        if role != eConsole {
            return Ok(());
        }

        if let Some(sink) = self.sink.upgrade() {
            let id = pcwstr_to_string(pwstrdefaultdeviceid);
            sink.on_default_device_changed(
                EndpointNotificationClient::convert_flow(flow),
                id.as_deref(),
            );
        }
        Ok(())
    }

    fn OnPropertyValueChanged(
        &self,
        _pwstrdeviceid: &PCWSTR,
        _key: &PROPERTYKEY,
    ) -> windows::core::Result<()> {
        Ok(())
    }
}

/// Live IMMNotificationClient registration.
pub struct EndpointRegistration {
    enumerator: IMMDeviceEnumerator,
    client: IMMNotificationClient,
}

// The enumerator is created in the multithreaded apartment.
unsafe impl Send for EndpointRegistration {}

impl NotificationRegistration for EndpointRegistration {}

impl Drop for EndpointRegistration {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self
                .enumerator
                .UnregisterEndpointNotificationCallback(&self.client)
            {
                debug!(error = %e, "Endpoint notification unregistration failed");
            }
        }
    }
}

/// Forwards volume and mute changes of a single endpoint.
#[implement(IAudioEndpointVolumeCallback)]
pub struct VolumeNotificationClient {
    endpoint_id: String,
    sink: Weak<dyn EndpointNotificationSink>,
}

impl VolumeNotificationClient {
    pub fn new(endpoint_id: String, sink: Weak<dyn EndpointNotificationSink>) -> Self {
        Self { endpoint_id, sink }
    }

    pub fn register(
        self,
        endpoint_volume: IAudioEndpointVolume,
    ) -> Result<VolumeRegistration, windows::core::Error> {
        unsafe {
            let callback: IAudioEndpointVolumeCallback = self.into();
            endpoint_volume.RegisterControlChangeNotify(&callback)?;
            Ok(VolumeRegistration {
                endpoint_volume,
                callback,
            })
        }
    }
}

impl IAudioEndpointVolumeCallback_Impl for VolumeNotificationClient_Impl {
    fn OnNotify(&self, _pnotify: *mut AUDIO_VOLUME_NOTIFICATION_DATA) -> windows::core::Result<()> {
        if let Some(sink) = self.sink.upgrade() {
            sink.on_volume_notify(&self.endpoint_id);
        }
        Ok(())
    }
}

/// Live IAudioEndpointVolumeCallback registration.
pub struct VolumeRegistration {
    endpoint_volume: IAudioEndpointVolume,
    callback: IAudioEndpointVolumeCallback,
}

// Activated in the multithreaded apartment.
unsafe impl Send for VolumeRegistration {}

impl NotificationRegistration for VolumeRegistration {}

impl Drop for VolumeRegistration {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self
                .endpoint_volume
                .UnregisterControlChangeNotify(&self.callback)
            {
                debug!(error = %e, "Volume notification unregistration failed");
            }
        }
    }
}
