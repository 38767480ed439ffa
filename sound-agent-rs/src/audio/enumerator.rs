//! Endpoint enumeration using the Windows MMDevice API.
//!
//! Provides COM initialization and the Core Audio [`EndpointProvider`].

use std::sync::Weak;

use windows::core::{Interface, PCWSTR, PWSTR};
use windows::Win32::Devices::Properties::{DEVPKEY_Device_ContainerId, DEVPKEY_Device_FriendlyName};
use windows::Win32::Media::Audio::{
    eAll, eCapture, eConsole, eRender, EDataFlow, IMMDevice, IMMDeviceEnumerator, IMMEndpoint,
    MMDeviceEnumerator, DEVICE_STATE_ACTIVE,
};
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoTaskMemFree, CoUninitialize, CLSCTX_ALL,
    COINIT_MULTITHREADED, STGM,
};
use windows::Win32::UI::Shell::PropertiesSystem::{IPropertyStore, PROPERTYKEY};

use super::device::{AudioError, FlowType};
use super::notifications::{EndpointNotificationClient, VolumeNotificationClient};
use super::provider::{
    collect_endpoint_ids, EndpointNotificationSink, EndpointProvider, EnumerationScope,
    NotificationRegistration, RawEndpoint,
};
use super::volume::VolumeController;

/// Name reported when an endpoint has no friendly name.
const UNKNOWN_DEVICE_NAME: &str = "UnknownDeviceName";

/// COM initialization guard that uninitializes COM on drop.
pub struct ComGuard {
    initialized: bool,
}

impl ComGuard {
    /// Join the multithreaded apartment on the current thread.
    pub fn new() -> Result<Self, AudioError> {
        unsafe {
            // Notifications arrive on arbitrary threads; MTA lets them share the enumerator.
            CoInitializeEx(None, COINIT_MULTITHREADED)
                .ok()
                .map_err(AudioError::ComInitFailed)?;
        }
        Ok(Self { initialized: true })
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        if self.initialized {
            unsafe {
                CoUninitialize();
            }
        }
    }
}

/// Core Audio endpoint provider.
pub struct WindowsEndpointProvider {
    enumerator: IMMDeviceEnumerator,
}

// Created after joining the MTA; MMDevice interfaces are free-threaded there.
unsafe impl Send for WindowsEndpointProvider {}
unsafe impl Sync for WindowsEndpointProvider {}

impl WindowsEndpointProvider {
    /// Create the provider.
    ///
    /// Note: COM must be initialized on the calling thread, see [`ComGuard`].
    pub fn new() -> Result<Self, AudioError> {
        unsafe {
            let enumerator: IMMDeviceEnumerator =
                CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                    .map_err(AudioError::EnumerationFailed)?;

            Ok(Self { enumerator })
        }
    }

    fn get_device(&self, endpoint_id: &str) -> Result<IMMDevice, AudioError> {
        let wide: Vec<u16> = endpoint_id.encode_utf16().chain(std::iter::once(0)).collect();
        unsafe {
            self.enumerator
                .GetDevice(PCWSTR::from_raw(wide.as_ptr()))
                .map_err(|_| AudioError::EndpointNotFound {
                    endpoint_id: endpoint_id.to_string(),
                })
        }
    }

    fn device_id(device: &IMMDevice) -> Result<String, AudioError> {
        unsafe {
            let id: PWSTR = device.GetId().map_err(AudioError::WindowsError)?;
            let converted = id
                .to_string()
                .map_err(|e| AudioError::StringConversion(e.to_string()));
            CoTaskMemFree(Some(id.0 as *const _));
            converted
        }
    }

    fn data_flow(device: &IMMDevice) -> Result<FlowType, AudioError> {
        unsafe {
            let endpoint: IMMEndpoint = device.cast().map_err(AudioError::WindowsError)?;
            let flow = endpoint.GetDataFlow().map_err(AudioError::WindowsError)?;
            Ok(if flow == eRender {
                FlowType::Render
            } else if flow == eCapture {
                FlowType::Capture
            } else {
                FlowType::None
            })
        }
    }

    /// Read a string property; empty or missing values yield `None`.
    fn get_property(props: &IPropertyStore, key: PROPERTYKEY) -> Option<String> {
        unsafe {
            let prop = props.GetValue(&key).ok()?;
            let s = prop.to_string();
            if s.is_empty() {
                None
            } else {
                Some(s)
            }
        }
    }

    fn to_flow(flow: FlowType) -> Option<EDataFlow> {
        match flow {
            FlowType::Render => Some(eRender),
            FlowType::Capture => Some(eCapture),
            FlowType::None | FlowType::RenderAndCapture => None,
        }
    }
}

/// Strip the braces Windows puts around GUID strings.
pub fn normalize_container_id(raw: &str) -> String {
    raw.trim().trim_start_matches('{').trim_end_matches('}').to_string()
}

impl EndpointProvider for WindowsEndpointProvider {
    fn active_endpoint_ids(&self, scope: EnumerationScope) -> Result<Vec<String>, AudioError> {
        let flow = match scope {
            EnumerationScope::RenderOnly => eRender,
            EnumerationScope::RenderAndCapture => eAll,
        };

        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(flow, DEVICE_STATE_ACTIVE)
                .map_err(AudioError::EnumerationFailed)?;

            let count = collection
                .GetCount()
                .map_err(AudioError::EnumerationFailed)?;

            Ok(collect_endpoint_ids(count, |index| {
                let device = collection.Item(index).map_err(AudioError::EnumerationFailed)?;
                Self::device_id(&device)
            }))
        }
    }

    fn read_endpoint(&self, endpoint_id: &str) -> Result<RawEndpoint, AudioError> {
        let device = self.get_device(endpoint_id)?;

        let props: IPropertyStore = unsafe {
            device
                .OpenPropertyStore(STGM(0)) // STGM_READ = 0
                .map_err(AudioError::WindowsError)?
        };

        // Convert DEVPROPKEY to PROPERTYKEY
        let name_key = PROPERTYKEY {
            fmtid: DEVPKEY_Device_FriendlyName.fmtid,
            pid: DEVPKEY_Device_FriendlyName.pid,
        };
        let container_key = PROPERTYKEY {
            fmtid: DEVPKEY_Device_ContainerId.fmtid,
            pid: DEVPKEY_Device_ContainerId.pid,
        };

        let name = Self::get_property(&props, name_key)
            .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string());
        let group_id = Self::get_property(&props, container_key)
            .map(|id| normalize_container_id(&id))
            .unwrap_or_default();
        let flow = Self::data_flow(&device)?;

        let volume = VolumeController::new(&device)?;
        let muted = volume.get_mute()?;
        let volume_scalar = volume.get_volume()?;

        Ok(RawEndpoint {
            id: endpoint_id.to_string(),
            group_id,
            name,
            flow,
            muted,
            volume_scalar,
        })
    }

    fn default_endpoint_id(&self, flow: FlowType) -> Option<String> {
        let flow = Self::to_flow(flow)?;
        unsafe {
            let device = self.enumerator.GetDefaultAudioEndpoint(flow, eConsole).ok()?;
            Self::device_id(&device).ok()
        }
    }

    fn register_endpoint_notifications(
        &self,
        sink: Weak<dyn EndpointNotificationSink>,
    ) -> Result<Box<dyn NotificationRegistration>, AudioError> {
        let registration = EndpointNotificationClient::new(sink)
            .register(&self.enumerator)
            .map_err(AudioError::WindowsError)?;
        Ok(Box::new(registration))
    }

    fn register_volume_notify(
        &self,
        endpoint_id: &str,
        sink: Weak<dyn EndpointNotificationSink>,
    ) -> Result<Box<dyn NotificationRegistration>, AudioError> {
        let device = self.get_device(endpoint_id)?;
        let volume = VolumeController::new(&device)?;
        let registration = VolumeNotificationClient::new(endpoint_id.to_string(), sink)
            .register(volume.into_raw())
            .map_err(AudioError::WindowsError)?;
        Ok(Box::new(registration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_container_id() {
        assert_eq!(
            normalize_container_id("{1A2B3C4D-0000-1111-2222-333344445555}"),
            "1A2B3C4D-0000-1111-2222-333344445555"
        );
        assert_eq!(normalize_container_id("plain"), "plain");
    }
}
