//! Device collection: the merged, live view of active audio endpoints.
//!
//! Render and capture endpoints of one physical device report the same
//! container id. The collection keys its map by that id and merges the two
//! endpoints into a single [`SoundDevice`]. It is populated by
//! [`SoundDeviceCollection::reset_content`] and kept current by provider
//! notifications, which it turns into [`DeviceEventType`] events for its
//! observers.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::device::{AudioError, DeviceEventType, EndpointState, FlowType, SoundDevice};
use super::merge::{
    changed_volumes, contains_ignore_case, merge_device, unmerge_device, Unmerge,
    NO_PLUG_AND_PLAY_GUID,
};
use super::observer::{DeviceObserver, ObserverRegistry};
use super::provider::{
    EndpointNotificationSink, EndpointProvider, EnumerationScope, NotificationRegistration,
    RawEndpoint,
};

/// Collection settings fixed at creation.
#[derive(Debug, Clone)]
pub struct CollectionOptions {
    /// Case-insensitive substring a device name must contain; empty accepts all
    pub name_filter: String,

    pub scope: EnumerationScope,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            name_filter: String::new(),
            scope: EnumerationScope::RenderAndCapture,
        }
    }
}

#[derive(Default)]
struct CollectionState {
    /// Group id to merged device
    devices: BTreeMap<String, SoundDevice>,

    /// Raw endpoint id to its volume-change registration
    volume_registrations: HashMap<String, Box<dyn NotificationRegistration>>,
}

/// Merged view of the active audio endpoints.
pub struct SoundDeviceCollection {
    provider: Arc<dyn EndpointProvider>,
    options: CollectionOptions,

    /// Serializes reset and every notification handler.
    operation: Mutex<()>,

    /// Held only for short map reads and writes, never while notifying.
    state: Mutex<CollectionState>,

    observers: ObserverRegistry,
    endpoint_registration: Mutex<Option<Box<dyn NotificationRegistration>>>,
    self_ref: Weak<SoundDeviceCollection>,
}

impl SoundDeviceCollection {
    /// Create an empty collection and subscribe it to endpoint notifications.
    ///
    /// Call [`reset_content`](Self::reset_content) to populate it.
    pub fn new(
        provider: Arc<dyn EndpointProvider>,
        options: CollectionOptions,
    ) -> Result<Arc<Self>, AudioError> {
        let collection = Arc::new_cyclic(|self_ref| Self {
            provider,
            options,
            operation: Mutex::new(()),
            state: Mutex::new(CollectionState::default()),
            observers: ObserverRegistry::new(),
            endpoint_registration: Mutex::new(None),
            self_ref: self_ref.clone(),
        });

        let registration = collection
            .provider
            .register_endpoint_notifications(collection.sink())?;
        *collection.endpoint_registration.lock() = Some(registration);

        Ok(collection)
    }

    pub fn options(&self) -> &CollectionOptions {
        &self.options
    }

    fn sink(&self) -> Weak<dyn EndpointNotificationSink> {
        self.self_ref.clone()
    }

    /// Rebuild the map from a full enumeration.
    pub fn reset_content(&self) {
        let _operation = self.operation.lock();
        info!("Recreating audio device info list");

        let stale_registrations = {
            let mut state = self.state.lock();
            state.devices.clear();
            std::mem::take(&mut state.volume_registrations)
        };
        // Unregister before anything else can call back into the map.
        drop(stale_registrations);

        for endpoint in self.applicable_endpoints() {
            let device = endpoint.to_device();
            {
                let mut state = self.state.lock();
                let merged = merge_device(state.devices.get(&device.group_id), &device);
                state.devices.insert(device.group_id.clone(), merged);
            }
            self.register_volume(&endpoint.id);
            info!(
                endpoint_id = %endpoint.id,
                group_id = %device.group_id,
                "Endpoint processed"
            );
        }
    }

    /// Re-read the volume of every active endpoint without touching identity.
    pub fn refresh_volumes(&self) {
        let _operation = self.operation.lock();
        self.refresh_volumes_locked();
    }

    fn refresh_volumes_locked(&self) {
        debug!("Refreshing volumes of audio devices");
        for endpoint in self.applicable_endpoints() {
            let level = endpoint.volume_level();
            let mut state = self.state.lock();
            let Some(device) = state.devices.get_mut(&endpoint.group_id) else {
                continue;
            };
            match endpoint.flow {
                FlowType::Render if device.flow.has_render() => device.render_volume = level,
                FlowType::Capture if device.flow.has_capture() => device.capture_volume = level,
                _ => {}
            }
        }
    }

    /// Number of merged devices.
    pub fn size(&self) -> usize {
        self.state.lock().devices.len()
    }

    /// Detached copy of the device at `index` in group-id order.
    pub fn create_item(&self, index: usize) -> Result<SoundDevice, AudioError> {
        self.state
            .lock()
            .devices
            .values()
            .nth(index)
            .cloned()
            .ok_or_else(|| AudioError::DeviceNotFound {
                device_id: format!("#{index}"),
            })
    }

    /// Detached copy of the device with the given group id.
    pub fn create_item_by_id(&self, group_id: &str) -> Result<SoundDevice, AudioError> {
        self.state
            .lock()
            .devices
            .get(group_id)
            .cloned()
            .ok_or_else(|| AudioError::DeviceNotFound {
                device_id: group_id.to_string(),
            })
    }

    /// Detached copies of every device in group-id order.
    pub fn devices(&self) -> Vec<SoundDevice> {
        self.state.lock().devices.values().cloned().collect()
    }

    /// Merged device containing the OS default render endpoint.
    pub fn default_render_device(&self) -> Option<SoundDevice> {
        self.default_device(FlowType::Render)
    }

    /// Merged device containing the OS default capture endpoint.
    pub fn default_capture_device(&self) -> Option<SoundDevice> {
        self.default_device(FlowType::Capture)
    }

    fn default_device(&self, flow: FlowType) -> Option<SoundDevice> {
        let endpoint_id = self.provider.default_endpoint_id(flow)?;
        let group_id = self.group_id_of(&endpoint_id)?;
        self.create_item_by_id(&group_id).ok()
    }

    pub fn subscribe(&self, observer: Arc<dyn DeviceObserver>) {
        self.observers.subscribe(observer);
    }

    pub fn unsubscribe(&self, observer: &Arc<dyn DeviceObserver>) {
        self.observers.unsubscribe(observer);
    }

    /// Whether a volume registration is held for the raw endpoint id.
    pub fn is_volume_registered(&self, endpoint_id: &str) -> bool {
        self.state
            .lock()
            .volume_registrations
            .contains_key(endpoint_id)
    }

    /// Decide whether an endpoint's device takes part in the collection.
    pub fn is_applicable(&self, device: &SoundDevice) -> bool {
        if !matches!(device.flow, FlowType::Render | FlowType::Capture) {
            debug!(
                name = %device.name,
                flow = %device.flow,
                "Endpoint is neither render nor capture, ignoring"
            );
            return false;
        }

        if self.options.scope == EnumerationScope::RenderOnly && device.flow != FlowType::Render {
            debug!(
                name = %device.name,
                flow = %device.flow,
                "Render-only scope, ignoring endpoint"
            );
            return false;
        }

        if device.group_id.is_empty() || device.group_id.eq_ignore_ascii_case(NO_PLUG_AND_PLAY_GUID)
        {
            debug!(name = %device.name, "Endpoint has no unique plug-and-play id, ignoring");
            return false;
        }

        if !self.options.name_filter.is_empty()
            && !contains_ignore_case(&device.name, &self.options.name_filter)
        {
            debug!(
                name = %device.name,
                filter = %self.options.name_filter,
                "Endpoint name does not match the filter, ignoring"
            );
            return false;
        }

        debug!(
            name = %device.name,
            flow = %device.flow,
            group_id = %device.group_id,
            "Endpoint accepted"
        );
        true
    }

    /// Enumerate, read and filter; unreadable endpoints are skipped.
    fn applicable_endpoints(&self) -> Vec<RawEndpoint> {
        let ids = match self.provider.active_endpoint_ids(self.options.scope) {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Endpoint enumeration failed");
                return Vec::new();
            }
        };

        ids.iter()
            .enumerate()
            .filter_map(|(index, endpoint_id)| match self.provider.read_endpoint(endpoint_id) {
                Ok(endpoint) => Some(endpoint),
                Err(e) => {
                    warn!(index, endpoint_id = %endpoint_id, error = %e, "Skipping unreadable endpoint");
                    None
                }
            })
            .filter(|endpoint| self.is_applicable(&endpoint.to_device()))
            .collect()
    }

    fn register_volume(&self, endpoint_id: &str) {
        match self.provider.register_volume_notify(endpoint_id, self.sink()) {
            Ok(registration) => {
                let replaced = self
                    .state
                    .lock()
                    .volume_registrations
                    .insert(endpoint_id.to_string(), registration);
                drop(replaced);
            }
            Err(e) => {
                warn!(endpoint_id, error = %e, "Volume notifications unavailable for endpoint");
            }
        }
    }

    fn unregister_volume(&self, endpoint_id: &str) {
        let registration = self.state.lock().volume_registrations.remove(endpoint_id);
        drop(registration);
    }

    fn group_id_of(&self, endpoint_id: &str) -> Option<String> {
        match self.provider.read_endpoint(endpoint_id) {
            Ok(endpoint) => Some(endpoint.group_id),
            Err(e) => {
                debug!(endpoint_id, error = %e, "Cannot resolve endpoint to a group id");
                None
            }
        }
    }

    fn handle_device_added(&self, endpoint_id: &str) {
        let _operation = self.operation.lock();
        info!(endpoint_id, "Endpoint added");

        let endpoint = match self.provider.read_endpoint(endpoint_id) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!(endpoint_id, error = %e, "Added endpoint cannot be read");
                return;
            }
        };
        let device = endpoint.to_device();
        if !self.is_applicable(&device) {
            return;
        }

        let merged = {
            let mut state = self.state.lock();
            let merged = merge_device(state.devices.get(&device.group_id), &device);
            state.devices.insert(device.group_id.clone(), merged.clone());
            merged
        };
        info!(
            group_id = %merged.group_id,
            name = %merged.name,
            flow = %merged.flow,
            "Endpoint merged"
        );

        self.register_volume(endpoint_id);
        self.observers
            .notify(DeviceEventType::Discovered, &device.group_id);
    }

    fn handle_device_removed(&self, endpoint_id: &str) {
        let _operation = self.operation.lock();
        info!(endpoint_id, "Endpoint removed");

        let endpoint = match self.provider.read_endpoint(endpoint_id) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                info!(endpoint_id, error = %e, "Removed endpoint is already gone, dropping event");
                self.unregister_volume(endpoint_id);
                return;
            }
        };
        let device = endpoint.to_device();
        if !self.is_applicable(&device) {
            return;
        }

        let outcome = {
            let mut state = self.state.lock();
            let outcome = unmerge_device(state.devices.get(&device.group_id), &device);
            match &outcome {
                Unmerge::Delete => {
                    state.devices.remove(&device.group_id);
                }
                Unmerge::Remaining(rest) => {
                    state.devices.insert(rest.group_id.clone(), rest.clone());
                }
                Unmerge::Stale => {}
            }
            outcome
        };

        self.unregister_volume(endpoint_id);

        match outcome {
            Unmerge::Stale => {
                info!(
                    group_id = %device.group_id,
                    flow = %device.flow,
                    "Removed endpoint does not match the stored device"
                );
            }
            Unmerge::Delete => {
                info!(group_id = %device.group_id, "Device left the collection");
                self.observers
                    .notify(DeviceEventType::Detached, &device.group_id);
            }
            Unmerge::Remaining(rest) => {
                info!(
                    group_id = %rest.group_id,
                    name = %rest.name,
                    flow = %rest.flow,
                    "Device unmerged"
                );
                self.observers
                    .notify(DeviceEventType::Detached, &device.group_id);
            }
        }
    }

    fn handle_volume_notify(&self, endpoint_id: &str) {
        let _operation = self.operation.lock();
        debug!(endpoint_id, "Volume notification");

        let before = self.state.lock().devices.clone();
        self.refresh_volumes_locked();
        let after = self.state.lock().devices.clone();

        let (render, capture) = changed_volumes(&before, &after);
        for group_id in &render {
            self.observers
                .notify(DeviceEventType::VolumeRenderChanged, group_id);
        }
        for group_id in &capture {
            self.observers
                .notify(DeviceEventType::VolumeCaptureChanged, group_id);
        }
    }

    fn handle_default_device_changed(&self, flow: FlowType, endpoint_id: Option<&str>) {
        let event = match flow {
            FlowType::Render => DeviceEventType::DefaultRenderChanged,
            FlowType::Capture => DeviceEventType::DefaultCaptureChanged,
            FlowType::None | FlowType::RenderAndCapture => return,
        };

        let _operation = self.operation.lock();
        let group_id = endpoint_id
            .and_then(|id| self.group_id_of(id))
            .filter(|id| self.state.lock().devices.contains_key(id))
            .unwrap_or_default();
        info!(%event, group_id = %group_id, "Default endpoint changed");
        self.observers.notify(event, &group_id);
    }
}

impl EndpointNotificationSink for SoundDeviceCollection {
    fn on_device_added(&self, endpoint_id: &str) {
        self.handle_device_added(endpoint_id);
    }

    fn on_device_removed(&self, endpoint_id: &str) {
        self.handle_device_removed(endpoint_id);
    }

    fn on_device_state_changed(&self, endpoint_id: &str, state: EndpointState) {
        match state {
            EndpointState::Active => self.handle_device_added(endpoint_id),
            EndpointState::Disabled | EndpointState::NotPresent | EndpointState::Unplugged => {
                self.handle_device_removed(endpoint_id)
            }
        }
    }

    fn on_default_device_changed(&self, flow: FlowType, endpoint_id: Option<&str>) {
        self.handle_default_device_changed(flow, endpoint_id);
    }

    fn on_volume_notify(&self, endpoint_id: &str) {
        self.handle_volume_notify(endpoint_id);
    }
}

impl Drop for SoundDeviceCollection {
    fn drop(&mut self) {
        // Volume registrations go first, then the enumerator-level one.
        let registrations = std::mem::take(&mut self.state.get_mut().volume_registrations);
        drop(registrations);
        self.endpoint_registration.get_mut().take();
    }
}
