//! In-memory endpoint provider.
//!
//! Holds a scripted set of endpoints and lets callers fire the same
//! notifications the OS would. Used by the test suites and by the FFI layer
//! on platforms without Core Audio.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::device::{AudioError, EndpointState, FlowType};
use super::provider::{
    EndpointNotificationSink, EndpointProvider, EnumerationScope, NotificationRegistration,
    RawEndpoint,
};

struct MockEndpoint {
    endpoint: RawEndpoint,
    active: bool,
}

#[derive(Default)]
struct MockState {
    /// Insertion order doubles as enumeration order
    endpoints: Vec<MockEndpoint>,
    endpoint_sinks: HashMap<u64, Weak<dyn EndpointNotificationSink>>,
    volume_sinks: HashMap<u64, (String, Weak<dyn EndpointNotificationSink>)>,
    defaults: HashMap<u8, String>,
    failing: HashSet<String>,
    next_registration: u64,
}

impl MockState {
    fn find_mut(&mut self, endpoint_id: &str) -> Option<&mut MockEndpoint> {
        self.endpoints
            .iter_mut()
            .find(|e| e.endpoint.id == endpoint_id)
    }

    fn next_id(&mut self) -> u64 {
        self.next_registration += 1;
        self.next_registration
    }
}

#[derive(Clone, Copy)]
enum RegistrationKind {
    Endpoint,
    Volume,
}

struct MockRegistration {
    state: Weak<Mutex<MockState>>,
    kind: RegistrationKind,
    id: u64,
}

impl NotificationRegistration for MockRegistration {}

impl Drop for MockRegistration {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            let mut state = state.lock();
            match self.kind {
                RegistrationKind::Endpoint => {
                    state.endpoint_sinks.remove(&self.id);
                }
                RegistrationKind::Volume => {
                    state.volume_sinks.remove(&self.id);
                }
            }
        }
    }
}

/// Scripted [`EndpointProvider`].
#[derive(Default)]
pub struct MockEndpointProvider {
    state: Arc<Mutex<MockState>>,
}

impl MockEndpointProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an active endpoint, or replace the one with the same id, silently.
    pub fn add_endpoint(&self, endpoint: RawEndpoint) {
        let mut state = self.state.lock();
        match state.find_mut(&endpoint.id) {
            Some(existing) => {
                existing.endpoint = endpoint;
                existing.active = true;
            }
            None => state.endpoints.push(MockEndpoint {
                endpoint,
                active: true,
            }),
        }
    }

    /// Add an endpoint and announce it.
    pub fn plug(&self, endpoint: RawEndpoint) {
        let id = endpoint.id.clone();
        self.add_endpoint(endpoint);
        self.fire_added(&id);
    }

    /// Deactivate an endpoint and announce the removal.
    ///
    /// Its properties stay readable, as with a real unplugged endpoint.
    pub fn unplug(&self, endpoint_id: &str) {
        if let Some(entry) = self.state.lock().find_mut(endpoint_id) {
            entry.active = false;
        }
        self.fire_removed(endpoint_id);
    }

    /// Drop an endpoint entirely so later reads fail.
    pub fn forget(&self, endpoint_id: &str) {
        self.state
            .lock()
            .endpoints
            .retain(|e| e.endpoint.id != endpoint_id);
    }

    /// Change volume and mute, then notify the endpoint's volume subscribers.
    pub fn set_volume(&self, endpoint_id: &str, scalar: f32, muted: bool) {
        if let Some(entry) = self.state.lock().find_mut(endpoint_id) {
            entry.endpoint.volume_scalar = scalar;
            entry.endpoint.muted = muted;
        }
        for sink in self.volume_sinks_for(endpoint_id) {
            sink.on_volume_notify(endpoint_id);
        }
    }

    /// Make the OS default for `flow` point at `endpoint_id` and announce it.
    pub fn set_default(&self, flow: FlowType, endpoint_id: Option<&str>) {
        {
            let mut state = self.state.lock();
            match endpoint_id {
                Some(id) => state.defaults.insert(flow as u8, id.to_string()),
                None => state.defaults.remove(&(flow as u8)),
            };
        }
        for sink in self.endpoint_sinks() {
            sink.on_default_device_changed(flow, endpoint_id);
        }
    }

    /// Make every read of `endpoint_id` fail.
    pub fn fail_reads(&self, endpoint_id: &str) {
        self.state.lock().failing.insert(endpoint_id.to_string());
    }

    pub fn fire_added(&self, endpoint_id: &str) {
        for sink in self.endpoint_sinks() {
            sink.on_device_added(endpoint_id);
        }
    }

    pub fn fire_removed(&self, endpoint_id: &str) {
        for sink in self.endpoint_sinks() {
            sink.on_device_removed(endpoint_id);
        }
    }

    pub fn fire_state_changed(&self, endpoint_id: &str, new_state: EndpointState) {
        if let Some(entry) = self.state.lock().find_mut(endpoint_id) {
            entry.active = new_state == EndpointState::Active;
        }
        for sink in self.endpoint_sinks() {
            sink.on_device_state_changed(endpoint_id, new_state);
        }
    }

    pub fn volume_registration_count(&self) -> usize {
        self.state.lock().volume_sinks.len()
    }

    pub fn endpoint_registration_count(&self) -> usize {
        self.state.lock().endpoint_sinks.len()
    }

    fn endpoint_sinks(&self) -> Vec<Arc<dyn EndpointNotificationSink>> {
        // Collected under the lock, called without it.
        self.state
            .lock()
            .endpoint_sinks
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    fn volume_sinks_for(&self, endpoint_id: &str) -> Vec<Arc<dyn EndpointNotificationSink>> {
        self.state
            .lock()
            .volume_sinks
            .values()
            .filter(|(id, _)| id == endpoint_id)
            .filter_map(|(_, sink)| sink.upgrade())
            .collect()
    }

    fn registration(&self, kind: RegistrationKind, id: u64) -> Box<dyn NotificationRegistration> {
        Box::new(MockRegistration {
            state: Arc::downgrade(&self.state),
            kind,
            id,
        })
    }
}

impl EndpointProvider for MockEndpointProvider {
    fn active_endpoint_ids(&self, scope: EnumerationScope) -> Result<Vec<String>, AudioError> {
        let state = self.state.lock();
        Ok(state
            .endpoints
            .iter()
            .filter(|e| e.active)
            .filter(|e| scope == EnumerationScope::RenderAndCapture || e.endpoint.flow == FlowType::Render)
            .map(|e| e.endpoint.id.clone())
            .collect())
    }

    fn read_endpoint(&self, endpoint_id: &str) -> Result<RawEndpoint, AudioError> {
        let state = self.state.lock();
        if state.failing.contains(endpoint_id) {
            return Err(AudioError::Provider(format!(
                "scripted read failure for {endpoint_id}"
            )));
        }
        state
            .endpoints
            .iter()
            .find(|e| e.endpoint.id == endpoint_id)
            .map(|e| e.endpoint.clone())
            .ok_or_else(|| AudioError::EndpointNotFound {
                endpoint_id: endpoint_id.to_string(),
            })
    }

    fn default_endpoint_id(&self, flow: FlowType) -> Option<String> {
        self.state.lock().defaults.get(&(flow as u8)).cloned()
    }

    fn register_endpoint_notifications(
        &self,
        sink: Weak<dyn EndpointNotificationSink>,
    ) -> Result<Box<dyn NotificationRegistration>, AudioError> {
        let id = {
            let mut state = self.state.lock();
            let id = state.next_id();
            state.endpoint_sinks.insert(id, sink);
            id
        };
        Ok(self.registration(RegistrationKind::Endpoint, id))
    }

    fn register_volume_notify(
        &self,
        endpoint_id: &str,
        sink: Weak<dyn EndpointNotificationSink>,
    ) -> Result<Box<dyn NotificationRegistration>, AudioError> {
        let id = {
            let mut state = self.state.lock();
            if !state.endpoints.iter().any(|e| e.endpoint.id == endpoint_id) {
                return Err(AudioError::EndpointNotFound {
                    endpoint_id: endpoint_id.to_string(),
                });
            }
            let id = state.next_id();
            state
                .volume_sinks
                .insert(id, (endpoint_id.to_string(), sink));
            id
        };
        Ok(self.registration(RegistrationKind::Volume, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(id: &str, flow: FlowType) -> RawEndpoint {
        RawEndpoint {
            id: id.to_string(),
            group_id: "G1".to_string(),
            name: id.to_string(),
            flow,
            muted: false,
            volume_scalar: 0.5,
        }
    }

    #[test]
    fn test_render_only_scope_filters_capture() {
        let provider = MockEndpointProvider::new();
        provider.add_endpoint(endpoint("r", FlowType::Render));
        provider.add_endpoint(endpoint("c", FlowType::Capture));

        assert_eq!(
            provider.active_endpoint_ids(EnumerationScope::RenderOnly).unwrap(),
            vec!["r".to_string()]
        );
        assert_eq!(
            provider
                .active_endpoint_ids(EnumerationScope::RenderAndCapture)
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn test_unplugged_endpoint_stays_readable() {
        let provider = MockEndpointProvider::new();
        provider.add_endpoint(endpoint("r", FlowType::Render));
        provider.unplug("r");

        assert!(provider
            .active_endpoint_ids(EnumerationScope::RenderAndCapture)
            .unwrap()
            .is_empty());
        assert!(provider.read_endpoint("r").is_ok());

        provider.forget("r");
        assert!(matches!(
            provider.read_endpoint("r"),
            Err(AudioError::EndpointNotFound { .. })
        ));
    }

    #[test]
    fn test_registration_drop_unregisters() {
        struct Nop;
        impl EndpointNotificationSink for Nop {
            fn on_device_added(&self, _: &str) {}
            fn on_device_removed(&self, _: &str) {}
            fn on_device_state_changed(&self, _: &str, _: EndpointState) {}
            fn on_default_device_changed(&self, _: FlowType, _: Option<&str>) {}
            fn on_volume_notify(&self, _: &str) {}
        }

        let provider = MockEndpointProvider::new();
        provider.add_endpoint(endpoint("r", FlowType::Render));
        let sink: Arc<dyn EndpointNotificationSink> = Arc::new(Nop);

        let registration = provider
            .register_volume_notify("r", Arc::downgrade(&sink))
            .unwrap();
        assert_eq!(provider.volume_registration_count(), 1);
        drop(registration);
        assert_eq!(provider.volume_registration_count(), 0);

        assert!(provider
            .register_volume_notify("missing", Arc::downgrade(&sink))
            .is_err());
    }
}
