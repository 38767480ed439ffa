//! Collection observer that reports device changes to the REST backend.

use std::sync::{Arc, Weak};

use tracing::{info, warn};

use super::client::AudioDeviceApiClient;
use crate::audio::{DeviceEventType, DeviceObserver, FlowType, SoundDeviceCollection};

pub struct ServiceObserver {
    collection: Weak<SoundDeviceCollection>,
    client: AudioDeviceApiClient,
}

impl ServiceObserver {
    pub fn new(collection: &Arc<SoundDeviceCollection>, client: AudioDeviceApiClient) -> Self {
        Self {
            collection: Arc::downgrade(collection),
            client,
        }
    }

    /// Log every device and report it as `Confirmed`.
    pub fn post_and_print_collection(&self) {
        let Some(collection) = self.collection.upgrade() else {
            return;
        };

        info!("Processing device collection...");
        for device in collection.devices() {
            info!("{device}");
            self.client.post_device(
                DeviceEventType::Confirmed,
                &device,
                "(by iteration on device collection) ",
            );
        }
        info!("...Processing device collection finished.");
    }
}

impl DeviceObserver for ServiceObserver {
    fn on_collection_changed(&self, event: DeviceEventType, group_id: &str) {
        info!(%event, group_id, "Event caught");

        let Some(collection) = self.collection.upgrade() else {
            return;
        };

        match event {
            DeviceEventType::Discovered => match collection.create_item_by_id(group_id) {
                Ok(device) => self.client.post_device(event, &device, "(by device discovery) "),
                Err(e) => warn!(group_id, error = %e, "Sound device cannot be read"),
            },
            DeviceEventType::VolumeRenderChanged | DeviceEventType::VolumeCaptureChanged => {
                let flow = if event == DeviceEventType::VolumeRenderChanged {
                    FlowType::Render
                } else {
                    FlowType::Capture
                };
                match collection.create_item_by_id(group_id) {
                    Ok(device) => self.client.put_volume_change(
                        group_id,
                        flow,
                        device.volume_for(flow),
                        "",
                    ),
                    Err(e) => warn!(group_id, error = %e, "Sound device cannot be read"),
                }
            }
            // The device is usually gone already; nothing to report.
            DeviceEventType::Detached => {}
            DeviceEventType::DefaultRenderChanged | DeviceEventType::DefaultCaptureChanged => {}
            DeviceEventType::Confirmed => {
                warn!(group_id, "Unexpected Confirmed event from the collection");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::processor::HttpRequestDispatcher;
    use crate::api::request::{RequestItem, RequestMethod};
    use crate::audio::{CollectionOptions, MockEndpointProvider, RawEndpoint};
    use crate::platform::HostIdentity;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Capture {
        items: Mutex<Vec<RequestItem>>,
    }

    impl HttpRequestDispatcher for Capture {
        fn enqueue_request(&self, item: RequestItem) {
            self.items.lock().push(item);
        }
    }

    fn endpoint(id: &str, name: &str, flow: FlowType, scalar: f32) -> RawEndpoint {
        RawEndpoint {
            id: id.to_string(),
            group_id: "G1".to_string(),
            name: name.to_string(),
            flow,
            muted: false,
            volume_scalar: scalar,
        }
    }

    fn setup() -> (
        Arc<MockEndpointProvider>,
        Arc<SoundDeviceCollection>,
        Arc<ServiceObserver>,
        Arc<Capture>,
    ) {
        let provider = Arc::new(MockEndpointProvider::new());
        let collection =
            SoundDeviceCollection::new(provider.clone(), CollectionOptions::default()).unwrap();
        let capture = Arc::new(Capture::default());
        let client = AudioDeviceApiClient::new(capture.clone(), HostIdentity::new("HOST", "Windows"));
        let observer = Arc::new(ServiceObserver::new(&collection, client));
        collection.subscribe(observer.clone());
        (provider, collection, observer, capture)
    }

    fn message_type(item: &RequestItem) -> u64 {
        let json: serde_json::Value = serde_json::from_str(&item.payload).unwrap();
        json["deviceMessageType"].as_u64().unwrap()
    }

    #[test]
    fn test_startup_walk_posts_confirmed() {
        let (provider, collection, observer, capture) = setup();
        provider.add_endpoint(endpoint("r", "Speakers", FlowType::Render, 0.8));
        collection.reset_content();
        observer.post_and_print_collection();

        let items = capture.items.lock();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].method, RequestMethod::Post);
        assert_eq!(message_type(&items[0]), DeviceEventType::Confirmed as u64);
    }

    #[test]
    fn test_discovery_posts_and_volume_puts() {
        let (provider, _collection, _observer, capture) = setup();
        provider.plug(endpoint("r", "Speakers", FlowType::Render, 0.8));
        provider.set_volume("r", 0.3, false);

        let items = capture.items.lock();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].method, RequestMethod::Post);
        assert_eq!(message_type(&items[0]), DeviceEventType::Discovered as u64);

        assert_eq!(items[1].method, RequestMethod::Put);
        assert_eq!(items[1].url_suffix, "/G1/HOST");
        let json: serde_json::Value = serde_json::from_str(&items[1].payload).unwrap();
        assert_eq!(json["volume"], 300);
    }

    #[test]
    fn test_detach_sends_nothing() {
        let (provider, _collection, _observer, capture) = setup();
        provider.plug(endpoint("r", "Speakers", FlowType::Render, 0.8));
        provider.unplug("r");
        assert_eq!(capture.items.lock().len(), 1);
    }
}
