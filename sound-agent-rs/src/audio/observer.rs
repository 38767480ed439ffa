//! Observer registry for collection events.

use std::sync::Arc;

use parking_lot::Mutex;

use super::device::DeviceEventType;

/// Receives collection-changing events.
///
/// Called synchronously after the collection has applied the change. Reading
/// the collection from the handler is allowed; mutating it is not.
pub trait DeviceObserver: Send + Sync {
    fn on_collection_changed(&self, event: DeviceEventType, group_id: &str);
}

/// Set of subscribed observers, compared by identity.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Mutex<Vec<Arc<dyn DeviceObserver>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer. Subscribing the same observer twice is a no-op.
    pub fn subscribe(&self, observer: Arc<dyn DeviceObserver>) {
        let mut observers = self.observers.lock();
        if !observers.iter().any(|o| same_observer(o, &observer)) {
            observers.push(observer);
        }
    }

    /// Remove an observer. Unknown observers are ignored.
    pub fn unsubscribe(&self, observer: &Arc<dyn DeviceObserver>) {
        self.observers.lock().retain(|o| !same_observer(o, observer));
    }

    pub fn len(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver one event to every observer in subscription order.
    pub fn notify(&self, event: DeviceEventType, group_id: &str) {
        // Handlers run without the registry lock so they may subscribe others.
        let observers = self.observers.lock().clone();
        for observer in observers {
            observer.on_collection_changed(event, group_id);
        }
    }
}

fn same_observer(a: &Arc<dyn DeviceObserver>, b: &Arc<dyn DeviceObserver>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counting {
        seen: Mutex<Vec<(DeviceEventType, String)>>,
    }

    impl DeviceObserver for Counting {
        fn on_collection_changed(&self, event: DeviceEventType, group_id: &str) {
            self.seen.lock().push((event, group_id.to_string()));
        }
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let registry = ObserverRegistry::new();
        let observer = Arc::new(Counting::default());
        let as_dyn: Arc<dyn DeviceObserver> = observer.clone();

        registry.subscribe(as_dyn.clone());
        registry.subscribe(as_dyn.clone());
        assert_eq!(registry.len(), 1);

        registry.notify(DeviceEventType::Discovered, "G1");
        assert_eq!(observer.seen.lock().len(), 1);
    }

    #[test]
    fn test_unsubscribe_unknown_is_noop() {
        let registry = ObserverRegistry::new();
        let known: Arc<dyn DeviceObserver> = Arc::new(Counting::default());
        let unknown: Arc<dyn DeviceObserver> = Arc::new(Counting::default());

        registry.subscribe(known.clone());
        registry.unsubscribe(&unknown);
        assert_eq!(registry.len(), 1);

        registry.unsubscribe(&known);
        assert!(registry.is_empty());
    }
}
