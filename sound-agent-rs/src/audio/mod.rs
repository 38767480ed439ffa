//! Audio module: endpoint discovery and the merged device collection.
//!
//! Endpoints come from an [`EndpointProvider`]; on Windows that is Core Audio,
//! elsewhere the in-memory [`MockEndpointProvider`].

pub mod collection;
pub mod device;
pub mod merge;
pub mod mock;
pub mod observer;
pub mod provider;

#[cfg(windows)]
pub mod enumerator;
#[cfg(windows)]
pub mod notifications;
#[cfg(windows)]
pub mod volume;

pub use collection::{CollectionOptions, SoundDeviceCollection};
pub use device::{AudioError, DeviceEventType, EndpointState, FlowType, SoundDevice};
pub use mock::MockEndpointProvider;
pub use observer::DeviceObserver;
pub use provider::{EndpointProvider, EnumerationScope, RawEndpoint};

#[cfg(windows)]
pub use enumerator::{ComGuard, WindowsEndpointProvider};
