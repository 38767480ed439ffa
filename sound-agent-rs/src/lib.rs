//! Sound Agent - Library
//!
//! Tracks the audio endpoints of a Windows machine and reports them to a REST
//! backend.
//!
//! ## Features
//!
//! - Render and capture endpoints of one physical device merged into one entry
//! - Live updates on hot-plug, state, default and volume changes
//! - Observer events for every collection change
//! - Queued HTTP delivery with codespace wake-up and retry
//! - Console monitor and C ABI for embedding

pub mod api;
pub mod audio;
pub mod config;
pub mod crypt;
pub mod platform;

pub use api::{AudioDeviceApiClient, HttpRequestDispatcher, HttpRequestProcessor, ServiceObserver};
pub use audio::{
    AudioError, CollectionOptions, DeviceEventType, DeviceObserver, EndpointProvider,
    EnumerationScope, FlowType, SoundDevice, SoundDeviceCollection,
};
pub use config::{AgentConfig, CliArgs, ConfigError, TransportMethod};
pub use platform::HostIdentity;

/// Create a collection over the Core Audio endpoints of this machine.
///
/// COM must be initialized on the calling thread, see [`audio::ComGuard`].
#[cfg(windows)]
pub fn create_device_collection(
    options: CollectionOptions,
) -> Result<std::sync::Arc<SoundDeviceCollection>, AudioError> {
    let provider = std::sync::Arc::new(audio::WindowsEndpointProvider::new()?);
    SoundDeviceCollection::new(provider, options)
}
