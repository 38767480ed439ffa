//! Platform services: host identification and Windows Registry access.

pub mod host;
#[cfg(windows)]
pub mod registry;

pub use host::{HostIdentity, WindowsVersionInfo};
#[cfg(windows)]
pub use registry::{MachineKey, RegistryError};
