//! REST reporting: request building, queued or brokered delivery and the
//! service observer.

pub mod broker;
pub mod client;
pub mod observer;
pub mod processor;
pub mod request;
pub mod transport;

pub use broker::{BrokerSettings, RabbitMqDispatcher};
pub use client::{devices_endpoint, AudioDeviceApiClient};
pub use observer::ServiceObserver;
pub use processor::{
    DispatchTimings, HttpRequestDispatcher, HttpRequestProcessor, NullDispatcher,
    ProcessorSettings,
};
pub use request::{RequestItem, RequestMethod};
pub use transport::{HttpTransport, ReqwestTransport, TransportError};
