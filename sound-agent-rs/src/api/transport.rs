//! HTTP transport used by the dispatch worker.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;

use super::request::{RequestItem, RequestMethod};

/// Default timeout of a single HTTP exchange.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Connection failed: {0}")]
    Connection(String),
}

/// Sends one request and reports the HTTP status code.
pub trait HttpTransport: Send + Sync {
    fn send(&self, url: &str, item: &RequestItem) -> Result<u16, TransportError>;
}

/// How the worker treats the result of one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// 200, 201 or 204
    Delivered,

    /// A 4xx the server will keep rejecting; retrying is pointless
    Rejected(u16),

    /// Transport error or a status worth retrying
    Failed(String),
}

impl DeliveryOutcome {
    pub fn classify(result: &Result<u16, TransportError>) -> Self {
        match result {
            Ok(200 | 201 | 204) => DeliveryOutcome::Delivered,
            Ok(status @ 400..=499) if *status != 408 && *status != 429 => {
                DeliveryOutcome::Rejected(*status)
            }
            Ok(status) => DeliveryOutcome::Failed(format!("status code {status}")),
            Err(e) => DeliveryOutcome::Failed(e.to_string()),
        }
    }
}

/// Blocking reqwest transport.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, url: &str, item: &RequestItem) -> Result<u16, TransportError> {
        let mut request = match item.method {
            RequestMethod::Post => self.client.post(url),
            RequestMethod::Put => self.client.put(url),
        };
        request = request
            .header(CONTENT_TYPE, "application/json")
            .body(item.payload.clone());
        for (name, value) in &item.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send()?;
        Ok(response.status().as_u16())
    }
}
