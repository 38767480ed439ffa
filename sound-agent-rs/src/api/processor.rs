//! Request dispatchers.
//!
//! [`HttpRequestProcessor`] owns a bounded queue and a single worker thread.
//! Producers enqueue without blocking on I/O; the worker delivers items in
//! order. When delivery to a managed (GitHub Codespaces) backend fails, the
//! worker asks GitHub to start the codespace and retries the same item first.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use super::request::{RequestItem, RequestMethod, RequestQueue, DEFAULT_QUEUE_CAPACITY};
use super::transport::{DeliveryOutcome, HttpTransport};

/// Wake-and-retry attempts before a failing item is dropped.
pub const MAX_AWAKING_RETRIES: u32 = 15;

/// Base URL fragment identifying a backend that can be woken up.
pub const MANAGED_HOST_FRAGMENT: &str = ".github.";

const WAKE_URL_PREFIX: &str = "https://api.github.com/user/codespaces";

/// Accepts requests for asynchronous delivery.
pub trait HttpRequestDispatcher: Send + Sync {
    /// Queue a request. Never blocks on network I/O.
    fn enqueue_request(&self, item: RequestItem);
}

/// Dispatcher for the `None` transport: logs and discards.
#[derive(Debug, Default)]
pub struct NullDispatcher;

impl HttpRequestDispatcher for NullDispatcher {
    fn enqueue_request(&self, item: RequestItem) {
        info!(hint = %item.hint, "Request not sent, transport method is None");
    }
}

/// Worker pauses between deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchTimings {
    /// After a delivered item
    pub success_pause: Duration,

    /// After a failed item that was retried or dropped
    pub failure_pause: Duration,
}

impl Default for DispatchTimings {
    fn default() -> Self {
        Self {
            success_pause: Duration::from_millis(200),
            failure_pause: Duration::from_millis(2000),
        }
    }
}

/// Static settings of a [`HttpRequestProcessor`].
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// Endpoint base, without trailing slash
    pub api_base_url: String,

    /// Bearer token for the wake request
    pub universal_token: String,

    pub codespace_name: String,
    pub queue_capacity: usize,
    pub timings: DispatchTimings,
}

impl ProcessorSettings {
    pub fn new(
        api_base_url: impl Into<String>,
        universal_token: impl Into<String>,
        codespace_name: impl Into<String>,
    ) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            universal_token: universal_token.into(),
            codespace_name: codespace_name.into(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            timings: DispatchTimings::default(),
        }
    }

    /// True if the backend is a codespace that can be woken up.
    pub fn is_managed_host(&self) -> bool {
        self.api_base_url.contains(MANAGED_HOST_FRAGMENT)
    }

    pub fn wake_url(&self) -> String {
        format!("{WAKE_URL_PREFIX}/{}/start", self.codespace_name)
    }
}

struct WorkerState {
    queue: RequestQueue,
    running: bool,
}

struct Shared {
    state: Mutex<WorkerState>,
    condvar: Condvar,
}

/// Queue plus single delivery worker.
pub struct HttpRequestProcessor {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl HttpRequestProcessor {
    /// Start the worker thread.
    pub fn new(settings: ProcessorSettings, transport: Arc<dyn HttpTransport>) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(WorkerState {
                queue: RequestQueue::with_capacity(settings.queue_capacity),
                running: true,
            }),
            condvar: Condvar::new(),
        });

        let worker = Worker {
            shared: Arc::clone(&shared),
            transport,
            settings,
            retry_awaking_count: 0,
        };
        let handle = thread::Builder::new()
            .name("http-dispatch".to_string())
            .spawn(move || worker.run());

        let worker = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!(error = %e, "Failed to start the dispatch worker; requests will queue up");
                None
            }
        };

        Self { shared, worker }
    }

    /// Requests waiting for delivery.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().queue.len()
    }
}

impl HttpRequestDispatcher for HttpRequestProcessor {
    fn enqueue_request(&self, item: RequestItem) {
        let mut state = self.shared.state.lock();
        if let Some(evicted) = state.queue.push_back(item) {
            warn!(
                hint = %evicted.hint,
                capacity = state.queue.capacity(),
                "Request queue full, dropping the oldest request"
            );
        }
        self.shared.condvar.notify_one();
    }
}

impl Drop for HttpRequestProcessor {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.running = false;
            if !state.queue.is_empty() {
                info!(pending = state.queue.len(), "Dropping undelivered requests");
            }
            self.shared.condvar.notify_all();
        }
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("Dispatch worker panicked");
            }
        }
    }
}

struct Worker {
    shared: Arc<Shared>,
    transport: Arc<dyn HttpTransport>,
    settings: ProcessorSettings,
    retry_awaking_count: u32,
}

impl Worker {
    fn run(mut self) {
        debug!("Dispatch worker started");
        while let Some(item) = self.next_item() {
            self.process(item);
        }
        debug!("Dispatch worker stopped");
    }

    /// Block until an item is available; `None` on shutdown.
    fn next_item(&self) -> Option<RequestItem> {
        let mut state = self.shared.state.lock();
        self.shared
            .condvar
            .wait_while(&mut state, |s| s.running && s.queue.is_empty());
        if !state.running {
            return None;
        }
        state.queue.pop_front()
    }

    /// Sleep unless shutdown is requested first.
    fn pause(&self, duration: Duration) {
        let mut state = self.shared.state.lock();
        if state.running {
            self.shared
                .condvar
                .wait_while_for(&mut state, |s| s.running, duration);
        }
    }

    fn send(&self, url: &str, item: &RequestItem) -> DeliveryOutcome {
        info!(hint = %item.hint, method = %item.method, "Processing request");
        let outcome = DeliveryOutcome::classify(&self.transport.send(url, item));
        match &outcome {
            DeliveryOutcome::Delivered => info!(hint = %item.hint, "Sent successfully"),
            DeliveryOutcome::Rejected(status) => {
                warn!(hint = %item.hint, status, "Request rejected")
            }
            DeliveryOutcome::Failed(reason) => {
                warn!(hint = %item.hint, reason = %reason, "Request failed")
            }
        }
        outcome
    }

    fn process(&mut self, item: RequestItem) {
        let url = format!("{}{}", self.settings.api_base_url, item.url_suffix);

        match self.send(&url, &item) {
            DeliveryOutcome::Delivered => {
                self.retry_awaking_count = 0;
                self.pause(self.settings.timings.success_pause);
                return;
            }
            DeliveryOutcome::Rejected(status) => {
                info!(hint = %item.hint, status, "Permanent rejection, skipping request");
                return;
            }
            DeliveryOutcome::Failed(_) => {}
        }

        if !self.settings.is_managed_host() {
            info!(
                url = %self.settings.api_base_url,
                "Request sending unsuccessful. Waking up makes no sense. Skipping request."
            );
            return;
        }

        self.retry_awaking_count += 1;
        if self.retry_awaking_count <= MAX_AWAKING_RETRIES {
            self.send(&self.settings.wake_url(), &self.awaking_request());
            self.shared.state.lock().queue.push_front(item);
        } else {
            info!(
                url = %self.settings.api_base_url,
                "Request sending unsuccessful. Retries exhausted. Skipping request."
            );
            self.retry_awaking_count = 0;
        }
        self.pause(self.settings.timings.failure_pause);
    }

    fn awaking_request(&self) -> RequestItem {
        let payload = serde_json::json!({ "codespace_name": self.settings.codespace_name });
        RequestItem::new(
            RequestMethod::Post,
            "",
            payload.to_string(),
            format!(
                "awaking a backend {} / {}",
                self.retry_awaking_count, MAX_AWAKING_RETRIES
            ),
        )
        .with_header(
            "Authorization",
            format!("Bearer {}", self.settings.universal_token),
        )
        .with_header("Accept", "application/vnd.github.v3+json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::transport::TransportError;
    use std::time::Instant;

    type Responder = dyn Fn(&str, &RequestItem) -> Result<u16, TransportError> + Send + Sync;

    struct ScriptedTransport {
        responder: Box<Responder>,
        calls: Mutex<Vec<(String, RequestItem)>>,
    }

    impl ScriptedTransport {
        fn new(
            responder: impl Fn(&str, &RequestItem) -> Result<u16, TransportError> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                responder: Box::new(responder),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, RequestItem)> {
            self.calls.lock().clone()
        }

        fn wait_for_calls(&self, count: usize) -> Vec<(String, RequestItem)> {
            let deadline = Instant::now() + Duration::from_secs(5);
            while self.calls.lock().len() < count && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            self.calls()
        }
    }

    impl HttpTransport for ScriptedTransport {
        fn send(&self, url: &str, item: &RequestItem) -> Result<u16, TransportError> {
            self.calls.lock().push((url.to_string(), item.clone()));
            (self.responder)(url, item)
        }
    }

    const MANAGED_URL: &str = "https://space-5027.app.github.dev/api/AudioDevices";

    fn settings(base: &str) -> ProcessorSettings {
        let mut settings = ProcessorSettings::new(base, "token-1", "my-space");
        settings.timings = DispatchTimings {
            success_pause: Duration::from_millis(1),
            failure_pause: Duration::from_millis(1),
        };
        settings
    }

    fn item(hint: &str) -> RequestItem {
        RequestItem::new(RequestMethod::Post, "", "{}", hint)
    }

    fn is_wake(url: &str) -> bool {
        url.starts_with(WAKE_URL_PREFIX)
    }

    #[test]
    fn test_failed_item_is_retried_first_after_wake() {
        let failed_once = Mutex::new(false);
        let transport = ScriptedTransport::new(move |url, item| {
            if is_wake(url) {
                return Ok(200);
            }
            let mut failed = failed_once.lock();
            if item.hint == "A" && !*failed {
                *failed = true;
                return Err(TransportError::Connection("refused".to_string()));
            }
            Ok(201)
        });

        let processor = HttpRequestProcessor::new(settings(MANAGED_URL), transport.clone());
        processor.enqueue_request(item("A"));
        processor.enqueue_request(item("B"));
        processor.enqueue_request(item("C"));

        let calls = transport.wait_for_calls(5);
        let order: Vec<&str> = calls
            .iter()
            .map(|(url, item)| if is_wake(url) { "wake" } else { item.hint.as_str() })
            .collect();
        assert_eq!(order, vec!["A", "wake", "A", "B", "C"]);

        let (wake_url, wake) = &calls[1];
        assert_eq!(wake_url, "https://api.github.com/user/codespaces/my-space/start");
        assert_eq!(wake.payload, r#"{"codespace_name":"my-space"}"#);
        assert_eq!(
            wake.headers.get("Authorization").map(String::as_str),
            Some("Bearer token-1")
        );
        assert_eq!(
            wake.headers.get("Accept").map(String::as_str),
            Some("application/vnd.github.v3+json")
        );
    }

    #[test]
    fn test_unmanaged_backend_drops_without_wake() {
        let transport =
            ScriptedTransport::new(|_, _| Err(TransportError::Connection("refused".to_string())));
        let processor = HttpRequestProcessor::new(
            settings("http://localhost:5027/api/AudioDevices"),
            transport.clone(),
        );
        processor.enqueue_request(item("A"));
        processor.enqueue_request(item("B"));

        let calls = transport.wait_for_calls(2);
        thread::sleep(Duration::from_millis(50));

        assert_eq!(transport.calls().len(), 2);
        assert!(calls.iter().all(|(url, _)| !is_wake(url)));
        assert_eq!(processor.pending(), 0);
    }

    #[test]
    fn test_client_error_is_dropped_without_wake() {
        let transport = ScriptedTransport::new(|url, item| {
            if !is_wake(url) && item.hint == "bad" {
                Ok(400)
            } else {
                Ok(200)
            }
        });
        let processor = HttpRequestProcessor::new(settings(MANAGED_URL), transport.clone());
        processor.enqueue_request(item("bad"));
        processor.enqueue_request(item("good"));

        transport.wait_for_calls(2);
        thread::sleep(Duration::from_millis(50));

        let hints: Vec<String> = transport
            .calls()
            .into_iter()
            .map(|(_, item)| item.hint)
            .collect();
        assert_eq!(hints, vec!["bad".to_string(), "good".to_string()]);
    }

    #[test]
    fn test_retries_exhausted_drops_item() {
        let transport = ScriptedTransport::new(|url, _| {
            if is_wake(url) {
                Ok(200)
            } else {
                Ok(503)
            }
        });
        let processor = HttpRequestProcessor::new(settings(MANAGED_URL), transport.clone());
        processor.enqueue_request(item("A"));

        let expected = MAX_AWAKING_RETRIES as usize * 2 + 1;
        transport.wait_for_calls(expected);
        thread::sleep(Duration::from_millis(50));

        let calls = transport.calls();
        assert_eq!(calls.len(), expected);
        let wakes = calls.iter().filter(|(url, _)| is_wake(url)).count();
        assert_eq!(wakes, MAX_AWAKING_RETRIES as usize);
        assert_eq!(processor.pending(), 0);
    }

    #[test]
    fn test_request_url_is_base_plus_suffix() {
        let transport = ScriptedTransport::new(|_, _| Ok(204));
        let processor = HttpRequestProcessor::new(settings(MANAGED_URL), transport.clone());
        processor.enqueue_request(RequestItem::new(
            RequestMethod::Put,
            "/G1/HOST",
            "{}",
            "volume",
        ));

        let calls = transport.wait_for_calls(1);
        assert_eq!(calls[0].0, format!("{MANAGED_URL}/G1/HOST"));
        assert_eq!(calls[0].1.method, RequestMethod::Put);
    }

    #[test]
    fn test_drop_interrupts_failure_pause() {
        let transport = ScriptedTransport::new(|_, _| Ok(500));
        let mut slow = settings(MANAGED_URL);
        slow.timings.failure_pause = Duration::from_secs(30);
        let processor = HttpRequestProcessor::new(slow, transport.clone());
        processor.enqueue_request(item("A"));
        transport.wait_for_calls(2);

        let started = Instant::now();
        drop(processor);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_managed_host_detection() {
        assert!(settings(MANAGED_URL).is_managed_host());
        assert!(!settings("https://example.com/api/AudioDevices").is_managed_host());
    }
}
