//! Queued HTTP request items and the bounded queue that holds them.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};

/// Default number of pending requests kept before the oldest is dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    Post,
    Put,
}

impl RequestMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestMethod::Post => "POST",
            RequestMethod::Put => "PUT",
        }
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One HTTP request waiting for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestItem {
    pub method: RequestMethod,

    /// When the request was created
    pub time: DateTime<Utc>,

    /// Appended to the dispatcher's base URL
    pub url_suffix: String,

    /// JSON body
    pub payload: String,

    /// Extra headers; Content-Type is always JSON
    pub headers: HashMap<String, String>,

    /// Human-readable label used in log lines
    pub hint: String,
}

impl RequestItem {
    pub fn new(
        method: RequestMethod,
        url_suffix: impl Into<String>,
        payload: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        Self {
            method,
            time: Utc::now(),
            url_suffix: url_suffix.into(),
            payload: payload.into(),
            headers: HashMap::new(),
            hint: hint.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// FIFO of pending requests with a fixed capacity.
#[derive(Debug)]
pub struct RequestQueue {
    items: VecDeque<RequestItem>,
    capacity: usize,
}

impl RequestQueue {
    /// A capacity of zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append at the tail. At capacity the oldest item is evicted and returned.
    pub fn push_back(&mut self, item: RequestItem) -> Option<RequestItem> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Reinsert at the head for an immediate retry. Never evicts.
    pub fn push_front(&mut self, item: RequestItem) {
        self.items.push_front(item);
    }

    pub fn pop_front(&mut self) -> Option<RequestItem> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}
