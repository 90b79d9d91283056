//! In-memory storage backend for testing.

use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::key::validate as validate_key;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// In-memory storage backend for testing.
///
/// Objects are a set of keys; there is no content. Every call to
/// [`exists()`](StorageBackend::exists) is recorded (with the instant it was
/// issued) so tests can assert on request volume and request rate.
///
/// # Examples
///
/// ```
/// use stocktake_storage::backend::{MockBackend, StorageBackend};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_objects(["uploads/123", "uploads/456"]);
/// assert!(backend.exists("uploads/123").await?);
/// assert!(!backend.exists("uploads/789").await?);
/// assert_eq!(backend.calls(), 2);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    objects: HashSet<String>,
    failures: HashMap<String, ErrorKind>,
    latency: Option<Duration>,
    panics: HashSet<String>,
    calls: Mutex<Vec<Instant>>,
}

impl MockBackend {
    /// Create a mock backend pre-populated with objects.
    ///
    /// Panics if any key fails validation. If test setup is wrong, then test
    /// should not pass.
    pub fn with_objects(objects: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let objects = objects
            .into_iter()
            .map(|key| {
                let key = key.into();
                let Ok(validated) = validate_key(&key) else {
                    // The panic here is DELIBERATE. MockBackend is intended to be
                    // used in tests; panics are expected. There is no error result.
                    panic!("MockBackend::with_objects: invalid key {key:?}");
                };
                validated
            })
            .collect();
        Self {
            objects,
            failures: HashMap::new(),
            latency: None,
            panics: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Make every existence check of `key` fail with `kind`.
    pub fn with_failure(mut self, key: impl Into<String>, kind: ErrorKind) -> Self {
        self.failures.insert(key.into(), kind);
        self
    }

    /// Make every existence check of `key` panic. Used to prove that callers
    /// survive a misbehaving backend.
    pub fn with_panic(mut self, key: impl Into<String>) -> Self {
        self.panics.insert(key.into());
        self
    }

    /// Delay every successful existence check by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of existence checks issued so far.
    pub fn calls(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or_default()
    }

    /// Instants at which each existence check was issued, in issue order.
    pub fn call_instants(&self) -> Vec<Instant> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let objects: [&str; 0] = [];
        Self::with_objects(objects)
    }
}

fn clone_kind(kind: &ErrorKind) -> ErrorKind {
    match kind {
        ErrorKind::InvalidKey(s) => ErrorKind::InvalidKey(s.clone()),
        ErrorKind::PermissionDenied(s) => ErrorKind::PermissionDenied(s.clone()),
        ErrorKind::Network(s) => ErrorKind::Network(s.clone()),
        ErrorKind::BackendError(s) => ErrorKind::BackendError(s.clone()),
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(Instant::now());
        }
        let key = validate_key(key)?;
        if self.panics.contains(&key) {
            panic!("MockBackend: injected panic for {key:?}");
        }
        if let Some(kind) = self.failures.get(&key) {
            exn::bail!(clone_kind(kind));
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        Ok(self.objects.contains(&key))
    }
}
