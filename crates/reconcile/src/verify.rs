//! The verification pool: a fixed number of workers asking the object store
//! whether each record's object exists.

use crate::error::{ErrorKind, Result};
use crate::forward;
use crate::limiter::RateLimiter;
use crate::record::{CheckResult, RecordKey};
use exn::ResultExt;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use stocktake_storage::BackendHandle;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

pub(crate) struct Verifier {
    store: BackendHandle,
    limiter: Option<Arc<RateLimiter>>,
    call_timeout: Option<Duration>,
}

impl Verifier {
    pub(crate) fn new(store: BackendHandle, limiter: Option<RateLimiter>, call_timeout: Option<Duration>) -> Self {
        Self {
            store,
            limiter: limiter.map(Arc::new),
            call_timeout,
        }
    }

    /// Spawn `workers` workers onto `tracker`, all pulling from the same
    /// `keys` and sharing the same rate limiter.
    ///
    /// Workers stop when `keys` is closed and drained, when `results` is
    /// closed, or when `cancel` fires; whichever comes first.
    pub(crate) fn spawn_pool(
        self,
        tracker: &TaskTracker,
        workers: usize,
        keys: Receiver<RecordKey>,
        results: Sender<CheckResult>,
        cancel: CancellationToken,
    ) {
        let verifier = Arc::new(self);
        let keys = Arc::new(Mutex::new(keys));
        for worker in 0..workers {
            tracker.spawn(verifier.clone().work(worker, keys.clone(), results.clone(), cancel.clone()));
        }
    }

    async fn work(
        self: Arc<Self>,
        worker: usize,
        keys: Arc<Mutex<Receiver<RecordKey>>>,
        results: Sender<CheckResult>,
        cancel: CancellationToken,
    ) {
        debug!(worker, "Verification worker started");
        loop {
            let key = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                key = async { keys.lock().await.recv().await } => key,
            };
            let Some(key) = key else { break };
            if let Some(limiter) = &self.limiter
                && !limiter.acquire(&cancel).await
            {
                break;
            }
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                outcome = self.check(&key.id) => outcome,
            };
            if !forward(&results, CheckResult::checked(key, outcome), &cancel).await {
                break;
            }
        }
        debug!(worker, "Verification worker stopped");
    }

    /// Ask the store about one object. A panic inside the store is caught and
    /// reported like any other failed check.
    async fn check(&self, id: &str) -> Result<bool> {
        let call = AssertUnwindSafe(self.store.exists(id)).catch_unwind();
        let outcome = match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.or_raise(|| ErrorKind::StoreCheck(id.to_string()))?,
            None => call.await,
        };
        match outcome {
            Ok(exists) => exists.or_raise(|| ErrorKind::StoreCheck(id.to_string())),
            Err(panic) => {
                error!(id, panic = panic_message(panic.as_ref()), "Object store panicked during existence check");
                exn::bail!(ErrorKind::StoreCheck(id.to_string()))
            },
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
