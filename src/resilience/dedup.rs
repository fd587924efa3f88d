use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

type PendingCall<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;
type PendingMap<T, E> = Arc<Mutex<HashMap<String, PendingCall<T, E>>>>;

/// Collapses concurrent calls for the same key into one execution.
///
/// Every caller that joins while a call is pending observes the same
/// outcome. Each call is driven to completion on its own task, even when
/// every caller goes away, and its entry is dropped once it completes, so
/// later callers start fresh.
pub struct RequestDeduplicator<T, E> {
    pending: PendingMap<T, E>,
}

impl<T, E> RequestDeduplicator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Runs `operation` for `key` unless a call for the same key is already
    /// pending, in which case its result is awaited instead.
    pub async fn dedupe<F, Fut>(&self, key: &str, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let call = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            match pending.get(key) {
                Some(existing) => {
                    debug!(key, "Joining in-flight call");
                    crate::server::metrics::record_dedup_join();
                    existing.clone()
                }
                None => {
                    let call = operation().boxed().shared();
                    pending.insert(key.to_string(), call.clone());
                    tokio::spawn(drive(self.pending.clone(), key.to_string(), call.clone()));
                    call
                }
            }
        };

        let result = call.clone().await;
        // The driver task may not have been polled yet.
        forget(&self.pending, key, &call);
        result
    }

    /// Number of keys with a call currently pending.
    pub fn in_flight(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

async fn drive<T, E>(pending: PendingMap<T, E>, key: String, call: PendingCall<T, E>)
where
    T: Clone,
    E: Clone,
{
    let _ = call.clone().await;
    forget(&pending, &key, &call);
}

/// Removes `key` only if it still maps to `call`.
fn forget<T, E>(
    pending: &Mutex<HashMap<String, PendingCall<T, E>>>,
    key: &str,
    call: &PendingCall<T, E>,
) where
    T: Clone,
    E: Clone,
{
    let mut pending = pending.lock().unwrap_or_else(PoisonError::into_inner);
    if pending.get(key).is_some_and(|current| current.ptr_eq(call)) {
        pending.remove(key);
    }
}

impl<T, E> Default for RequestDeduplicator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
