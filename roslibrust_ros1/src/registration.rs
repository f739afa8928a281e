//! C7: the registration lifecycle.
//!
//! A background task drives registration (and, later, unregistration) against the master with
//! retry, and fans out success/failure events to a snapshot of listeners so a slow listener
//! never delays another. This module is deliberately generic over *what* is being registered
//! (publisher, subscriber, or service) -- each call site supplies the register/unregister
//! futures; this module only owns the retry/backoff/notify behavior.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::RwLock;

use crate::error::RegistrationError;
use crate::options::registration_backoff;

/// Fired when a registration attempt succeeds or permanently fails (failures are retried, so in
/// practice a listener may see many `Failure` events before a `Success`, or may be torn down
/// before ever seeing a `Success` if the node shuts down first).
#[derive(Debug, Clone)]
pub enum RegistrationEvent<T> {
    Success(T),
    Failure(String),
}

/// A listener for registration lifecycle events. Implemented as a boxed `Fn` so callers can
/// close over whatever state they need (an mpsc sender, a condvar, a test probe, ...).
pub type Listener<T> = Arc<dyn Fn(RegistrationEvent<T>) + Send + Sync>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RegistrationError>> + Send + 'a>>;

/// Runs the register-with-retry loop for a single registrant and notifies `listeners` of every
/// attempt's outcome. Returns once registration finally succeeds (callers typically `tokio::
/// spawn` this and hold the `JoinHandle` for cancellation on shutdown).
pub async fn run_registration<T, F>(
    mut register: F,
    listeners: Arc<RwLock<Vec<Listener<T>>>>,
) -> T
where
    T: Clone + Send + 'static,
    F: FnMut() -> BoxFuture<'static, T>,
{
    let mut attempt = 0u32;
    loop {
        match register().await {
            Ok(value) => {
                debug!("registration succeeded after {attempt} prior attempt(s)");
                notify(&listeners, RegistrationEvent::Success(value.clone())).await;
                return value;
            }
            Err(e) => {
                warn!("registration attempt {attempt} failed: {e}");
                notify(&listeners, RegistrationEvent::Failure(e.to_string())).await;
                tokio::time::sleep(registration_backoff(attempt)).await;
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

/// Calls `unregister`, mirroring its outcome to `listeners` as a single success/failure event
/// (unregistration is not retried: the node is shutting this registrant down either way).
pub async fn run_unregistration<T, F>(
    unregister: F,
    listeners: Arc<RwLock<Vec<Listener<T>>>>,
) where
    T: Clone + Send + 'static,
    F: Future<Output = Result<T, RegistrationError>>,
{
    match unregister.await {
        Ok(value) => notify(&listeners, RegistrationEvent::Success(value)).await,
        Err(e) => notify(&listeners, RegistrationEvent::Failure(e.to_string())).await,
    }
}

async fn notify<T: Clone + Send + 'static>(
    listeners: &Arc<RwLock<Vec<Listener<T>>>>,
    event: RegistrationEvent<T>,
) {
    // Snapshot under the lock, then invoke outside of it: a listener must never see the lock
    // held, and removals racing with this dispatch must not tear an in-flight iteration.
    let snapshot: Vec<_> = listeners.read().await.clone();
    for listener in snapshot {
        let event = event.clone();
        let listener = listener.clone();
        tokio::spawn(async move {
            listener(event);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success_and_reports_each_attempt() {
        tokio::time::pause();
        let attempts = Arc::new(AtomicU32::new(0));
        let listeners: Arc<RwLock<Vec<Listener<i32>>>> = Arc::new(RwLock::new(Vec::new()));
        let successes = Arc::new(AtomicU32::new(0));
        let failures = Arc::new(AtomicU32::new(0));
        {
            let successes = successes.clone();
            let failures = failures.clone();
            listeners.write().await.push(Arc::new(move |event| match event {
                RegistrationEvent::Success(_) => {
                    successes.fetch_add(1, Ordering::SeqCst);
                }
                RegistrationEvent::Failure(_) => {
                    failures.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }

        let attempts_clone = attempts.clone();
        let register = move || -> BoxFuture<'static, i32> {
            let attempts = attempts_clone.clone();
            Box::pin(async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(RegistrationError::MasterError {
                        status: 0,
                        message: "not yet".to_string(),
                    })
                } else {
                    Ok(42)
                }
            })
        };

        let handle = tokio::spawn(run_registration(register, listeners.clone()));
        // Drive the paused clock forward through the backoff sleeps.
        for _ in 0..2 {
            tokio::time::advance(std::time::Duration::from_secs(2)).await;
        }
        let result = handle.await.unwrap();
        assert_eq!(result, 42);

        // Allow the spawned listener-notification tasks to run.
        tokio::task::yield_now().await;
        tokio::time::advance(std::time::Duration::from_millis(1)).await;
        tokio::task::yield_now().await;

        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert_eq!(failures.load(Ordering::SeqCst), 2);
    }
}
