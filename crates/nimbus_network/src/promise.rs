//! Single-assignment futures for outbound requests.
//!
//! A [`CommunicationPromise`] starts out pending and is settled exactly once,
//! either with a value or with a [`CommunicationError`]. Any number of clones
//! share the same slot, so the connection's pending table can complete a
//! promise while the caller holds another handle and waits on it.
//!
//! ## Waiting
//!
//! [`wait`](CommunicationPromise::wait) suspends until the promise settles.
//! [`await_timeout`](CommunicationPromise::await_timeout) gives up after a
//! deadline *without* settling the promise, so other listeners still see the
//! eventual outcome. The promise also implements [`IntoFuture`], so
//! `promise.await` works directly.
//!
//! ## Listeners
//!
//! Listeners registered before settlement run on the completing task in
//! registration order. Listeners registered after settlement run immediately
//! on the registering task. Either way each listener runs once.

use crate::error::CommunicationError;
use futures::future::BoxFuture;
use std::fmt;
use std::future::IntoFuture;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error};

/// Outcome carried by a settled promise.
pub type PromiseResult<T> = Result<T, CommunicationError>;

type Listener<T> = Box<dyn FnOnce(&PromiseResult<T>) + Send + 'static>;

enum PromiseState<T> {
    Pending(Vec<Listener<T>>),
    Settled(PromiseResult<T>),
}

struct Shared<T> {
    state: Mutex<PromiseState<T>>,
    settled: watch::Sender<bool>,
}

/// Eventual outcome of one request.
pub struct CommunicationPromise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for CommunicationPromise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Send + 'static> Default for CommunicationPromise<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(state: &Mutex<PromiseState<T>>) -> MutexGuard<'_, PromiseState<T>> {
    // Listeners never run under the lock, so a poisoned lock still holds a consistent state.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<T: Clone + Send + 'static> CommunicationPromise<T> {
    /// Creates a pending promise.
    pub fn new() -> Self {
        let (settled, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PromiseState::Pending(Vec::new())),
                settled,
            }),
        }
    }

    /// Creates a promise that has already succeeded.
    pub fn succeeded(value: T) -> Self {
        let promise = Self::new();
        promise.try_success(value);
        promise
    }

    /// Creates a promise that has already failed.
    pub fn failed(error: CommunicationError) -> Self {
        let promise = Self::new();
        promise.try_failure(error);
        promise
    }

    /// Settles the promise with `outcome`.
    ///
    /// Returns `false` and leaves the first outcome untouched if the promise
    /// was already settled.
    pub fn try_complete(&self, outcome: PromiseResult<T>) -> bool {
        let listeners = {
            let mut state = lock(&self.shared.state);
            let listeners = match &mut *state {
                PromiseState::Settled(_) => {
                    debug!("Ignoring completion of an already settled promise");
                    return false;
                }
                PromiseState::Pending(listeners) => std::mem::take(listeners),
            };
            *state = PromiseState::Settled(outcome.clone());
            listeners
        };

        self.shared.settled.send_replace(true);

        for listener in listeners {
            run_listener(listener, &outcome);
        }
        true
    }

    /// Settles the promise with a value.
    pub fn try_success(&self, value: T) -> bool {
        self.try_complete(Ok(value))
    }

    /// Settles the promise with a failure.
    pub fn try_failure(&self, error: CommunicationError) -> bool {
        self.try_complete(Err(error))
    }

    pub fn is_done(&self) -> bool {
        matches!(*lock(&self.shared.state), PromiseState::Settled(_))
    }

    pub fn is_success(&self) -> bool {
        matches!(*lock(&self.shared.state), PromiseState::Settled(Ok(_)))
    }

    /// The outcome, if the promise has settled.
    pub fn outcome(&self) -> Option<PromiseResult<T>> {
        match &*lock(&self.shared.state) {
            PromiseState::Pending(_) => None,
            PromiseState::Settled(outcome) => Some(outcome.clone()),
        }
    }

    /// Registers a listener for the outcome, whatever it is.
    pub fn add_completion_listener<F>(&self, listener: F) -> &Self
    where
        F: FnOnce(&PromiseResult<T>) + Send + 'static,
    {
        let settled = {
            let mut state = lock(&self.shared.state);
            match &mut *state {
                PromiseState::Pending(listeners) => {
                    listeners.push(Box::new(listener));
                    return self;
                }
                PromiseState::Settled(outcome) => outcome.clone(),
            }
        };
        run_listener(Box::new(listener), &settled);
        self
    }

    /// Registers a listener that only runs if the promise succeeds.
    pub fn add_result_listener<F>(&self, listener: F) -> &Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.add_completion_listener(move |outcome| {
            if let Ok(value) = outcome {
                listener(value);
            }
        })
    }

    /// Registers a listener that only runs if the promise fails.
    pub fn add_failure_listener<F>(&self, listener: F) -> &Self
    where
        F: FnOnce(&CommunicationError) + Send + 'static,
    {
        self.add_completion_listener(move |outcome| {
            if let Err(error) = outcome {
                listener(error);
            }
        })
    }

    /// Suspends until the promise settles.
    pub async fn wait(&self) -> PromiseResult<T> {
        let mut settled = self.shared.settled.subscribe();
        // The sender lives in `shared`, which `self` keeps alive.
        let _ = settled.wait_for(|done| *done).await;
        self.outcome().unwrap_or_else(|| {
            Err(CommunicationError::internal(
                "promise signalled without an outcome",
            ))
        })
    }

    /// Suspends until the promise settles or `timeout` elapses.
    ///
    /// On expiry a [`CommunicationError::Timeout`] is returned but the
    /// promise itself stays pending.
    pub async fn await_timeout(&self, timeout: Duration) -> PromiseResult<T> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(CommunicationError::timeout(timeout)),
        }
    }

    /// Derives a promise settled from this one's outcome.
    ///
    /// Failures pass through unchanged; successes go through `f`.
    pub fn then<U, F>(&self, f: F) -> CommunicationPromise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> PromiseResult<U> + Send + 'static,
    {
        let derived = CommunicationPromise::new();
        let target = derived.clone();
        self.add_completion_listener(move |outcome| {
            let next = match outcome {
                Ok(value) => f(value.clone()),
                Err(error) => Err(error.clone()),
            };
            target.try_complete(next);
        });
        derived
    }

    /// Derives a promise by mapping the success value.
    pub fn map<U, F>(&self, f: F) -> CommunicationPromise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.then(move |value| Ok(f(value)))
    }

    /// Derives a promise that follows another promise produced from the success value.
    pub fn then_promise<U, F>(&self, f: F) -> CommunicationPromise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> CommunicationPromise<U> + Send + 'static,
    {
        let derived = CommunicationPromise::new();
        let target = derived.clone();
        self.add_completion_listener(move |outcome| match outcome {
            Ok(value) => {
                f(value.clone()).copy_to(&target);
            }
            Err(error) => {
                target.try_failure(error.clone());
            }
        });
        derived
    }

    /// Completes `other` with this promise's outcome once it settles.
    pub fn copy_to(&self, other: &CommunicationPromise<T>) {
        let other = other.clone();
        self.add_completion_listener(move |outcome| {
            other.try_complete(outcome.clone());
        });
    }
}

fn run_listener<T>(listener: Listener<T>, outcome: &PromiseResult<T>) {
    if catch_unwind(AssertUnwindSafe(|| listener(outcome))).is_err() {
        error!("💥 Promise listener panicked; remaining listeners still run");
    }
}

impl<T: Clone + Send + 'static> IntoFuture for CommunicationPromise<T> {
    type Output = PromiseResult<T>;
    type IntoFuture = BoxFuture<'static, PromiseResult<T>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}

impl<T> fmt::Debug for CommunicationPromise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*lock(&self.shared.state) {
            PromiseState::Pending(_) => "pending",
            PromiseState::Settled(Ok(_)) => "succeeded",
            PromiseState::Settled(Err(_)) => "failed",
        };
        f.debug_struct("CommunicationPromise")
            .field("state", &state)
            .finish()
    }
}
