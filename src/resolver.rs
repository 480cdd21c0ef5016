//! Resolver — a single-assignment future correlating a reply with its
//! original request.
//!
//! One settlement (`set_result` or `set_error`), any number of reads
//! (`wait` after settlement keeps returning the same outcome). A second
//! settlement fails with [`RpcError::AlreadySettled`] instead of silently
//! overwriting the first — double delivery is a bug worth surfacing.
//!
//! Used by the session for in-flight request entries and by task contexts
//! to park background work until the submitter answers a nested request.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Notify;

use crate::error::{RpcError, RpcResult};

struct Inner<T> {
    slot: Mutex<Option<RpcResult<T>>>,
    notify: Notify,
}

/// Write-once result/error slot with an async wait primitive.
///
/// Cheaply cloneable; all clones observe the same settlement.
pub struct Resolver<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Resolver {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("done", &self.done())
            .finish()
    }
}

impl<T> Default for Resolver<T>
where
    T: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Resolver<T> {
    /// Returns `true` once the resolver has been settled.
    pub fn done(&self) -> bool {
        self.lock_slot().is_some()
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Option<RpcResult<T>>> {
        self.inner
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Resolver<T>
where
    T: Clone,
{
    /// Create an unsettled resolver.
    pub fn new() -> Self {
        Resolver {
            inner: Arc::new(Inner {
                slot: Mutex::new(None),
                notify: Notify::new(),
            }),
        }
    }

    /// Settle with a successful value.
    ///
    /// Fails with [`RpcError::AlreadySettled`] if the resolver was already
    /// settled (either way).
    pub fn set_result(&self, value: T) -> RpcResult<()> {
        self.settle(Ok(value))
    }

    /// Settle with an error.
    ///
    /// Fails with [`RpcError::AlreadySettled`] if the resolver was already
    /// settled (either way).
    pub fn set_error(&self, error: RpcError) -> RpcResult<()> {
        self.settle(Err(error))
    }

    /// Wait for settlement and return the outcome.
    ///
    /// May be called repeatedly (and by multiple clones); after settlement
    /// every call returns the same stored value or error.
    pub async fn wait(&self) -> RpcResult<T> {
        loop {
            // Register interest before the check so a settlement racing
            // with subscription cannot be missed.
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(outcome) = self.lock_slot().clone() {
                return outcome;
            }

            notified.await;
        }
    }

    fn settle(&self, outcome: RpcResult<T>) -> RpcResult<()> {
        {
            let mut slot = self.lock_slot();
            if slot.is_some() {
                return Err(RpcError::AlreadySettled(
                    "resolver already completed".to_string(),
                ));
            }
            *slot = Some(outcome);
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }
}
