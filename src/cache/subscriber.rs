//! Change subscriptions.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::entry::Freshness;

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        Self(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Which writer changed the domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeCause {
    Loaded,
    Mutated,
    Invalidated,
}

/// Delivered to subscribers after a domain changed.
#[derive(Debug)]
pub struct Notification<T> {
    pub domain: Arc<str>,
    pub cause: ChangeCause,
    pub freshness: Freshness,
    pub value: Arc<T>,
}

impl<T> Clone for Notification<T> {
    fn clone(&self) -> Self {
        Self {
            domain: Arc::clone(&self.domain),
            cause: self.cause,
            freshness: self.freshness,
            value: Arc::clone(&self.value),
        }
    }
}

pub(crate) type Callback<T> = Arc<dyn Fn(&Notification<T>) + Send + Sync>;

/// Subscriber list of one domain.
pub(crate) struct Subscribers<T> {
    list: Mutex<Vec<(SubscriptionId, Callback<T>)>>,
}

impl<T> Subscribers<T> {
    pub(crate) fn new() -> Self {
        Self {
            list: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, callback: Callback<T>) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.list.lock().push((id, callback));
        id
    }

    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        let mut list = self.list.lock();
        let before = list.len();
        list.retain(|(sid, _)| *sid != id);
        list.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.list.lock().len()
    }

    /// Invoke every callback. The list lock is released first so a callback
    /// may subscribe or unsubscribe.
    pub(crate) fn notify(&self, notification: &Notification<T>) {
        let callbacks: Vec<Callback<T>> = self
            .list
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(notification);
        }
    }
}
