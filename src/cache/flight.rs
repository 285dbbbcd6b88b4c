//! Single-flight guard: at most one outstanding loader call per domain.
//!
//! The in-flight slot holds a shared future of the running load so later
//! callers can await the same result instead of starting a duplicate.
//! The slot is cleared by [`FlightRelease`] on drop, which runs whether the
//! loader succeeded, failed or panicked.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;

use crate::error::LoadError;

pub(crate) type FlightOutcome<T> = Result<Arc<T>, LoadError>;

/// Cloneable handle on a running load.
pub(crate) type SharedFlight<T> = Shared<BoxFuture<'static, FlightOutcome<T>>>;

struct Flight<T> {
    id: u64,
    background: bool,
    shared: SharedFlight<T>,
}

/// Result of [`SingleFlightGuard::acquire`].
pub(crate) enum Acquired<T> {
    /// This caller started the load.
    Started(SharedFlight<T>),
    /// A load was already running; the caller joins it.
    AlreadyInFlight {
        shared: SharedFlight<T>,
        background: bool,
    },
}

impl<T> Acquired<T> {
    pub(crate) fn already_in_flight(&self) -> bool {
        matches!(self, Self::AlreadyInFlight { .. })
    }

    pub(crate) fn into_shared(self) -> SharedFlight<T> {
        match self {
            Self::Started(shared) | Self::AlreadyInFlight { shared, .. } => shared,
        }
    }
}

pub(crate) struct SingleFlightGuard<T> {
    slot: Arc<Mutex<Option<Flight<T>>>>,
    next_id: AtomicU64,
}

impl<T: Send + Sync + 'static> SingleFlightGuard<T> {
    pub(crate) fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Join the running load, or start one with `start`.
    ///
    /// `start` receives the release token and must move it into the load
    /// task. It is called with the slot locked, so it must only spawn.
    pub(crate) fn acquire<F>(&self, background: bool, start: F) -> Acquired<T>
    where
        F: FnOnce(FlightRelease<T>) -> SharedFlight<T>,
    {
        let mut slot = self.slot.lock();

        if let Some(flight) = slot.as_ref() {
            return Acquired::AlreadyInFlight {
                shared: flight.shared.clone(),
                background: flight.background,
            };
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let release = FlightRelease {
            slot: Arc::clone(&self.slot),
            id,
        };
        let shared = start(release);

        *slot = Some(Flight {
            id,
            background,
            shared: shared.clone(),
        });

        Acquired::Started(shared)
    }

    pub(crate) fn is_in_flight(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// The running load, if any.
    pub(crate) fn current(&self) -> Option<SharedFlight<T>> {
        self.slot.lock().as_ref().map(|flight| flight.shared.clone())
    }
}

/// Clears the in-flight slot when dropped.
pub(crate) struct FlightRelease<T> {
    slot: Arc<Mutex<Option<Flight<T>>>>,
    id: u64,
}

impl<T> FlightRelease<T> {
    pub(crate) fn release(self) {
        drop(self);
    }
}

impl<T> Drop for FlightRelease<T> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|flight| flight.id == self.id) {
            *slot = None;
        }
    }
}
