//! Per-screen integration point.
//!
//! A [`ConsumerBinding`] is what a screen holds. On every activation it
//! classifies its domain and hydrates, serves stale while revalidating, or
//! blocks on a load. While the screen stays mounted it keeps listening to
//! the domain, so writes made elsewhere reach it without a reactivation.
//!
//! The render callback only fires when the shown value actually changes
//! (structural equality), or when the view moves into or out of the
//! loading and failed states.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::domain::{CacheDomain, DomainValue};
use super::entry::{Freshness, Snapshot};
use super::registry::CacheRegistry;
use super::subscriber::{ChangeCause, Notification, SubscriptionId};
use crate::error::{CacheResult, LoadError};

/// What a screen currently shows for its domain.
#[derive(Debug)]
pub enum ViewState<T> {
    /// Never activated.
    Empty,
    /// Waiting on a blocking load.
    Loading,
    /// A value is on screen.
    Ready { value: Arc<T>, freshness: Freshness },
    /// The last blocking load failed and nothing is cached.
    Failed(LoadError),
}

impl<T> Clone for ViewState<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Empty => Self::Empty,
            Self::Loading => Self::Loading,
            Self::Ready { value, freshness } => Self::Ready {
                value: Arc::clone(value),
                freshness: *freshness,
            },
            Self::Failed(err) => Self::Failed(err.clone()),
        }
    }
}

impl<T> ViewState<T> {
    pub fn value(&self) -> Option<&Arc<T>> {
        match self {
            Self::Ready { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn freshness(&self) -> Option<Freshness> {
        match self {
            Self::Ready { freshness, .. } => Some(*freshness),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }
}

type Render<T> = Arc<dyn Fn(&ViewState<T>) + Send + Sync>;

/// Shared between the binding and its subscription callback.
struct View<T> {
    domain: Arc<str>,
    state: Mutex<ViewState<T>>,
    render: Render<T>,
}

impl<T: DomainValue> View<T> {
    /// Replace the view state, rendering only when something visible changed.
    fn present(&self, next: ViewState<T>) {
        let rendered = swap(&mut self.state.lock(), next);
        self.emit(rendered);
    }

    fn emit(&self, rendered: Option<ViewState<T>>) {
        match rendered {
            Some(state) => (self.render)(&state),
            None => debug!("View of {} unchanged, skipping render", self.domain),
        }
    }

    fn on_notification(&self, notification: &Notification<T>) {
        match notification.cause {
            ChangeCause::Loaded | ChangeCause::Mutated => self.present(ViewState::Ready {
                value: Arc::clone(&notification.value),
                freshness: notification.freshness,
            }),
            // Same value, only the freshness label moves
            ChangeCause::Invalidated => {
                if let ViewState::Ready { freshness, .. } = &mut *self.state.lock() {
                    *freshness = notification.freshness;
                }
            }
        }
    }
}

/// Store `next`, returning the state to render if it visibly differs.
fn swap<T: PartialEq>(state: &mut ViewState<T>, next: ViewState<T>) -> Option<ViewState<T>> {
    let visible = differs(state, &next);
    *state = next;
    visible.then(|| state.clone())
}

fn differs<T: PartialEq>(current: &ViewState<T>, next: &ViewState<T>) -> bool {
    match (current, next) {
        (ViewState::Ready { value: a, .. }, ViewState::Ready { value: b, .. }) => {
            !Arc::ptr_eq(a, b) && **a != **b
        }
        (ViewState::Empty, ViewState::Empty) | (ViewState::Loading, ViewState::Loading) => false,
        _ => true,
    }
}

/// A screen's handle on one cache domain.
///
/// Dropping the binding unsubscribes it. Loads it started keep running and
/// still install into the shared domain.
pub struct ConsumerBinding<T: DomainValue> {
    domain: Arc<CacheDomain<T>>,
    view: Arc<View<T>>,
    subscription: SubscriptionId,
}

impl<T: DomainValue> ConsumerBinding<T> {
    /// Bind to an already defined domain. `render` is called with the new
    /// view state whenever it visibly changes.
    pub fn new<R>(registry: &CacheRegistry, domain: &str, render: R) -> CacheResult<Self>
    where
        R: Fn(&ViewState<T>) + Send + Sync + 'static,
    {
        let domain = registry.domain::<T>(domain)?;
        let view = Arc::new(View {
            domain: Arc::from(domain.name()),
            state: Mutex::new(ViewState::Empty),
            render: Arc::new(render),
        });

        let listener = Arc::downgrade(&view);
        let subscription = domain.subscribe(move |notification: &Notification<T>| {
            if let Some(view) = listener.upgrade() {
                view.on_notification(notification);
            }
        });

        Ok(Self {
            domain,
            view,
            subscription,
        })
    }

    pub fn domain(&self) -> &str {
        self.domain.name()
    }

    /// Current view state.
    ///
    /// The freshness label follows the domain, so a reload that returned an
    /// equal value (and therefore did not render) still shows as fresh.
    pub fn view(&self) -> ViewState<T> {
        let mut state = self.view.state.lock();
        if let ViewState::Ready { freshness, .. } = &mut *state {
            *freshness = self.label();
        }
        state.clone()
    }

    /// Classification of the domain as a label for a value on screen. A
    /// value kept past its stale window still reads as stale.
    fn label(&self) -> Freshness {
        match self.domain.classify(self.domain.now()) {
            Freshness::Missing => Freshness::Stale,
            current => current,
        }
    }

    /// The screen became active.
    ///
    /// Fresh and stale entries hydrate immediately. A missing domain shows
    /// the loading state until the load resolves; its failure is returned.
    pub async fn activate(&self) -> CacheResult<ViewState<T>> {
        let now = self.domain.now();
        let cached = self.domain.peek_at(now);

        if cached.freshness.is_missing() {
            self.view.present(ViewState::Loading);
        }

        match self.domain.read_at(now).await {
            Ok(snapshot) => {
                self.show(snapshot);
                Ok(self.view())
            }
            Err(err) => {
                self.view.present(ViewState::Failed(err.clone()));
                Err(err.into())
            }
        }
    }

    /// Show the read result, or the domain's current value if a load or a
    /// mutation replaced it after the read. The view lock is held across the
    /// entry lookup so a notification cannot slip in between.
    fn show(&self, snapshot: Snapshot<T>) {
        let rendered = {
            let mut state = self.view.state.lock();
            let current = self.domain.entry().map(|entry| Arc::clone(entry.value()));
            let Some(value) = current.or(snapshot.value) else {
                return;
            };
            swap(
                &mut state,
                ViewState::Ready {
                    value,
                    freshness: self.label(),
                },
            )
        };
        self.view.emit(rendered);
    }
}

impl<T: DomainValue> Drop for ConsumerBinding<T> {
    fn drop(&mut self) {
        self.domain.unsubscribe(self.subscription);
    }
}

impl<T: DomainValue> std::fmt::Debug for ConsumerBinding<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerBinding")
            .field("domain", &self.domain.name())
            .field("subscription", &self.subscription)
            .finish()
    }
}
