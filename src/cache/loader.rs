//! Loader contract.
//!
//! A loader produces the canonical value of exactly one domain from the
//! remote store. It must not write into any other domain: if a screen needs
//! several aggregates, define several domains with their own loaders.

use std::future::Future;
use std::marker::PhantomData;

use futures::future::BoxFuture;

/// Future returned by a loader.
pub type LoadFuture<T> = BoxFuture<'static, anyhow::Result<T>>;

/// App-supplied source of a domain's value.
pub trait Loader<T>: Send + Sync + 'static {
    /// Fetch the current value for `domain`.
    fn load(&self, domain: &str) -> LoadFuture<T>;
}

/// Loader backed by an async closure. Built with [`loader_fn`].
pub struct FnLoader<T, F> {
    f: F,
    _value: PhantomData<fn() -> T>,
}

impl<T, F, Fut> Loader<T> for FnLoader<T, F>
where
    T: Send + 'static,
    F: Fn(&str) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    fn load(&self, domain: &str) -> LoadFuture<T> {
        Box::pin((self.f)(domain))
    }
}

/// Wrap an async closure as a [`Loader`].
///
/// ```ignore
/// let loader = loader_fn(move |_| {
///     let store = store.clone();
///     async move { store.today_totals().await }
/// });
/// ```
pub fn loader_fn<T, F, Fut>(f: F) -> FnLoader<T, F>
where
    T: Send + 'static,
    F: Fn(&str) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    FnLoader {
        f,
        _value: PhantomData,
    }
}
