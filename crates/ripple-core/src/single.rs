//! Deferred single-value pipelines.
//!
//! A [`Single`] is a description of work that yields at most one value.
//! Nothing runs until [`Single::subscribe`] is called and the returned
//! future is polled; every subscription re-runs the description from
//! the start.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt};
use futures_util::stream::{self, StreamExt};

use crate::error::{BoxError, PipelineError, PipelineResult};
use crate::stream::Stream;

/// Outcome of one subscription: a value, empty, or a failure.
pub type Resolution<T> = PipelineResult<Option<T>>;

type Source<T> = Arc<dyn Fn() -> BoxFuture<'static, Resolution<T>> + Send + Sync>;

/// A lazy computation producing zero or one `T`.
pub struct Single<T> {
    source: Source<T>,
}

impl<T> Clone for Single<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
        }
    }
}

impl<T> fmt::Debug for Single<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Single").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Single<T> {
    pub(crate) fn from_source<F>(source: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Resolution<T>> + Send + Sync + 'static,
    {
        Self {
            source: Arc::new(source),
        }
    }

    // ── Factories ──────────────────────────────────────────────

    /// A Single that resolves to `value` on every subscription.
    pub fn just(value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::from_source(move || future::ready(Ok(Some(value.clone()))).boxed())
    }

    /// Strict factory: refuses an absent value at construction time.
    pub fn try_just(value: Option<T>) -> PipelineResult<Self>
    where
        T: Clone + Sync,
    {
        value
            .map(Self::just)
            .ok_or_else(|| PipelineError::AbsentValue("Single::try_just called without a value".into()))
    }

    /// Resolves empty when `value` is `None`, otherwise to the value.
    pub fn just_or_empty(value: Option<T>) -> Self
    where
        T: Clone + Sync,
    {
        match value {
            Some(value) => Self::just(value),
            None => Self::empty(),
        }
    }

    pub fn empty() -> Self {
        Self::from_source(|| future::ready(Ok(None)).boxed())
    }

    pub fn error(err: PipelineError) -> Self {
        Self::from_source(move || future::ready(Err(err.clone())).boxed())
    }

    /// Calls `supplier` once per subscription, when the subscription is polled.
    pub fn from_supplier<F>(supplier: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let supplier = Arc::new(supplier);
        Self::from_source(move || {
            let supplier = supplier.clone();
            async move { Ok(Some(supplier())) }.boxed()
        })
    }

    /// Builds the actual Single lazily, once per subscription.
    pub fn defer<F>(supplier: F) -> Self
    where
        F: Fn() -> Single<T> + Send + Sync + 'static,
    {
        let supplier = Arc::new(supplier);
        Self::from_source(move || {
            let supplier = supplier.clone();
            async move { supplier().subscribe().await }.boxed()
        })
    }

    /// Adopts a one-shot future, such as a request body read.
    ///
    /// The future is not polled until the first subscription and runs at
    /// most once; later subscriptions observe the same outcome.
    pub fn from_future<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = Resolution<T>> + Send + 'static,
        T: Clone + Sync,
    {
        let shared = fut.boxed().shared();
        Self::from_source(move || shared.clone().boxed())
    }

    // ── Evaluation ─────────────────────────────────────────────

    /// Start a new evaluation. Dropping the future cancels it.
    pub fn subscribe(&self) -> BoxFuture<'static, Resolution<T>> {
        (self.source)()
    }

    /// Subscribe and wait for the outcome.
    pub async fn block(&self) -> Resolution<T> {
        self.subscribe().await
    }

    // ── Operators ──────────────────────────────────────────────

    pub fn map<U, F>(self, f: F) -> Single<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Single::from_source(move || {
            let upstream = self.clone();
            let f = f.clone();
            async move { Ok(upstream.subscribe().await?.map(|value| f(value))) }.boxed()
        })
    }

    /// Like [`map`](Self::map), but a failing transform fails the pipeline.
    pub fn try_map<U, E, F>(self, f: F) -> Single<U>
    where
        U: Send + 'static,
        E: Into<BoxError>,
        F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Single::from_source(move || {
            let upstream = self.clone();
            let f = f.clone();
            async move {
                match upstream.subscribe().await? {
                    Some(value) => f(value).map(Some).map_err(PipelineError::transform),
                    None => Ok(None),
                }
            }
            .boxed()
        })
    }

    pub fn filter<P>(self, predicate: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        Self::from_source(move || {
            let upstream = self.clone();
            let predicate = predicate.clone();
            async move { Ok(upstream.subscribe().await?.filter(|value| predicate(value))) }.boxed()
        })
    }

    /// Chain into another Single. Returning `None` ends the pipeline empty.
    pub fn flat_map<U, F>(self, f: F) -> Single<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Option<Single<U>> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Single::from_source(move || {
            let upstream = self.clone();
            let f = f.clone();
            async move {
                match upstream.subscribe().await?.and_then(|value| f(value)) {
                    Some(next) => next.subscribe().await,
                    None => Ok(None),
                }
            }
            .boxed()
        })
    }

    /// Expand the value into a [`Stream`]. Empty stays empty.
    pub fn flat_map_many<U, F>(self, f: F) -> Stream<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Stream<U> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Stream::from_source(move || {
            let upstream = self.clone();
            let f = f.clone();
            stream::once(async move {
                match upstream.subscribe().await {
                    Ok(Some(value)) => f(value).subscribe(),
                    Ok(None) => stream::empty().boxed(),
                    Err(err) => stream::once(future::ready(Err(err))).boxed(),
                }
            })
            .flatten()
            .boxed()
        })
    }

    /// Evaluate `fallback` only if this Single resolves empty.
    pub fn switch_if_empty<F>(self, fallback: F) -> Self
    where
        F: Fn() -> Single<T> + Send + Sync + 'static,
    {
        let fallback = Arc::new(fallback);
        Self::from_source(move || {
            let upstream = self.clone();
            let fallback = fallback.clone();
            async move {
                match upstream.subscribe().await? {
                    Some(value) => Ok(Some(value)),
                    None => fallback().subscribe().await,
                }
            }
            .boxed()
        })
    }

    /// Substitute a fixed value when empty.
    pub fn default_if_empty(self, value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::from_source(move || {
            let upstream = self.clone();
            let value = value.clone();
            async move { Ok(upstream.subscribe().await?.or(Some(value))) }.boxed()
        })
    }

    /// Replace a failure with the Single produced by `recover`.
    ///
    /// `recover` may hand back [`Single::error`] to let the failure through.
    pub fn on_error_resume<F>(self, recover: F) -> Self
    where
        F: Fn(PipelineError) -> Single<T> + Send + Sync + 'static,
    {
        let recover = Arc::new(recover);
        Self::from_source(move || {
            let upstream = self.clone();
            let recover = recover.clone();
            async move {
                match upstream.subscribe().await {
                    Err(err) => recover(err).subscribe().await,
                    resolved => resolved,
                }
            }
            .boxed()
        })
    }

    pub fn on_error_map<F>(self, f: F) -> Self
    where
        F: Fn(PipelineError) -> PipelineError + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::from_source(move || {
            let upstream = self.clone();
            let f = f.clone();
            async move { upstream.subscribe().await.map_err(|err| f(err)) }.boxed()
        })
    }

    /// Observe the value without changing it.
    pub fn do_on_next<F>(self, f: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::from_source(move || {
            let upstream = self.clone();
            let f = f.clone();
            async move {
                let resolved = upstream.subscribe().await?;
                if let Some(value) = &resolved {
                    f(value);
                }
                Ok(resolved)
            }
            .boxed()
        })
    }

    /// Wait for both Singles and combine their values.
    ///
    /// The first side to fail or resolve empty decides the outcome and
    /// cancels the other: a failure becomes
    /// [`PipelineError::UnresolvedDependency`], an empty side makes the
    /// result empty. `combine` runs only when both values are present.
    pub fn zip_with<U, R, F>(self, other: Single<U>, combine: F) -> Single<R>
    where
        U: Send + 'static,
        R: Send + 'static,
        F: Fn(T, U) -> R + Send + Sync + 'static,
    {
        let combine = Arc::new(combine);
        Single::from_source(move || {
            let joined = future::try_join(self.subscribe().map(present), other.subscribe().map(present));
            let combine = combine.clone();
            async move { settle(joined.await).map(|pair| pair.map(|(a, b)| combine(a, b))) }.boxed()
        })
    }

    pub fn zip<U>(self, other: Single<U>) -> Single<(T, U)>
    where
        U: Send + 'static,
    {
        self.zip_with(other, |a, b| (a, b))
    }

    /// View the value as a Stream of zero or one element.
    pub fn flux(self) -> Stream<T> {
        Stream::from_source(move || {
            self.subscribe()
                .into_stream()
                .filter_map(|resolved| future::ready(resolved.transpose()))
                .boxed()
        })
    }
}

/// Why a zip stopped before every input produced a value.
enum Halt {
    Empty,
    Failed(PipelineError),
}

fn present<T>(resolved: Resolution<T>) -> Result<T, Halt> {
    match resolved {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Err(Halt::Empty),
        Err(err) => Err(Halt::Failed(err)),
    }
}

fn settle<V>(joined: Result<V, Halt>) -> Resolution<V> {
    match joined {
        Ok(values) => Ok(Some(values)),
        Err(Halt::Empty) => Ok(None),
        Err(Halt::Failed(err)) => Err(PipelineError::unresolved(err)),
    }
}

/// Zip three Singles into a tuple.
pub fn zip3<A, B, C>(a: Single<A>, b: Single<B>, c: Single<C>) -> Single<(A, B, C)>
where
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
{
    Single::from_source(move || {
        let joined = future::try_join3(
            a.subscribe().map(present),
            b.subscribe().map(present),
            c.subscribe().map(present),
        );
        async move { settle(joined.await) }.boxed()
    })
}

/// Zip any number of Singles, handing the values to `combine` in input order.
pub fn zip_all<T, R, F>(sources: Vec<Single<T>>, combine: F) -> Single<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(Vec<T>) -> R + Send + Sync + 'static,
{
    let combine = Arc::new(combine);
    Single::from_source(move || {
        let joined = future::try_join_all(sources.iter().map(|source| source.subscribe().map(present)));
        let combine = combine.clone();
        async move { settle(joined.await).map(|values| values.map(|values| combine(values))) }.boxed()
    })
}
