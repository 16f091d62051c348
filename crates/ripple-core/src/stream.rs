//! Deferred multi-value pipelines.
//!
//! A [`Stream`] describes an ordered, possibly unbounded, sequence. Each
//! call to [`Stream::subscribe`] builds a fresh pull-based
//! `futures` stream from that description; dropping it cancels the
//! subscription and releases anything it holds.
//!
//! Every subscription stops after the first error: elements emitted
//! before the failure are delivered, then the error, then nothing.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use futures_util::future::{self, FutureExt};
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};

use crate::error::{BoxError, PipelineError, PipelineResult};
use crate::group::{self, GroupedStream};
use crate::key_count::KeyCount;
use crate::single::Single;

type Source<T> = Arc<dyn Fn() -> BoxStream<'static, PipelineResult<T>> + Send + Sync>;

/// A lazy, ordered sequence of `T`.
pub struct Stream<T> {
    source: Source<T>,
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
        }
    }
}

impl<T> fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> From<Single<T>> for Stream<T> {
    fn from(single: Single<T>) -> Self {
        single.flux()
    }
}

impl<T: Send + 'static> Stream<T> {
    pub(crate) fn from_source<F>(source: F) -> Self
    where
        F: Fn() -> BoxStream<'static, PipelineResult<T>> + Send + Sync + 'static,
    {
        Self {
            source: Arc::new(source),
        }
    }

    // ── Factories ──────────────────────────────────────────────

    pub fn just(values: Vec<T>) -> Self
    where
        T: Clone + Sync,
    {
        Self::from_iterable(values)
    }

    /// Replays `iterable` from the beginning on every subscription.
    pub fn from_iterable<I>(iterable: I) -> Self
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
        I::IntoIter: Send + 'static,
    {
        Self::from_source(move || stream::iter(iterable.clone().into_iter().map(Ok::<T, PipelineError>)).boxed())
    }

    pub fn empty() -> Self {
        Self::from_source(|| stream::empty().boxed())
    }

    pub fn error(err: PipelineError) -> Self {
        Self::from_source(move || stream::once(future::ready(Err(err.clone()))).boxed())
    }

    /// Unbounded sequence `seed, f(seed), f(f(seed)), ...`.
    ///
    /// Values are computed only as the consumer pulls them.
    pub fn iterate<F>(seed: T, f: F) -> Self
    where
        T: Clone + Sync,
        F: Fn(&T) -> T + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::from_source(move || {
            let seed = seed.clone();
            let f = f.clone();
            stream::unfold(None, move |previous: Option<T>| {
                let next = match &previous {
                    Some(previous) => f(previous),
                    None => seed.clone(),
                };
                future::ready(Some((Ok::<T, PipelineError>(next.clone()), Some(next))))
            })
            .boxed()
        })
    }

    /// Builds the actual Stream lazily, once per subscription.
    pub fn defer<F>(supplier: F) -> Self
    where
        F: Fn() -> Stream<T> + Send + Sync + 'static,
    {
        let supplier = Arc::new(supplier);
        Self::from_source(move || {
            let supplier = supplier.clone();
            stream::once(async move { supplier().subscribe() }).flatten().boxed()
        })
    }

    /// Ties a resource to each subscription.
    ///
    /// `acquire` runs when the subscription is first polled; the resource
    /// is dropped when the subscription completes or is dropped.
    pub fn using<R, A, B>(acquire: A, body: B) -> Self
    where
        R: Send + 'static,
        A: Fn() -> R + Send + Sync + 'static,
        B: Fn(&R) -> Stream<T> + Send + Sync + 'static,
    {
        let acquire = Arc::new(acquire);
        let body = Arc::new(body);
        Self::from_source(move || {
            let acquire = acquire.clone();
            let body = body.clone();
            stream::once(async move {
                let resource = acquire();
                let inner = body(&resource).subscribe();
                stream::unfold((resource, inner), |(resource, mut inner)| async move {
                    let item = inner.next().await;
                    item.map(|item| (item, (resource, inner)))
                })
            })
            .flatten()
            .boxed()
        })
    }

    /// Adopt a factory of `futures` streams, called once per subscription.
    ///
    /// A failing item ends the subscription like any other failure.
    pub fn from_factory<F>(factory: F) -> Self
    where
        F: Fn() -> BoxStream<'static, PipelineResult<T>> + Send + Sync + 'static,
    {
        Self::from_source(factory)
    }

    // ── Evaluation ─────────────────────────────────────────────

    /// Start a new evaluation.
    pub fn subscribe(&self) -> BoxStream<'static, PipelineResult<T>> {
        stop_after_error((self.source)())
    }

    // ── Operators ──────────────────────────────────────────────

    pub fn map<U, F>(self, f: F) -> Stream<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Stream::from_source(move || {
            let f = f.clone();
            self.subscribe().map(move |item| item.map(|value| f(value))).boxed()
        })
    }

    pub fn try_map<U, E, F>(self, f: F) -> Stream<U>
    where
        U: Send + 'static,
        E: Into<BoxError>,
        F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Stream::from_source(move || {
            let f = f.clone();
            self.subscribe()
                .map(move |item| item.and_then(|value| f(value).map_err(PipelineError::transform)))
                .boxed()
        })
    }

    pub fn filter<P>(self, predicate: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        Self::from_source(move || {
            let predicate = predicate.clone();
            self.subscribe()
                .filter(move |item| future::ready(item.as_ref().map_or(true, |value| predicate(value))))
                .boxed()
        })
    }

    pub fn do_on_next<F>(self, f: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::from_source(move || {
            let f = f.clone();
            self.subscribe()
                .inspect(move |item| {
                    if let Ok(value) = item {
                        f(value);
                    }
                })
                .boxed()
        })
    }

    /// First `n` elements; upstream is not pulled past the n-th.
    pub fn take(self, n: usize) -> Self {
        Self::from_source(move || self.subscribe().take(n).boxed())
    }

    /// Drop repeats, keeping first-seen order.
    pub fn distinct(self) -> Self
    where
        T: Eq + Hash + Clone,
    {
        Self::from_source(move || {
            let mut seen = HashSet::new();
            self.subscribe()
                .filter(move |item| {
                    future::ready(match item {
                        Ok(value) => seen.insert(value.clone()),
                        Err(_) => true,
                    })
                })
                .boxed()
        })
    }

    /// Map each element to a nested pipeline and run them one at a time.
    ///
    /// The nested pipeline for an element is created only after the
    /// previous one has completed, so outputs never interleave.
    pub fn concat_map<U, S, F>(self, f: F) -> Stream<U>
    where
        U: Send + 'static,
        S: Into<Stream<U>>,
        F: Fn(T) -> S + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Stream::from_source(move || {
            let f = f.clone();
            self.subscribe()
                .map(move |item| match item {
                    Ok(value) => {
                        let nested: Stream<U> = f(value).into();
                        nested.subscribe()
                    }
                    Err(err) => stream::once(future::ready(Err(err))).boxed(),
                })
                .flatten()
                .boxed()
        })
    }

    /// Run up to `concurrency` nested pipelines at once, emitting their
    /// outputs in input order.
    ///
    /// Each nested pipeline is buffered until its turn, so nested
    /// pipelines must be finite.
    pub fn flat_map_sequential<U, S, F>(self, f: F, concurrency: usize) -> Stream<U>
    where
        U: Send + 'static,
        S: Into<Stream<U>>,
        F: Fn(T) -> S + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Stream::from_source(move || {
            let f = f.clone();
            self.subscribe()
                .map(move |item| {
                    let f = f.clone();
                    async move {
                        match item {
                            Ok(value) => {
                                let nested: Stream<U> = f(value).into();
                                nested.subscribe().collect::<Vec<_>>().await
                            }
                            Err(err) => vec![Err(err)],
                        }
                    }
                })
                .buffered(concurrency.max(1))
                .flat_map(stream::iter)
                .boxed()
        })
    }

    /// Pair elements positionally; completes with the shorter side.
    ///
    /// Both sides are pulled for every pair, so a failure on either side
    /// surfaces as [`PipelineError::UnresolvedDependency`] even when the
    /// other side has already completed.
    pub fn zip_with<U, R, F>(self, other: Stream<U>, combine: F) -> Stream<R>
    where
        U: Send + 'static,
        R: Send + 'static,
        F: Fn(T, U) -> R + Send + Sync + 'static,
    {
        let combine = Arc::new(combine);
        Stream::from_source(move || {
            let combine = combine.clone();
            stream::unfold(
                (self.subscribe(), other.subscribe()),
                move |(mut left, mut right)| {
                    let combine = combine.clone();
                    async move {
                        let item = match future::join(left.next(), right.next()).await {
                            (Some(Err(err)), _) | (_, Some(Err(err))) => Err(PipelineError::unresolved(err)),
                            (Some(Ok(a)), Some(Ok(b))) => Ok(combine(a, b)),
                            _ => return None,
                        };
                        Some((item, (left, right)))
                    }
                },
            )
            .boxed()
        })
    }

    pub fn zip<U>(self, other: Stream<U>) -> Stream<(T, U)>
    where
        U: Send + 'static,
    {
        self.zip_with(other, |a, b| (a, b))
    }

    /// Partition by key. Groups are emitted in first-seen key order and
    /// receive their elements in arrival order.
    pub fn group_by<K, F>(self, key_fn: F) -> Stream<GroupedStream<K, T>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        group::group_by(self, Arc::new(key_fn))
    }

    /// Count elements per key, keeping first-seen key order.
    pub fn count_by_key<K, F>(self, key_fn: F) -> Single<KeyCount<K>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        self.group_by(key_fn)
            .concat_map(|group| {
                let key = group.key().clone();
                group.count().map(move |count| KeyCount::single(key.clone(), count))
            })
            .reduce(KeyCount::merge)
    }

    /// Left fold. Empty streams resolve empty; unbounded streams never resolve.
    pub fn reduce<F>(self, f: F) -> Single<T>
    where
        F: Fn(T, T) -> T + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Single::from_source(move || {
            let f = f.clone();
            self.subscribe()
                .try_fold(None, move |acc, value| {
                    future::ready(Ok(Some(match acc {
                        Some(acc) => f(acc, value),
                        None => value,
                    })))
                })
                .boxed()
        })
    }

    /// Number of elements, available once the stream completes.
    pub fn count(self) -> Single<u64> {
        Single::from_source(move || {
            self.subscribe()
                .try_fold(0u64, |count, _| future::ready(Ok(count + 1)))
                .map(|counted| counted.map(Some))
                .boxed()
        })
    }

    pub fn collect_list(self) -> Single<Vec<T>> {
        Single::from_source(move || {
            self.subscribe()
                .try_collect::<Vec<T>>()
                .map(|collected| collected.map(Some))
                .boxed()
        })
    }

    /// Replace the remainder of a failing stream with `recover(err)`.
    pub fn on_error_resume<F>(self, recover: F) -> Self
    where
        F: Fn(PipelineError) -> Stream<T> + Send + Sync + 'static,
    {
        let recover = Arc::new(recover);
        Self::from_source(move || {
            let recover = recover.clone();
            self.subscribe()
                .flat_map(move |item| match item {
                    Ok(value) => stream::once(future::ready(Ok(value))).boxed(),
                    Err(err) => recover(err).subscribe(),
                })
                .boxed()
        })
    }
}

fn stop_after_error<T: Send + 'static>(
    inner: BoxStream<'static, PipelineResult<T>>,
) -> BoxStream<'static, PipelineResult<T>> {
    inner
        .scan(false, |failed, item| {
            if *failed {
                return future::ready(None);
            }
            *failed = item.is_err();
            future::ready(Some(item))
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    async fn values<T: Send + 'static>(stream: Stream<T>) -> Vec<T> {
        stream.collect_list().block().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn iterate_take_is_bounded() {
        let first = values(Stream::iterate(0u32, |n| n + 1).take(10)).await;
        assert_eq!(first, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn subscriptions_restart_from_source() {
        let stream = Stream::just(vec!["Hello", "World"]);
        assert_eq!(values(stream.clone()).await, vec!["Hello", "World"]);
        assert_eq!(values(stream).await, vec!["Hello", "World"]);
    }

    #[tokio::test]
    async fn chaining_runs_nothing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let stream = Stream::defer(move || {
            seen.fetch_add(1, Ordering::SeqCst);
            Stream::just(vec![1, 2, 3])
        })
        .map(|n| n * 2);

        let subscription = stream.subscribe();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        drop(subscription);
        assert_eq!(values(stream).await, vec![2, 4, 6]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelling_unbounded_stream_releases_resource() {
        struct Lease(Arc<AtomicBool>);
        impl Drop for Lease {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let released = Arc::new(AtomicBool::new(false));
        let produced = Arc::new(AtomicUsize::new(0));
        let lease_flag = released.clone();
        let counter = produced.clone();
        let counting = Stream::using(
            move || Lease(lease_flag.clone()),
            move |_lease| {
                let counter = counter.clone();
                Stream::iterate(0u64, |n| n + 1).do_on_next(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            },
        );

        let mut subscription = counting.subscribe();
        for expected in 0..3 {
            assert_eq!(subscription.next().await.unwrap().unwrap(), expected);
        }
        assert!(!released.load(Ordering::SeqCst));

        drop(subscription);
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(produced.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn distinct_keeps_first_seen_order() {
        let basket = vec!["kiwi", "orange", "lemon", "orange", "lemon", "kiwi"];
        assert_eq!(values(Stream::just(basket).distinct()).await, vec!["kiwi", "orange", "lemon"]);
    }

    #[tokio::test]
    async fn count_by_key_follows_first_seen_order() {
        let basket = vec!["kiwi", "orange", "lemon", "orange", "lemon", "kiwi"];
        let counts = Stream::just(basket).count_by_key(|f| *f).block().await.unwrap().unwrap();
        let entries: Vec<_> = counts.iter().map(|(k, n)| (*k, *n)).collect();
        assert_eq!(entries, vec![("kiwi", 2), ("orange", 2), ("lemon", 2)]);
    }

    #[tokio::test]
    async fn concat_map_never_interleaves() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let recorder = log.clone();
        let baskets = vec![vec!["a1", "a2"], vec!["b1"], vec!["c1", "c2", "c3"]];
        let flattened = Stream::just(baskets).concat_map(move |basket| {
            let recorder = recorder.clone();
            Stream::just(basket).do_on_next(move |item| recorder.lock().unwrap().push(*item))
        });

        let out = values(flattened).await;
        assert_eq!(out, vec!["a1", "a2", "b1", "c1", "c2", "c3"]);
        assert_eq!(*log.lock().unwrap(), out);
    }

    #[tokio::test]
    async fn concat_map_of_singles_keeps_order() {
        let sizes = Stream::just(vec![vec![1, 2], vec![3], vec![]])
            .concat_map(|basket: Vec<i32>| Stream::just(basket).count());
        assert_eq!(values(sizes).await, vec![2, 1, 0]);
    }

    #[tokio::test]
    async fn flat_map_sequential_reorders_output() {
        let delayed = Stream::just(vec![30u64, 0, 10]).flat_map_sequential(
            |millis| {
                Single::defer(move || {
                    Single::from_future(async move {
                        tokio::time::sleep(Duration::from_millis(millis)).await;
                        Ok(Some(millis))
                    })
                })
            },
            3,
        );
        assert_eq!(values(delayed).await, vec![30, 0, 10]);
    }

    #[tokio::test]
    async fn zip_completes_with_shortest() {
        let zipped = Stream::just(vec![1, 2, 3]).zip_with(Stream::iterate(10, |n| n + 10), |a, b| a + b);
        assert_eq!(values(zipped).await, vec![11, 22, 33]);
    }

    #[tokio::test]
    async fn zip_failure_beside_completed_side_is_unresolved() {
        let failing = || Stream::<i32>::error(PipelineError::transform("boom"));

        let left_failed = failing().zip_with(Stream::<i32>::empty(), |a, b| a + b);
        let right_failed = Stream::<i32>::empty().zip(failing());
        assert!(matches!(
            left_failed.collect_list().block().await,
            Err(PipelineError::UnresolvedDependency(_))
        ));
        assert!(matches!(
            right_failed.collect_list().block().await,
            Err(PipelineError::UnresolvedDependency(_))
        ));
    }

    #[tokio::test]
    async fn zip_failure_mid_stream_ends_after_pairs() {
        let parsed = Stream::just(vec!["1", "x", "3"]).try_map(|s| s.parse::<i32>());
        let items: Vec<_> = Stream::just(vec![10, 20, 30]).zip(parsed).subscribe().collect().await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &(10, 1));
        assert!(matches!(items[1], Err(PipelineError::UnresolvedDependency(_))));
    }

    #[tokio::test]
    async fn from_factory_builds_per_subscription() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let adopted = Stream::from_factory(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            stream::iter(vec![Ok(1), Ok(2)]).boxed()
        });
        assert_eq!(values(adopted.clone()).await, vec![1, 2]);
        assert_eq!(values(adopted).await, vec![1, 2]);
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn reduce_and_count() {
        let sum = Stream::just(vec![1, 2, 3, 4]).reduce(|a, b| a + b);
        assert_eq!(sum.block().await.unwrap(), Some(10));

        let empty = Stream::<i32>::empty().reduce(|a, b| a + b);
        assert_eq!(empty.block().await.unwrap(), None);

        let count = Stream::iterate(0, |n| n + 1).take(7).count();
        assert_eq!(count.block().await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn failure_stops_after_emitted_elements() {
        let parsed = Stream::just(vec!["1", "2", "x", "4"]).try_map(|s| s.parse::<i32>());
        let items: Vec<_> = parsed.subscribe().collect().await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap(), &1);
        assert_eq!(items[1].as_ref().unwrap(), &2);
        assert!(matches!(items[2], Err(PipelineError::Transform(_))));
    }

    #[tokio::test]
    async fn collect_list_of_failing_stream_fails() {
        let parsed = Stream::just(vec!["1", "x"]).try_map(|s| s.parse::<i32>()).collect_list();
        assert!(parsed.block().await.is_err());
    }

    #[tokio::test]
    async fn on_error_resume_replaces_remainder() {
        let recovered = Stream::just(vec!["1", "2", "x", "4"])
            .try_map(|s| s.parse::<i32>())
            .on_error_resume(|_| Stream::just(vec![-1]));
        assert_eq!(values(recovered).await, vec![1, 2, -1]);
    }

    #[tokio::test]
    async fn filter_passes_matching() {
        let evens = Stream::iterate(0, |n| n + 1).filter(|n| n % 2 == 0).take(3);
        assert_eq!(values(evens).await, vec![0, 2, 4]);
    }
}
