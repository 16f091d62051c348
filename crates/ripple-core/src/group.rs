//! Key partitioning for [`Stream`].
//!
//! One subscription to a grouped stream owns a single router that pulls
//! the parent and files each element into a per-key buffer. Whichever
//! side is polled (the stream of groups, or any one group) drives the
//! parent forward, so a consumer may drain groups one after another, as
//! `concat_map` does, without deadlocking on keys it has not reached yet.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker, ready};

use futures_util::stream::{BoxStream, StreamExt};
use tracing::trace;

use crate::error::{PipelineError, PipelineResult};
use crate::single::Single;
use crate::stream::Stream;

/// Elements of a parent stream that share `key`.
///
/// A group is a view over one parent subscription: its elements are
/// delivered once, to whichever subscriber pulls them first.
pub struct GroupedStream<K, T> {
    key: K,
    values: Stream<T>,
}

impl<K, T: Send + 'static> GroupedStream<K, T> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn values(&self) -> Stream<T> {
        self.values.clone()
    }

    pub fn into_values(self) -> Stream<T> {
        self.values
    }

    pub fn count(&self) -> Single<u64> {
        self.values.clone().count()
    }
}

type KeyFn<K, T> = Arc<dyn Fn(&T) -> K + Send + Sync>;
type SharedRouter<K, T> = Arc<Mutex<Router<K, T>>>;

struct Router<K, T> {
    parent: BoxStream<'static, PipelineResult<T>>,
    key_fn: KeyFn<K, T>,
    slots: HashMap<K, usize>,
    buffers: Vec<VecDeque<T>>,
    readers: Vec<Option<Waker>>,
    unannounced: VecDeque<(K, usize)>,
    announcer: Option<Waker>,
    finished: bool,
    failure: Option<PipelineError>,
}

fn lock<K, T>(router: &SharedRouter<K, T>) -> MutexGuard<'_, Router<K, T>> {
    router.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K: Eq + Hash + Clone, T> Router<K, T> {
    fn new(parent: BoxStream<'static, PipelineResult<T>>, key_fn: KeyFn<K, T>) -> Self {
        Self {
            parent,
            key_fn,
            slots: HashMap::new(),
            buffers: Vec::new(),
            readers: Vec::new(),
            unannounced: VecDeque::new(),
            announcer: None,
            finished: false,
            failure: None,
        }
    }

    /// Pull one item from the parent and file it.
    fn pump(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        match ready!(self.parent.poll_next_unpin(cx)) {
            Some(Ok(value)) => self.route(value),
            Some(Err(err)) => {
                self.failure = Some(err);
                self.finish();
            }
            None => self.finish(),
        }
        Poll::Ready(())
    }

    fn route(&mut self, value: T) {
        let key = (self.key_fn)(&value);
        let slot = match self.slots.get(&key) {
            Some(&slot) => slot,
            None => {
                let slot = self.buffers.len();
                trace!(slot, "group opened");
                self.slots.insert(key.clone(), slot);
                self.buffers.push(VecDeque::new());
                self.readers.push(None);
                self.unannounced.push_back((key, slot));
                if let Some(waker) = self.announcer.take() {
                    waker.wake();
                }
                slot
            }
        };
        self.buffers[slot].push_back(value);
        if let Some(waker) = self.readers[slot].take() {
            waker.wake();
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        if let Some(waker) = self.announcer.take() {
            waker.wake();
        }
        for waker in self.readers.iter_mut().filter_map(Option::take) {
            waker.wake();
        }
    }
}

pub(crate) fn group_by<K, T>(upstream: Stream<T>, key_fn: KeyFn<K, T>) -> Stream<GroupedStream<K, T>>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Send + 'static,
{
    Stream::from_source(move || {
        let router = Router::new(upstream.subscribe(), key_fn.clone());
        Groups {
            router: Arc::new(Mutex::new(router)),
        }
        .boxed()
    })
}

/// The outer stream: announces each group when its key first appears.
struct Groups<K, T> {
    router: SharedRouter<K, T>,
}

impl<K, T> futures_util::Stream for Groups<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Send + 'static,
{
    type Item = PipelineResult<GroupedStream<K, T>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut router = lock(&self.router);
        loop {
            if let Some((key, slot)) = router.unannounced.pop_front() {
                let reader_router = self.router.clone();
                let values = Stream::from_source(move || {
                    GroupReader {
                        router: reader_router.clone(),
                        slot,
                    }
                    .boxed()
                });
                return Poll::Ready(Some(Ok(GroupedStream { key, values })));
            }
            if router.finished {
                return Poll::Ready(router.failure.clone().map(Err));
            }
            router.announcer = Some(cx.waker().clone());
            ready!(router.pump(cx));
        }
    }
}

/// One group's elements, drained from its buffer.
struct GroupReader<K, T> {
    router: SharedRouter<K, T>,
    slot: usize,
}

impl<K, T> futures_util::Stream for GroupReader<K, T>
where
    K: Eq + Hash + Clone,
{
    type Item = PipelineResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let slot = self.slot;
        let mut router = lock(&self.router);
        loop {
            if let Some(value) = router.buffers[slot].pop_front() {
                return Poll::Ready(Some(Ok(value)));
            }
            if router.finished {
                return Poll::Ready(router.failure.clone().map(Err));
            }
            router.readers[slot] = Some(cx.waker().clone());
            ready!(router.pump(cx));
        }
    }
}
