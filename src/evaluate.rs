//! Evaluator/Combiner Protocol
//!
//! A parallel operation is pushed down onto a flow's partitions:
//!
//! ```text
//!   partition 0 ──► collector 0 ──► complete ──► projection ──┐
//!   partition 1 ──► collector 1 ──► complete ──► projection ──┼──► combiner ──► R
//!   partition n ──► collector n ──► complete ──► projection ──┘
//! ```
//!
//! Every element reaches exactly one collector exactly once. At most
//! `degree_of_parallelism` collectors are active at a time, and projected
//! results reach the combiner in partition order, so an associative combiner
//! gives a deterministic result.
//!
//! When a collector fails no further collectors start; the ones already
//! running are awaited. Several failures come back as one `Aggregate`.
//!
//! A collector owns a child of the ambient cancellation token. Cancelling it
//! stops delivery to that collector only; its partial result is still
//! projected. Cancelling the ambient token fails the whole evaluation.

use crate::cluster::WorkerRef;
use crate::context::FlowContext;
use crate::error::{AggregateError, FlowError, FlowResult};
use crate::flow::PersistedFlow;
use crate::partition::split_weighted;
use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, FuturesOrdered, StreamExt};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What a collector learns about where it runs
#[derive(Debug, Clone)]
pub struct CollectorContext {
    pub worker: WorkerRef,
    /// Index of the partition this collector consumes
    pub partition: usize,
    /// Token the collector may cancel to stop delivery early
    pub cancel: CancellationToken,
}

/// Accumulates the elements of one partition
pub trait Collector<T>: Send {
    type Partial: Send + 'static;

    fn accept(&mut self, item: T);

    fn cancellation_token(&self) -> &CancellationToken;

    fn complete(self) -> Self::Partial;
}

type Projection<P, I> = Arc<dyn Fn(P) -> BoxFuture<'static, FlowResult<I>> + Send + Sync>;

/// Collector factory, projection and combiner for one evaluation
pub struct Evaluation<T, C: Collector<T>, I, R> {
    factory: Arc<dyn Fn(CollectorContext) -> C + Send + Sync>,
    projection: Projection<C::Partial, I>,
    combiner: Box<dyn FnOnce(Vec<I>) -> FlowResult<R> + Send>,
    _element: PhantomData<fn(T)>,
}

impl<T, C: Collector<T>, I, R> Evaluation<T, C, I, R> {
    pub fn new<F, P, Fut, K>(factory: F, projection: P, combiner: K) -> Self
    where
        F: Fn(CollectorContext) -> C + Send + Sync + 'static,
        P: Fn(C::Partial) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FlowResult<I>> + Send + 'static,
        K: FnOnce(Vec<I>) -> FlowResult<R> + Send + 'static,
    {
        Evaluation {
            factory: Arc::new(factory),
            projection: Arc::new(move |partial: C::Partial| projection(partial).boxed()),
            combiner: Box::new(combiner),
            _element: PhantomData,
        }
    }
}

/// Capabilities of a lazily evaluated, partitioned collection
pub trait CloudFlow<T>: Send + Sync {
    /// Preferred number of concurrent collectors; `None` defers to the context
    fn degree_of_parallelism(&self) -> Option<usize> {
        None
    }

    fn evaluate<'a, C, I, R>(
        &'a self,
        ctx: &'a FlowContext,
        evaluation: Evaluation<T, C, I, R>,
    ) -> BoxFuture<'a, FlowResult<R>>
    where
        C: Collector<T> + 'static,
        I: Send + 'static,
        R: Send + 'static;

    /// The flow itself when it is already persisted
    fn as_persisted(&self) -> Option<&PersistedFlow<T>> {
        None
    }

    /// Element count when known without evaluation
    fn known_count(&self) -> Option<u64> {
        None
    }

    /// Gather every element, in partition order
    fn collect<'a>(&'a self, ctx: &'a FlowContext) -> BoxFuture<'a, FlowResult<Vec<T>>>
    where
        T: Send + 'static,
        Self: Sized,
    {
        self.evaluate(
            ctx,
            Evaluation::new(
                ListCollector::<T>::new,
                |(_, items): (WorkerRef, Vec<T>)| future::ready(Ok::<_, FlowError>(items)),
                |parts: Vec<Vec<T>>| Ok(parts.into_iter().flatten().collect()),
            ),
        )
    }
}

/// Run `evaluation` over per-partition element streams
///
/// `sources` pairs each partition with the worker it is placed on.
pub(crate) async fn evaluate_partitions<T, C, I, R>(
    ctx: &FlowContext,
    degree_of_parallelism: usize,
    sources: Vec<(WorkerRef, BoxStream<'static, FlowResult<T>>)>,
    evaluation: Evaluation<T, C, I, R>,
) -> FlowResult<R>
where
    T: Send + 'static,
    C: Collector<T> + 'static,
    I: Send + 'static,
    R: Send + 'static,
{
    ctx.check_cancelled()?;
    let Evaluation {
        factory,
        projection,
        combiner,
        ..
    } = evaluation;

    // Tears down running collectors if this future is dropped
    let scope = ctx.cancellation_token().child_token();
    let _guard = scope.clone().drop_guard();

    let degree_of_parallelism = degree_of_parallelism.max(1);
    debug!(
        partitions = sources.len(),
        degree_of_parallelism, "evaluating flow"
    );

    // Collectors are spawned lazily so no more than `degree_of_parallelism`
    // exist at once. After a failure nothing new starts, but running
    // collectors finish so their side effects are accounted for.
    let mut pending = sources.into_iter().enumerate();
    let mut running = FuturesOrdered::new();
    let mut results = Vec::new();
    let mut failures = Vec::new();
    loop {
        while failures.is_empty() && running.len() < degree_of_parallelism {
            let Some((partition, (worker, items))) = pending.next() else {
                break;
            };
            let collector = factory(CollectorContext {
                worker,
                partition,
                cancel: scope.child_token(),
            });
            let task = tokio::spawn(run_collector(
                collector,
                items,
                scope.clone(),
                projection.clone(),
            ));
            running.push_back(async move { (partition, task.await) });
        }

        let Some((partition, joined)) = running.next().await else {
            break;
        };
        match joined.map_err(FlowError::from).and_then(|result| result) {
            Ok(result) => results.push(result),
            Err(e) => failures.push((format!("partition {}", partition), e)),
        }
    }

    if failures.is_empty() {
        return combiner(results);
    }
    if failures.len() == 1 {
        let (_, e) = failures.remove(0);
        return Err(e);
    }
    let aggregate = AggregateError {
        operation: "evaluate",
        succeeded: results.len(),
        failures,
        written: Vec::new(),
    };
    if aggregate.all_cancelled() {
        Err(FlowError::Cancelled)
    } else {
        Err(FlowError::Aggregate(aggregate))
    }
}

async fn run_collector<T, C, I>(
    mut collector: C,
    mut items: BoxStream<'static, FlowResult<T>>,
    scope: CancellationToken,
    projection: Projection<C::Partial, I>,
) -> FlowResult<I>
where
    C: Collector<T>,
{
    let own = collector.cancellation_token().clone();
    loop {
        tokio::select! {
            biased;
            _ = scope.cancelled() => return Err(FlowError::Cancelled),
            _ = own.cancelled() => break,
            next = items.next() => match next {
                Some(item) => collector.accept(item?),
                None => break,
            },
        }
    }

    let projected = projection(collector.complete());
    tokio::select! {
        biased;
        _ = scope.cancelled() => Err(FlowError::Cancelled),
        result = projected => result,
    }
}

/// Buffers a partition's elements, optionally stopping after `limit`
pub struct ListCollector<T> {
    items: Vec<T>,
    limit: Option<usize>,
    worker: WorkerRef,
    cancel: CancellationToken,
}

impl<T> ListCollector<T> {
    pub fn new(cx: CollectorContext) -> Self {
        ListCollector {
            items: Vec::new(),
            limit: None,
            worker: cx.worker,
            cancel: cx.cancel,
        }
    }

    /// Stop delivery once `limit` elements are buffered
    pub fn with_limit(cx: CollectorContext, limit: usize) -> Self {
        let collector = ListCollector {
            limit: Some(limit),
            ..Self::new(cx)
        };
        if limit == 0 {
            collector.cancel.cancel();
        }
        collector
    }
}

impl<T: Send + 'static> Collector<T> for ListCollector<T> {
    /// The worker the partition ran on, with its elements
    type Partial = (WorkerRef, Vec<T>);

    fn accept(&mut self, item: T) {
        self.items.push(item);
        if self.limit.is_some_and(|limit| self.items.len() >= limit) {
            self.cancel.cancel();
        }
    }

    fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn complete(self) -> Self::Partial {
        (self.worker, self.items)
    }
}

/// Folds a partition's elements into a running state
pub struct FoldCollector<S, F> {
    state: S,
    fold: F,
    cancel: CancellationToken,
}

impl<S, F> FoldCollector<S, F> {
    pub fn new(cx: CollectorContext, init: S, fold: F) -> Self {
        FoldCollector {
            state: init,
            fold,
            cancel: cx.cancel,
        }
    }
}

impl<T, S, F> Collector<T> for FoldCollector<S, F>
where
    S: Send + 'static,
    F: FnMut(&mut S, T) + Send,
{
    type Partial = S;

    fn accept(&mut self, item: T) {
        (self.fold)(&mut self.state, item);
    }

    fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn complete(self) -> S {
        self.state
    }
}

/// A flow over elements already held in memory
///
/// Elements are split evenly across the degree of parallelism and placed
/// round-robin on the available workers.
#[derive(Debug, Clone)]
pub struct InMemoryFlow<T> {
    items: Arc<Vec<T>>,
    degree_of_parallelism: Option<usize>,
}

impl<T> InMemoryFlow<T> {
    pub fn new(items: Vec<T>) -> Self {
        InMemoryFlow {
            items: Arc::new(items),
            degree_of_parallelism: None,
        }
    }

    pub fn with_degree_of_parallelism(mut self, degree_of_parallelism: usize) -> Self {
        self.degree_of_parallelism = Some(degree_of_parallelism);
        self
    }
}

impl<T: Clone + Send + Sync + 'static> CloudFlow<T> for InMemoryFlow<T> {
    fn degree_of_parallelism(&self) -> Option<usize> {
        self.degree_of_parallelism
    }

    fn evaluate<'a, C, I, R>(
        &'a self,
        ctx: &'a FlowContext,
        evaluation: Evaluation<T, C, I, R>,
    ) -> BoxFuture<'a, FlowResult<R>>
    where
        C: Collector<T> + 'static,
        I: Send + 'static,
        R: Send + 'static,
    {
        let dop = ctx.degree_of_parallelism(self.degree_of_parallelism);
        let place = ctx.placement();
        let sources = split_weighted(&vec![1; dop], self.items.as_ref().clone())
            .into_iter()
            .filter(|part| !part.is_empty())
            .enumerate()
            .map(|(i, part)| {
                let items = stream::iter(part.into_iter().map(Ok::<_, FlowError>)).boxed();
                (place(i), items)
            })
            .collect();
        evaluate_partitions(ctx, dop, sources, evaluation).boxed()
    }

    fn known_count(&self) -> Option<u64> {
        Some(self.items.len() as u64)
    }
}
