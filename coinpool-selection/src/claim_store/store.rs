//! Per-pool claim state store: one drain loop, batched compare-and-swap.
//!
//! # Queueing
//!
//! `enqueue_request` pushes `(transform, result sender)` onto an unbounded
//! FIFO and then tries to claim the drain slot, an atomic flag with room for
//! exactly one scheduled drain. A producer that finds the slot taken simply
//! leaves; the running drain will see its request because it re-checks the
//! FIFO after releasing the slot.
//!
//! # Commit
//!
//! A drain pass takes everything queued (or one request in per-request
//! mode), applies the transforms in order to one working copy of the state,
//! and issues a single conditional write against the version it started
//! from:
//!
//! - success: the working copy becomes current at the new version, every
//!   request in the batch resolves `true`
//! - conflict: the stored state replaces the current one (nothing merged),
//!   every request resolves `false`
//! - store error: every request resolves with the error, current state is
//!   kept
//!
//! A transform that errors or panics resolves its own request with the
//! error and is left out of the batch. A batch with no surviving transform
//! writes nothing.

use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use coinpool_core::{
    CoinPoolResult, CommitMode, DispatchError, PoolCacheState, StoredPoolClaimState, TokenPoolKey,
};
use coinpool_storage::{PoolStateStore, UpdateOutcome};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::oneshot;

/// Future produced by a state transform.
pub type TransformFuture = BoxFuture<'static, CoinPoolResult<PoolCacheState>>;

/// A queued state transition for one pool.
pub type StateTransform = Box<dyn FnOnce(PoolCacheState) -> TransformFuture + Send>;

struct QueuedRequest {
    transform: StateTransform,
    result_tx: oneshot::Sender<CoinPoolResult<bool>>,
}

struct StoreInner {
    key: TokenPoolKey,
    store: Arc<dyn PoolStateStore>,
    commit_mode: CommitMode,
    current: Mutex<StoredPoolClaimState>,
    queue: Mutex<VecDeque<QueuedRequest>>,
    drain_scheduled: AtomicBool,
}

/// Serializes every mutation of one pool's claim state.
///
/// Must be used from within a Tokio runtime; the drain loop is a spawned
/// task.
pub struct ClaimStateStore {
    inner: Arc<StoreInner>,
}

impl ClaimStateStore {
    /// Create a store starting from `initial`, usually just loaded from
    /// `store`.
    pub fn new(
        initial: StoredPoolClaimState,
        store: Arc<dyn PoolStateStore>,
        commit_mode: CommitMode,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                key: initial.key.clone(),
                store,
                commit_mode,
                current: Mutex::new(initial),
                queue: Mutex::new(VecDeque::new()),
                drain_scheduled: AtomicBool::new(false),
            }),
        }
    }

    pub fn pool_key(&self) -> &TokenPoolKey {
        &self.inner.key
    }

    pub fn commit_mode(&self) -> CommitMode {
        self.inner.commit_mode
    }

    /// Snapshot of the state last believed to be persisted.
    pub fn current_state(&self) -> StoredPoolClaimState {
        self.inner.snapshot()
    }

    /// Requests waiting for the drain loop.
    pub fn queued(&self) -> usize {
        self.inner.lock_queue().len()
    }

    /// Queue `transform` and return a future for the commit outcome.
    ///
    /// The request is queued before this returns; dropping the returned
    /// future does not cancel it.
    pub fn enqueue_request<F, Fut>(&self, transform: F) -> PendingRequest
    where
        F: FnOnce(PoolCacheState) -> Fut + Send + 'static,
        Fut: Future<Output = CoinPoolResult<PoolCacheState>> + Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let transform: StateTransform = Box::new(move |state| transform(state).boxed());
        self.inner.lock_queue().push_back(QueuedRequest {
            transform,
            result_tx,
        });
        StoreInner::schedule_drain(&self.inner);

        PendingRequest {
            result_rx,
            pool_key: self.inner.key.clone(),
        }
    }
}

impl std::fmt::Debug for ClaimStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimStateStore")
            .field("pool_key", &self.inner.key)
            .field("commit_mode", &self.inner.commit_mode)
            .finish_non_exhaustive()
    }
}

impl StoreInner {
    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<QueuedRequest>> {
        // The queue is only pushed and drained; a panic elsewhere cannot
        // leave it inconsistent.
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> StoredPoolClaimState {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace_current(&self, next: StoredPoolClaimState) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    fn try_claim_slot(&self) -> bool {
        self.drain_scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn schedule_drain(this: &Arc<Self>) {
        if this.try_claim_slot() {
            let inner = Arc::clone(this);
            tokio::spawn(async move { inner.drain().await });
        } else {
            tracing::trace!(pool = %this.key, "drain already scheduled, wake-up discarded");
        }
    }

    async fn drain(self: Arc<Self>) {
        let _slot = SlotGuard(&self.drain_scheduled);
        loop {
            let batch = self.take_batch();
            if batch.is_empty() {
                self.drain_scheduled.store(false, Ordering::Release);
                // A producer may have queued after take_batch and found the
                // slot still taken.
                if self.lock_queue().is_empty() || !self.try_claim_slot() {
                    return;
                }
                continue;
            }
            self.commit_batch(batch).await;
        }
    }

    fn take_batch(&self) -> Vec<QueuedRequest> {
        let mut queue = self.lock_queue();
        match self.commit_mode {
            CommitMode::Batched => queue.drain(..).collect(),
            CommitMode::PerRequest => queue.pop_front().into_iter().collect(),
        }
    }

    async fn commit_batch(&self, batch: Vec<QueuedRequest>) {
        let started_from = self.snapshot();
        let mut working = started_from.pool_state.clone();
        let mut applied = Vec::with_capacity(batch.len());

        for request in batch {
            match run_transform(request.transform, working.clone()).await {
                Ok(next) => {
                    working = next;
                    applied.push(request.result_tx);
                }
                Err(e) => {
                    tracing::warn!(
                        pool = %self.key,
                        error_type = e.kind(),
                        error = %e,
                        "transform failed, request left out of batch"
                    );
                    let _ = request.result_tx.send(Err(e));
                }
            }
        }

        if applied.is_empty() {
            return;
        }

        let batch_size = applied.len();
        let outcome = self
            .store
            .update(&self.key, &working, started_from.db_version)
            .await;

        let result = match outcome {
            Ok(UpdateOutcome::Success { new_version }) => {
                tracing::debug!(
                    pool = %self.key,
                    batch_size,
                    version = new_version,
                    "committed claim state"
                );
                self.replace_current(StoredPoolClaimState {
                    db_version: new_version,
                    key: self.key.clone(),
                    pool_state: working,
                });
                Ok(true)
            }
            Ok(UpdateOutcome::Conflict { actual }) => {
                tracing::warn!(
                    pool = %self.key,
                    batch_size,
                    expected_version = started_from.db_version,
                    actual_version = actual.db_version,
                    "claim state conflict, batch discarded"
                );
                self.replace_current(actual);
                Ok(false)
            }
            Err(e) => {
                tracing::error!(
                    pool = %self.key,
                    batch_size,
                    error = %e,
                    "claim state write failed"
                );
                Err(e)
            }
        };

        for result_tx in applied {
            let _ = result_tx.send(result.clone());
        }
    }
}

/// Releases the drain slot if the drain task unwinds.
struct SlotGuard<'a>(&'a AtomicBool);

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.store(false, Ordering::Release);
        }
    }
}

async fn run_transform(
    transform: StateTransform,
    state: PoolCacheState,
) -> CoinPoolResult<PoolCacheState> {
    let future = match std::panic::catch_unwind(AssertUnwindSafe(move || transform(state))) {
        Ok(future) => future,
        Err(payload) => return Err(panicked(payload)),
    };
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(panicked(payload)),
    }
}

fn panicked(payload: Box<dyn Any + Send>) -> coinpool_core::CoinPoolError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    };
    DispatchError::TransformPanicked { message }.into()
}

/// Outcome of a queued request.
///
/// Resolves `Ok(true)` when the request's batch was committed, `Ok(false)`
/// on a version conflict (retry the whole operation), or the error that
/// failed the transform or the write.
#[derive(Debug)]
pub struct PendingRequest {
    result_rx: oneshot::Receiver<CoinPoolResult<bool>>,
    pool_key: TokenPoolKey,
}

impl Future for PendingRequest {
    type Output = CoinPoolResult<bool>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.result_rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(DispatchError::WorkerGone {
                pool: self.pool_key.clone(),
            }
            .into())),
            Poll::Pending => Poll::Pending,
        }
    }
}
