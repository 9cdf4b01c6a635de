//! Per-scope FIFO scheduler
//!
//! Work submitted for one [`SchedulingScope`] runs strictly in submission
//! order, one item at a time. Different scopes run concurrently, each on
//! its own worker task.
//!
//! Work submitted while already running inside a scope (a handler sending
//! a command to its own kernel) is executed inline instead of being queued
//! behind the item that is waiting for it. The set of active scopes follows
//! the call chain across workers, so `A -> B -> A` also runs inline.
//!
//! A panicking work item is reported to its submitter as
//! [`SchedulerError::Panicked`]; the worker moves on to the next item.
//!
//! After [`KernelScheduler::shutdown`] every submission fails with
//! [`SchedulerError::WorkerStopped`].

use crate::error::SchedulerError;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use polyglot_types::SchedulingScope;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace};

tokio::task_local! {
    static ACTIVE_SCOPES: Arc<Vec<SchedulingScope>>;
}

struct WorkItem {
    job: BoxFuture<'static, ()>,
    /// Scopes active in the submitter when the item was queued
    callers: Arc<Vec<SchedulingScope>>,
}

/// Serializes work per scheduling scope
#[derive(Default)]
pub struct KernelScheduler {
    workers: DashMap<SchedulingScope, mpsc::UnboundedSender<WorkItem>>,
    closed: AtomicBool,
}

impl KernelScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` in `scope` and wait for its output.
    ///
    /// Items for the same scope start in the order `run` was called.
    pub async fn run<F, T>(&self, scope: SchedulingScope, work: F) -> Result<T, SchedulerError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.ensure_open(&scope)?;
        let active = active_scopes();
        if active.contains(&scope) {
            trace!(scope = %scope, "running nested work inline");
            return AssertUnwindSafe(work)
                .catch_unwind()
                .await
                .map_err(|panic| panicked(&scope, panic));
        }

        let (tx, rx) = oneshot::channel();
        let job = async move {
            let outcome = AssertUnwindSafe(work).catch_unwind().await;
            let _ = tx.send(outcome);
        }
        .boxed();

        self.sender_for(&scope)
            .ok_or_else(|| SchedulerError::WorkerStopped(scope.clone()))?
            .send(WorkItem { job, callers: active })
            .map_err(|_| SchedulerError::WorkerStopped(scope.clone()))?;

        match rx.await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(panic)) => {
                let err = panicked(&scope, panic);
                error!(scope = %scope, error = %err, "work item panicked");
                Err(err)
            }
            Err(_) => Err(SchedulerError::WorkerStopped(scope)),
        }
    }

    /// Run `work` right away without queueing it behind the scope's
    /// pending items. Used for queries that only read kernel state.
    pub async fn run_immediately<F, T>(&self, scope: SchedulingScope, work: F) -> Result<T, SchedulerError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.ensure_open(&scope)?;
        trace!(scope = %scope, "running work immediately");
        AssertUnwindSafe(work)
            .catch_unwind()
            .await
            .map_err(|panic| panicked(&scope, panic))
    }

    /// True if the current task is executing work for `scope`
    pub fn is_running_in(scope: &SchedulingScope) -> bool {
        active_scopes().contains(scope)
    }

    /// Number of scopes that have a live worker
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stop accepting work. Queued items still run; workers exit once drained.
    pub fn shutdown(&self) {
        debug!(workers = self.workers.len(), "shutting down scheduler");
        self.closed.store(true, Ordering::Release);
        self.workers.clear();
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self, scope: &SchedulingScope) -> Result<(), SchedulerError> {
        if self.is_shut_down() {
            return Err(SchedulerError::WorkerStopped(scope.clone()));
        }
        Ok(())
    }

    fn sender_for(&self, scope: &SchedulingScope) -> Option<mpsc::UnboundedSender<WorkItem>> {
        if let Some(sender) = self.workers.get(scope) {
            if !sender.is_closed() {
                return Some(sender.clone());
            }
        }
        if self.is_shut_down() {
            return None;
        }
        let sender = self
            .workers
            .entry(scope.clone())
            .and_modify(|sender| {
                if sender.is_closed() {
                    *sender = spawn_worker(scope.clone());
                }
            })
            .or_insert_with(|| spawn_worker(scope.clone()))
            .clone();
        Some(sender)
    }
}

fn spawn_worker(scope: SchedulingScope) -> mpsc::UnboundedSender<WorkItem> {
    let (tx, mut rx) = mpsc::unbounded_channel::<WorkItem>();
    debug!(scope = %scope, "starting scheduler worker");
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            let mut scopes = item.callers.as_ref().clone();
            scopes.push(scope.clone());
            ACTIVE_SCOPES.scope(Arc::new(scopes), item.job).await;
        }
        debug!(scope = %scope, "scheduler worker stopped");
    });
    tx
}

fn active_scopes() -> Arc<Vec<SchedulingScope>> {
    ACTIVE_SCOPES.try_with(Arc::clone).unwrap_or_default()
}

fn panicked(scope: &SchedulingScope, panic: Box<dyn Any + Send>) -> SchedulerError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    SchedulerError::Panicked {
        scope: scope.clone(),
        message,
    }
}
