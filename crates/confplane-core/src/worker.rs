//! A single-flight scheduler with coalescing semantics (spec.md §4.1).
//!
//! Generalizes the background-consumer shape of the teacher lineage's
//! `AuditWorker`/`AsyncAuditLogger` pair (a channel-fed task run on a
//! spawned tokio task) into a demand-driven, coalescing scheduler: instead
//! of draining a queue of distinct messages, `wakeup()` just asks "run the
//! task again", and concurrent wakeups while a run is in flight collapse
//! into a single rerun rather than queuing up.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Running,
    RunningRerunRequested,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("worker has not been started")]
    NotStarted,
}

/// One task invocation per `Future` the caller's `task` closure returns.
pub trait Task: Send + Sync + 'static {
    fn run(&self) -> BoxFuture<'static, Result<(), anyhow::Error>>;
}

impl<F, Fut> Task for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
{
    fn run(&self) -> BoxFuture<'static, Result<(), anyhow::Error>> {
        Box::pin((self)())
    }
}

struct Inner {
    task: Box<dyn Task>,
    on_error: Box<dyn Fn(anyhow::Error) + Send + Sync>,
    state: Mutex<State>,
    notify: Notify,
    started: AtomicBool,
    stopped: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// The scheduler described in spec.md §4.1: `start()` runs the task once
/// immediately then idles; `wakeup()` schedules a run (or coalesces into the
/// run already in flight); `stop()` prevents further runs but lets an
/// in-flight run finish.
#[derive(Clone)]
pub struct AsyncWorker {
    inner: Arc<Inner>,
}

impl AsyncWorker {
    pub fn new<T, E>(task: T, on_error: E) -> Self
    where
        T: Task,
        E: Fn(anyhow::Error) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                task: Box::new(task),
                on_error: Box::new(on_error),
                state: Mutex::new(State::Idle),
                notify: Notify::new(),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                handle: Mutex::new(None),
            }),
        }
    }

    /// Idempotent. Runs the task once immediately, then spawns a background
    /// task that waits for `wakeup()` calls.
    pub async fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.inner.state.lock() = State::Running;
        self.run_until_idle().await;

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            loop {
                inner.notify.notified().await;
                if inner.stopped.load(Ordering::SeqCst) {
                    break;
                }
                run_until_idle(&inner).await;
            }
        });
        *self.inner.handle.lock() = Some(handle);
    }

    async fn run_until_idle(&self) {
        run_until_idle(&self.inner).await;
    }

    /// If idle, schedules one run. If a run is already in flight, marks a
    /// single rerun to follow; multiple concurrent wakeups collapse into
    /// that one rerun. Errors if called before `start()`.
    pub fn wakeup(&self) -> Result<(), WorkerError> {
        if !self.inner.started.load(Ordering::SeqCst) {
            return Err(WorkerError::NotStarted);
        }
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut state = self.inner.state.lock();
        match *state {
            State::Idle => {
                *state = State::Running;
                drop(state);
                self.inner.notify.notify_one();
            }
            State::Running => {
                *state = State::RunningRerunRequested;
            }
            State::RunningRerunRequested => {}
        }
        Ok(())
    }

    /// Prevents further runs. The in-flight run (if any) is allowed to
    /// finish; this does not join the background task.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }

    /// Waits for the background task to exit after `stop()`.
    pub async fn join(&self) {
        let handle = self.inner.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn run_until_idle(inner: &Arc<Inner>) {
    loop {
        if let Err(e) = inner.task.run().await {
            (inner.on_error)(e);
        }
        let mut state = inner.state.lock();
        match *state {
            State::Running => {
                *state = State::Idle;
                break;
            }
            State::RunningRerunRequested => {
                *state = State::Running;
                continue;
            }
            State::Idle => unreachable!("worker ran while state was Idle"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn start_runs_once_immediately() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs2 = runs.clone();
        let worker = AsyncWorker::new(
            move || {
                let runs = runs2.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            |_e: anyhow::Error| {},
        );
        worker.start().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wakeup_before_start_errors() {
        let worker = AsyncWorker::new(|| async { Ok(()) }, |_: anyhow::Error| {});
        assert!(matches!(worker.wakeup(), Err(WorkerError::NotStarted)));
    }

    #[tokio::test]
    async fn concurrent_wakeups_collapse_to_one_rerun() {
        let runs = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(tokio::sync::Notify::new());
        let runs2 = runs.clone();
        let gate2 = gate.clone();
        let worker = AsyncWorker::new(
            move || {
                let runs = runs2.clone();
                let gate = gate2.clone();
                async move {
                    let n = runs.fetch_add(1, Ordering::SeqCst);
                    if n == 1 {
                        // Second invocation (triggered by the first wakeup below):
                        // block so further wakeups land while it is in flight.
                        gate.notified().await;
                    }
                    Ok(())
                }
            },
            |_e: anyhow::Error| {},
        );

        worker.start().await; // n == 0, synchronous, returns immediately.
        worker.wakeup().unwrap(); // kicks off n == 1 on the background task.
        tokio::time::sleep(Duration::from_millis(20)).await; // let it start blocking.
        worker.wakeup().unwrap(); // Running -> RunningRerunRequested
        worker.wakeup().unwrap(); // collapses into the same rerun
        worker.wakeup().unwrap(); // collapses into the same rerun
        gate.notify_one();

        tokio::time::sleep(Duration::from_millis(50)).await;
        // n == 0 from start(), n == 1 from the first wakeup, n == 2 the single
        // coalesced rerun for the three wakeups issued while n == 1 ran. Not five.
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stop_prevents_future_runs() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs2 = runs.clone();
        let worker = AsyncWorker::new(
            move || {
                let runs = runs2.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            |_e: anyhow::Error| {},
        );
        worker.start().await;
        worker.stop();
        worker.join().await;
        let before = runs.load(Ordering::SeqCst);
        let _ = worker.wakeup();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runs.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn errors_go_to_sink_and_worker_keeps_running() {
        let calls = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let errors2 = errors.clone();
        let worker = AsyncWorker::new(
            move || {
                let calls = calls2.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        Err(anyhow::anyhow!("boom"))
                    } else {
                        Ok(())
                    }
                }
            },
            move |_e: anyhow::Error| {
                errors2.fetch_add(1, Ordering::SeqCst);
            },
        );
        worker.start().await;
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        worker.wakeup().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
