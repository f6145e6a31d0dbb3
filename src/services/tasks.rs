//! Background execution for hub and subscriber work

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;

/// A unit of background work
pub type Task = BoxFuture<'static, ()>;

/// Produces a fresh task for every run of a periodic job
pub type TaskFactory = Arc<dyn Fn() -> Task + Send + Sync>;

/// Where the engines send work that must not block an HTTP response
pub trait TaskRunner: Send + Sync {
    /// Run `task` once, as soon as possible
    fn enqueue(&self, task: Task);

    /// Run a task produced by `factory` every `interval`, starting now
    fn every(&self, interval: Duration, factory: TaskFactory) -> JoinHandle<()>;
}

/// Runs tasks on the ambient tokio runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioRunner;

impl TaskRunner for TokioRunner {
    fn enqueue(&self, task: Task) {
        tokio::spawn(task);
    }

    fn every(&self, interval: Duration, factory: TaskFactory) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = time::interval(interval);
            // A slow run delays the next one instead of bunching up
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                factory().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_enqueue_runs_task() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        TokioRunner.enqueue(
            async move {
                let _ = tx.send(42);
            }
            .boxed(),
        );

        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_every_repeats() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        let handle = TokioRunner.every(
            Duration::from_millis(10),
            Arc::new(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                .boxed()
            }),
        );

        time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(runs.load(Ordering::SeqCst) >= 2);
    }
}
