use std::{fmt::Display, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

/// Executes the tasks drained from a [`TaskQueue`], one at a time, on the
/// queue's single worker.
#[async_trait]
pub trait TaskHandler: Send + 'static {
    type Task: Display + Send + 'static;

    async fn run(&mut self, task: Self::Task);
}

enum Envelope<T> {
    Task(T),
    Barrier(oneshot::Sender<()>),
    Poison,
}

/// FIFO work queue drained by exactly one worker task.
///
/// Producers enqueue and return immediately. The worker blocks while the
/// queue is empty and runs exactly one task at a time to completion, so for
/// two tasks scheduled in order by the same producer, the first always
/// finishes (or panics and is caught) before the second starts. A panicking
/// task is logged and the worker moves on; the worker only exits through the
/// poison sentinel enqueued by [`TaskQueue::terminate`], which runs after
/// everything scheduled before it.
pub struct TaskQueue<T> {
    sender: TaskSender<T>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Display + Send + 'static> TaskQueue<T> {
    /// Spawns the worker and returns the queue handle. `label` names the
    /// worker in logs.
    pub fn spawn<H: TaskHandler<Task = T>>(label: impl Into<String>, mut handler: H) -> Self {
        let label = Arc::new(label.into());
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope<T>>();
        let worker_label = label.clone();
        let worker = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                match envelope {
                    Envelope::Task(task) => {
                        let name = task.to_string();
                        tracing::debug!("{worker_label}: running task: {name}");
                        let run = AssertUnwindSafe(handler.run(task)).catch_unwind();
                        if run.await.is_err() {
                            tracing::error!("{worker_label}: task panicked: {name}");
                        }
                    }
                    Envelope::Barrier(done) => {
                        let _ = done.send(());
                    }
                    Envelope::Poison => break,
                }
            }
            tracing::debug!("{worker_label}: worker exited");
        });
        Self {
            sender: TaskSender { tx, label },
            worker: Mutex::new(Some(worker)),
        }
    }

    /// A cloneable handle for producers.
    pub fn sender(&self) -> TaskSender<T> {
        self.sender.clone()
    }

    /// Appends a task to the tail of the queue without blocking.
    pub fn schedule(&self, task: T) -> anyhow::Result<()> {
        self.sender.schedule(task)
    }

    /// Completes once every task scheduled before this call has run.
    pub async fn barrier(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.tx.send(Envelope::Barrier(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Enqueues the poison sentinel and waits for the worker to exit. Every
    /// task scheduled before this call runs first; none are silently dropped.
    pub async fn terminate(&self) {
        let _ = self.sender.tx.send(Envelope::Poison);
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// Cloneable producer handle to a [`TaskQueue`].
pub struct TaskSender<T> {
    tx: mpsc::UnboundedSender<Envelope<T>>,
    label: Arc<String>,
}

impl<T> Clone for TaskSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            label: self.label.clone(),
        }
    }
}

impl<T: Display + Send + 'static> TaskSender<T> {
    /// Appends a task to the tail of the queue without blocking. Fails only
    /// after the queue has been terminated.
    pub fn schedule(&self, task: T) -> anyhow::Result<()> {
        self.tx
            .send(Envelope::Task(task))
            .map_err(|_| anyhow::anyhow!("{}: queue terminated, task dropped", self.label))
    }
}
