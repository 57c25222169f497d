//! Task scheduler.
//!
//! Delayed one-shot deliveries keyed by tag. The scheduler does not run
//! callbacks itself; it posts a message back onto the owner's channel
//! after the delay, so all state mutation stays on the owning task.
//! Scheduling a non-empty tag cancels any prior task under the same tag.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

pub struct TaskScheduler<M: Send + 'static> {
    tx: mpsc::UnboundedSender<M>,
    tasks: HashMap<String, JoinHandle<()>>,
}

impl<M: Send + 'static> TaskScheduler<M> {
    pub fn new(tx: mpsc::UnboundedSender<M>) -> Self {
        Self {
            tx,
            tasks: HashMap::new(),
        }
    }

    /// Delivers `msg` after `delay`. A non-empty tag replaces (and cancels)
    /// any pending task under the same tag; empty-tag tasks are untracked
    /// and cannot be canceled.
    pub fn schedule(&mut self, tag: &str, delay: Duration, msg: M) {
        if !tag.is_empty() {
            self.cancel(tag);
        }
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Delivery failure means the owner is gone; nothing to do.
            let _ = tx.send(msg);
        });
        if !tag.is_empty() {
            self.tasks.insert(tag.to_string(), handle);
        }
    }

    /// Cancels the task under `tag`. Returns whether one was pending.
    pub fn cancel(&mut self, tag: &str) -> bool {
        match self.tasks.remove(tag) {
            Some(handle) => {
                handle.abort();
                trace!(tag, "canceled scheduled task");
                true
            }
            None => false,
        }
    }

    /// Drains and aborts every tracked task.
    pub fn cancel_all(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }

    pub fn pending(&self) -> usize {
        self.tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reschedule_replaces_prior_task() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = TaskScheduler::new(tx);

        scheduler.schedule("retry", Duration::from_millis(10), "first");
        scheduler.schedule("retry", Duration::from_millis(20), "second");
        assert_eq!(scheduler.pending(), 1);

        assert_eq!(rx.recv().await, Some("second"));
        // The replaced task never fires.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancel_by_tag() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = TaskScheduler::new(tx);

        scheduler.schedule("x", Duration::from_millis(10), 1u32);
        assert!(scheduler.cancel("x"));
        assert!(!scheduler.cancel("x"));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancel_all_drains() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = TaskScheduler::new(tx);

        scheduler.schedule("a", Duration::from_millis(10), 1u32);
        scheduler.schedule("b", Duration::from_millis(10), 2u32);
        scheduler.cancel_all();
        assert_eq!(scheduler.pending(), 0);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn distinct_tags_coexist() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = TaskScheduler::new(tx);

        scheduler.schedule("a", Duration::from_millis(5), 1u32);
        scheduler.schedule("b", Duration::from_millis(10), 2u32);

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
    }
}
