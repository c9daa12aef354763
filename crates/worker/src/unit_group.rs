//! Bounded group of in-flight unit tasks.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

/// Runs unit work concurrently with the processing loop, at most
/// `max_in_flight` at a time.
///
/// [`reserve`](Self::reserve) waits for a free slot; the slot is released
/// when the spawned work finishes.
pub struct UnitGroup {
    permits: Arc<Semaphore>,
    tasks: JoinSet<()>,
}

impl UnitGroup {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            tasks: JoinSet::new(),
        }
    }

    /// Wait for a free slot.
    pub async fn reserve(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        Arc::clone(&self.permits).acquire_owned().await
    }

    /// Run `work` in the slot held by `permit`.
    pub fn spawn<F>(&mut self, permit: OwnedSemaphorePermit, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(async move {
            work.await;
            drop(permit);
        });
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for the next unit to finish. Returns `None` once nothing is in
    /// flight.
    pub async fn join_next(&mut self) -> Option<()> {
        let joined = self.tasks.join_next().await?;
        if let Err(e) = joined {
            tracing::error!(error = %e, "Unit task panicked");
        }
        Some(())
    }

    /// Wait for everything in flight.
    pub async fn wait_all(&mut self) {
        while self.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn concurrency_never_exceeds_the_limit() {
        let mut group = UnitGroup::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let permit = group.reserve().await.unwrap();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            group.spawn(permit, async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }
        group.wait_all().await;

        assert_eq!(group.in_flight(), 0);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn a_panicking_unit_does_not_poison_the_group() {
        let mut group = UnitGroup::new(1);
        let permit = group.reserve().await.unwrap();
        group.spawn(permit, async { panic!("boom") });
        group.wait_all().await;

        // The slot was released when the task unwound.
        assert!(group.reserve().await.is_ok());
    }
}
