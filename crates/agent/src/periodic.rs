use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Background loop that runs `tick` every `every` until stopped.
pub struct PeriodicHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PeriodicHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signals the loop and waits for the tick in flight to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(error) = self.task.await {
            tracing::warn!(event_name = "agent.periodic.join_failed", task = self.name, error = %error);
        }
    }
}

/// Missed ticks are skipped, never replayed in a burst.
pub fn spawn_periodic<F, Fut>(name: &'static str, every: Duration, mut tick: F) -> PeriodicHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut timer = tokio::time::interval(every);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = timer.tick() => tick().await,
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!(event_name = "agent.periodic.stopped", task = name);
                        break;
                    }
                }
            }
        }
    });

    info!(
        event_name = "agent.periodic.started",
        task = name,
        interval_ms = every.as_millis() as u64,
    );
    PeriodicHandle { name, shutdown, task }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::spawn_periodic;

    #[tokio::test]
    async fn ticks_until_stopped() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&ticks);
        let handle = spawn_periodic("test", Duration::from_millis(10), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(55)).await;
        handle.stop().await;
        let stopped_at = ticks.load(Ordering::SeqCst);
        assert!(stopped_at >= 2, "ticked {stopped_at} times");

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), stopped_at);
    }
}
