// Owned, cancellable timer handles.
//
// Every suspension point in the engine (recording poll, preview debounce,
// playback tick) is one of these. The handle owns the spawned task and
// aborts it on drop, so replacing or discarding the state that holds a
// timer is the cancellation.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub(crate) struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Sends `msg` once after `delay`.
    pub(crate) fn delay<M: Send + 'static>(
        delay: Duration,
        tx: UnboundedSender<M>,
        msg: M,
    ) -> Self {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(msg);
        });
        Self { task }
    }

    /// Sends `make_msg()` every `period`, first firing one period from now.
    /// Stops on its own once the receiving side is gone.
    pub(crate) fn interval<M, F>(period: Duration, tx: UnboundedSender<M>, make_msg: F) -> Self
    where
        M: Send + 'static,
        F: Fn() -> M + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            loop {
                ticker.tick().await;
                if tx.send(make_msg()).is_err() {
                    break;
                }
            }
        });
        Self { task }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
