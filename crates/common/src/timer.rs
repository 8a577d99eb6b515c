//! Cancellable timers.
//!
//! Background work (matcher ticks, ballot sweeps) runs on tokio tasks wrapped
//! in [`TimerHandle`]s that abort when dropped, so a timer never outlives the
//! component that created it.

use std::{future::Future, time::Duration};

use tokio::{task::JoinHandle, time::MissedTickBehavior};

/// An owned background timer task. Aborted on drop.
pub struct TimerHandle {
    handle: JoinHandle<()>,
}

impl TimerHandle {
    /// Run `task` every `period`. The first run happens after one full period.
    pub fn recurring<F, Fut>(period: Duration, mut task: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Consume the interval's immediate first tick.
            interval.tick().await;
            loop {
                interval.tick().await;
                task().await;
            }
        });
        Self { handle }
    }

    /// Wrap an arbitrary long-running task so it is aborted on drop.
    pub fn spawn<Fut>(task: Fut) -> Self
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(task),
        }
    }

    /// Run `task` once after `delay`.
    pub fn once<Fut>(delay: Duration, task: Fut) -> Self
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        Self { handle }
    }

    /// Cancel the timer without waiting for it to finish.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
