// Monitor - owned periodic background task
//
// A Monitor holds at most one live tokio task. start() aborts whatever was
// running before spawning the new task, stop() aborts it, and dropping the
// Monitor stops it as well.

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

pub struct Monitor {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl Monitor {
    pub fn new(name: &'static str) -> Self {
        Self { name, handle: None }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run `tick` every `period`, first after one full period. The task ends
    /// when `tick` resolves to `ControlFlow::Break`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F, Fut>(&mut self, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        self.stop();
        let name = self.name;
        self.handle = Some(tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tick().await.is_break() {
                    log::debug!("[Monitor] {} finished", name);
                    break;
                }
            }
        }));
        log::debug!("[Monitor] {} started ({:?} period)", self.name, period);
    }

    /// Run `task` once after `delay`.
    pub fn start_after<Fut>(&mut self, delay: Duration, task: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.stop();
        self.handle = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            task.await;
        }));
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            log::debug!("[Monitor] {} stopped", self.name);
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_every_period() {
        let count = Arc::new(AtomicU32::new(0));
        let mut monitor = Monitor::new("counter");
        let seen = count.clone();
        monitor.start(Duration::from_secs(1), move || {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                ControlFlow::Continue(())
            }
        });

        time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(monitor.is_running());

        monitor.stop();
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(!monitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_previous_task() {
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));
        let mut monitor = Monitor::new("restart");

        let seen = first.clone();
        monitor.start(Duration::from_secs(1), move || {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                ControlFlow::Continue(())
            }
        });
        let seen = second.clone();
        monitor.start(Duration::from_secs(1), move || {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                ControlFlow::Continue(())
            }
        });

        time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_break_ends_task() {
        let mut monitor = Monitor::new("once");
        monitor.start(Duration::from_millis(10), || async { ControlFlow::Break(()) });
        time::sleep(Duration::from_millis(50)).await;
        assert!(!monitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_after_runs_once() {
        let count = Arc::new(AtomicU32::new(0));
        let mut monitor = Monitor::new("delayed");
        let seen = count.clone();
        monitor.start_after(Duration::from_secs(1), async move {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
