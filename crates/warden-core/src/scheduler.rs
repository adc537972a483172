//! Periodic task scheduling

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shortest interval a [`TokioScheduler`] will run at
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Unit of periodic work
pub type ScheduledTask = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Runs one task repeatedly until stopped.
///
/// `start` replaces a previously started task. The first run happens one
/// `interval` after `start`.
pub trait Scheduler: Send + Sync {
    fn start(&self, interval: Duration, task: ScheduledTask);

    fn stop(&self);

    fn is_running(&self) -> bool;
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Scheduler backed by a tokio interval; requires a runtime on `start`
#[derive(Default)]
pub struct TokioScheduler {
    running: Mutex<Option<Running>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for TokioScheduler {
    fn start(&self, every: Duration, task: ScheduledTask) {
        let every = if every < MIN_INTERVAL {
            warn!("Interval {:?} is below {:?}; using the minimum", every, MIN_INTERVAL);
            MIN_INTERVAL
        } else {
            every
        };
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        info!("Starting scheduled task (interval: {:?})", every);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => task().await,
                }
            }
            debug!("Scheduled task exited");
        });

        if let Some(previous) = self.running.lock().replace(Running { cancel, handle }) {
            previous.cancel.cancel();
        }
    }

    fn stop(&self) {
        if let Some(running) = self.running.lock().take() {
            running.cancel.cancel();
            info!("Stopped scheduled task");
        }
    }

    fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

/// Scheduler that only runs its task when [`tick`](Self::tick) is called
#[derive(Default)]
pub struct ManualScheduler {
    task: Mutex<Option<(Duration, ScheduledTask)>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the task once; false if nothing is scheduled
    pub async fn tick(&self) -> bool {
        let task = self.task.lock().as_ref().map(|(_, task)| task.clone());
        match task {
            Some(task) => {
                task().await;
                true
            }
            None => false,
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        self.task.lock().as_ref().map(|(every, _)| *every)
    }
}

impl Scheduler for ManualScheduler {
    fn start(&self, every: Duration, task: ScheduledTask) {
        *self.task.lock() = Some((every, task));
    }

    fn stop(&self) {
        self.task.lock().take();
    }

    fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }
}
