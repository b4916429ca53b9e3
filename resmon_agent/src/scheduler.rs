use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Minimum spacing between two overrun warnings.
const OVERRUN_WARN_EVERY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

/// Work performed on every tick.
#[async_trait]
pub trait CycleHandler: Send + Sync {
    async fn run_cycle(&self);
}

#[derive(Debug, Default)]
struct Counters {
    cycles: AtomicU64,
    skipped_ticks: AtomicU64,
}

/// Fixed-cadence driver for sampling cycles.
///
/// A cycle is awaited inside the timer loop, so two cycles never run at the
/// same time. Cycles start one interval apart. A cycle that runs past the
/// interval is followed immediately by the next one, and the cadence
/// continues from there; every whole interval it consumed beyond the first
/// counts as a skipped tick.
pub struct Scheduler {
    interval: Duration,
    start_delay: Duration,
    state: RwLock<SchedulerState>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl Scheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            start_delay: Duration::ZERO,
            state: RwLock::new(SchedulerState::Idle),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Hold the first cycle back so the host can finish starting up.
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }

    pub fn cycles_completed(&self) -> u64 {
        self.counters.cycles.load(Ordering::Relaxed)
    }

    pub fn skipped_ticks(&self) -> u64 {
        self.counters.skipped_ticks.load(Ordering::Relaxed)
    }

    pub async fn start(&self, handler: Arc<dyn CycleHandler>) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.interval.is_zero(),
            "Sampling interval must be > 0"
        );

        let mut state = self.state.write().await;
        if *state != SchedulerState::Idle {
            anyhow::bail!("Scheduler cannot start from the {:?} state", *state);
        }

        let ticker = TickLoop {
            interval: self.interval,
            start_delay: self.start_delay,
            cancel: self.cancel.clone(),
            counters: Arc::clone(&self.counters),
        };
        *self.task.lock().await = Some(tokio::spawn(ticker.run(handler)));
        *state = SchedulerState::Running;

        info!(
            "Scheduler started (interval {:?}, start delay {:?})",
            self.interval, self.start_delay
        );
        Ok(())
    }

    /// Cancel future ticks and wait for an in-flight cycle to finish.
    ///
    /// Safe to call from any task and more than once.
    pub async fn stop(&self) {
        {
            let mut state = self.state.write().await;
            if *state == SchedulerState::Stopped {
                return;
            }
            *state = SchedulerState::Stopped;
        }

        self.cancel.cancel();

        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Scheduler task ended abnormally: {}", e);
            }
            info!(
                "Scheduler stopped after {} cycles ({} ticks skipped)",
                self.cycles_completed(),
                self.skipped_ticks()
            );
        }
    }
}

struct TickLoop {
    interval: Duration,
    start_delay: Duration,
    cancel: CancellationToken,
    counters: Arc<Counters>,
}

impl TickLoop {
    async fn run(self, handler: Arc<dyn CycleHandler>) {
        if !self.start_delay.is_zero() {
            debug!("Waiting {:?} before the first sampling cycle", self.start_delay);
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(self.start_delay) => {}
            }
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut overruns = OverrunLog::default();

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let started = Instant::now();
            handler.run_cycle().await;
            let elapsed = started.elapsed();
            self.counters.cycles.fetch_add(1, Ordering::Relaxed);

            let skipped = missed_periods(elapsed, self.interval);
            if skipped > 0 {
                self.counters
                    .skipped_ticks
                    .fetch_add(skipped, Ordering::Relaxed);
                overruns.record(elapsed, self.interval, skipped);
            } else if elapsed > self.interval {
                debug!(
                    "Sampling cycle took {:?}, starting the next one late",
                    elapsed
                );
            }
        }
    }
}

/// Intervals that passed without a cycle starting.
///
/// The late tick fires as soon as the cycle returns, so a cycle that ends
/// inside the following interval loses nothing.
fn missed_periods(elapsed: Duration, interval: Duration) -> u64 {
    let periods = (elapsed.as_nanos() / interval.as_nanos()) as u64;
    periods.saturating_sub(1)
}

/// Warns on the first overrun, then at most once per `OVERRUN_WARN_EVERY`.
#[derive(Debug, Default)]
struct OverrunLog {
    last_warned: Option<Instant>,
    suppressed: u64,
}

impl OverrunLog {
    fn record(&mut self, elapsed: Duration, interval: Duration, skipped: u64) {
        let now = Instant::now();
        if let Some(at) = self.last_warned {
            if now.duration_since(at) < OVERRUN_WARN_EVERY {
                self.suppressed += skipped;
                return;
            }
        }

        warn!(
            skipped_ticks = self.suppressed + skipped,
            "Sampling cycle took {:?}, more than one {:?} interval went without sampling",
            elapsed,
            interval
        );
        self.last_warned = Some(now);
        self.suppressed = 0;
    }
}
