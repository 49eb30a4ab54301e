// ── Per-key background task ──
//
// Initial check, then a check every `stale_interval`. A manual trigger
// replaces the next check with an unconditional fetch and restarts the
// schedule. Retryable failures retry after a jittered delay; ticks that
// land while a fetch or retry is pending are absorbed rather than queued.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::engine::{PollData, PollPhase, PolledValue};
use super::jitter::RetryJitter;
use super::trigger::{ManualTrigger, TriggerState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Fetch only if stale.
    Check,
    /// Fetch unconditionally.
    Force,
}

pub(super) async fn run<T: PollData>(value: PolledValue<T>, cancel: CancellationToken) {
    let engine = value.engine().clone();
    let config = *engine.config();
    let trigger = engine.trigger().clone();
    let mut trigger_rx = trigger.watch();
    // Fires that happened before this task existed are not ours.
    let seen = trigger_rx.borrow_and_update().generation;

    let task = PollTask {
        value,
        cancel,
        trigger,
        trigger_rx,
        seen,
        jitter: RetryJitter::new(config.retry_ceiling),
        debounce: config.trigger_debounce,
    };
    task.run(config.stale_interval.max(Duration::from_millis(1)))
        .await;
    engine.task_finished();
}

struct PollTask<T: PollData> {
    value: PolledValue<T>,
    cancel: CancellationToken,
    trigger: ManualTrigger,
    trigger_rx: watch::Receiver<TriggerState>,
    /// Last trigger generation this task has acted on.
    seen: u64,
    jitter: RetryJitter,
    debounce: Duration,
}

impl<T: PollData> PollTask<T> {
    async fn run(mut self, period: Duration) {
        let mut flow = if self.cancel.is_cancelled() {
            Flow::Stop
        } else {
            self.attempt(Mode::Check).await
        };

        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while flow == Flow::Continue {
            flow = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Flow::Stop,
                changed = self.trigger_rx.changed() => {
                    if changed.is_err() {
                        Flow::Stop
                    } else if self.take_fire() {
                        let flow = self.on_fire().await;
                        ticker.reset();
                        flow
                    } else {
                        Flow::Continue
                    }
                }
                _ = ticker.tick() => {
                    let flow = self.attempt(Mode::Check).await;
                    ticker.reset();
                    flow
                }
            };
        }

        self.value.finish();
    }

    /// Mark the current trigger generation as seen. True if it was new.
    fn take_fire(&mut self) -> bool {
        let generation = self.trigger_rx.borrow_and_update().generation;
        if generation == self.seen {
            return false;
        }
        self.seen = generation;
        true
    }

    async fn on_fire(&mut self) -> Flow {
        if !self.debounce.is_zero() {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Flow::Stop,
                () = time::sleep(self.debounce) => {}
            }
            // Fires during the quiet period fold into this one.
            self.take_fire();
        }
        self.trigger.reset();
        debug!(key = self.value.key(), "manual refresh");
        self.attempt(Mode::Force).await
    }

    /// One fetch decision, retrying retryable failures until success,
    /// a terminal error, or teardown.
    async fn attempt(&mut self, mut mode: Mode) -> Flow {
        let mut attempt: u32 = 0;
        loop {
            let result = match mode {
                Mode::Check => self.value.check(Some(&self.cancel)).await.map(|_| ()),
                Mode::Force => self.value.force(Some(&self.cancel)).await,
            };
            if self.cancel.is_cancelled() {
                return Flow::Stop;
            }
            let Err(error) = result else {
                return Flow::Continue;
            };

            if !error.is_retryable() {
                warn!(
                    key = self.value.key(),
                    error = %error,
                    "fetch failed, waiting for the next scheduled refresh"
                );
                return Flow::Continue;
            }

            attempt = attempt.saturating_add(1);
            let delay = self.jitter.delay_for(&error);
            self.value
                .set_phase(PollPhase::RetryScheduled { attempt, delay });
            debug!(
                key = self.value.key(),
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "fetch failed, retry scheduled"
            );

            if self.wait_for_retry(delay).await == Flow::Stop {
                return Flow::Stop;
            }
            mode = Mode::Force;
        }
    }

    /// Sleep out a retry delay. A manual trigger cuts it short.
    async fn wait_for_retry(&mut self, delay: Duration) -> Flow {
        let sleep = time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Flow::Stop,
                changed = self.trigger_rx.changed() => {
                    if changed.is_err() {
                        return Flow::Stop;
                    }
                    if self.take_fire() {
                        self.trigger.reset();
                        return Flow::Continue;
                    }
                }
                () = &mut sleep => return Flow::Continue,
            }
        }
    }
}
