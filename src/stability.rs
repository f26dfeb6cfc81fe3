//! Response stability monitoring.
//!
//! An asynchronously rendering response is considered complete once its
//! text stops changing across consecutive polls. The loop is an explicit
//! state machine driven by an injected clock and a cancellation token, so
//! it is unit-testable without real time passing and unwinds promptly when
//! a session shuts down. Only the latest sample and a stable-run counter
//! are kept; there is no unbounded history.

use async_trait::async_trait;
use rand::Rng;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::config::Span;
use crate::ports::{ReadSnapshot, ResponseReader};

/// Injectable time source so polling logic can be tested without sleeping.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StabilityOptions {
    pub poll_interval: Duration,
    /// Consecutive unchanged polls required before declaring completion.
    pub required_stable_count: u32,
    pub timeout: Duration,
    /// Shorter captures are not considered usable responses.
    pub min_length: usize,
    /// Multiplier range applied to each poll sleep so polling is not
    /// perfectly periodic.
    pub jitter: Span,
}

impl Default for StabilityOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1500),
            required_stable_count: 3,
            timeout: Duration::from_secs(60),
            min_length: 10,
            jitter: Span::new(0.8, 1.2),
        }
    }
}

/// Terminal state of a stability watch. `TimedOut` and `Cancelled` still
/// carry the best text seen when it meets the minimum usable length, so
/// callers must check the tag rather than text emptiness.
#[derive(Debug, Clone, PartialEq)]
pub enum StabilityOutcome {
    Stable(String),
    TimedOut { last_text: Option<String> },
    Cancelled { last_text: Option<String> },
}

impl StabilityOutcome {
    pub fn is_stable(&self) -> bool {
        matches!(self, StabilityOutcome::Stable(_))
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            StabilityOutcome::Stable(text) => Some(text),
            StabilityOutcome::TimedOut { last_text } | StabilityOutcome::Cancelled { last_text } => {
                last_text.as_deref()
            }
        }
    }
}

/// Polls `reader` until its text is unchanged for
/// `required_stable_count` consecutive polls (and long enough to be
/// usable), the timeout elapses, or the token is cancelled.
#[instrument(level = "debug", skip_all, fields(timeout = ?options.timeout))]
pub async fn await_stable(
    reader: &dyn ResponseReader,
    options: &StabilityOptions,
    clock: &dyn Clock,
    cancel: &CancellationToken,
    rng: &mut (impl Rng + Send),
) -> StabilityOutcome {
    let started = clock.now();
    let mut last_text: Option<String> = None;
    let mut stable_run: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            debug!("stability watch cancelled");
            return StabilityOutcome::Cancelled {
                last_text: usable(last_text, options),
            };
        }

        match reader.read().await {
            Ok(ReadSnapshot::Text(text)) => {
                if last_text.as_deref() == Some(text.as_str()) {
                    stable_run += 1;
                } else {
                    stable_run = 1;
                    last_text = Some(text);
                }
                if stable_run >= options.required_stable_count {
                    if let Some(text) = last_text.as_ref() {
                        if text.len() >= options.min_length {
                            debug!(polls = stable_run, "response stable");
                            return StabilityOutcome::Stable(text.clone());
                        }
                    }
                }
            }
            Ok(ReadSnapshot::StillGenerating) => {
                stable_run = 0;
            }
            Err(e) => {
                debug!(error = %e, "read failed during stability watch");
                stable_run = 0;
            }
        }

        if clock.now().duration_since(started) >= options.timeout {
            debug!("stability watch timed out");
            return StabilityOutcome::TimedOut {
                last_text: usable(last_text, options),
            };
        }

        let interval = options.poll_interval.mul_f64(options.jitter.sample(rng));
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("stability watch cancelled during sleep");
                return StabilityOutcome::Cancelled {
                    last_text: usable(last_text, options),
                };
            }
            _ = clock.sleep(interval) => {}
        }
    }
}

fn usable(last_text: Option<String>, options: &StabilityOptions) -> Option<String> {
    last_text.filter(|text| text.len() >= options.min_length)
}
