//! Session configuration.
//!
//! All simulation tuning lives in two immutable structs constructed once per
//! session and passed by reference into the planners. Nothing here is
//! process-wide mutable state; re-rolling the "personality" of a session
//! means building a new profile.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// An inclusive numeric range sampled uniformly per use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub min: f64,
    pub max: f64,
}

impl Span {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn sample(&self, rng: &mut impl Rng) -> f64 {
        if self.max <= self.min {
            self.min
        } else {
            rng.gen_range(self.min..=self.max)
        }
    }

    /// Samples the span and interprets the value as seconds.
    pub fn sample_duration(&self, rng: &mut impl Rng) -> Duration {
        Duration::from_secs_f64(self.sample(rng).max(0.0))
    }
}

/// Tuning for the motion and typing planners.
///
/// Defaults follow measured manual-operation ranges: 40-100 words per
/// minute, pointer speeds of 500-1500 px/s, and a ~3% slip rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationProfile {
    /// Typing speed range in words per minute (a word is five characters).
    pub words_per_minute: Span,
    /// Fractional perturbation applied to every per-character delay.
    pub typing_irregularity: f64,
    /// Per-character probability of injecting a slip that is then corrected.
    pub typo_probability: f64,
    /// Delay range before a slip is "noticed" and corrected, in seconds.
    pub correction_notice: Span,
    /// Delay range between the corrective backspace and the retyped
    /// character, in seconds.
    pub post_correction: Span,
    /// Pause range after sentence-ending punctuation, in seconds.
    pub sentence_pause: Span,
    /// Pause range after clause punctuation, in seconds.
    pub clause_pause: Span,
    /// Per-character probability of an unconditional hesitation pause.
    pub hesitation_probability: f64,
    /// Hesitation pause range, in seconds.
    pub hesitation_pause: Span,
    /// Pointer travel speed range in pixels per second.
    pub pointer_speed: Span,
    /// Fractional perturbation of the total move duration.
    pub duration_wobble: f64,
    /// Control point displacement range as a fraction of the path length.
    pub control_displacement: Span,
    /// Maximum lateral jitter amplitude in pixels, peaking mid-path.
    pub jitter_px: f64,
    /// Probability that a move overshoots the target and corrects.
    pub overshoot_probability: f64,
    /// Overshoot distance range in pixels.
    pub overshoot_px: Span,
    /// Hard ceiling on the planned duration of any single move or typing
    /// schedule. Schedules that would exceed it are rescaled uniformly.
    pub latency_ceiling: Duration,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            words_per_minute: Span::new(40.0, 100.0),
            typing_irregularity: 0.3,
            typo_probability: 0.03,
            correction_notice: Span::new(0.3, 1.5),
            post_correction: Span::new(0.1, 0.3),
            sentence_pause: Span::new(0.5, 1.2),
            clause_pause: Span::new(0.3, 0.7),
            hesitation_probability: 0.03,
            hesitation_pause: Span::new(0.5, 1.5),
            pointer_speed: Span::new(500.0, 1500.0),
            duration_wobble: 0.10,
            control_displacement: Span::new(0.10, 0.50),
            jitter_px: 3.0,
            overshoot_probability: 0.3,
            overshoot_px: Span::new(4.0, 18.0),
            latency_ceiling: Duration::from_secs(30),
        }
    }
}

/// Orchestrator-level knobs: polling cadence, timeouts, pacing between
/// queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Base interval between response-stability polls.
    pub poll_interval: Duration,
    /// Consecutive unchanged polls required to declare a response complete.
    pub required_stable_count: u32,
    /// Hard deadline for a response to stabilize.
    pub response_timeout: Duration,
    /// Minimum text length considered a usable response.
    pub min_response_len: usize,
    /// Multiplier range applied to each stability poll sleep.
    pub stability_jitter: Span,
    /// Interval between challenge re-checks while gated.
    pub challenge_poll_interval: Duration,
    /// Hard deadline for an interactive challenge to clear.
    pub challenge_timeout: Duration,
    /// Delay range between consecutive queries, in seconds.
    pub inter_query_delay: Span,
    /// Probability of interleaving a small idle motion while waiting.
    pub idle_motion_probability: f64,
    /// Number of times a failed send is retried before the transaction
    /// fails.
    pub send_retries: u32,
    /// Pause range before a click, in seconds.
    pub pre_click_pause: Span,
    /// Pause range after a click, in seconds.
    pub post_click_pause: Span,
    /// Seed for the session RNG. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1500),
            required_stable_count: 3,
            response_timeout: Duration::from_secs(60),
            min_response_len: 10,
            stability_jitter: Span::new(0.8, 1.2),
            challenge_poll_interval: Duration::from_secs(3),
            challenge_timeout: Duration::from_secs(120),
            inter_query_delay: Span::new(5.0, 15.0),
            idle_motion_probability: 0.3,
            send_retries: 1,
            pre_click_pause: Span::new(0.05, 0.2),
            post_click_pause: Span::new(0.05, 0.2),
            seed: None,
        }
    }
}
