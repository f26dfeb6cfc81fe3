//! Pointer path synthesis.
//!
//! A move is planned as a Bézier curve between the current and target
//! points, with randomly displaced control points, an ease-in-out velocity
//! profile, and lateral jitter that peaks mid-path. The output is a pure
//! data structure; replaying it against an input port is the orchestrator's
//! job. Planning is deterministic for a given RNG state.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::SimulationProfile;
use crate::geometry::{ScreenBounds, ScreenPoint};

/// Distance below which a move skips curve generation entirely.
const DIRECT_MOVE_THRESHOLD: f64 = 5.0;
/// Minimum number of samples along a planned curve.
const MIN_SAMPLES: usize = 20;
const MAX_SAMPLES: usize = 200;
/// Hold applied to a degenerate (near-zero distance) move.
const DIRECT_MOVE_HOLD: Duration = Duration::from_millis(80);

/// One pointer position plus how long to rest on it before the next.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub point: ScreenPoint,
    pub hold: Duration,
}

/// An ordered pointer path. Generated fresh per move, never mutated after
/// creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionSegment {
    samples: Vec<MotionSample>,
}

impl MotionSegment {
    fn from_samples(samples: Vec<MotionSample>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[MotionSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first_point(&self) -> Option<ScreenPoint> {
        self.samples.first().map(|s| s.point)
    }

    pub fn last_point(&self) -> Option<ScreenPoint> {
        self.samples.last().map(|s| s.point)
    }

    pub fn total_duration(&self) -> Duration {
        self.samples.iter().map(|s| s.hold).sum()
    }

    /// Joins two segments, used for there-and-back idle wanders.
    fn chain(mut self, other: MotionSegment) -> MotionSegment {
        self.samples.extend(other.samples);
        self
    }
}

/// Evaluates a Bézier curve over an arbitrary control polygon at `t` using
/// De Casteljau's algorithm. Handles any number of points uniformly; two
/// points degenerate to linear interpolation.
pub(crate) fn de_casteljau(points: &[ScreenPoint], t: f64) -> ScreenPoint {
    debug_assert!(!points.is_empty());
    let mut scratch = points.to_vec();
    let n = scratch.len();
    for level in 1..n {
        for k in 0..n - level {
            scratch[k] = scratch[k].lerp(&scratch[k + 1], t);
        }
    }
    scratch[0]
}

/// Ease-in-out time remapping: velocity rises over the first half of the
/// path and falls over the second.
fn ease_in_out(t: f64) -> f64 {
    if t < 0.5 {
        2.0 * t * t
    } else {
        1.0 - 2.0 * (1.0 - t) * (1.0 - t)
    }
}

/// Random control points displaced perpendicular to the chord, scaled by
/// the path length.
fn control_points(
    from: ScreenPoint,
    to: ScreenPoint,
    distance: f64,
    profile: &SimulationProfile,
    rng: &mut impl Rng,
) -> Vec<ScreenPoint> {
    let count = ((distance / 200.0) as usize).clamp(1, 5);
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    let len = distance.max(1.0);

    (0..count)
        .map(|_| {
            let t = rng.gen_range(0.2..=0.8);
            let base = from.lerp(&to, t);
            let displacement = profile.control_displacement.sample(rng) * distance;
            let side = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
            ScreenPoint {
                x: base.x + (-dy / len) * displacement * side,
                y: base.y + (dx / len) * displacement * side,
            }
        })
        .collect()
}

/// Plans a pointer move from `from` to `to`.
///
/// The returned segment starts exactly at `from` and ends exactly at `to`
/// (clamped to the screen), with every intermediate sample inside the
/// screen bounds and a total duration below the profile's latency ceiling.
pub fn plan_move(
    from: ScreenPoint,
    to: ScreenPoint,
    profile: &SimulationProfile,
    screen: ScreenBounds,
    rng: &mut impl Rng,
) -> MotionSegment {
    let from = screen.clamp(from);
    let to = screen.clamp(to);
    let distance = from.distance_to(&to);

    if distance < DIRECT_MOVE_THRESHOLD {
        return MotionSegment::from_samples(vec![MotionSample {
            point: to,
            hold: DIRECT_MOVE_HOLD,
        }]);
    }

    let speed = profile.pointer_speed.sample(rng).max(1.0);
    let wobble = profile.duration_wobble.abs();
    let mut total_secs = (distance / speed) * (1.0 + rng.gen_range(-wobble..=wobble));
    let ceiling = profile.latency_ceiling.as_secs_f64();
    if total_secs > ceiling {
        total_secs = ceiling;
    }
    total_secs = total_secs.max(0.05);

    let steps = ((distance / 10.0) as usize).clamp(MIN_SAMPLES, MAX_SAMPLES);
    let hold_base = total_secs / steps as f64;

    let mut polygon = Vec::with_capacity(7);
    polygon.push(from);
    polygon.extend(control_points(from, to, distance, profile, rng));
    polygon.push(to);

    let mut samples = Vec::with_capacity(steps + 3);
    for i in 0..=steps {
        let t = i as f64 / steps as f64;
        let point = if i == 0 {
            from
        } else if i == steps {
            to
        } else {
            let mut p = de_casteljau(&polygon, ease_in_out(t));
            // Jitter vanishes at both endpoints and peaks mid-path.
            let amplitude = profile.jitter_px * (std::f64::consts::PI * t).sin();
            if amplitude > f64::EPSILON {
                p.x += rng.gen_range(-amplitude..=amplitude);
                p.y += rng.gen_range(-amplitude..=amplitude);
            }
            screen.clamp(p)
        };
        let hold = hold_base * rng.gen_range(0.7..=1.3);
        samples.push(MotionSample {
            point,
            hold: Duration::from_secs_f64(hold),
        });
    }

    if distance > 40.0 && rng.gen_bool(profile.overshoot_probability.clamp(0.0, 1.0)) {
        append_overshoot(&mut samples, from, to, profile, screen, rng, hold_base);
    }

    cap_total(&mut samples, profile.latency_ceiling);
    MotionSegment::from_samples(samples)
}

/// Rescales holds uniformly so the whole move fits under `ceiling`; the
/// per-sample hold perturbation and any overshoot tail can push the sum
/// past the planned total.
fn cap_total(samples: &mut [MotionSample], ceiling: Duration) {
    let total: Duration = samples.iter().map(|s| s.hold).sum();
    if total <= ceiling || total.is_zero() {
        return;
    }
    let factor = ceiling.as_secs_f64() / total.as_secs_f64();
    for sample in samples.iter_mut() {
        sample.hold = sample.hold.mul_f64(factor);
    }
}

/// Small overshoot past the target followed by a correction back onto it.
fn append_overshoot(
    samples: &mut Vec<MotionSample>,
    from: ScreenPoint,
    to: ScreenPoint,
    profile: &SimulationProfile,
    screen: ScreenBounds,
    rng: &mut impl Rng,
    hold_base: f64,
) {
    let distance = from.distance_to(&to).max(1.0);
    let ux = (to.x - from.x) / distance;
    let uy = (to.y - from.y) / distance;
    let reach = profile.overshoot_px.sample(rng);
    let past = screen.clamp(ScreenPoint {
        x: to.x + ux * reach,
        y: to.y + uy * reach,
    });
    samples.push(MotionSample {
        point: past,
        hold: Duration::from_secs_f64(hold_base * rng.gen_range(1.5..=3.0)),
    });
    samples.push(MotionSample {
        point: to,
        hold: Duration::from_secs_f64(hold_base * rng.gen_range(0.8..=1.5)),
    });
}

/// Plans a small wander away from `origin` and back.
///
/// Used by the orchestrator to break up mechanically uniform idle periods
/// while waiting on a challenge or between queries.
pub fn plan_idle_jiggle(
    origin: ScreenPoint,
    profile: &SimulationProfile,
    screen: ScreenBounds,
    rng: &mut impl Rng,
) -> MotionSegment {
    let target = screen.clamp(ScreenPoint {
        x: origin.x + rng.gen_range(-100.0..=100.0),
        y: origin.y + rng.gen_range(-100.0..=100.0),
    });
    let out = plan_move(origin, target, profile, screen, rng);
    let back = plan_move(target, origin, profile, screen, rng);
    out.chain(back)
}
