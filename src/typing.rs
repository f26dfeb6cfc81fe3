//! Keystroke schedule synthesis.
//!
//! `plan_type` turns a string into a timed sequence of key actions paced by
//! a sampled words-per-minute rate, with occasional corrected slips and
//! pauses after punctuation. The schedule's net effect always reconstructs
//! the input text exactly; only the path there varies.

use once_cell::sync::Lazy;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::SimulationProfile;

/// QWERTY adjacency used to pick plausible substitution slips.
static KEY_NEIGHBORS: Lazy<HashMap<char, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ('q', "was"),
        ('w', "qase"),
        ('e', "wsdr"),
        ('r', "edft"),
        ('t', "rfgy"),
        ('y', "tghu"),
        ('u', "yhji"),
        ('i', "ujko"),
        ('o', "iklp"),
        ('p', "ol"),
        ('a', "qwsz"),
        ('s', "awedxz"),
        ('d', "serfcx"),
        ('f', "drtgvc"),
        ('g', "ftyhbv"),
        ('h', "gyujnb"),
        ('j', "huikmn"),
        ('k', "jiolm"),
        ('l', "kop"),
        ('z', "asx"),
        ('x', "zsdc"),
        ('c', "xdfv"),
        ('v', "cfgb"),
        ('b', "vghn"),
        ('n', "bhjm"),
        ('m', "njk"),
    ])
});

/// One key action. `Hold` is a deliberate pause with no key effect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum KeyAction {
    Insert(char),
    Backspace,
    Hold(Duration),
}

/// A key action plus the delay that precedes it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub action: KeyAction,
    pub delay_before: Duration,
}

/// An ordered keystroke schedule. Generated fresh per typed string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeySchedule {
    events: Vec<KeyEvent>,
}

impl KeySchedule {
    pub fn events(&self) -> &[KeyEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Sum of all delays and holds in the schedule.
    pub fn total_duration(&self) -> Duration {
        self.events
            .iter()
            .map(|e| {
                e.delay_before
                    + match e.action {
                        KeyAction::Hold(d) => d,
                        _ => Duration::ZERO,
                    }
            })
            .sum()
    }

    /// The text left in the field after replaying the schedule: inserts
    /// append, backspaces delete, holds do nothing.
    pub fn rendered_text(&self) -> String {
        let mut out = String::new();
        for event in &self.events {
            match event.action {
                KeyAction::Insert(c) => out.push(c),
                KeyAction::Backspace => {
                    out.pop();
                }
                KeyAction::Hold(_) => {}
            }
        }
        out
    }

    fn push(&mut self, action: KeyAction, delay_before: Duration) {
        self.events.push(KeyEvent {
            action,
            delay_before,
        });
    }

    /// Rescales every delay and hold so the total duration fits under
    /// `ceiling`. Preserves rhythm proportions instead of truncating.
    fn cap_at(&mut self, ceiling: Duration) {
        let total = self.total_duration();
        if total <= ceiling || total.is_zero() {
            return;
        }
        let factor = ceiling.as_secs_f64() / total.as_secs_f64();
        for event in &mut self.events {
            event.delay_before = event.delay_before.mul_f64(factor);
            if let KeyAction::Hold(d) = &mut event.action {
                *d = d.mul_f64(factor);
            }
        }
    }
}

fn char_delay(base: f64, profile: &SimulationProfile, rng: &mut impl Rng) -> Duration {
    let irregularity = profile.typing_irregularity.clamp(0.0, 0.95);
    let delay = base * rng.gen_range(1.0 - irregularity..=1.0 + irregularity);
    Duration::from_secs_f64(delay.max(0.01))
}

/// A plausible mistyped character near `intended`, case preserved. Falls
/// back to a random lowercase letter for keys outside the table.
fn neighbor_of(intended: char, rng: &mut impl Rng) -> char {
    let lower = intended.to_ascii_lowercase();
    let wrong = match KEY_NEIGHBORS.get(&lower) {
        Some(neighbors) => {
            let bytes = neighbors.as_bytes();
            bytes[rng.gen_range(0..bytes.len())] as char
        }
        None => (b'a' + rng.gen_range(0..26u8)) as char,
    };
    if intended.is_ascii_uppercase() {
        wrong.to_ascii_uppercase()
    } else {
        wrong
    }
}

#[derive(Clone, Copy)]
enum SlipKind {
    Substitution,
    Duplication,
    Skip,
}

/// Plans a keystroke schedule for `text`.
///
/// Empty text produces an empty schedule. The net effect of the schedule
/// (after slip corrections) is always exactly `text`; total duration stays
/// under the profile's latency ceiling.
pub fn plan_type(text: &str, profile: &SimulationProfile, rng: &mut impl Rng) -> KeySchedule {
    let mut schedule = KeySchedule::default();
    if text.is_empty() {
        return schedule;
    }

    let wpm = profile.words_per_minute.sample(rng).max(1.0);
    // Average word length is five characters.
    let base_delay = 60.0 / (wpm * 5.0);
    let typo_probability = profile.typo_probability.clamp(0.0, 1.0);

    for ch in text.chars() {
        let slipped = rng.gen_bool(typo_probability);
        if slipped {
            let kind = match rng.gen_range(0..3u8) {
                0 => SlipKind::Substitution,
                1 => SlipKind::Duplication,
                _ => SlipKind::Skip,
            };
            plan_slip(&mut schedule, ch, kind, base_delay, profile, rng);
        } else {
            schedule.push(KeyAction::Insert(ch), char_delay(base_delay, profile, rng));
        }

        match ch {
            '.' | '!' | '?' => schedule.push(
                KeyAction::Hold(profile.sentence_pause.sample_duration(rng)),
                Duration::ZERO,
            ),
            ',' | ';' | ':' => schedule.push(
                KeyAction::Hold(profile.clause_pause.sample_duration(rng)),
                Duration::ZERO,
            ),
            _ => {}
        }

        if !slipped && rng.gen_bool(profile.hesitation_probability.clamp(0.0, 1.0)) {
            schedule.push(
                KeyAction::Hold(profile.hesitation_pause.sample_duration(rng)),
                Duration::ZERO,
            );
        }
    }

    schedule.cap_at(profile.latency_ceiling);
    schedule
}

/// A slip and its correction. The notice delay models the typist spotting
/// the mistake before fixing it.
fn plan_slip(
    schedule: &mut KeySchedule,
    intended: char,
    kind: SlipKind,
    base_delay: f64,
    profile: &SimulationProfile,
    rng: &mut impl Rng,
) {
    let notice = profile.correction_notice.sample_duration(rng);
    match kind {
        SlipKind::Substitution => {
            let wrong = neighbor_of(intended, rng);
            schedule.push(
                KeyAction::Insert(wrong),
                char_delay(base_delay, profile, rng),
            );
            schedule.push(KeyAction::Backspace, notice);
            schedule.push(
                KeyAction::Insert(intended),
                profile.post_correction.sample_duration(rng),
            );
        }
        SlipKind::Duplication => {
            // The key registers twice; the extra copy is backspaced away.
            schedule.push(
                KeyAction::Insert(intended),
                char_delay(base_delay, profile, rng),
            );
            schedule.push(
                KeyAction::Insert(intended),
                char_delay(base_delay, profile, rng),
            );
            schedule.push(KeyAction::Backspace, notice);
        }
        SlipKind::Skip => {
            // The key never registered; the typist notices and types it.
            schedule.push(KeyAction::Insert(intended), notice);
        }
    }
}
