use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Duration;

use crate::config::{SimulationProfile, Span};
use crate::geometry::{ScreenBounds, ScreenPoint};
use crate::motion::{plan_idle_jiggle, plan_move};

fn screen() -> ScreenBounds {
    ScreenBounds::new(1920.0, 1080.0)
}

#[test]
fn move_starts_and_ends_exactly_on_the_endpoints() {
    let profile = SimulationProfile::default();
    for seed in 0..50u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let from = ScreenPoint::new(100.0, 100.0);
        let to = ScreenPoint::new(1400.0, 800.0);
        let segment = plan_move(from, to, &profile, screen(), &mut rng);

        assert_eq!(segment.first_point(), Some(from), "seed {seed}");
        assert_eq!(segment.last_point(), Some(to), "seed {seed}");
    }
}

#[test]
fn every_sample_stays_inside_the_screen() {
    // Large jitter and displacement push intermediate samples hard toward
    // the edges; the planner must clamp them all.
    let profile = SimulationProfile {
        jitter_px: 50.0,
        control_displacement: Span::new(0.5, 1.5),
        ..SimulationProfile::default()
    };
    let bounds = screen();
    for seed in 0..50u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let from = ScreenPoint::new(5.0, 5.0);
        let to = ScreenPoint::new(1910.0, 1070.0);
        let segment = plan_move(from, to, &profile, bounds, &mut rng);

        for sample in segment.samples() {
            assert!(bounds.contains(sample.point), "seed {seed}: {:?}", sample.point);
        }
    }
}

#[test]
fn near_zero_distance_collapses_to_a_single_step() {
    let profile = SimulationProfile::default();
    let mut rng = StdRng::seed_from_u64(1);
    let from = ScreenPoint::new(400.0, 400.0);
    let to = ScreenPoint::new(402.0, 401.0);
    let segment = plan_move(from, to, &profile, screen(), &mut rng);

    assert_eq!(segment.len(), 1);
    assert_eq!(segment.last_point(), Some(to));
}

#[test]
fn offscreen_target_is_clamped_before_planning() {
    let profile = SimulationProfile::default();
    let bounds = screen();
    let mut rng = StdRng::seed_from_u64(2);
    let from = ScreenPoint::new(500.0, 500.0);
    let to = ScreenPoint::new(5000.0, -300.0);
    let segment = plan_move(from, to, &profile, bounds, &mut rng);

    let end = segment.last_point().unwrap();
    assert!(bounds.contains(end));
    assert_eq!(end, bounds.clamp(to));
}

#[test]
fn total_duration_respects_the_ceiling() {
    // A crawling pointer over a long path would take minutes unrescaled.
    let profile = SimulationProfile {
        pointer_speed: Span::new(2.0, 4.0),
        latency_ceiling: Duration::from_secs(5),
        ..SimulationProfile::default()
    };
    for seed in 0..20u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let segment = plan_move(
            ScreenPoint::new(0.0, 0.0),
            ScreenPoint::new(1900.0, 1000.0),
            &profile,
            screen(),
            &mut rng,
        );
        assert!(
            segment.total_duration() <= profile.latency_ceiling + Duration::from_millis(1),
            "seed {seed}: {:?}",
            segment.total_duration()
        );
    }
}

#[test]
fn longer_paths_get_more_samples() {
    let profile = SimulationProfile {
        overshoot_probability: 0.0,
        ..SimulationProfile::default()
    };
    let mut rng = StdRng::seed_from_u64(3);
    let short = plan_move(
        ScreenPoint::new(100.0, 100.0),
        ScreenPoint::new(250.0, 100.0),
        &profile,
        screen(),
        &mut rng,
    );
    let long = plan_move(
        ScreenPoint::new(100.0, 100.0),
        ScreenPoint::new(1800.0, 1000.0),
        &profile,
        screen(),
        &mut rng,
    );
    assert!(long.len() > short.len());
}

#[test]
fn idle_jiggle_returns_to_its_origin() {
    let profile = SimulationProfile::default();
    let bounds = screen();
    for seed in 0..20u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let origin = ScreenPoint::new(800.0, 450.0);
        let segment = plan_idle_jiggle(origin, &profile, bounds, &mut rng);

        assert!(!segment.is_empty());
        assert_eq!(segment.last_point(), Some(origin), "seed {seed}");
        for sample in segment.samples() {
            assert!(bounds.contains(sample.point));
        }
    }
}
