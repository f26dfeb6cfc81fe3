use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::Span;
use crate::ports::ReadSnapshot;
use crate::stability::{await_stable, StabilityOptions, StabilityOutcome};
use crate::tests::support::{EverChangingReader, ManualClock, ScriptedReader};

fn options() -> StabilityOptions {
    StabilityOptions {
        poll_interval: Duration::from_secs(1),
        required_stable_count: 3,
        timeout: Duration::from_secs(30),
        min_length: 10,
        jitter: Span::new(1.0, 1.0),
    }
}

fn rng() -> StdRng {
    StdRng::seed_from_u64(42)
}

const ANSWER: &str = "Phoenix is the capital of Arizona.";

#[tokio::test]
async fn declares_stability_after_the_required_run() {
    let reader = ScriptedReader::new([
        ReadSnapshot::Text("Phoenix".into()),
        ReadSnapshot::Text(ANSWER.into()),
    ]);
    let clock = ManualClock::new();
    let outcome = await_stable(
        &reader,
        &options(),
        &clock,
        &CancellationToken::new(),
        &mut rng(),
    )
    .await;

    assert_eq!(outcome, StabilityOutcome::Stable(ANSWER.to_string()));
    // One poll for the draft, then three consecutive identical polls.
    assert_eq!(reader.polls(), 4);
}

#[tokio::test]
async fn still_generating_resets_the_run() {
    let reader = ScriptedReader::new([
        ReadSnapshot::Text(ANSWER.into()),
        ReadSnapshot::Text(ANSWER.into()),
        ReadSnapshot::StillGenerating,
        ReadSnapshot::Text(ANSWER.into()),
    ]);
    let clock = ManualClock::new();
    let outcome = await_stable(
        &reader,
        &options(),
        &clock,
        &CancellationToken::new(),
        &mut rng(),
    )
    .await;

    assert!(outcome.is_stable());
    // The sentinel at poll 3 discarded the run of two, so three more
    // identical polls were needed.
    assert_eq!(reader.polls(), 6);
}

#[tokio::test]
async fn short_text_never_counts_as_stable() {
    let reader = ScriptedReader::constant("Paris");
    let clock = ManualClock::new();
    let opts = StabilityOptions {
        timeout: Duration::from_secs(5),
        ..options()
    };
    let outcome = await_stable(&reader, &opts, &clock, &CancellationToken::new(), &mut rng()).await;

    // "Paris" is below the minimum usable length, so the watch runs to
    // timeout and surfaces nothing.
    assert_eq!(outcome, StabilityOutcome::TimedOut { last_text: None });
}

#[tokio::test]
async fn min_length_one_accepts_a_terse_answer() {
    let reader = ScriptedReader::new([
        ReadSnapshot::StillGenerating,
        ReadSnapshot::Text("Paris".into()),
    ]);
    let clock = ManualClock::new();
    let opts = StabilityOptions {
        min_length: 1,
        ..options()
    };
    let outcome = await_stable(&reader, &opts, &clock, &CancellationToken::new(), &mut rng()).await;
    assert_eq!(outcome, StabilityOutcome::Stable("Paris".to_string()));
}

#[tokio::test]
async fn never_times_out_before_the_deadline() {
    let reader = EverChangingReader::new();
    let clock = ManualClock::new();
    let opts = StabilityOptions {
        timeout: Duration::from_secs(10),
        ..options()
    };
    let outcome = await_stable(&reader, &opts, &clock, &CancellationToken::new(), &mut rng()).await;

    match outcome {
        StabilityOutcome::TimedOut { last_text } => {
            assert!(last_text.is_some());
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
    assert!(clock.elapsed() >= opts.timeout);
}

#[tokio::test]
async fn cancellation_preempts_polling() {
    let reader = ScriptedReader::constant(ANSWER);
    let clock = ManualClock::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = await_stable(&reader, &options(), &clock, &cancel, &mut rng()).await;

    assert_eq!(outcome, StabilityOutcome::Cancelled { last_text: None });
    assert_eq!(reader.polls(), 0);
}

#[tokio::test]
async fn timed_out_watch_still_surfaces_the_last_usable_text() {
    // Text keeps flipping between two long variants, so it never settles,
    // but the last capture is still handed back.
    let reader = ScriptedReader::new([
        ReadSnapshot::Text("first long draft of the answer".into()),
        ReadSnapshot::Text("second long draft of the answer".into()),
        ReadSnapshot::Text("first long draft of the answer".into()),
        ReadSnapshot::Text("second long draft of the answer".into()),
        ReadSnapshot::StillGenerating,
    ]);
    let clock = ManualClock::new();
    let opts = StabilityOptions {
        timeout: Duration::from_secs(3),
        ..options()
    };
    let outcome = await_stable(&reader, &opts, &clock, &CancellationToken::new(), &mut rng()).await;

    match outcome {
        StabilityOutcome::TimedOut { last_text } => {
            assert_eq!(
                last_text.as_deref(),
                Some("second long draft of the answer")
            );
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
}
