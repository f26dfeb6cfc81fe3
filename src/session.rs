//! The interaction orchestrator.
//!
//! One [`InteractionSession`] drives a single pointer/keyboard focus, so
//! transactions run strictly one at a time: localize, gate on challenges,
//! deliver input, wait for the response to stabilize, report. Every
//! transaction ends in a recorded outcome, including partial and degraded
//! ones.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::challenge::{ChallengeDetector, ChallengeState};
use crate::config::{SessionConfig, SimulationProfile, Span};
use crate::errors::InteractionError;
use crate::geometry::ScreenPoint;
use crate::localizer::{ElementLocalizer, ElementLocation};
use crate::motion::{plan_idle_jiggle, plan_move, MotionSegment};
use crate::ports::{
    InferenceClient, InputDelivery, ReadSnapshot, ResponseReader, ScreenCapture, SiteHandler,
    TransactionSink,
};
use crate::stability::{await_stable, Clock, StabilityOptions, StabilityOutcome};
use crate::typing::{plan_type, KeyAction, KeySchedule};

/// Why a transaction ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FailureReason {
    /// A verification challenge stayed on screen past the hard timeout.
    ChallengeTimeout,
    /// Input delivery failed on the initial attempt and every retry.
    SendFailed(String),
    /// The response never stabilized and nothing usable was captured.
    NoUsableResponse,
    /// The session was cancelled mid-transaction.
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ChallengeTimeout => write!(f, "challenge timeout"),
            FailureReason::SendFailed(detail) => write!(f, "send failed: {detail}"),
            FailureReason::NoUsableResponse => write!(f, "no usable response"),
            FailureReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TransactionOutcome {
    Pending,
    Sent,
    Completed,
    /// The response never stabilized; any captured text is still surfaced.
    TimedOut,
    Failed(FailureReason),
}

/// One query/response exchange. Created per query, mutated only by the
/// session, handed to the sink once terminal.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Transaction {
    pub query: String,
    pub started_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub response_text: Option<String>,
    pub outcome: TransactionOutcome,
}

impl Transaction {
    fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            started_at: Utc::now(),
            sent_at: None,
            completed_at: None,
            response_text: None,
            outcome: TransactionOutcome::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.outcome,
            TransactionOutcome::Completed
                | TransactionOutcome::TimedOut
                | TransactionOutcome::Failed(_)
        )
    }
}

/// Per-transaction progression, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    LocalizingElements,
    ChallengeCheck,
    Sending,
    AwaitingResponse,
    Captured,
    Failed,
}

/// The collaborators a session is wired to.
pub struct SessionPorts {
    pub capture: Arc<dyn ScreenCapture>,
    pub inference: Arc<dyn InferenceClient>,
    pub input: Arc<dyn InputDelivery>,
    pub site: Arc<dyn SiteHandler>,
    pub sink: Arc<dyn TransactionSink>,
    pub clock: Arc<dyn Clock>,
}

/// Adapts the site handler's response extraction to the stability
/// monitor's reader port.
struct SiteReader(Arc<dyn SiteHandler>);

#[async_trait::async_trait]
impl ResponseReader for SiteReader {
    async fn read(&self) -> Result<ReadSnapshot, InteractionError> {
        self.0.read_response().await
    }
}

pub struct InteractionSession {
    capture: Arc<dyn ScreenCapture>,
    input: Arc<dyn InputDelivery>,
    site: Arc<dyn SiteHandler>,
    sink: Arc<dyn TransactionSink>,
    clock: Arc<dyn Clock>,
    localizer: ElementLocalizer,
    detector: ChallengeDetector,
    profile: SimulationProfile,
    config: SessionConfig,
    cancel: CancellationToken,
    /// Seed source for per-transaction RNGs.
    rng: Mutex<StdRng>,
    /// Last pointer position delivered; moves are planned from here.
    pointer: Mutex<ScreenPoint>,
    /// Advisory last-known-good element locations. May be stale or wrong;
    /// localization refreshes it, fallbacks tolerate it being empty.
    known_locations: Mutex<HashMap<String, ElementLocation>>,
}

impl InteractionSession {
    pub fn new(ports: SessionPorts, profile: SimulationProfile, config: SessionConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let start = ports.capture.bounds().point_at(0.5, 0.5);
        Self {
            localizer: ElementLocalizer::new(ports.inference.clone()),
            detector: ChallengeDetector::new(ports.inference),
            capture: ports.capture,
            input: ports.input,
            site: ports.site,
            sink: ports.sink,
            clock: ports.clock,
            profile,
            config,
            cancel: CancellationToken::new(),
            rng: Mutex::new(rng),
            pointer: Mutex::new(start),
            known_locations: Mutex::new(HashMap::new()),
        }
    }

    /// Token that unwinds the session's waits when cancelled. Clone it and
    /// cancel from anywhere; in-flight polls return promptly.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn fork_rng(&self) -> StdRng {
        let mut guard = self.rng.lock().unwrap();
        StdRng::seed_from_u64(guard.gen())
    }

    fn enter(&self, phase: Phase) {
        debug!(?phase, "phase transition");
    }

    /// Runs one full query/response transaction.
    ///
    /// Never panics and never silently drops the transaction: whatever
    /// happens, the terminal record reaches the sink and is returned.
    #[instrument(skip(self), fields(site = self.site.name()))]
    pub async fn run_transaction(&self, query: &str) -> Transaction {
        let mut txn = Transaction::new(query);
        let mut rng = self.fork_rng();

        self.enter(Phase::LocalizingElements);
        let (input_point, send_point) = self.resolve_elements().await;

        self.enter(Phase::ChallengeCheck);
        if let Err(reason) = self.challenge_gate(&mut rng).await {
            self.enter(Phase::Failed);
            txn.outcome = TransactionOutcome::Failed(reason);
            return self.finalize(txn).await;
        }

        self.enter(Phase::Sending);
        let mut attempts = 0u32;
        loop {
            match self
                .deliver_query(query, input_point, send_point, &mut rng)
                .await
            {
                Ok(()) => {
                    txn.sent_at = Some(Utc::now());
                    txn.outcome = TransactionOutcome::Sent;
                    break;
                }
                Err(e) if attempts < self.config.send_retries => {
                    attempts += 1;
                    warn!(attempt = attempts, error = %e, "send failed, retrying");
                }
                Err(e) => {
                    self.enter(Phase::Failed);
                    txn.outcome =
                        TransactionOutcome::Failed(FailureReason::SendFailed(e.to_string()));
                    return self.finalize(txn).await;
                }
            }
        }

        self.enter(Phase::AwaitingResponse);
        let reader = SiteReader(self.site.clone());
        let options = StabilityOptions {
            poll_interval: self.config.poll_interval,
            required_stable_count: self.config.required_stable_count,
            timeout: self.config.response_timeout,
            min_length: self.config.min_response_len,
            jitter: self.config.stability_jitter,
        };
        match await_stable(&reader, &options, &*self.clock, &self.cancel, &mut rng).await {
            StabilityOutcome::Stable(text) => {
                self.enter(Phase::Captured);
                txn.response_text = Some(text);
                txn.outcome = TransactionOutcome::Completed;
            }
            StabilityOutcome::TimedOut { last_text } => {
                // Best-effort capture still counts for the caller.
                txn.response_text = last_text;
                txn.outcome = if txn.response_text.is_some() {
                    self.enter(Phase::Captured);
                    TransactionOutcome::TimedOut
                } else {
                    self.enter(Phase::Failed);
                    TransactionOutcome::Failed(FailureReason::NoUsableResponse)
                };
            }
            StabilityOutcome::Cancelled { last_text } => {
                self.enter(Phase::Failed);
                txn.response_text = last_text;
                txn.outcome = TransactionOutcome::Failed(FailureReason::Cancelled);
            }
        }

        self.finalize(txn).await
    }

    /// Runs queries in order with a randomized pause between them,
    /// occasionally interleaving a small idle motion so the idle periods
    /// are not mechanically uniform.
    #[instrument(skip_all, fields(queries = queries.len()))]
    pub async fn run_queries(&self, queries: &[String]) -> Vec<Transaction> {
        let mut transactions = Vec::with_capacity(queries.len());
        for (index, query) in queries.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!("session cancelled, skipping remaining queries");
                break;
            }
            transactions.push(self.run_transaction(query).await);
            self.enter(Phase::Idle);

            if index + 1 < queries.len() {
                let mut rng = self.fork_rng();
                let delay = self.config.inter_query_delay.sample_duration(&mut rng);
                debug!(?delay, "inter-query delay");
                if rng.gen_bool(self.config.idle_motion_probability.clamp(0.0, 1.0)) {
                    self.idle_motion(&mut rng).await;
                }
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = self.clock.sleep(delay) => {}
                }
            }
        }
        transactions
    }

    async fn finalize(&self, mut txn: Transaction) -> Transaction {
        txn.completed_at = Some(Utc::now());
        info!(outcome = ?txn.outcome, "transaction finished");
        if let Err(e) = self.sink.record(&txn).await {
            // The record still reaches the caller through the return value.
            warn!(error = %e, "transaction sink rejected record");
        }
        txn
    }

    /// Resolves the input-field and send-button positions.
    ///
    /// Preference order: last-known-good cache, fresh localization, then
    /// the site's fixed-fraction fallback. The fallback path is
    /// reduced-confidence operation and is logged as such; it never aborts
    /// the transaction.
    async fn resolve_elements(&self) -> (ScreenPoint, Option<ScreenPoint>) {
        let screen = self.capture.bounds();
        let input_query = self.site.input_query();
        let send_query = self.site.send_button_query();

        let cached_input = self.known_point(&input_query.name);
        if let Some(input) = cached_input {
            let send = self.known_point(&send_query.name);
            debug!("using last-known-good element locations");
            return (input, send.or_else(|| self.site.fallback_send(screen)));
        }

        let located = match self.capture.capture().await {
            Ok(screenshot) => {
                self.localizer
                    .locate(&screenshot, &[input_query.clone(), send_query.clone()])
                    .await
            }
            Err(e) => {
                warn!(error = %e, "screen capture failed before localization");
                HashMap::new()
            }
        };

        {
            let mut known = self.known_locations.lock().unwrap();
            for (name, location) in &located {
                if location.found {
                    known.insert(name.clone(), location.clone());
                }
            }
        }

        let input = located
            .get(&input_query.name)
            .and_then(ElementLocation::best_point)
            .unwrap_or_else(|| {
                warn!("input field not localized, using fallback position (reduced confidence)");
                self.site.fallback_input(screen)
            });
        let send = located
            .get(&send_query.name)
            .and_then(ElementLocation::best_point)
            .or_else(|| self.site.fallback_send(screen));

        (input, send)
    }

    fn known_point(&self, name: &str) -> Option<ScreenPoint> {
        self.known_locations
            .lock()
            .unwrap()
            .get(name)
            .and_then(ElementLocation::best_point)
    }

    /// Suspends while a verification challenge is on screen, re-checking at
    /// a fixed interval until it clears or the hard timeout elapses.
    async fn challenge_gate(&self, rng: &mut StdRng) -> Result<(), FailureReason> {
        let started = self.clock.now();
        loop {
            let screenshot = match self.capture.capture().await {
                Ok(shot) => shot,
                Err(e) => {
                    // Same fail-open stance as the detector itself.
                    warn!(error = %e, "capture failed during challenge check, assuming absent");
                    return Ok(());
                }
            };

            match self.detector.detect(&screenshot).await {
                ChallengeState::Absent => return Ok(()),
                ChallengeState::Present { description } => {
                    info!(%description, "challenge present, waiting for external resolution");
                }
            }

            if self.clock.now().duration_since(started) >= self.config.challenge_timeout {
                warn!("challenge did not clear before timeout");
                return Err(FailureReason::ChallengeTimeout);
            }

            if rng.gen_bool(self.config.idle_motion_probability.clamp(0.0, 1.0)) {
                self.idle_motion(rng).await;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(FailureReason::Cancelled),
                _ = self.clock.sleep(self.config.challenge_poll_interval) => {}
            }
        }
    }

    /// Moves to the input field, clicks, optionally clears it, types the
    /// query, and submits.
    async fn deliver_query(
        &self,
        query: &str,
        input_point: ScreenPoint,
        send_point: Option<ScreenPoint>,
        rng: &mut StdRng,
    ) -> Result<(), InteractionError> {
        let screen = self.capture.bounds();

        let approach = plan_move(self.pointer_position(), input_point, &self.profile, screen, rng);
        self.replay_motion(&approach).await?;
        self.pause(self.config.pre_click_pause, rng).await;
        self.input.click().await?;
        self.pause(self.config.post_click_pause, rng).await;

        if self.site.clear_before_send() {
            // Triple-click selects any placeholder content, backspace
            // removes it.
            for _ in 0..2 {
                self.input.click().await?;
                self.clock.sleep(Duration::from_millis(80)).await;
            }
            self.input.key_action(&KeyAction::Backspace).await?;
            self.pause(self.config.post_click_pause, rng).await;
        }

        let schedule = plan_type(query, &self.profile, rng);
        self.replay_keys(&schedule).await?;

        match send_point {
            Some(send) => {
                let travel = plan_move(input_point, send, &self.profile, screen, rng);
                self.replay_motion(&travel).await?;
                self.pause(self.config.pre_click_pause, rng).await;
                self.input.click().await?;
            }
            None => {
                debug!("no send button available, submitting with Enter");
                self.input.press_enter().await?;
            }
        }
        Ok(())
    }

    fn pointer_position(&self) -> ScreenPoint {
        *self.pointer.lock().unwrap()
    }

    async fn replay_motion(&self, segment: &MotionSegment) -> Result<(), InteractionError> {
        for sample in segment.samples() {
            self.input.move_to(sample.point).await?;
            self.clock.sleep(sample.hold).await;
        }
        if let Some(point) = segment.last_point() {
            *self.pointer.lock().unwrap() = point;
        }
        Ok(())
    }

    async fn replay_keys(&self, schedule: &KeySchedule) -> Result<(), InteractionError> {
        for event in schedule.events() {
            if !event.delay_before.is_zero() {
                self.clock.sleep(event.delay_before).await;
            }
            match event.action {
                KeyAction::Hold(pause) => self.clock.sleep(pause).await,
                ref action => self.input.key_action(action).await?,
            }
        }
        Ok(())
    }

    /// A cheap secondary use of the motion planner: wander a little and
    /// come back. Failures here are harmless and only logged.
    async fn idle_motion(&self, rng: &mut StdRng) {
        let screen = self.capture.bounds();
        let segment = plan_idle_jiggle(self.pointer_position(), &self.profile, screen, rng);
        if let Err(e) = self.replay_motion(&segment).await {
            debug!(error = %e, "idle motion failed");
        }
    }

    async fn pause(&self, span: Span, rng: &mut StdRng) {
        self.clock.sleep(span.sample_duration(rng)).await;
    }
}
