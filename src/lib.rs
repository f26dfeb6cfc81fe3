//! Vision-guided, human-paced UI interaction engine.
//!
//! This crate drives an arbitrary on-screen application the way a person
//! would: it locates interactive regions by asking a vision-capable
//! inference model about a screenshot, moves the pointer along synthesized
//! curves with natural timing, types with realistic pacing and corrected
//! slips, waits for an asynchronously rendering response to stop changing,
//! and gates on interactive verification challenges that need external
//! resolution.
//!
//! All contact with the outside world — screen capture, inference, OS
//! input, response reading, persistence — goes through the injected ports
//! in [`ports`], so every piece is testable against scripted fakes. The
//! single orchestration entry point is
//! [`InteractionSession::run_transaction`].

pub mod challenge;
pub mod config;
pub mod errors;
pub mod geometry;
pub mod localizer;
pub mod motion;
pub mod ports;
pub mod session;
pub mod stability;
pub mod typing;

#[cfg(test)]
mod tests;

pub use challenge::{ChallengeDetector, ChallengeState};
pub use config::{SessionConfig, SimulationProfile, Span};
pub use errors::InteractionError;
pub use geometry::{BoundingBox, ScreenBounds, ScreenPoint};
pub use localizer::{ElementLocalizer, ElementLocation, ElementQuery, ParseOutcome};
pub use motion::{plan_idle_jiggle, plan_move, MotionSample, MotionSegment};
pub use ports::{
    GenericChatSite, InferenceClient, InputDelivery, ReadSnapshot, ResponseReader, ScreenCapture,
    ScreenshotResult, SiteHandler, TransactionSink,
};
pub use session::{
    FailureReason, InteractionSession, SessionPorts, Transaction, TransactionOutcome,
};
pub use stability::{await_stable, Clock, StabilityOptions, StabilityOutcome, SystemClock};
pub use typing::{plan_type, KeyAction, KeyEvent, KeySchedule};

/// Initializes a `tracing` subscriber honoring `RUST_LOG`. Safe to call
/// more than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
