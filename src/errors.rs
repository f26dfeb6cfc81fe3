use thiserror::Error;

/// Errors surfaced by the interaction engine.
///
/// Only infrastructure faults (an unreachable collaborator, a broken input
/// channel) are reported through this type. Model output irregularities are
/// never errors: the localizer degrades to `found = false`, the challenge
/// detector degrades to `Absent`, and the stability monitor reports
/// `TimedOut` with whatever text it captured.
#[derive(Error, Debug)]
pub enum InteractionError {
    #[error("Inference backend error: {0}")]
    Inference(String),

    #[error("Screen capture failed: {0}")]
    Capture(String),

    #[error("Input delivery failed: {0}")]
    InputDelivery(String),

    #[error("Response reader failed: {0}")]
    Reader(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Session cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
