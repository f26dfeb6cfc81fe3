//! Interactive-challenge detection.
//!
//! A single yes/no-style inference call classifies a screenshot for a
//! human-verification obstacle (a puzzle, checkbox, slider, etc.). The
//! keyword heuristic is a best-effort signal with an unverified
//! false-negative rate, and the detector fails open: if the inference
//! backend is down, the answer is `Absent` so a broken detector cannot
//! deadlock the session. That trade-off is deliberate and logged.

use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::ports::{InferenceClient, ScreenshotResult};

/// Characters at the head of the answer checked for a plain affirmation.
const AFFIRMATION_WINDOW: usize = 20;
/// Terms anywhere in the answer that indicate a verification obstacle.
const CHALLENGE_KEYWORDS: &[&str] = &["captcha", "verification", "robot"];
/// Maximum length of the description carried on a positive verdict.
const DESCRIPTION_LIMIT: usize = 160;

const DETECT_PROMPT: &str = "Look at this screenshot and determine if there is \
a CAPTCHA or human verification challenge visible.\n\n\
Examples of what to look for:\n\
- Any text mentioning \"CAPTCHA\", \"verification\", \"prove you're human\"\n\
- Image-based puzzles that must be solved to continue\n\
- Checkbox challenges like \"I'm not a robot\"\n\
- Slider puzzles or other interactive verification mechanisms\n\n\
Is there a CAPTCHA or human verification challenge visible in this \
screenshot? Answer yes or no and describe what you see.";

/// Whether an interactive verification obstacle is blocking the screen.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ChallengeState {
    Absent,
    Present { description: String },
}

impl ChallengeState {
    pub fn is_present(&self) -> bool {
        matches!(self, ChallengeState::Present { .. })
    }
}

/// Classifies screenshots for verification challenges via an injected
/// inference client.
pub struct ChallengeDetector {
    client: Arc<dyn InferenceClient>,
}

impl ChallengeDetector {
    pub fn new(client: Arc<dyn InferenceClient>) -> Self {
        Self { client }
    }

    /// Never fails: inference errors degrade to `Absent`.
    #[instrument(level = "debug", skip_all)]
    pub async fn detect(&self, screenshot: &ScreenshotResult) -> ChallengeState {
        match self.client.infer(screenshot, DETECT_PROMPT).await {
            Ok(raw) => {
                let state = classify(&raw);
                debug!(present = state.is_present(), "challenge verdict");
                state
            }
            Err(e) => {
                warn!(error = %e, "challenge detection failed, failing open to Absent");
                ChallengeState::Absent
            }
        }
    }
}

/// Classifies raw model text: affirmative within the first few characters,
/// or any challenge keyword, or "human" together with "challenge".
pub(crate) fn classify(raw: &str) -> ChallengeState {
    let lower = raw.to_lowercase();
    let head: String = lower.chars().take(AFFIRMATION_WINDOW).collect();

    let hit = head.contains("yes")
        || CHALLENGE_KEYWORDS.iter().any(|k| lower.contains(k))
        || (lower.contains("human") && lower.contains("challenge"));

    if hit {
        let description: String = raw.trim().chars().take(DESCRIPTION_LIMIT).collect();
        ChallengeState::Present { description }
    } else {
        ChallengeState::Absent
    }
}
