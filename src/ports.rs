//! Collaborator ports.
//!
//! Everything the engine needs from the outside world — screen capture,
//! model inference, OS input delivery, response reading, transaction
//! persistence — enters through these async traits, injected as
//! `Arc<dyn Trait>`. The engine owns no network or file-format contract of
//! its own.

use async_trait::async_trait;

use crate::errors::InteractionError;
use crate::geometry::{ScreenBounds, ScreenPoint};
use crate::localizer::ElementQuery;
use crate::session::Transaction;
use crate::typing::KeyAction;

/// Raw screenshot data (RGBA) plus dimensions.
#[derive(Debug, Clone)]
pub struct ScreenshotResult {
    pub image_data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl ScreenshotResult {
    pub fn bounds(&self) -> ScreenBounds {
        ScreenBounds::new(self.width as f64, self.height as f64)
    }

    /// Decodes the raw buffer into an image, when the byte length matches
    /// an RGBA layout. Consumers use this for downscaling or archiving
    /// captures.
    pub fn as_image(&self) -> Option<image::RgbaImage> {
        image::RgbaImage::from_raw(self.width, self.height, self.image_data.clone())
    }
}

/// One observation of the response area. `StillGenerating` is the sentinel
/// a reader returns while the application is visibly mid-render; the
/// stability monitor resets its counter on it without disturbing the last
/// captured text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadSnapshot {
    Text(String),
    StillGenerating,
}

/// Captures the screen the session operates on.
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    async fn capture(&self) -> Result<ScreenshotResult, InteractionError>;
    fn bounds(&self) -> ScreenBounds;
}

/// A vision-capable inference model: one image plus one instruction in,
/// free-form text out. No streaming.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn infer(
        &self,
        image: &ScreenshotResult,
        prompt: &str,
    ) -> Result<String, InteractionError>;
}

/// Delivers synthesized pointer and keyboard input to the OS.
#[async_trait]
pub trait InputDelivery: Send + Sync {
    async fn move_to(&self, point: ScreenPoint) -> Result<(), InteractionError>;
    async fn click(&self) -> Result<(), InteractionError>;
    async fn key_action(&self, action: &KeyAction) -> Result<(), InteractionError>;
    /// Fallback submission trigger when no send button was located.
    async fn press_enter(&self) -> Result<(), InteractionError>;
}

/// Site-specific extraction of the current response text.
#[async_trait]
pub trait ResponseReader: Send + Sync {
    async fn read(&self) -> Result<ReadSnapshot, InteractionError>;
}

/// Receives every terminal transaction. Storage format and location are
/// the collaborator's business.
#[async_trait]
pub trait TransactionSink: Send + Sync {
    async fn record(&self, transaction: &Transaction) -> Result<(), InteractionError>;
}

/// Capabilities of one target site: how to describe its elements, how to
/// read its response area, and where to aim when localization fails.
/// One implementation per site, injected into the session.
#[async_trait]
pub trait SiteHandler: Send + Sync {
    fn name(&self) -> &str;

    /// The text input field, with description variants tried in order.
    fn input_query(&self) -> ElementQuery;

    /// The submission control, with description variants tried in order.
    fn send_button_query(&self) -> ElementQuery;

    /// Whether the input field holds placeholder content that must be
    /// cleared before typing.
    fn clear_before_send(&self) -> bool {
        false
    }

    /// Reduced-confidence input-field position used when localization and
    /// the last-known-good cache both come up empty.
    fn fallback_input(&self, screen: ScreenBounds) -> ScreenPoint {
        screen.point_at(0.5, 0.9)
    }

    /// Reduced-confidence send-button position. `None` means fall back to
    /// the Enter key instead of a click.
    fn fallback_send(&self, _screen: ScreenBounds) -> Option<ScreenPoint> {
        None
    }

    async fn read_response(&self) -> Result<ReadSnapshot, InteractionError>;
}

/// A site handler with generic chat-interface phrasings, suitable for any
/// conversational UI that has a bottom input field and a send control.
pub struct GenericChatSite {
    reader: std::sync::Arc<dyn ResponseReader>,
}

impl GenericChatSite {
    pub fn new(reader: std::sync::Arc<dyn ResponseReader>) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl SiteHandler for GenericChatSite {
    fn name(&self) -> &str {
        "generic-chat"
    }

    fn input_query(&self) -> ElementQuery {
        ElementQuery::new(
            "input_field",
            [
                "the chat input text box or text area",
                "the message composition area at the bottom of the screen",
                "the text entry field where users type messages",
            ],
        )
    }

    fn send_button_query(&self) -> ElementQuery {
        ElementQuery::new(
            "send_button",
            [
                "the send button or submit button next to the input area",
                "the paper airplane or arrow icon used to send messages",
            ],
        )
    }

    fn clear_before_send(&self) -> bool {
        true
    }

    fn fallback_send(&self, screen: ScreenBounds) -> Option<ScreenPoint> {
        Some(screen.point_at(0.75, 0.9))
    }

    async fn read_response(&self) -> Result<ReadSnapshot, InteractionError> {
        self.reader.read().await
    }
}
