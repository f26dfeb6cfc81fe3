//! Scripted fakes for every port the engine consumes.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::errors::InteractionError;
use crate::geometry::{ScreenBounds, ScreenPoint};
use crate::localizer::ElementQuery;
use crate::ports::{
    InferenceClient, InputDelivery, ReadSnapshot, ResponseReader, ScreenCapture, ScreenshotResult,
    SiteHandler, TransactionSink,
};
use crate::session::Transaction;
use crate::stability::Clock;
use crate::typing::KeyAction;

/// A clock that only moves when something sleeps on it. `now()` starts at
/// a real instant but advances purely by accumulated sleep, so tests with
/// timeouts finish instantly.
pub struct ManualClock {
    start: Instant,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.elapsed.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        *self.elapsed.lock().unwrap() += duration;
    }
}

/// Replays a scripted sequence of snapshots; the last entry repeats once
/// the script is exhausted. Counts polls.
pub struct ScriptedReader {
    script: Mutex<VecDeque<ReadSnapshot>>,
    polls: AtomicUsize,
}

impl ScriptedReader {
    pub fn new(snapshots: impl IntoIterator<Item = ReadSnapshot>) -> Self {
        Self {
            script: Mutex::new(snapshots.into_iter().collect()),
            polls: AtomicUsize::new(0),
        }
    }

    pub fn constant(text: &str) -> Self {
        Self::new([ReadSnapshot::Text(text.to_string())])
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResponseReader for ScriptedReader {
    async fn read(&self) -> Result<ReadSnapshot, InteractionError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        match script.len() {
            0 => Ok(ReadSnapshot::StillGenerating),
            1 => Ok(script.front().unwrap().clone()),
            _ => Ok(script.pop_front().unwrap()),
        }
    }
}

/// A reader that never settles: every poll yields different text.
pub struct EverChangingReader {
    polls: AtomicUsize,
}

impl EverChangingReader {
    pub fn new() -> Self {
        Self {
            polls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ResponseReader for EverChangingReader {
    async fn read(&self) -> Result<ReadSnapshot, InteractionError> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(ReadSnapshot::Text(format!("still rendering, poll {n}")))
    }
}

/// Routes prompts to scripted answers: challenge prompts (identified by
/// the CAPTCHA wording) drain one queue, localization prompts the other.
/// The last answer in a queue repeats.
pub struct ScriptedInference {
    locate: Mutex<VecDeque<String>>,
    challenge: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl ScriptedInference {
    pub fn new(
        locate: impl IntoIterator<Item = &'static str>,
        challenge: impl IntoIterator<Item = &'static str>,
    ) -> Self {
        Self {
            locate: Mutex::new(locate.into_iter().map(String::from).collect()),
            challenge: Mutex::new(challenge.into_iter().map(String::from).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_from(queue: &Mutex<VecDeque<String>>) -> Result<String, InteractionError> {
        let mut queue = queue.lock().unwrap();
        match queue.len() {
            0 => Err(InteractionError::Inference(
                "no scripted response left".into(),
            )),
            1 => Ok(queue.front().unwrap().clone()),
            _ => Ok(queue.pop_front().unwrap()),
        }
    }
}

#[async_trait]
impl InferenceClient for ScriptedInference {
    async fn infer(
        &self,
        _image: &ScreenshotResult,
        prompt: &str,
    ) -> Result<String, InteractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if prompt.contains("CAPTCHA") {
            Self::next_from(&self.challenge)
        } else {
            Self::next_from(&self.locate)
        }
    }
}

/// An inference client whose backend is down.
pub struct FailingInference;

#[async_trait]
impl InferenceClient for FailingInference {
    async fn infer(
        &self,
        _image: &ScreenshotResult,
        _prompt: &str,
    ) -> Result<String, InteractionError> {
        Err(InteractionError::Inference("backend unreachable".into()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    MoveTo(ScreenPoint),
    Click,
    Key(KeyAction),
    Enter,
}

/// Records every delivered input event.
pub struct RecordingInput {
    pub events: Mutex<Vec<InputEvent>>,
}

impl RecordingInput {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// The text left in the field after replaying all recorded key events.
    pub fn typed_text(&self) -> String {
        let mut out = String::new();
        for event in self.events.lock().unwrap().iter() {
            match event {
                InputEvent::Key(KeyAction::Insert(c)) => out.push(*c),
                InputEvent::Key(KeyAction::Backspace) => {
                    out.pop();
                }
                _ => {}
            }
        }
        out
    }

    pub fn count_of(&self, predicate: impl Fn(&InputEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }
}

#[async_trait]
impl InputDelivery for RecordingInput {
    async fn move_to(&self, point: ScreenPoint) -> Result<(), InteractionError> {
        self.events.lock().unwrap().push(InputEvent::MoveTo(point));
        Ok(())
    }

    async fn click(&self) -> Result<(), InteractionError> {
        self.events.lock().unwrap().push(InputEvent::Click);
        Ok(())
    }

    async fn key_action(&self, action: &KeyAction) -> Result<(), InteractionError> {
        self.events.lock().unwrap().push(InputEvent::Key(*action));
        Ok(())
    }

    async fn press_enter(&self) -> Result<(), InteractionError> {
        self.events.lock().unwrap().push(InputEvent::Enter);
        Ok(())
    }
}

/// Pointer moves succeed but every click fails, for send-failure paths.
pub struct ClickFailingInput;

#[async_trait]
impl InputDelivery for ClickFailingInput {
    async fn move_to(&self, _point: ScreenPoint) -> Result<(), InteractionError> {
        Ok(())
    }

    async fn click(&self) -> Result<(), InteractionError> {
        Err(InteractionError::InputDelivery("click rejected".into()))
    }

    async fn key_action(&self, _action: &KeyAction) -> Result<(), InteractionError> {
        Ok(())
    }

    async fn press_enter(&self) -> Result<(), InteractionError> {
        Ok(())
    }
}

/// Always returns the same blank screenshot.
pub struct StaticCapture {
    pub width: u32,
    pub height: u32,
}

impl StaticCapture {
    pub fn new() -> Self {
        Self {
            width: 1680,
            height: 1050,
        }
    }
}

#[async_trait]
impl ScreenCapture for StaticCapture {
    async fn capture(&self) -> Result<ScreenshotResult, InteractionError> {
        Ok(ScreenshotResult {
            image_data: vec![0; (self.width * self.height * 4) as usize],
            width: self.width,
            height: self.height,
        })
    }

    fn bounds(&self) -> ScreenBounds {
        ScreenBounds::new(self.width as f64, self.height as f64)
    }
}

/// Minimal site: one phrasing per element, no clearing, reads from a
/// scripted reader.
pub struct TestSite {
    pub reader: Arc<ScriptedReader>,
}

#[async_trait]
impl SiteHandler for TestSite {
    fn name(&self) -> &str {
        "test-site"
    }

    fn input_query(&self) -> ElementQuery {
        ElementQuery::new("input_field", ["the chat input box"])
    }

    fn send_button_query(&self) -> ElementQuery {
        ElementQuery::new("send_button", ["the send button"])
    }

    async fn read_response(&self) -> Result<ReadSnapshot, InteractionError> {
        self.reader.read().await
    }
}

/// Collects recorded transactions.
pub struct RecordingSink {
    pub records: Mutex<Vec<Transaction>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl TransactionSink for RecordingSink {
    async fn record(&self, transaction: &Transaction) -> Result<(), InteractionError> {
        self.records.lock().unwrap().push(transaction.clone());
        Ok(())
    }
}
