//! Vision-model element localization.
//!
//! One inference call asks the model to map element names to screen
//! coordinates as JSON. Model output is free-form text, so parsing runs
//! through four tiers of decreasing strictness before an element degrades
//! to `found = false`. Malformed output is never an error here.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use tracing::{debug, instrument, warn};

use crate::geometry::{BoundingBox, ScreenPoint};
use crate::ports::{InferenceClient, ScreenshotResult};

/// Characters scanned after a name mention when reconstructing coordinates
/// from prose (tier 4).
const MENTION_WINDOW: usize = 200;

static BRACE_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{.*?\}").expect("brace span regex"));
static COORD_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[(\[]?\s*(\d+(?:\.\d+)?)\s*,\s*(\d+(?:\.\d+)?)\s*[)\]]?")
        .expect("coordinate pair regex")
});

/// One logical UI target with natural-language phrasings tried in order.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementQuery {
    pub name: String,
    pub description_variants: Vec<String>,
}

impl ElementQuery {
    pub fn new<N, I, D>(name: N, description_variants: I) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = D>,
        D: Into<String>,
    {
        Self {
            name: name.into(),
            description_variants: description_variants
                .into_iter()
                .map(Into::into)
                .collect(),
        }
    }

    fn variant(&self, pass: usize) -> Option<&str> {
        self.description_variants.get(pass).map(String::as_str)
    }
}

/// The result of one localization attempt. `found = false` carries no
/// coordinates; callers supply their own fallback geometry.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ElementLocation {
    pub found: bool,
    pub center: Option<ScreenPoint>,
    pub bounds: Option<BoundingBox>,
}

impl ElementLocation {
    pub fn not_found() -> Self {
        Self::default()
    }

    pub fn at(center: ScreenPoint) -> Self {
        Self {
            found: true,
            center: Some(center),
            bounds: None,
        }
    }

    /// The point to aim at: the reported center, else the box center.
    pub fn best_point(&self) -> Option<ScreenPoint> {
        self.center.or_else(|| self.bounds.map(|b| b.center()))
    }
}

/// Outcome of one parse tier over raw model text.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(HashMap<String, ElementLocation>),
    Malformed,
}

/// Locates named UI elements in a screenshot via an injected inference
/// client.
pub struct ElementLocalizer {
    client: Arc<dyn InferenceClient>,
    cache: Mutex<HashMap<[u8; 32], HashMap<String, ElementLocation>>>,
}

impl ElementLocalizer {
    pub fn new(client: Arc<dyn InferenceClient>) -> Self {
        Self {
            client,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves each query to an [`ElementLocation`].
    ///
    /// Description variants are tried in order: pass `k` submits one
    /// combined instruction covering every still-unresolved query's `k`-th
    /// phrasing. Inference failures and malformed output degrade to
    /// `found = false`; this method never fails.
    #[instrument(level = "debug", skip(self, screenshot, queries), fields(queries = queries.len()))]
    pub async fn locate(
        &self,
        screenshot: &ScreenshotResult,
        queries: &[ElementQuery],
    ) -> HashMap<String, ElementLocation> {
        let key = cache_key(screenshot, queries);
        if let Some(hit) = self.cache.lock().unwrap().get(&key) {
            debug!("localization cache hit");
            return hit.clone();
        }

        let mut results: HashMap<String, ElementLocation> = queries
            .iter()
            .map(|q| (q.name.clone(), ElementLocation::not_found()))
            .collect();

        let passes = queries
            .iter()
            .map(|q| q.description_variants.len())
            .max()
            .unwrap_or(0);

        for pass in 0..passes {
            let pending: Vec<(&ElementQuery, &str)> = queries
                .iter()
                .filter(|q| !results.get(&q.name).map(|l| l.found).unwrap_or(false))
                .filter_map(|q| q.variant(pass).map(|v| (q, v)))
                .collect();
            if pending.is_empty() {
                break;
            }

            let prompt = build_prompt(&pending);
            let raw = match self.client.infer(screenshot, &prompt).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(pass, error = %e, "inference failed, treating elements as not found");
                    continue;
                }
            };

            let names: Vec<&str> = pending.iter().map(|(q, _)| q.name.as_str()).collect();
            match parse_response(&raw, &names) {
                ParseOutcome::Parsed(map) => {
                    for (name, location) in map {
                        if location.found {
                            results.insert(name, location);
                        }
                    }
                }
                ParseOutcome::Malformed => {
                    debug!(pass, "model output unparseable at every tier");
                }
            }
        }

        self.cache.lock().unwrap().insert(key, results.clone());
        results
    }
}

fn cache_key(screenshot: &ScreenshotResult, queries: &[ElementQuery]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&screenshot.width.to_le_bytes());
    hasher.update(&screenshot.height.to_le_bytes());
    hasher.update(&screenshot.image_data);
    for query in queries {
        hasher.update(query.name.as_bytes());
        for variant in &query.description_variants {
            hasher.update(variant.as_bytes());
        }
    }
    *hasher.finalize().as_bytes()
}

fn build_prompt(pending: &[(&ElementQuery, &str)]) -> String {
    let mut prompt = String::from(
        "Look at this screenshot and find the following UI elements.\n\n\
         For each element, report whether it is visible and the x,y pixel \
         coordinates of its center. (0,0) is the top-left corner of the \
         screen.\n\n\
         Return ONLY a JSON object mapping each element name to an object \
         with fields \"found\" (boolean), \"coordinates\" ([x, y] or null) \
         and, if you can tell, \"box\" ([x1, y1, x2, y2]).\n\n\
         Elements:\n",
    );
    for (query, description) in pending {
        let _ = writeln!(prompt, "- \"{}\": {}", query.name, description);
    }
    prompt.push_str("\nJSON:");
    prompt
}

/// Layered parse of raw model text, strictest first:
/// 1. the whole response as JSON;
/// 2. the largest brace-delimited substring;
/// 3. the span from the first `{` to the last `}`;
/// 4. per-name prose scan for a nearby `(x, y)` token pair.
pub(crate) fn parse_response(raw: &str, names: &[&str]) -> ParseOutcome {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        if let Some(map) = interpret_value(&value, names) {
            return ParseOutcome::Parsed(map);
        }
    }

    if let Some(candidate) = BRACE_SPAN.find_iter(raw).max_by_key(|m| m.len()) {
        if let Ok(value) = serde_json::from_str::<Value>(candidate.as_str()) {
            if let Some(map) = interpret_value(&value, names) {
                return ParseOutcome::Parsed(map);
            }
        }
    }

    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if end > start {
            if let Ok(value) = serde_json::from_str::<Value>(&raw[start..=end]) {
                if let Some(map) = interpret_value(&value, names) {
                    return ParseOutcome::Parsed(map);
                }
            }
        }
    }

    reconstruct_from_prose(raw, names)
}

/// Reads a `name -> {found, coordinates, box}` object out of loosely typed
/// JSON. Returns `None` when the value is not an object, or when it names
/// none of the requested elements (an unrelated fragment must not mask a
/// later tier).
fn interpret_value(value: &Value, names: &[&str]) -> Option<HashMap<String, ElementLocation>> {
    let object = value.as_object()?;
    let mut out = HashMap::new();
    let mut matched = 0usize;
    for &name in names {
        let entry = lookup_entry(object, name);
        if entry.is_some() {
            matched += 1;
        }
        let location = entry.map(interpret_entry).unwrap_or_default();
        out.insert(name.to_string(), location);
    }
    if matched == 0 {
        return None;
    }
    Some(out)
}

/// Finds the object entry for `name`, tolerating case differences and
/// underscore/space variation in the model's echo of the name.
fn lookup_entry<'a>(object: &'a serde_json::Map<String, Value>, name: &str) -> Option<&'a Value> {
    if let Some(v) = object.get(name) {
        return Some(v);
    }
    let normalized = normalize_name(name);
    object
        .iter()
        .find(|(key, _)| normalize_name(key) == normalized)
        .map(|(_, v)| v)
}

fn normalize_name(name: &str) -> String {
    name.to_lowercase().replace(['_', '-'], " ")
}

fn interpret_entry(entry: &Value) -> ElementLocation {
    let found = entry
        .get("found")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !found {
        return ElementLocation::not_found();
    }

    let center = entry
        .get("coordinates")
        .and_then(Value::as_array)
        .and_then(|values| pair_from_array(values));
    let bounds = entry
        .get("box")
        .and_then(Value::as_array)
        .and_then(|values| box_from_array(values));

    // A "found" element with no usable geometry is useless to callers,
    // which key all fallback logic off the `found` flag.
    if center.is_none() && bounds.is_none() {
        return ElementLocation::not_found();
    }

    ElementLocation {
        found: true,
        center: center.or_else(|| bounds.map(|b| b.center())),
        bounds,
    }
}

fn pair_from_array(values: &[Value]) -> Option<ScreenPoint> {
    if values.len() != 2 {
        return None;
    }
    Some(ScreenPoint {
        x: values[0].as_f64()?,
        y: values[1].as_f64()?,
    })
}

fn box_from_array(values: &[Value]) -> Option<BoundingBox> {
    if values.len() != 4 {
        return None;
    }
    Some(BoundingBox::new(
        values[0].as_f64()?,
        values[1].as_f64()?,
        values[2].as_f64()?,
        values[3].as_f64()?,
    ))
}

/// Tier 4: no JSON anywhere. For each requested name that the text
/// mentions, scan a bounded window after the mention for a number pair.
fn reconstruct_from_prose(raw: &str, names: &[&str]) -> ParseOutcome {
    let lower = raw.to_lowercase();
    let mut out = HashMap::new();
    let mut any_found = false;

    for &name in names {
        let mut location = ElementLocation::not_found();
        let needle = normalize_name(name);
        if let Some(position) = lower.find(&needle).or_else(|| lower.find(&name.to_lowercase())) {
            let window_end = (position + needle.len() + MENTION_WINDOW).min(lower.len());
            let window = clamp_to_char_boundary(&lower, position, window_end);
            if let Some(captures) = COORD_PAIR.captures(window) {
                let x = captures[1].parse::<f64>();
                let y = captures[2].parse::<f64>();
                if let (Ok(x), Ok(y)) = (x, y) {
                    location = ElementLocation::at(ScreenPoint { x, y });
                    any_found = true;
                }
            }
        }
        out.insert(name.to_string(), location);
    }

    if any_found {
        ParseOutcome::Parsed(out)
    } else {
        ParseOutcome::Malformed
    }
}

fn clamp_to_char_boundary(raw: &str, start: usize, mut end: usize) -> &str {
    while end < raw.len() && !raw.is_char_boundary(end) {
        end += 1;
    }
    &raw[start..end]
}
