//! Intent extraction boundary.
//!
//! Extractors translate free text into raw slot candidates. They never decide
//! anything: every candidate still goes through `leadline_core::slots`
//! validation before it can touch a lead.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use leadline_core::config::ExtractionConfig;
use leadline_core::domain::conversation::Language;
use leadline_core::domain::lead::{Goal, PropertyType};
use leadline_core::slots::{RawExtraction, RawSlot, SlotName};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExtractionRequest {
    pub text: String,
    pub slot_names: Vec<SlotName>,
    pub language: Language,
}

impl ExtractionRequest {
    /// Asks for every known slot; the orchestrator never narrows the request.
    pub fn all_slots(text: impl Into<String>, language: Language) -> Self {
        Self { text: text.into(), slot_names: SlotName::all().to_vec(), language }
    }

    fn wants(&self, slot: SlotName) -> bool {
        self.slot_names.contains(&slot)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("extraction timed out after {0} ms")]
    Timeout(u64),
    #[error("extraction transport failed: {0}")]
    Transport(String),
    #[error("extraction service responded {status}: {body}")]
    Api { status: u16, body: String },
    #[error("extraction response was not understood: {0}")]
    InvalidResponse(String),
    #[error("extraction client misconfigured: {0}")]
    Configuration(String),
}

#[async_trait]
pub trait ExtractionClient: Send + Sync {
    fn name(&self) -> &'static str;

    async fn extract(&self, request: &ExtractionRequest) -> Result<RawExtraction, ExtractionError>;
}

/// Picks the HTTP client when a service URL is configured, the keyword rules otherwise.
pub fn client_from_config(
    config: &ExtractionConfig,
) -> Result<Arc<dyn ExtractionClient>, ExtractionError> {
    match config.base_url.as_deref().map(str::trim).filter(|url| !url.is_empty()) {
        Some(base_url) => Ok(Arc::new(HttpExtractionClient::new(
            base_url,
            config.api_key.clone(),
            Duration::from_millis(config.timeout_ms),
        )?)),
        None => Ok(Arc::new(KeywordExtractor::new())),
    }
}

#[derive(Deserialize)]
struct ExtractionResponse {
    #[serde(default)]
    slots: BTreeMap<String, Value>,
}

pub struct HttpExtractionClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    timeout_ms: u64,
}

impl HttpExtractionClient {
    pub fn new(
        base_url: &str,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, ExtractionError> {
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ExtractionError::Configuration(format!(
                "extraction.base_url `{base_url}` must be an http(s) URL"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ExtractionError::Configuration(error.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/extract", base_url.trim_end_matches('/')),
            api_key,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ExtractionClient for HttpExtractionClient {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<RawExtraction, ExtractionError> {
        let mut call = self.client.post(&self.endpoint).json(request);
        if let Some(api_key) = &self.api_key {
            call = call.bearer_auth(api_key.expose_secret());
        }

        let response = call.send().await.map_err(|error| {
            if error.is_timeout() {
                ExtractionError::Timeout(self.timeout_ms)
            } else {
                ExtractionError::Transport(error.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Api { status: status.as_u16(), body });
        }

        let payload: ExtractionResponse = response
            .json()
            .await
            .map_err(|error| ExtractionError::InvalidResponse(error.to_string()))?;

        Ok(decode_slots(payload.slots))
    }
}

/// Keeps well-formed fields and drops the rest one by one.
fn decode_slots(slots: BTreeMap<String, Value>) -> RawExtraction {
    slots
        .into_iter()
        .filter_map(|(name, value)| match serde_json::from_value::<RawSlot>(value) {
            Ok(slot) => Some((name, slot)),
            Err(error) => {
                warn!(
                    event_name = "agent.extraction.field_discarded",
                    slot = %name,
                    error = %error,
                    "malformed extraction field discarded"
                );
                None
            }
        })
        .collect()
}

/// Deterministic rule-based extractor. Used when no extraction service is
/// configured and as the reference behaviour in tests.
#[derive(Clone, Debug, Default)]
pub struct KeywordExtractor;

impl KeywordExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract_sync(&self, request: &ExtractionRequest) -> RawExtraction {
        let original = request.text.trim();
        let normalized = original.to_lowercase();
        let tokens = tokenize(&normalized);
        let mut slots = RawExtraction::new();
        let mut put = |slot: SlotName, value: Value, confidence: f32| {
            if request.wants(slot) {
                slots.insert(slot.as_str().to_string(), RawSlot { value, confidence });
            }
        };

        let bedrooms = extract_bedrooms(&tokens);
        if let Some((count, _)) = bedrooms {
            put(SlotName::Bedrooms, json!(count), 0.9);
        }
        if let Some((budget, confidence)) = extract_budget(&tokens, bedrooms.map(|(_, at)| at)) {
            put(SlotName::Budget, Value::String(budget), confidence);
        }
        if let Some(property_type) = extract_property_type(&tokens) {
            put(SlotName::PropertyType, Value::String(property_type.as_str().to_string()), 0.9);
        }
        if let Some((location, confidence)) = extract_location(original) {
            put(SlotName::Location, Value::String(location), confidence);
        }
        let amenities = extract_amenities(&normalized);
        if !amenities.is_empty() {
            put(SlotName::Amenities, json!(amenities), 0.85);
        }
        if is_urgent(&normalized) {
            put(SlotName::Urgency, Value::Bool(true), 0.9);
        }
        if wants_consultation(&normalized) {
            put(SlotName::Consultation, Value::Bool(true), 0.85);
        }
        if let Some(goal) = extract_goal(&tokens) {
            put(SlotName::Goal, Value::String(goal.as_str().to_string()), 0.8);
        }
        if let Some(phone) = extract_phone(original) {
            put(SlotName::Phone, Value::String(phone), 0.95);
        }
        if let Some(email) = extract_email(original) {
            put(SlotName::Email, Value::String(email), 0.95);
        }
        if let Some(name) = extract_name(original) {
            put(SlotName::Name, Value::String(name), 0.9);
        }

        slots
    }
}

#[async_trait]
impl ExtractionClient for KeywordExtractor {
    fn name(&self) -> &'static str {
        "keyword"
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<RawExtraction, ExtractionError> {
        Ok(self.extract_sync(request))
    }
}

fn tokenize(text: &str) -> Vec<String> {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.chars() {
        if character.is_alphanumeric() || matches!(character, '.' | ',' | '-' | '+' | '$' | '@') {
            sanitized.push(character);
        } else {
            sanitized.push(' ');
        }
    }
    sanitized
        .split_whitespace()
        .map(|token| token.trim_matches(|ch| matches!(ch, '.' | ',' | '-')).to_string())
        .filter(|token| !token.is_empty())
        .collect()
}

const BEDROOM_WORDS: [&str; 10] =
    ["bedroom", "bedrooms", "bed", "beds", "br", "bhk", "bd", "спальни", "спальня", "спален"];

/// Returns the count and the token index it was read from.
fn extract_bedrooms(tokens: &[String]) -> Option<(u8, usize)> {
    for (index, token) in tokens.iter().enumerate() {
        let digits = token.chars().take_while(char::is_ascii_digit).collect::<String>();
        if digits.is_empty() {
            continue;
        }
        let suffix = token[digits.len()..].trim_start_matches('-');
        let next_is_unit =
            tokens.get(index + 1).is_some_and(|next| BEDROOM_WORDS.contains(&next.as_str()));
        if BEDROOM_WORDS.contains(&suffix) || (suffix.is_empty() && next_is_unit) {
            if let Ok(count) = digits.parse::<u8>() {
                return Some((count, index));
            }
        }
    }
    None
}

const MULTIPLIER_WORDS: [&str; 11] =
    ["k", "thousand", "m", "mn", "mln", "million", "millions", "b", "bn", "billion", "млн"];
const BUDGET_CONTEXT: [&str; 10] =
    ["budget", "under", "below", "max", "around", "upto", "aed", "usd", "$", "бюджет"];

fn extract_budget(tokens: &[String], bedroom_index: Option<usize>) -> Option<(String, f32)> {
    for (index, token) in tokens.iter().enumerate() {
        if Some(index) == bedroom_index || !token.chars().any(|ch| ch.is_ascii_digit()) {
            continue;
        }
        if looks_like_phone(token) {
            continue;
        }
        let mut candidate = token.trim_start_matches('$').to_string();
        let mut cursor = index + 1;
        let mut has_multiplier = ends_with_multiplier(token);
        if tokens.get(cursor).is_some_and(|next| MULTIPLIER_WORDS.contains(&next.as_str())) {
            candidate.push(' ');
            candidate.push_str(&tokens[cursor]);
            has_multiplier = true;
            cursor += 1;
        }
        if tokens.get(cursor).is_some_and(|next| next == "to" || next == "-") {
            let upper = tokens
                .get(cursor + 1)
                .filter(|upper| upper.starts_with(|ch: char| ch.is_ascii_digit()));
            if let Some(upper) = upper {
                candidate.push_str(" to ");
                candidate.push_str(upper);
                if let Some(unit) =
                    tokens.get(cursor + 2).filter(|unit| MULTIPLIER_WORDS.contains(&unit.as_str()))
                {
                    candidate.push(' ');
                    candidate.push_str(unit);
                    has_multiplier = true;
                }
            }
        }

        let in_context = (index > 0 && BUDGET_CONTEXT.contains(&tokens[index - 1].as_str()))
            || token.starts_with('$');
        let Some(range) = leadline_core::slots::parse_budget(&candidate) else {
            continue;
        };
        let large = range.max >= rust_decimal::Decimal::from(10_000);
        let confidence = match (has_multiplier || large, in_context) {
            (true, true) => 0.95,
            (true, false) => 0.85,
            (false, true) => 0.7,
            (false, false) => continue,
        };
        return Some((candidate, confidence));
    }
    None
}

fn ends_with_multiplier(token: &str) -> bool {
    let trimmed = token.trim_end_matches(|ch: char| ch.is_alphabetic());
    let unit = &token[trimmed.len()..];
    !trimmed.is_empty() && matches!(unit, "k" | "m" | "mn" | "b" | "bn")
}

fn looks_like_phone(token: &str) -> bool {
    let digits = token.chars().filter(char::is_ascii_digit).count();
    ((token.starts_with('+') || token.starts_with("00")) && digits >= 8)
        || (digits >= 10 && !token.contains(',') && !token.contains('.'))
}

fn extract_property_type(tokens: &[String]) -> Option<PropertyType> {
    tokens.iter().find_map(|token| PropertyType::parse(token))
}

const LOCATION_MARKERS: [&str; 6] = ["in", "at", "near", "around", "в", "في"];
const LOCATION_STOPS: [&str; 16] = [
    "with", "for", "and", "or", "under", "below", "budget", "need", "needs", "please", "that",
    "which", "around", "near", "urgent", "asap",
];
const NOT_A_PLACE: [&str; 12] = [
    "a", "an", "cash", "mind", "hurry", "total", "person", "touch", "advance", "installments",
    "general", "principle",
];

/// `in|at|near <Place words>`; capitalised input earns higher confidence.
fn extract_location(original: &str) -> Option<(String, f32)> {
    let words = original.split_whitespace().collect::<Vec<_>>();
    for (index, word) in words.iter().enumerate() {
        if !LOCATION_MARKERS.contains(&word.to_lowercase().as_str()) {
            continue;
        }
        let mut place = Vec::new();
        for raw in words.iter().skip(index + 1).take(4) {
            let cleaned = raw.trim_matches(|ch: char| !ch.is_alphanumeric() && ch != '-');
            let lowered = cleaned.to_lowercase();
            if cleaned.is_empty()
                || cleaned.chars().any(|ch| ch.is_ascii_digit())
                || LOCATION_STOPS.contains(&lowered.as_str())
            {
                break;
            }
            if place.is_empty() && NOT_A_PLACE.contains(&lowered.as_str()) {
                break;
            }
            place.push(cleaned.to_string());
            if raw.ends_with([',', '.', '!', '?', ';']) {
                break;
            }
        }
        if place.is_empty() {
            continue;
        }
        let capitalised =
            place.iter().all(|word| word.chars().next().is_some_and(char::is_uppercase));
        let titled = place.iter().map(|word| title_case(word)).collect::<Vec<_>>().join(" ");
        return Some((titled, if capitalised { 0.85 } else { 0.65 }));
    }
    None
}

fn title_case(word: &str) -> String {
    let mut characters = word.chars();
    match characters.next() {
        Some(first) => first.to_uppercase().chain(characters).collect(),
        None => String::new(),
    }
}

const AMENITY_VOCABULARY: [&str; 16] = [
    "swimming pool",
    "pool",
    "gym",
    "fitness",
    "parking",
    "garage",
    "balcony",
    "terrace",
    "sea view",
    "garden",
    "security",
    "concierge",
    "playground",
    "maid room",
    "бассейн",
    "балкон",
];

fn extract_amenities(normalized: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for amenity in AMENITY_VOCABULARY {
        if !contains_word(normalized, amenity) {
            continue;
        }
        // "swimming pool" already covers "pool".
        if found.iter().any(|existing| existing.contains(amenity)) {
            continue;
        }
        found.push(amenity.to_string());
    }
    found
}

fn is_urgent(normalized: &str) -> bool {
    ["urgent", "urgently", "asap", "as soon as possible", "immediately", "this month", "срочно"]
        .iter()
        .any(|phrase| contains_word(normalized, phrase))
}

fn wants_consultation(normalized: &str) -> bool {
    if normalized.contains("call me later") {
        return false;
    }
    [
        "call me",
        "consultation",
        "viewing",
        "schedule a visit",
        "book a visit",
        "talk to an agent",
        "speak to an agent",
        "консультац",
    ]
    .iter()
    .any(|phrase| normalized.contains(phrase))
}

fn extract_goal(tokens: &[String]) -> Option<Goal> {
    tokens.iter().find_map(|token| match token.as_str() {
        "roi" | "yield" => Some(Goal::Invest),
        other => Goal::parse(other),
    })
}

fn extract_phone(original: &str) -> Option<String> {
    original
        .split(|ch: char| !(ch.is_ascii_digit() || matches!(ch, '+' | ' ' | '-' | '(' | ')')))
        .map(str::trim)
        .find(|candidate| {
            let digits = candidate.chars().filter(char::is_ascii_digit).count();
            let international = candidate.starts_with('+') || candidate.starts_with("00");
            ((international && digits >= 8) || digits >= 10) && digits <= 15
        })
        .map(str::to_string)
}

fn extract_email(original: &str) -> Option<String> {
    original
        .split_whitespace()
        .map(|word| {
            word.trim_matches(|ch: char| matches!(ch, ',' | ';' | '!' | '?' | '(' | ')' | '<' | '>'))
        })
        .map(|word| word.trim_end_matches('.'))
        .find(|word| word.contains('@') && word.contains('.'))
        .map(str::to_string)
}

fn extract_name(original: &str) -> Option<String> {
    let lowered = original.to_lowercase();
    for marker in ["my name is ", "меня зовут ", "this is "] {
        let Some(start) = lowered.find(marker) else {
            continue;
        };
        let Some(rest) = original.get(start + marker.len()..) else {
            continue;
        };
        let name = rest
            .split_whitespace()
            .take(2)
            .map(|word| word.trim_matches(|ch: char| !ch.is_alphabetic()))
            .take_while(|word| word.chars().next().is_some_and(char::is_uppercase))
            .collect::<Vec<_>>();
        if !name.is_empty() {
            return Some(name.join(" "));
        }
    }
    None
}

fn contains_word(haystack: &str, phrase: &str) -> bool {
    haystack.match_indices(phrase).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + phrase.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}
