//! Slot vocabulary, validation of untrusted extraction output, and the
//! confidence-aware merge into the flat lead record.
//!
//! Nothing returned by an extraction service reaches a [`Lead`] without passing
//! through [`validate_extraction`]. Fields that fail validation are dropped one
//! by one; the rest of the payload is still merged.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::conversation::MessageId;
use crate::domain::lead::{BudgetRange, Goal, Lead, LeadId, PropertyType, SlotMeta};
use crate::domain::tenant::TenantId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotName {
    Budget,
    PropertyType,
    Location,
    Bedrooms,
    Amenities,
    Urgency,
    Consultation,
    Goal,
    Phone,
    Email,
    Name,
}

/// Order in which missing slots are asked for, one per turn.
pub const QUESTION_PRIORITY: [SlotName; 5] = [
    SlotName::Budget,
    SlotName::PropertyType,
    SlotName::Location,
    SlotName::Bedrooms,
    SlotName::Amenities,
];

impl SlotName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Budget => "budget",
            Self::PropertyType => "property_type",
            Self::Location => "location",
            Self::Bedrooms => "bedrooms",
            Self::Amenities => "amenities",
            Self::Urgency => "urgency",
            Self::Consultation => "consultation",
            Self::Goal => "goal",
            Self::Phone => "phone",
            Self::Email => "email",
            Self::Name => "name",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "budget" => Some(Self::Budget),
            "property_type" | "propertytype" | "type" => Some(Self::PropertyType),
            "location" | "area" => Some(Self::Location),
            "bedrooms" | "beds" => Some(Self::Bedrooms),
            "amenities" => Some(Self::Amenities),
            "urgency" => Some(Self::Urgency),
            "consultation" => Some(Self::Consultation),
            "goal" => Some(Self::Goal),
            "phone" => Some(Self::Phone),
            "email" => Some(Self::Email),
            "name" => Some(Self::Name),
            _ => None,
        }
    }

    pub fn all() -> [Self; 11] {
        [
            Self::Budget,
            Self::PropertyType,
            Self::Location,
            Self::Bedrooms,
            Self::Amenities,
            Self::Urgency,
            Self::Consultation,
            Self::Goal,
            Self::Phone,
            Self::Email,
            Self::Name,
        ]
    }

    pub fn affects_score(&self) -> bool {
        matches!(self, Self::Budget | Self::Phone | Self::Consultation | Self::Urgency)
    }
}

impl fmt::Display for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One field as returned by an extraction service, before validation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawSlot {
    pub value: Value,
    pub confidence: f32,
}

pub type RawExtraction = BTreeMap<String, RawSlot>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "slot", content = "value", rename_all = "snake_case")]
pub enum SlotPayload {
    Budget(BudgetRange),
    PropertyType(PropertyType),
    Location(String),
    Bedrooms(u8),
    Amenities(BTreeSet<String>),
    Urgency(bool),
    Consultation(bool),
    Goal(Goal),
    Phone { number: String, verified: bool },
    Email(String),
    Name(String),
}

impl SlotPayload {
    pub fn slot_name(&self) -> SlotName {
        match self {
            Self::Budget(_) => SlotName::Budget,
            Self::PropertyType(_) => SlotName::PropertyType,
            Self::Location(_) => SlotName::Location,
            Self::Bedrooms(_) => SlotName::Bedrooms,
            Self::Amenities(_) => SlotName::Amenities,
            Self::Urgency(_) => SlotName::Urgency,
            Self::Consultation(_) => SlotName::Consultation,
            Self::Goal(_) => SlotName::Goal,
            Self::Phone { .. } => SlotName::Phone,
            Self::Email(_) => SlotName::Email,
            Self::Name(_) => SlotName::Name,
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|tagged| tagged.get("value").cloned())
            .unwrap_or(Value::Null)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedSlot {
    pub payload: SlotPayload,
    pub confidence: f32,
}

impl ValidatedSlot {
    pub fn new(payload: SlotPayload, confidence: f32) -> Self {
        Self { payload, confidence: confidence.clamp(0.0, 1.0) }
    }

    /// Values chosen through buttons or contact shares are certain.
    pub fn certain(payload: SlotPayload) -> Self {
        Self::new(payload, 1.0)
    }

    pub fn name(&self) -> SlotName {
        self.payload.slot_name()
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("unknown slot `{0}`")]
    UnknownSlot(String),
    #[error("slot `{slot}` has confidence {confidence} outside 0..=1")]
    InvalidConfidence { slot: SlotName, confidence: f32 },
    #[error("slot `{slot}` rejected: {reason}")]
    InvalidValue { slot: SlotName, reason: String },
}

impl ValidationError {
    fn invalid(slot: SlotName, reason: impl Into<String>) -> Self {
        Self::InvalidValue { slot, reason: reason.into() }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValidationReport {
    pub accepted: Vec<ValidatedSlot>,
    pub rejected: Vec<ValidationError>,
}

pub fn validate_extraction(raw: &RawExtraction) -> ValidationReport {
    let mut report = ValidationReport::default();
    for (name, slot) in raw {
        match validate_slot(name, slot) {
            Ok(validated) => report.accepted.push(validated),
            Err(error) => report.rejected.push(error),
        }
    }
    report
}

pub fn validate_slot(name: &str, raw: &RawSlot) -> Result<ValidatedSlot, ValidationError> {
    let slot = SlotName::parse(name).ok_or_else(|| ValidationError::UnknownSlot(name.to_string()))?;
    if !raw.confidence.is_finite() || !(0.0..=1.0).contains(&raw.confidence) {
        return Err(ValidationError::InvalidConfidence { slot, confidence: raw.confidence });
    }

    let payload = match slot {
        SlotName::Budget => SlotPayload::Budget(validate_budget(&raw.value)?),
        SlotName::PropertyType => {
            let text = expect_text(slot, &raw.value)?;
            SlotPayload::PropertyType(
                PropertyType::parse(&text)
                    .ok_or_else(|| ValidationError::invalid(slot, format!("unknown type `{text}`")))?,
            )
        }
        SlotName::Location => SlotPayload::Location(validate_location(&raw.value)?),
        SlotName::Bedrooms => SlotPayload::Bedrooms(validate_bedrooms(&raw.value)?),
        SlotName::Amenities => SlotPayload::Amenities(validate_amenities(&raw.value)?),
        SlotName::Urgency => SlotPayload::Urgency(expect_flag(slot, &raw.value)?),
        SlotName::Consultation => SlotPayload::Consultation(expect_flag(slot, &raw.value)?),
        SlotName::Goal => {
            let text = expect_text(slot, &raw.value)?;
            SlotPayload::Goal(
                Goal::parse(&text)
                    .ok_or_else(|| ValidationError::invalid(slot, format!("unknown goal `{text}`")))?,
            )
        }
        SlotName::Phone => {
            let text = expect_text(slot, &raw.value)?;
            let (number, verified) = normalize_phone(&text)
                .ok_or_else(|| ValidationError::invalid(slot, "not a phone number"))?;
            SlotPayload::Phone { number, verified }
        }
        SlotName::Email => SlotPayload::Email(validate_email(&raw.value)?),
        SlotName::Name => SlotPayload::Name(validate_name(&raw.value)?),
    };

    Ok(ValidatedSlot::new(payload, raw.confidence))
}

fn expect_text(slot: SlotName, value: &Value) -> Result<String, ValidationError> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
        Value::String(_) => Err(ValidationError::invalid(slot, "empty string")),
        other => Err(ValidationError::invalid(slot, format!("expected string, got {other}"))),
    }
}

fn expect_flag(slot: SlotName, value: &Value) -> Result<bool, ValidationError> {
    match value {
        Value::Bool(flag) => Ok(*flag),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "urgent" | "y" | "1" => Ok(true),
            "false" | "no" | "n" | "0" => Ok(false),
            other => Err(ValidationError::invalid(slot, format!("not a flag: `{other}`"))),
        },
        other => Err(ValidationError::invalid(slot, format!("expected boolean, got {other}"))),
    }
}

const MAX_BUDGET: i64 = 10_000_000_000;

fn validate_budget(value: &Value) -> Result<BudgetRange, ValidationError> {
    let slot = SlotName::Budget;
    let range = match value {
        Value::Number(number) => {
            let amount = number
                .as_f64()
                .and_then(Decimal::from_f64_retain)
                .ok_or_else(|| ValidationError::invalid(slot, "not a finite number"))?;
            BudgetRange::up_to(amount.round_dp(2))
        }
        Value::String(text) => parse_budget(text)
            .ok_or_else(|| ValidationError::invalid(slot, format!("cannot parse `{text}`")))?,
        Value::Array(bounds) if bounds.len() == 2 => {
            BudgetRange::between(amount_of(&bounds[0])?, amount_of(&bounds[1])?)
        }
        Value::Object(bounds) => {
            let max = bounds
                .get("max")
                .ok_or_else(|| ValidationError::invalid(slot, "range without `max`"))
                .and_then(amount_of)?;
            match bounds.get("min").filter(|min| !min.is_null()) {
                Some(min) => BudgetRange::between(amount_of(min)?, max),
                None => BudgetRange::up_to(max),
            }
        }
        other => return Err(ValidationError::invalid(slot, format!("unsupported shape {other}"))),
    };

    let ceiling = Decimal::from(MAX_BUDGET);
    if range.max <= Decimal::ZERO || range.max > ceiling {
        return Err(ValidationError::invalid(slot, format!("amount {} out of range", range.max)));
    }
    if range.min.is_some_and(|min| min < Decimal::ZERO) {
        return Err(ValidationError::invalid(slot, "negative lower bound"));
    }
    Ok(range)
}

fn amount_of(value: &Value) -> Result<Decimal, ValidationError> {
    let slot = SlotName::Budget;
    match value {
        Value::Number(number) => number
            .as_f64()
            .and_then(Decimal::from_f64_retain)
            .map(|amount| amount.round_dp(2))
            .ok_or_else(|| ValidationError::invalid(slot, "not a finite number")),
        Value::String(text) => {
            parse_amount(text).ok_or_else(|| ValidationError::invalid(slot, format!("`{text}`")))
        }
        other => Err(ValidationError::invalid(slot, format!("bound is not numeric: {other}"))),
    }
}

fn validate_location(value: &Value) -> Result<String, ValidationError> {
    let slot = SlotName::Location;
    let text = expect_text(slot, value)?;
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > 80 {
        return Err(ValidationError::invalid(slot, "longer than 80 characters"));
    }
    if !collapsed.chars().any(char::is_alphabetic) {
        return Err(ValidationError::invalid(slot, "contains no letters"));
    }
    Ok(collapsed)
}

fn validate_bedrooms(value: &Value) -> Result<u8, ValidationError> {
    let slot = SlotName::Bedrooms;
    let count = match value {
        Value::Number(number) => number
            .as_u64()
            .ok_or_else(|| ValidationError::invalid(slot, "not a whole number"))?,
        Value::String(text) => {
            let trimmed = text.trim().to_ascii_lowercase();
            if trimmed == "studio" {
                0
            } else {
                trimmed
                    .trim_end_matches(|ch: char| !ch.is_ascii_digit())
                    .parse::<u64>()
                    .map_err(|_| ValidationError::invalid(slot, format!("`{text}`")))?
            }
        }
        other => return Err(ValidationError::invalid(slot, format!("expected count, got {other}"))),
    };
    if count > 20 {
        return Err(ValidationError::invalid(slot, format!("{count} bedrooms is implausible")));
    }
    u8::try_from(count).map_err(|_| ValidationError::invalid(slot, "overflow"))
}

fn validate_amenities(value: &Value) -> Result<BTreeSet<String>, ValidationError> {
    let slot = SlotName::Amenities;
    let candidates: Vec<String> = match value {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(text) => Ok(text.clone()),
                other => Err(ValidationError::invalid(slot, format!("non-string amenity {other}"))),
            })
            .collect::<Result<_, _>>()?,
        Value::String(text) => text.split([',', ';']).map(str::to_string).collect(),
        other => return Err(ValidationError::invalid(slot, format!("expected list, got {other}"))),
    };

    let amenities = candidates
        .iter()
        .filter_map(|candidate| normalize_amenity(candidate))
        .collect::<BTreeSet<_>>();
    if amenities.is_empty() {
        return Err(ValidationError::invalid(slot, "no usable amenities"));
    }
    Ok(amenities)
}

/// Canonical amenity spelling, shared by extraction, storage and matching.
pub fn normalize_amenity(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_lowercase();
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() || collapsed.chars().count() > 40 {
        return None;
    }
    let canonical = match collapsed.as_str() {
        "swimming pool" | "pool" | "pools" | "бассейн" => "pool",
        "gym" | "gymnasium" | "fitness" | "fitness center" | "спортзал" => "gym",
        "parking" | "car park" | "garage" | "covered parking" => "parking",
        "balcony" | "terrace" | "балкон" => "balcony",
        "sea view" | "seaview" | "ocean view" => "sea view",
        "garden" | "private garden" => "garden",
        "concierge" | "24/7 security" | "security" => "security",
        "kids play area" | "playground" => "playground",
        "maid room" | "maid's room" => "maid room",
        other => other,
    };
    Some(canonical.to_string())
}

fn validate_email(value: &Value) -> Result<String, ValidationError> {
    let slot = SlotName::Email;
    let text = expect_text(slot, value)?.to_ascii_lowercase();
    let mut parts = text.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(ValidationError::invalid(slot, "expected exactly one `@`"));
    };
    let domain_ok = domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.');
    if local.is_empty() || !domain_ok || text.chars().any(char::is_whitespace) {
        return Err(ValidationError::invalid(slot, format!("`{text}` is not an address")));
    }
    Ok(text)
}

fn validate_name(value: &Value) -> Result<String, ValidationError> {
    let slot = SlotName::Name;
    let text = expect_text(slot, value)?;
    let length = text.chars().count();
    if length > 60 || !text.chars().any(char::is_alphabetic) {
        return Err(ValidationError::invalid(slot, "not a plausible name"));
    }
    Ok(text)
}

/// Normalizes a phone number. The flag is true when the number is in full
/// international form and can be dialled as-is.
pub fn normalize_phone(raw: &str) -> Option<(String, bool)> {
    let trimmed = raw.trim();
    let international = trimmed.starts_with('+') || trimmed.starts_with("00");
    if trimmed.chars().any(|ch| ch.is_alphabetic()) {
        return None;
    }
    let mut digits = trimmed.chars().filter(char::is_ascii_digit).collect::<String>();
    if trimmed.starts_with("00") {
        digits = digits.split_off(2);
    }
    if !(7..=15).contains(&digits.len()) {
        return None;
    }
    let verified = international && digits.len() >= 8;
    let number = if international { format!("+{digits}") } else { digits };
    Some((number, verified))
}

/// Parses a single money amount such as `3 million`, `3.5m`, `750k`, `AED 2,400,000`.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let (base, multiplier) = split_amount(raw)?;
    let amount = (base * multiplier.unwrap_or(Decimal::ONE)).round_dp(2);
    (amount > Decimal::ZERO).then_some(amount)
}

/// Parses either a single amount or a range (`2-3 million`, `2m to 3m`).
pub fn parse_budget(raw: &str) -> Option<BudgetRange> {
    let lowered = raw.trim().to_lowercase();
    for separator in [" to ", " - ", "–", "—", "-", "..."] {
        if let Some((low, high)) = lowered.split_once(separator) {
            let Some((high_base, high_multiplier)) = split_amount(high) else {
                continue;
            };
            let Some((low_base, low_multiplier)) = split_amount(low) else {
                continue;
            };
            let high_multiplier = high_multiplier.unwrap_or(Decimal::ONE);
            let low_multiplier = low_multiplier.unwrap_or(high_multiplier);
            let min = (low_base * low_multiplier).round_dp(2);
            let max = (high_base * high_multiplier).round_dp(2);
            if max <= Decimal::ZERO {
                return None;
            }
            return Some(BudgetRange::between(min, max));
        }
    }
    parse_amount(&lowered).map(BudgetRange::up_to)
}

fn split_amount(raw: &str) -> Option<(Decimal, Option<Decimal>)> {
    let lowered = raw.trim().to_lowercase();
    let start = lowered.find(|ch: char| ch.is_ascii_digit())?;
    let tail = &lowered[start..];

    let mut number = String::new();
    let mut consumed = 0;
    for (index, ch) in tail.char_indices() {
        if ch.is_ascii_digit() || ch == '.' {
            number.push(ch);
        } else if ch != ',' && ch != '_' {
            break;
        }
        consumed = index + ch.len_utf8();
    }
    let base = Decimal::from_str(number.trim_end_matches('.')).ok()?;

    let unit = tail[consumed..]
        .trim_start()
        .split(|ch: char| ch.is_whitespace() || matches!(ch, ',' | '.' | ';' | '!' | ')'))
        .next()
        .unwrap_or_default();
    Some((base, unit_multiplier(unit)))
}

fn unit_multiplier(unit: &str) -> Option<Decimal> {
    match unit {
        "k" | "thousand" | "тыс" | "тысяч" => Some(Decimal::from(1_000)),
        "m" | "mn" | "mln" | "mil" | "million" | "millions" | "млн" | "миллион" | "миллиона"
        | "миллионов" => Some(Decimal::from(1_000_000)),
        "b" | "bn" | "billion" | "млрд" => Some(Decimal::from(1_000_000_000)),
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotWriteOutcome {
    Applied,
    KeptExisting,
    Rejected,
}

impl SlotWriteOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::KeptExisting => "kept_existing",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "applied" => Some(Self::Applied),
            "kept_existing" => Some(Self::KeptExisting),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Append-only audit row for every attempted slot write.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlotLogEntry {
    pub tenant_id: TenantId,
    pub lead_id: LeadId,
    pub slot: String,
    pub value: Value,
    pub confidence: f32,
    pub source_message_id: MessageId,
    pub outcome: SlotWriteOutcome,
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergeReport {
    pub applied: Vec<SlotName>,
    pub kept_existing: Vec<SlotName>,
    pub log: Vec<SlotLogEntry>,
}

impl MergeReport {
    pub fn touches_score(&self) -> bool {
        self.applied.iter().any(SlotName::affects_score)
    }

    pub fn absorb(&mut self, other: MergeReport) {
        self.applied.extend(other.applied);
        self.kept_existing.extend(other.kept_existing);
        self.log.extend(other.log);
    }
}

/// Merges validated slots into the lead. A newer value replaces the current one
/// unless its confidence is strictly lower. Amenities accumulate as a set.
pub fn merge_slots(
    lead: &mut Lead,
    slots: Vec<ValidatedSlot>,
    source: &MessageId,
    now: DateTime<Utc>,
) -> MergeReport {
    let mut report = MergeReport::default();
    for slot in slots {
        let name = slot.name();
        let value = slot.payload.to_json();
        let existing = lead.slot_meta.get(&name).map(|meta| meta.confidence);
        let outcome = if existing.is_some_and(|current| slot.confidence < current) {
            report.kept_existing.push(name);
            SlotWriteOutcome::KeptExisting
        } else {
            apply_payload(lead, slot.payload);
            lead.slot_meta.insert(
                name,
                SlotMeta {
                    confidence: slot.confidence,
                    source_message_id: source.clone(),
                    updated_at: now,
                },
            );
            report.applied.push(name);
            SlotWriteOutcome::Applied
        };

        report.log.push(SlotLogEntry {
            tenant_id: lead.tenant_id.clone(),
            lead_id: lead.id.clone(),
            slot: name.as_str().to_string(),
            value,
            confidence: slot.confidence,
            source_message_id: source.clone(),
            outcome,
            detail: None,
            recorded_at: now,
        });
    }
    if !report.applied.is_empty() {
        lead.updated_at = now;
    }
    report
}

/// Log rows for fields that never made it past validation.
pub fn rejection_log(
    lead: &Lead,
    rejected: &[ValidationError],
    raw: &RawExtraction,
    source: &MessageId,
    now: DateTime<Utc>,
) -> Vec<SlotLogEntry> {
    rejected
        .iter()
        .map(|error| {
            let slot = match error {
                ValidationError::UnknownSlot(name) => name.clone(),
                ValidationError::InvalidConfidence { slot, .. }
                | ValidationError::InvalidValue { slot, .. } => slot.as_str().to_string(),
            };
            let raw_slot = raw.get(&slot).or_else(|| {
                raw.iter()
                    .find(|(name, _)| SlotName::parse(name).is_some_and(|parsed| parsed.as_str() == slot))
                    .map(|(_, raw_slot)| raw_slot)
            });
            SlotLogEntry {
                tenant_id: lead.tenant_id.clone(),
                lead_id: lead.id.clone(),
                slot,
                value: raw_slot.map(|raw_slot| raw_slot.value.clone()).unwrap_or(Value::Null),
                confidence: raw_slot.map(|raw_slot| raw_slot.confidence).unwrap_or(0.0),
                source_message_id: source.clone(),
                outcome: SlotWriteOutcome::Rejected,
                detail: Some(error.to_string()),
                recorded_at: now,
            }
        })
        .collect()
}

fn apply_payload(lead: &mut Lead, payload: SlotPayload) {
    match payload {
        SlotPayload::Budget(range) => lead.budget = Some(range),
        SlotPayload::PropertyType(property_type) => lead.property_type = Some(property_type),
        SlotPayload::Location(location) => lead.location = Some(location),
        SlotPayload::Bedrooms(bedrooms) => lead.bedrooms = Some(bedrooms),
        SlotPayload::Amenities(amenities) => lead.amenities.extend(amenities),
        SlotPayload::Urgency(urgent) => lead.urgency = urgent,
        SlotPayload::Consultation(requested) => lead.consultation_requested = requested,
        SlotPayload::Goal(goal) => lead.goal = Some(goal),
        SlotPayload::Phone { number, verified } => {
            lead.contact.phone = Some(number);
            lead.contact.phone_verified = verified;
        }
        SlotPayload::Email(email) => lead.contact.email = Some(email),
        SlotPayload::Name(name) => lead.contact.name = Some(name),
    }
}

/// Budget, property type and one of location/bedrooms, each at or above the threshold.
pub fn qualification_complete(lead: &Lead, threshold: f32) -> bool {
    lead.has_slot(SlotName::Budget, threshold)
        && lead.has_slot(SlotName::PropertyType, threshold)
        && (lead.has_slot(SlotName::Location, threshold)
            || lead.has_slot(SlotName::Bedrooms, threshold))
}

pub fn next_missing_slot(lead: &Lead, threshold: f32) -> Option<SlotName> {
    if qualification_complete(lead, threshold) {
        return None;
    }
    QUESTION_PRIORITY.into_iter().find(|slot| match slot {
        SlotName::Location | SlotName::Bedrooms => {
            !lead.has_slot(SlotName::Location, threshold)
                && !lead.has_slot(SlotName::Bedrooms, threshold)
                && !lead.has_slot(*slot, threshold)
        }
        other => !lead.has_slot(*other, threshold),
    })
}
