use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::conversation::{Channel, Language, MessageId};
use crate::domain::tenant::TenantId;
use crate::errors::DomainError;
use crate::objections::ObjectionKind;
use crate::slots::SlotName;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeadId(pub String);

impl LeadId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for LeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Qualifying,
    Qualified,
    MatchesPresented,
    ConsultationRequested,
    Won,
    Lost,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Qualifying => "qualifying",
            Self::Qualified => "qualified",
            Self::MatchesPresented => "matches_presented",
            Self::ConsultationRequested => "consultation_requested",
            Self::Won => "won",
            Self::Lost => "lost",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "new" => Some(Self::New),
            "qualifying" => Some(Self::Qualifying),
            "qualified" => Some(Self::Qualified),
            "matches_presented" => Some(Self::MatchesPresented),
            "consultation_requested" => Some(Self::ConsultationRequested),
            "won" => Some(Self::Won),
            "lost" => Some(Self::Lost),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Won | Self::Lost)
    }

    pub fn terminal_statuses() -> [Self; 2] {
        [Self::Won, Self::Lost]
    }

    fn rank(&self) -> u8 {
        match self {
            Self::New => 0,
            Self::Qualifying => 1,
            Self::Qualified => 2,
            Self::MatchesPresented => 3,
            Self::ConsultationRequested => 4,
            Self::Won => 5,
            Self::Lost => 5,
        }
    }

    /// Forward-only lifecycle. Moving backwards requires [`Lead::reopen`].
    pub fn can_transition_to(&self, next: LeadStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Self::Lost || next.rank() > self.rank()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Temperature {
    Cold,
    Warm,
    Hot,
    Burning,
}

impl Temperature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cold => "cold",
            Self::Warm => "warm",
            Self::Hot => "hot",
            Self::Burning => "burning",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cold" => Some(Self::Cold),
            "warm" => Some(Self::Warm),
            "hot" => Some(Self::Hot),
            "burning" => Some(Self::Burning),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Apartment,
    Villa,
    Townhouse,
    Penthouse,
    Studio,
    Land,
    Office,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apartment => "apartment",
            Self::Villa => "villa",
            Self::Townhouse => "townhouse",
            Self::Penthouse => "penthouse",
            Self::Studio => "studio",
            Self::Land => "land",
            Self::Office => "office",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "apartment" | "apartments" | "flat" | "condo" | "квартира" => Some(Self::Apartment),
            "villa" | "villas" | "house" | "вилла" | "فيلا" => Some(Self::Villa),
            "townhouse" | "townhouses" | "таунхаус" => Some(Self::Townhouse),
            "penthouse" | "penthouses" | "пентхаус" => Some(Self::Penthouse),
            "studio" | "studios" | "студия" => Some(Self::Studio),
            "land" | "plot" => Some(Self::Land),
            "office" | "offices" => Some(Self::Office),
            _ => None,
        }
    }

    pub fn all() -> [Self; 7] {
        [
            Self::Apartment,
            Self::Villa,
            Self::Townhouse,
            Self::Penthouse,
            Self::Studio,
            Self::Land,
            Self::Office,
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Goal {
    Buy,
    Rent,
    Invest,
}

impl Goal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Rent => "rent",
            Self::Invest => "invest",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "buy" | "purchase" | "buying" => Some(Self::Buy),
            "rent" | "rental" | "lease" | "renting" => Some(Self::Rent),
            "invest" | "investment" | "investing" => Some(Self::Invest),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetRange {
    pub min: Option<Decimal>,
    pub max: Decimal,
}

impl BudgetRange {
    pub fn up_to(max: Decimal) -> Self {
        Self { min: None, max }
    }

    pub fn between(min: Decimal, max: Decimal) -> Self {
        if min > max {
            return Self { min: Some(max), max: min };
        }
        Self { min: Some(min), max }
    }

    pub fn floor(&self) -> Decimal {
        self.min.unwrap_or(Decimal::ZERO)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub phone_verified: bool,
    pub email: Option<String>,
}

impl ContactInfo {
    pub fn is_present(&self) -> bool {
        self.phone.is_some() || self.email.is_some()
    }

    pub fn has_verified_phone(&self) -> bool {
        self.phone.is_some() && self.phone_verified
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementSignals {
    pub message_count: u32,
    pub voice_messages: u32,
    pub media_shared: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectionCounters {
    pub price: u32,
    pub timing: u32,
    pub uncertainty: u32,
}

impl ObjectionCounters {
    pub fn increment(&mut self, kind: ObjectionKind) {
        let counter = match kind {
            ObjectionKind::Price => &mut self.price,
            ObjectionKind::Timing => &mut self.timing,
            ObjectionKind::Uncertainty => &mut self.uncertainty,
        };
        *counter = counter.saturating_add(1);
    }

    pub fn total(&self) -> u32 {
        self.price.saturating_add(self.timing).saturating_add(self.uncertainty)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GhostOutcome {
    Delivered,
    RetriesExhausted,
}

impl GhostOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::RetriesExhausted => "retries_exhausted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "delivered" => Some(Self::Delivered),
            "retries_exhausted" => Some(Self::RetriesExhausted),
            _ => None,
        }
    }
}

/// Provenance of the value currently held in a flat lead field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlotMeta {
    pub confidence: f32,
    pub source_message_id: MessageId,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub tenant_id: TenantId,
    pub external_user_id: String,
    pub contact: ContactInfo,
    pub goal: Option<Goal>,
    pub budget: Option<BudgetRange>,
    pub property_type: Option<PropertyType>,
    pub bedrooms: Option<u8>,
    pub location: Option<String>,
    pub amenities: BTreeSet<String>,
    pub urgency: bool,
    pub consultation_requested: bool,
    pub engagement: EngagementSignals,
    pub objections: ObjectionCounters,
    pub score: u8,
    pub temperature: Temperature,
    pub status: LeadStatus,
    pub ghost_reminder_sent: bool,
    pub ghost_reminder_sent_at: Option<DateTime<Utc>>,
    pub ghost_reminder_outcome: Option<GhostOutcome>,
    pub last_channel: Channel,
    pub language: Language,
    pub slot_meta: BTreeMap<SlotName, SlotMeta>,
    pub last_interaction_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    pub fn new(
        tenant_id: TenantId,
        external_user_id: impl Into<String>,
        channel: Channel,
        language: Language,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LeadId::generate(),
            tenant_id,
            external_user_id: external_user_id.into(),
            contact: ContactInfo::default(),
            goal: None,
            budget: None,
            property_type: None,
            bedrooms: None,
            location: None,
            amenities: BTreeSet::new(),
            urgency: false,
            consultation_requested: false,
            engagement: EngagementSignals::default(),
            objections: ObjectionCounters::default(),
            score: 0,
            temperature: Temperature::Cold,
            status: LeadStatus::New,
            ghost_reminder_sent: false,
            ghost_reminder_sent_at: None,
            ghost_reminder_outcome: None,
            last_channel: channel,
            language,
            slot_meta: BTreeMap::new(),
            last_interaction_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn budget_max(&self) -> Option<Decimal> {
        self.budget.as_ref().map(|budget| budget.max)
    }

    pub fn budget_min(&self) -> Option<Decimal> {
        self.budget.as_ref().and_then(|budget| budget.min)
    }

    pub fn slot_confidence(&self, slot: SlotName) -> f32 {
        self.slot_meta.get(&slot).map(|meta| meta.confidence).unwrap_or(0.0)
    }

    pub fn has_slot(&self, slot: SlotName, threshold: f32) -> bool {
        let filled = match slot {
            SlotName::Budget => self.budget.is_some(),
            SlotName::PropertyType => self.property_type.is_some(),
            SlotName::Location => self.location.is_some(),
            SlotName::Bedrooms => self.bedrooms.is_some(),
            SlotName::Amenities => !self.amenities.is_empty(),
            SlotName::Goal => self.goal.is_some(),
            SlotName::Phone => self.contact.phone.is_some(),
            SlotName::Email => self.contact.email.is_some(),
            SlotName::Name => self.contact.name.is_some(),
            SlotName::Urgency => self.urgency,
            SlotName::Consultation => self.consultation_requested,
        };
        filled && self.slot_confidence(slot) >= threshold
    }

    /// Advances the lifecycle when the move is forward; silently keeps the
    /// current status when the lead is already further along.
    pub fn advance_to(&mut self, next: LeadStatus) {
        if self.status.can_transition_to(next) && next != LeadStatus::Lost {
            self.status = next;
        }
    }

    pub fn transition_to(&mut self, next: LeadStatus) -> Result<(), DomainError> {
        if self.status.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidStatusTransition { from: self.status, to: next })
    }

    pub fn reopen(&mut self) -> Result<(), DomainError> {
        if self.status != LeadStatus::Lost {
            return Err(DomainError::InvalidStatusTransition {
                from: self.status,
                to: LeadStatus::Qualifying,
            });
        }
        self.status = LeadStatus::Qualifying;
        Ok(())
    }

    pub fn is_ghost_candidate(&self, cutoff: DateTime<Utc>) -> bool {
        self.contact.is_present()
            && !self.status.is_terminal()
            && self.last_interaction_at < cutoff
            && !self.ghost_reminder_sent
    }

    pub fn mark_ghost_reminder(
        &mut self,
        outcome: GhostOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if self.ghost_reminder_sent {
            return Err(DomainError::InvariantViolation(format!(
                "lead {} already received its re-engagement reminder",
                self.id
            )));
        }
        self.ghost_reminder_sent = true;
        self.ghost_reminder_sent_at = Some(now);
        self.ghost_reminder_outcome = Some(outcome);
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use crate::domain::conversation::{Channel, Language};
    use crate::domain::tenant::TenantId;
    use crate::errors::DomainError;

    use super::{BudgetRange, GhostOutcome, Lead, LeadStatus, PropertyType};

    fn lead() -> Lead {
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).single().expect("valid time");
        Lead::new(TenantId::new("acme-realty"), "tg-42", Channel::Telegram, Language::English, now)
    }

    #[test]
    fn lifecycle_moves_forward_only() {
        let mut lead = lead();
        lead.transition_to(LeadStatus::Qualifying).expect("new -> qualifying");
        lead.transition_to(LeadStatus::MatchesPresented).expect("skipping ahead is forward");

        let error = lead.transition_to(LeadStatus::Qualified).expect_err("backwards must fail");
        assert!(matches!(
            error,
            DomainError::InvalidStatusTransition {
                from: LeadStatus::MatchesPresented,
                to: LeadStatus::Qualified
            }
        ));
    }

    #[test]
    fn terminal_statuses_only_leave_through_reopen() {
        let mut lead = lead();
        lead.transition_to(LeadStatus::Lost).expect("any open status can be lost");
        assert!(lead.transition_to(LeadStatus::Qualifying).is_err());

        lead.reopen().expect("lost leads can be reopened");
        assert_eq!(lead.status, LeadStatus::Qualifying);

        lead.transition_to(LeadStatus::Won).expect("qualifying -> won");
        assert!(lead.reopen().is_err(), "won leads are not reopened");
    }

    #[test]
    fn advance_to_never_moves_backwards() {
        let mut lead = lead();
        lead.advance_to(LeadStatus::MatchesPresented);
        lead.advance_to(LeadStatus::Qualifying);
        assert_eq!(lead.status, LeadStatus::MatchesPresented);
    }

    #[test]
    fn ghost_reminder_can_only_be_marked_once() {
        let mut lead = lead();
        let now = lead.created_at + Duration::days(3);
        lead.mark_ghost_reminder(GhostOutcome::Delivered, now).expect("first mark");

        let error = lead
            .mark_ghost_reminder(GhostOutcome::RetriesExhausted, now)
            .expect_err("second mark must fail");
        assert!(matches!(error, DomainError::InvariantViolation(_)));
        assert_eq!(lead.ghost_reminder_outcome, Some(GhostOutcome::Delivered));
    }

    #[test]
    fn ghost_candidate_requires_contact_and_staleness() {
        let mut lead = lead();
        let cutoff = lead.last_interaction_at + Duration::hours(1);
        assert!(!lead.is_ghost_candidate(cutoff), "no contact info yet");

        lead.contact.phone = Some("+971501234567".to_string());
        assert!(lead.is_ghost_candidate(cutoff));
        assert!(!lead.is_ghost_candidate(lead.last_interaction_at - Duration::hours(1)));

        lead.status = LeadStatus::Won;
        assert!(!lead.is_ghost_candidate(cutoff));
    }

    #[test]
    fn budget_range_normalizes_inverted_bounds() {
        let range = BudgetRange::between(Decimal::from(3_000_000), Decimal::from(2_000_000));
        assert_eq!(range.min, Some(Decimal::from(2_000_000)));
        assert_eq!(range.max, Decimal::from(3_000_000));
        assert_eq!(BudgetRange::up_to(Decimal::from(5)).floor(), Decimal::ZERO);
    }

    #[test]
    fn property_type_aliases_parse() {
        assert_eq!(PropertyType::parse("Flat"), Some(PropertyType::Apartment));
        assert_eq!(PropertyType::parse("villas"), Some(PropertyType::Villa));
        assert_eq!(PropertyType::parse("castle"), None);
    }
}
