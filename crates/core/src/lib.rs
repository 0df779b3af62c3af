pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod ghost;
pub mod matching;
pub mod objections;
pub mod scoring;
pub mod slots;

pub use domain::conversation::{
    Channel, Conversation, ConversationId, ConversationKey, Language, MessageId,
};
pub use domain::inventory::{InventoryItem, InventoryItemId, InventoryQuery};
pub use domain::lead::{
    BudgetRange, ContactInfo, Goal, GhostOutcome, Lead, LeadId, LeadStatus, PropertyType,
    Temperature,
};
pub use domain::tenant::{Tenant, TenantId, TenantScope};
pub use errors::{ApplicationError, DomainError, InterfaceError, ValidationError};
pub use flows::{ConversationState, FlowEngine, QualificationFlow};
pub use ghost::{GhostCandidate, GhostCycleReport, GhostPolicy};
pub use matching::{InventorySource, MatchResult, MatchStage, MatchingEngine};
pub use objections::{ObjectionDetector, ObjectionKind, ObjectionTaxonomy};
pub use scoring::{LeadScorer, ScoreBreakdown};
pub use slots::{SlotName, ValidatedSlot};
