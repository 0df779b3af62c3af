//! Conversation runtime for the lead assistant.
//!
//! One inbound message becomes one turn: resolve the tenant, load the lead
//! and its conversation, extract slots, drive the flow, compose a reply and
//! commit everything together. Turns for the same conversation run strictly
//! one after another; turns for different conversations run in parallel.
//!
//! The extraction model is only a translator. It proposes slot values that
//! are validated before they touch the lead, and every decision about what
//! to say next is made by the deterministic flow engine.
//!
//! The ghost scheduler lives here as well because it shares the reply
//! templates and the outbound channel with the orchestrator.

pub mod extraction;
pub mod ghost;
pub mod locks;
pub mod orchestrator;
pub mod periodic;
pub mod templates;
pub mod tenancy;

pub use extraction::{
    client_from_config, ExtractionClient, ExtractionError, ExtractionRequest,
    HttpExtractionClient, KeywordExtractor,
};
pub use ghost::{GhostRunResult, GhostScheduler};
pub use locks::KeyedLocks;
pub use orchestrator::{
    HousekeepingReport, Orchestrator, OrchestratorParts, OrchestratorSettings, TurnOutcome,
};
pub use periodic::{spawn_periodic, PeriodicHandle};
pub use templates::{ReplyTemplates, TemplateError};
pub use tenancy::{ActiveContextCache, TenantResolver};
