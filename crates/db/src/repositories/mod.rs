use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use leadline_core::domain::conversation::{Conversation, ConversationKey};
use leadline_core::domain::inventory::InventoryItem;
use leadline_core::domain::lead::{GhostOutcome, Lead, LeadId};
use leadline_core::domain::tenant::{Tenant, TenantId, TenantScope};
use leadline_core::errors::ApplicationError;
use leadline_core::ghost::GhostCandidate;
use leadline_core::slots::SlotLogEntry;

pub mod conversation;
mod decode;
pub mod ghost;
pub mod inventory;
pub mod lead;
pub mod memory;
pub mod tenant;

pub use conversation::SqlConversationRepository;
pub use inventory::SqlInventoryRepository;
pub use lead::SqlLeadRepository;
pub use memory::{InMemoryInventoryRepository, InMemoryLeadStore, InMemoryTenantRepository};
pub use tenant::SqlTenantRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("tenant isolation violation: scope {scope} touched {entity} owned by {owner}")]
    TenantIsolation { scope: TenantId, owner: TenantId, entity: &'static str },
}

impl RepositoryError {
    /// Fails when an entity about to be written belongs to a tenant other than the scope.
    pub fn check_scope(
        scope: &TenantScope,
        owner: &TenantId,
        entity: &'static str,
    ) -> Result<(), RepositoryError> {
        scope.ensure_owns(owner, entity).map_err(|_| RepositoryError::TenantIsolation {
            scope: scope.tenant_id().clone(),
            owner: owner.clone(),
            entity,
        })
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::TenantIsolation { scope, owner, entity } => {
                ApplicationError::TenantIsolation { scope, owner, entity }
            }
            other => ApplicationError::Persistence(other.to_string()),
        }
    }
}

/// Everything one conversational turn changed, persisted in a single transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnCommit {
    /// A stale session closed during this turn; written before `conversation`.
    pub archived: Option<Conversation>,
    pub conversation: Conversation,
    pub lead: Lead,
    pub slot_log: Vec<SlotLogEntry>,
}

/// Keyset position inside a re-engagement scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GhostCursor {
    pub last_interaction_at: DateTime<Utc>,
    pub lead_id: LeadId,
}

impl GhostCursor {
    pub fn after(candidate: &GhostCandidate) -> Self {
        Self {
            last_interaction_at: candidate.last_interaction_at,
            lead_id: candidate.lead_id.clone(),
        }
    }
}

#[async_trait]
pub trait TenantRepository: Send + Sync {
    async fn find(&self, id: &TenantId) -> Result<Option<Tenant>, RepositoryError>;
    async fn list(&self) -> Result<Vec<Tenant>, RepositoryError>;
    async fn save(&self, tenant: Tenant) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_active(
        &self,
        scope: &TenantScope,
        key: &ConversationKey,
    ) -> Result<Option<Conversation>, RepositoryError>;

    /// Archives every active conversation whose last activity is older than `cutoff`.
    async fn archive_idle(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait LeadRepository: Send + Sync {
    async fn find_by_id(
        &self,
        scope: &TenantScope,
        id: &LeadId,
    ) -> Result<Option<Lead>, RepositoryError>;

    async fn find_by_external_user(
        &self,
        scope: &TenantScope,
        external_user_id: &str,
    ) -> Result<Option<Lead>, RepositoryError>;

    async fn save(&self, scope: &TenantScope, lead: Lead) -> Result<(), RepositoryError>;

    async fn slot_log(
        &self,
        scope: &TenantScope,
        lead_id: &LeadId,
    ) -> Result<Vec<SlotLogEntry>, RepositoryError>;

    /// Persists a whole turn or nothing.
    async fn commit_turn(&self, scope: &TenantScope, turn: TurnCommit)
        -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait GhostRepository: Send + Sync {
    /// Candidates across all active tenants, oldest interaction first.
    async fn select_candidates(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<&GhostCursor>,
        limit: u32,
    ) -> Result<Vec<GhostCandidate>, RepositoryError>;

    /// Sets the one-time reminder flag. Returns `false` when another worker already did.
    async fn mark_reminder(
        &self,
        scope: &TenantScope,
        lead_id: &LeadId,
        outcome: GhostOutcome,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait InventoryRepository: Send + Sync {
    async fn save(&self, scope: &TenantScope, item: InventoryItem) -> Result<(), RepositoryError>;
    async fn list(&self, scope: &TenantScope) -> Result<Vec<InventoryItem>, RepositoryError>;
}
