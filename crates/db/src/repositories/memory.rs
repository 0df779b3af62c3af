use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use leadline_core::domain::conversation::{Conversation, ConversationId, ConversationKey};
use leadline_core::domain::inventory::{InventoryItem, InventoryQuery};
use leadline_core::domain::lead::{GhostOutcome, Lead, LeadId};
use leadline_core::domain::tenant::{Tenant, TenantId, TenantScope};
use leadline_core::errors::ApplicationError;
use leadline_core::ghost::GhostCandidate;
use leadline_core::matching::InventorySource;
use leadline_core::slots::SlotLogEntry;

use super::{
    ConversationRepository, GhostCursor, GhostRepository, InventoryRepository, LeadRepository,
    RepositoryError, TenantRepository, TurnCommit,
};

#[derive(Default)]
pub struct InMemoryTenantRepository {
    tenants: RwLock<BTreeMap<TenantId, Tenant>>,
}

#[async_trait::async_trait]
impl TenantRepository for InMemoryTenantRepository {
    async fn find(&self, id: &TenantId) -> Result<Option<Tenant>, RepositoryError> {
        let tenants = self.tenants.read().await;
        Ok(tenants.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Tenant>, RepositoryError> {
        let tenants = self.tenants.read().await;
        Ok(tenants.values().cloned().collect())
    }

    async fn save(&self, tenant: Tenant) -> Result<(), RepositoryError> {
        let mut tenants = self.tenants.write().await;
        tenants.insert(tenant.id.clone(), tenant);
        Ok(())
    }
}

#[derive(Default)]
struct LeadStoreState {
    leads: HashMap<LeadId, Lead>,
    conversations: HashMap<ConversationId, Conversation>,
    slot_log: Vec<SlotLogEntry>,
}

impl LeadStoreState {
    fn check_lead(&self, lead: &Lead) -> Result<(), RepositoryError> {
        if let Some(existing) = self.leads.get(&lead.id) {
            if existing.tenant_id != lead.tenant_id {
                return Err(RepositoryError::Conflict(format!(
                    "lead {} exists under another tenant and was not overwritten",
                    lead.id
                )));
            }
        }
        let duplicate = self.leads.values().any(|other| {
            other.id != lead.id
                && other.tenant_id == lead.tenant_id
                && other.external_user_id == lead.external_user_id
        });
        if duplicate {
            return Err(RepositoryError::Conflict(format!(
                "another lead already exists for user {}",
                lead.external_user_id
            )));
        }
        Ok(())
    }

    fn check_conversation(
        &self,
        conversation: &Conversation,
        archiving: Option<&ConversationId>,
    ) -> Result<(), RepositoryError> {
        if !conversation.is_active() {
            return Ok(());
        }
        let clash = self.conversations.values().any(|other| {
            other.id != conversation.id
                && Some(&other.id) != archiving
                && other.is_active()
                && other.key == conversation.key
        });
        if clash {
            return Err(RepositoryError::Conflict(format!(
                "an active conversation already exists for {}",
                conversation.key
            )));
        }
        Ok(())
    }

    fn store_lead(&mut self, mut lead: Lead) {
        if let Some(existing) = self.leads.get(&lead.id) {
            if existing.ghost_reminder_sent {
                lead.ghost_reminder_sent = true;
                lead.ghost_reminder_sent_at = existing.ghost_reminder_sent_at;
                lead.ghost_reminder_outcome = existing.ghost_reminder_outcome;
            }
        }
        self.leads.insert(lead.id.clone(), lead);
    }
}

/// Conversations, leads and the slot log behind one lock, so a turn commits atomically.
#[derive(Default)]
pub struct InMemoryLeadStore {
    state: RwLock<LeadStoreState>,
}

impl InMemoryLeadStore {
    pub async fn conversations(&self) -> Vec<Conversation> {
        let state = self.state.read().await;
        let mut conversations: Vec<_> = state.conversations.values().cloned().collect();
        conversations.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        conversations
    }
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryLeadStore {
    async fn find_active(
        &self,
        scope: &TenantScope,
        key: &ConversationKey,
    ) -> Result<Option<Conversation>, RepositoryError> {
        RepositoryError::check_scope(scope, &key.tenant_id, "conversation")?;
        let state = self.state.read().await;
        Ok(state
            .conversations
            .values()
            .find(|conversation| conversation.is_active() && &conversation.key == key)
            .cloned())
    }

    async fn archive_idle(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut state = self.state.write().await;
        let mut archived = 0;
        for conversation in state.conversations.values_mut() {
            if conversation.is_active() && conversation.last_activity_at < cutoff {
                conversation.archive(now);
                archived += 1;
            }
        }
        Ok(archived)
    }
}

#[async_trait::async_trait]
impl LeadRepository for InMemoryLeadStore {
    async fn find_by_id(
        &self,
        scope: &TenantScope,
        id: &LeadId,
    ) -> Result<Option<Lead>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.leads.get(id).filter(|lead| &lead.tenant_id == scope.tenant_id()).cloned())
    }

    async fn find_by_external_user(
        &self,
        scope: &TenantScope,
        external_user_id: &str,
    ) -> Result<Option<Lead>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .leads
            .values()
            .find(|lead| {
                &lead.tenant_id == scope.tenant_id() && lead.external_user_id == external_user_id
            })
            .cloned())
    }

    async fn save(&self, scope: &TenantScope, lead: Lead) -> Result<(), RepositoryError> {
        RepositoryError::check_scope(scope, &lead.tenant_id, "lead")?;
        let mut state = self.state.write().await;
        state.check_lead(&lead)?;
        state.store_lead(lead);
        Ok(())
    }

    async fn slot_log(
        &self,
        scope: &TenantScope,
        lead_id: &LeadId,
    ) -> Result<Vec<SlotLogEntry>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .slot_log
            .iter()
            .filter(|entry| &entry.tenant_id == scope.tenant_id() && &entry.lead_id == lead_id)
            .cloned()
            .collect())
    }

    async fn commit_turn(
        &self,
        scope: &TenantScope,
        turn: TurnCommit,
    ) -> Result<(), RepositoryError> {
        RepositoryError::check_scope(scope, &turn.lead.tenant_id, "lead")?;
        RepositoryError::check_scope(scope, &turn.conversation.key.tenant_id, "conversation")?;
        if let Some(archived) = &turn.archived {
            RepositoryError::check_scope(scope, &archived.key.tenant_id, "conversation")?;
        }
        for entry in &turn.slot_log {
            RepositoryError::check_scope(scope, &entry.tenant_id, "slot log entry")?;
        }

        let mut state = self.state.write().await;
        state.check_lead(&turn.lead)?;
        state.check_conversation(
            &turn.conversation,
            turn.archived.as_ref().map(|archived| &archived.id),
        )?;

        state.store_lead(turn.lead);
        if let Some(archived) = turn.archived {
            state.conversations.insert(archived.id.clone(), archived);
        }
        state.conversations.insert(turn.conversation.id.clone(), turn.conversation);
        state.slot_log.extend(turn.slot_log);
        Ok(())
    }
}

#[async_trait::async_trait]
impl GhostRepository for InMemoryLeadStore {
    async fn select_candidates(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<&GhostCursor>,
        limit: u32,
    ) -> Result<Vec<GhostCandidate>, RepositoryError> {
        let state = self.state.read().await;
        let mut candidates: Vec<GhostCandidate> = state
            .leads
            .values()
            .filter(|lead| lead.is_ghost_candidate(cutoff))
            .filter(|lead| match after {
                Some(cursor) => {
                    (lead.last_interaction_at, &lead.id)
                        > (cursor.last_interaction_at, &cursor.lead_id)
                }
                None => true,
            })
            .map(GhostCandidate::from_lead)
            .collect();
        candidates.sort_by(|left, right| {
            (left.last_interaction_at, &left.lead_id).cmp(&(right.last_interaction_at, &right.lead_id))
        });
        candidates.truncate(limit as usize);
        Ok(candidates)
    }

    async fn mark_reminder(
        &self,
        scope: &TenantScope,
        lead_id: &LeadId,
        outcome: GhostOutcome,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let Some(lead) =
            state.leads.get_mut(lead_id).filter(|lead| &lead.tenant_id == scope.tenant_id())
        else {
            return Ok(false);
        };
        Ok(lead.mark_ghost_reminder(outcome, at).is_ok())
    }
}

#[derive(Default)]
pub struct InMemoryInventoryRepository {
    items: RwLock<Vec<InventoryItem>>,
}

impl InMemoryInventoryRepository {
    pub fn with_items(items: Vec<InventoryItem>) -> Self {
        Self { items: RwLock::new(items) }
    }
}

#[async_trait::async_trait]
impl InventoryRepository for InMemoryInventoryRepository {
    async fn save(&self, scope: &TenantScope, item: InventoryItem) -> Result<(), RepositoryError> {
        RepositoryError::check_scope(scope, &item.tenant_id, "inventory item")?;
        let mut items = self.items.write().await;
        items.retain(|existing| !(existing.tenant_id == item.tenant_id && existing.id == item.id));
        items.push(item);
        Ok(())
    }

    async fn list(&self, scope: &TenantScope) -> Result<Vec<InventoryItem>, RepositoryError> {
        let items = self.items.read().await;
        let mut listed: Vec<_> =
            items.iter().filter(|item| &item.tenant_id == scope.tenant_id()).cloned().collect();
        listed.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(listed)
    }
}

#[async_trait::async_trait]
impl InventorySource for InMemoryInventoryRepository {
    async fn query(&self, query: &InventoryQuery) -> Result<Vec<InventoryItem>, ApplicationError> {
        let items = self.items.read().await;
        Ok(items.iter().filter(|item| query.admits(item)).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use leadline_core::domain::conversation::{Channel, Conversation, ConversationKey, Language};
    use leadline_core::domain::lead::{GhostOutcome, Lead};
    use leadline_core::domain::tenant::{TenantId, TenantScope};

    use super::InMemoryLeadStore;
    use crate::repositories::{
        ConversationRepository, GhostRepository, LeadRepository, RepositoryError, TurnCommit,
    };

    fn turn(tenant: &str, user: &str) -> TurnCommit {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("valid time");
        let tenant_id = TenantId::new(tenant);
        let lead = Lead::new(tenant_id.clone(), user, Channel::Telegram, Language::English, now);
        let key = ConversationKey::new(tenant_id, user, Channel::Telegram);
        let conversation = Conversation::start(key, lead.id.clone(), Language::English, now);
        TurnCommit { archived: None, conversation, lead, slot_log: Vec::new() }
    }

    #[tokio::test]
    async fn commit_turn_rejects_foreign_scope_without_writing() {
        let store = InMemoryLeadStore::default();
        let scope = TenantScope::new(TenantId::new("globex-homes"));

        let error = store.commit_turn(&scope, turn("acme-realty", "u1")).await.expect_err("isolation");
        assert!(matches!(error, RepositoryError::TenantIsolation { entity: "lead", .. }));
        assert!(store.conversations().await.is_empty());
    }

    #[tokio::test]
    async fn second_active_conversation_for_a_key_conflicts() {
        let store = InMemoryLeadStore::default();
        let scope = TenantScope::new(TenantId::new("acme-realty"));
        let first = turn("acme-realty", "u1");
        store.commit_turn(&scope, first.clone()).await.expect("first turn");

        let mut second = turn("acme-realty", "u1");
        second.lead = first.lead.clone();
        second.conversation.lead_id = first.lead.id.clone();
        let error = store.commit_turn(&scope, second.clone()).await.expect_err("clash");
        assert!(matches!(error, RepositoryError::Conflict(_)));

        let mut archived = first.conversation.clone();
        archived.archive(archived.last_activity_at + Duration::days(4));
        second.archived = Some(archived);
        store.commit_turn(&scope, second).await.expect("archive then start");
        assert_eq!(store.conversations().await.iter().filter(|c| c.is_active()).count(), 1);
    }

    #[tokio::test]
    async fn reminder_flag_survives_a_later_turn_commit() {
        let store = InMemoryLeadStore::default();
        let scope = TenantScope::new(TenantId::new("acme-realty"));
        let mut commit = turn("acme-realty", "u1");
        commit.lead.contact.email = Some("buyer@example.com".to_string());
        store.commit_turn(&scope, commit.clone()).await.expect("turn");

        let at = commit.lead.last_interaction_at + Duration::days(2);
        assert!(store.mark_reminder(&scope, &commit.lead.id, GhostOutcome::Delivered, at).await.expect("mark"));
        assert!(!store.mark_reminder(&scope, &commit.lead.id, GhostOutcome::Delivered, at).await.expect("mark"));

        store.commit_turn(&scope, commit.clone()).await.expect("stale snapshot commit");
        let lead = store.find_by_id(&scope, &commit.lead.id).await.expect("find").expect("lead");
        assert!(lead.ghost_reminder_sent);
        assert!(store
            .select_candidates(at + Duration::days(5), None, 10)
            .await
            .expect("select")
            .is_empty());

        let archived = store.archive_idle(at, at).await.expect("archive");
        assert_eq!(archived, 1);
        let key = ConversationKey::new(TenantId::new("acme-realty"), "u1", Channel::Telegram);
        assert_eq!(store.find_active(&scope, &key).await.expect("find"), None);
    }
}
