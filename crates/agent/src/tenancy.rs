use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use leadline_core::domain::conversation::{Channel, ConversationId, Language};
use leadline_core::domain::lead::LeadId;
use leadline_core::domain::tenant::{Tenant, TenantId};
use leadline_core::errors::ApplicationError;
use leadline_core::flows::ConversationState;
use leadline_db::repositories::TenantRepository;

/// Looks up the tenant an inbound message claims to belong to.
#[derive(Clone)]
pub struct TenantResolver {
    tenants: Arc<dyn TenantRepository>,
}

impl TenantResolver {
    pub fn new(tenants: Arc<dyn TenantRepository>) -> Self {
        Self { tenants }
    }

    /// Unknown and inactive tenants are indistinguishable to the caller.
    pub async fn resolve(
        &self,
        tenant_id: &TenantId,
        channel: Channel,
    ) -> Result<Tenant, ApplicationError> {
        let tenant = self
            .tenants
            .find(tenant_id)
            .await?
            .filter(|tenant| tenant.active)
            .ok_or_else(|| ApplicationError::not_found("tenant", tenant_id.as_str()))?;

        if !tenant.accepts_channel(&channel) {
            return Err(ApplicationError::not_found(
                "tenant channel",
                format!("{}/{}", tenant_id, channel),
            ));
        }
        Ok(tenant)
    }
}

/// Where a user was last talking to us, across channels.
#[derive(Clone, Debug, PartialEq)]
pub struct ActiveContext {
    pub lead_id: LeadId,
    pub conversation_id: ConversationId,
    pub channel: Channel,
    pub language: Language,
    pub state: ConversationState,
    pub expires_at: DateTime<Utc>,
}

type ContextKey = (TenantId, String);

/// `(tenant, external_user_id) -> ActiveContext` with a fixed time-to-live.
///
/// Only a shortcut: a miss or an expired entry falls back to the lead store.
pub struct ActiveContextCache {
    ttl: Duration,
    entries: RwLock<HashMap<ContextKey, ActiveContext>>,
}

impl ActiveContextCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: RwLock::new(HashMap::new()) }
    }

    pub async fn get(
        &self,
        tenant_id: &TenantId,
        external_user_id: &str,
        now: DateTime<Utc>,
    ) -> Option<ActiveContext> {
        let entries = self.entries.read().await;
        entries
            .get(&(tenant_id.clone(), external_user_id.to_string()))
            .filter(|context| context.expires_at > now)
            .cloned()
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn remember(
        &self,
        tenant_id: &TenantId,
        external_user_id: &str,
        lead_id: LeadId,
        conversation_id: ConversationId,
        channel: Channel,
        language: Language,
        state: ConversationState,
        now: DateTime<Utc>,
    ) {
        let context = ActiveContext {
            lead_id,
            conversation_id,
            channel,
            language,
            state,
            expires_at: now + self.ttl,
        };
        self.entries.write().await.insert((tenant_id.clone(), external_user_id.to_string()), context);
    }

    pub async fn forget(&self, tenant_id: &TenantId, external_user_id: &str) {
        self.entries.write().await.remove(&(tenant_id.clone(), external_user_id.to_string()));
    }

    /// Drops expired entries; returns how many were removed.
    pub async fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, context| context.expires_at > now);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(event_name = "agent.context_cache.evicted", evicted, "expired contexts evicted");
        }
        evicted
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
