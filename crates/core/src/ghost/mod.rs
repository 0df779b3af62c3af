//! Re-engagement ("ghost protocol") selection rules and cycle bookkeeping.
//!
//! The periodic runner lives with the async runtime; this module only decides
//! who is eligible and records what happened to each lead.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::conversation::{Channel, Language};
use crate::domain::lead::{GhostOutcome, Lead, LeadId};
use crate::domain::tenant::TenantId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GhostPolicy {
    pub inactivity_threshold: Duration,
    pub batch_size: u32,
    pub max_batches_per_cycle: u32,
}

impl Default for GhostPolicy {
    fn default() -> Self {
        Self { inactivity_threshold: Duration::hours(24), batch_size: 50, max_batches_per_cycle: 20 }
    }
}

impl GhostPolicy {
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.inactivity_threshold
    }

    /// Contact known, non-terminal, silent past the threshold, never reminded.
    pub fn selects(&self, lead: &Lead, now: DateTime<Utc>) -> bool {
        lead.is_ghost_candidate(self.cutoff(now))
    }
}

/// Everything needed to deliver a reminder without touching the lead again.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GhostCandidate {
    pub tenant_id: TenantId,
    pub lead_id: LeadId,
    pub external_user_id: String,
    pub channel: Channel,
    pub language: Language,
    pub name: Option<String>,
    pub last_interaction_at: DateTime<Utc>,
}

impl GhostCandidate {
    pub fn from_lead(lead: &Lead) -> Self {
        Self {
            tenant_id: lead.tenant_id.clone(),
            lead_id: lead.id.clone(),
            external_user_id: lead.external_user_id.clone(),
            channel: lead.last_channel,
            language: lead.language,
            name: lead.contact.name.clone(),
            last_interaction_at: lead.last_interaction_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GhostLeadResult {
    Delivered { attempts: u32 },
    RetriesExhausted { attempts: u32, last_error: String },
    /// Another worker recorded the reminder first.
    Skipped { reason: String },
    Failed { error: String },
}

impl GhostLeadResult {
    pub fn outcome(&self) -> Option<GhostOutcome> {
        match self {
            Self::Delivered { .. } => Some(GhostOutcome::Delivered),
            Self::RetriesExhausted { .. } => Some(GhostOutcome::RetriesExhausted),
            Self::Skipped { .. } | Self::Failed { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GhostLeadReport {
    pub tenant_id: TenantId,
    pub lead_id: LeadId,
    pub result: GhostLeadResult,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GhostCycleReport {
    pub cycle_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub batches: u32,
    pub selected: u32,
    pub delivered: u32,
    pub exhausted: u32,
    pub skipped: u32,
    pub failed: u32,
    pub leads: Vec<GhostLeadReport>,
}

impl GhostCycleReport {
    pub fn start(cycle_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            cycle_id: cycle_id.into(),
            started_at,
            finished_at: None,
            batches: 0,
            selected: 0,
            delivered: 0,
            exhausted: 0,
            skipped: 0,
            failed: 0,
            leads: Vec::new(),
        }
    }

    pub fn record(&mut self, report: GhostLeadReport) {
        match report.result {
            GhostLeadResult::Delivered { .. } => self.delivered += 1,
            GhostLeadResult::RetriesExhausted { .. } => self.exhausted += 1,
            GhostLeadResult::Skipped { .. } => self.skipped += 1,
            GhostLeadResult::Failed { .. } => self.failed += 1,
        }
        self.leads.push(report);
    }

    pub fn finish(mut self, finished_at: DateTime<Utc>) -> Self {
        self.finished_at = Some(finished_at);
        self
    }

    pub fn marked(&self) -> u32 {
        self.delivered + self.exhausted
    }
}
