//! Periodic re-engagement of leads that went quiet.
//!
//! A cycle walks the candidates in keyset order, sends each one a localized
//! reminder with retry, then records the one-time reminder flag. The flag is
//! written after a confirmed send *or* after retries run out, so a lead is
//! never nagged twice. Failures stay with the lead they happened to.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tera::Context;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use leadline_channels::{
    deliver_with_retry, ChannelSender, DeliveryOutcome, OutboundMessage, Reply, RetryPolicy,
};
use leadline_core::config::{ChannelsConfig, GhostConfig};
use leadline_core::domain::lead::GhostOutcome;
use leadline_core::domain::tenant::TenantScope;
use leadline_core::errors::ApplicationError;
use leadline_core::ghost::{
    GhostCandidate, GhostCycleReport, GhostLeadReport, GhostLeadResult, GhostPolicy,
};
use leadline_db::repositories::{GhostCursor, GhostRepository};

use crate::periodic::{spawn_periodic, PeriodicHandle};
use crate::templates::ReplyTemplates;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GhostRunResult {
    Completed(GhostCycleReport),
    /// Another cycle held the scheduler; this call did nothing.
    AlreadyRunning,
}

pub struct GhostScheduler {
    repository: Arc<dyn GhostRepository>,
    sender: Arc<dyn ChannelSender>,
    templates: Arc<ReplyTemplates>,
    policy: GhostPolicy,
    retry: RetryPolicy,
    interval: Duration,
    running: Mutex<()>,
}

impl GhostScheduler {
    pub fn new(
        repository: Arc<dyn GhostRepository>,
        sender: Arc<dyn ChannelSender>,
        templates: Arc<ReplyTemplates>,
        policy: GhostPolicy,
        retry: RetryPolicy,
        interval: Duration,
    ) -> Self {
        Self { repository, sender, templates, policy, retry, interval, running: Mutex::new(()) }
    }

    pub fn from_config(
        repository: Arc<dyn GhostRepository>,
        sender: Arc<dyn ChannelSender>,
        templates: Arc<ReplyTemplates>,
        ghost: &GhostConfig,
        channels: &ChannelsConfig,
    ) -> Self {
        let retry = RetryPolicy {
            max_attempts: ghost.max_attempts,
            base_delay_ms: ghost.base_delay_ms,
            max_delay_ms: ghost.max_delay_ms,
            attempt_timeout_ms: channels.send_timeout_ms,
            jitter: true,
        };
        Self::new(
            repository,
            sender,
            templates,
            ghost.policy(),
            retry,
            Duration::from_secs(ghost.interval_secs.max(1)),
        )
    }

    pub fn policy(&self) -> &GhostPolicy {
        &self.policy
    }

    /// Runs one cycle now. Overlapping calls return `AlreadyRunning` at once.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<GhostRunResult, ApplicationError> {
        let Ok(_running) = self.running.try_lock() else {
            info!(event_name = "agent.ghost.cycle_skipped", "a re-engagement cycle is already running");
            return Ok(GhostRunResult::AlreadyRunning);
        };

        let cycle_id = format!("ghost-{}", now.format("%Y%m%dT%H%M%S%3f"));
        let cutoff = self.policy.cutoff(now);
        let batch_size = self.policy.batch_size.max(1);
        let mut report = GhostCycleReport::start(cycle_id.clone(), now);
        let mut cursor: Option<GhostCursor> = None;

        info!(
            event_name = "agent.ghost.cycle_started",
            cycle_id = %cycle_id,
            cutoff = %cutoff.to_rfc3339(),
            batch_size,
        );

        while report.batches < self.policy.max_batches_per_cycle {
            let batch =
                self.repository.select_candidates(cutoff, cursor.as_ref(), batch_size).await?;
            if batch.is_empty() {
                break;
            }
            report.batches += 1;
            report.selected += batch.len() as u32;
            cursor = batch.last().map(GhostCursor::after);
            let exhausted_scan = (batch.len() as u32) < batch_size;

            for candidate in batch {
                let result = self.remind(&cycle_id, &candidate, now).await;
                report.record(GhostLeadReport {
                    tenant_id: candidate.tenant_id,
                    lead_id: candidate.lead_id,
                    result,
                });
            }
            if exhausted_scan {
                break;
            }
        }

        let report = report.finish(Utc::now().max(now));
        info!(
            event_name = "agent.ghost.cycle_completed",
            cycle_id = %report.cycle_id,
            batches = report.batches,
            selected = report.selected,
            delivered = report.delivered,
            exhausted = report.exhausted,
            skipped = report.skipped,
            failed = report.failed,
        );
        Ok(GhostRunResult::Completed(report))
    }

    /// Starts the fixed-interval loop. The first cycle runs immediately.
    pub fn spawn(self: &Arc<Self>) -> PeriodicHandle {
        let scheduler = Arc::clone(self);
        spawn_periodic("ghost_scheduler", self.interval, move || {
            let scheduler = Arc::clone(&scheduler);
            async move {
                if let Err(error) = scheduler.run_once(Utc::now()).await {
                    error!(event_name = "agent.ghost.cycle_failed", error = %error);
                }
            }
        })
    }

    async fn remind(
        &self,
        cycle_id: &str,
        candidate: &GhostCandidate,
        now: DateTime<Utc>,
    ) -> GhostLeadResult {
        let mut context = Context::new();
        context.insert("name", &candidate.name);
        let text = match self.templates.render(candidate.language, "ghost_reminder", &context) {
            Ok(text) => text,
            Err(error) => {
                error!(
                    event_name = "agent.ghost.render_failed",
                    lead_id = %candidate.lead_id,
                    error = %error,
                );
                return GhostLeadResult::Failed { error: error.to_string() };
            }
        };

        let message = OutboundMessage {
            tenant_id: candidate.tenant_id.clone(),
            external_user_id: candidate.external_user_id.clone(),
            channel: candidate.channel,
            reply: Reply::text(text),
            correlation_id: format!("{cycle_id}:{}", candidate.lead_id),
        };
        let (outcome, result) = match deliver_with_retry(self.sender.as_ref(), &message, &self.retry).await
        {
            DeliveryOutcome::Delivered { attempts } => {
                (GhostOutcome::Delivered, GhostLeadResult::Delivered { attempts })
            }
            DeliveryOutcome::Exhausted { attempts, last_error } => {
                warn!(
                    event_name = "agent.ghost.retries_exhausted",
                    tenant_id = %candidate.tenant_id,
                    lead_id = %candidate.lead_id,
                    attempts,
                    error = %last_error,
                );
                (
                    GhostOutcome::RetriesExhausted,
                    GhostLeadResult::RetriesExhausted {
                        attempts,
                        last_error: last_error.to_string(),
                    },
                )
            }
        };

        let scope = TenantScope::new(candidate.tenant_id.clone());
        let marked = match self.repository.mark_reminder(&scope, &candidate.lead_id, outcome, now).await
        {
            // One more try: an unrecorded reminder goes out again next cycle.
            Err(error) => {
                warn!(
                    event_name = "agent.ghost.mark_retry",
                    tenant_id = %candidate.tenant_id,
                    lead_id = %candidate.lead_id,
                    error = %error,
                );
                self.repository.mark_reminder(&scope, &candidate.lead_id, outcome, now).await
            }
            first => first,
        };
        match marked {
            Ok(true) => result,
            Ok(false) => {
                warn!(
                    event_name = "agent.ghost.already_marked",
                    tenant_id = %candidate.tenant_id,
                    lead_id = %candidate.lead_id,
                );
                GhostLeadResult::Skipped {
                    reason: "reminder already recorded by another worker".to_string(),
                }
            }
            Err(error) => {
                error!(
                    event_name = "agent.ghost.mark_failed",
                    tenant_id = %candidate.tenant_id,
                    lead_id = %candidate.lead_id,
                    delivered = outcome == GhostOutcome::Delivered,
                    error = %error,
                    "reminder flag not recorded; the lead is eligible again next cycle"
                );
                GhostLeadResult::Failed { error: error.to_string() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};

    use leadline_channels::{DeliveryError, RecordingSender, RetryPolicy};
    use leadline_core::domain::conversation::{Channel, Language};
    use leadline_core::domain::lead::{GhostOutcome, Lead, LeadId, LeadStatus};
    use leadline_core::domain::tenant::{TenantId, TenantScope};
    use leadline_core::ghost::{GhostCandidate, GhostLeadResult, GhostPolicy};
    use leadline_db::repositories::{
        GhostCursor, GhostRepository, InMemoryLeadStore, LeadRepository, RepositoryError,
    };

    use super::{GhostRunResult, GhostScheduler};
    use crate::templates::ReplyTemplates;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, hour, 0, 0).single().expect("valid time")
    }

    fn quiet_lead(tenant: &str, user: &str, language: Language, last_seen: DateTime<Utc>) -> Lead {
        let mut lead =
            Lead::new(TenantId::new(tenant), user, Channel::Telegram, language, last_seen);
        lead.contact.phone = Some("+971501234567".to_string());
        lead.contact.name = Some("Omar".to_string());
        lead
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
            attempt_timeout_ms: 200,
            jitter: false,
        }
    }

    fn scheduler(
        repository: Arc<dyn GhostRepository>,
        sender: Arc<RecordingSender>,
        batch_size: u32,
    ) -> GhostScheduler {
        GhostScheduler::new(
            repository,
            sender,
            Arc::new(ReplyTemplates::embedded().expect("templates load")),
            GhostPolicy {
                inactivity_threshold: ChronoDuration::hours(24),
                batch_size,
                max_batches_per_cycle: 10,
            },
            fast_retry(),
            Duration::from_secs(60),
        )
    }

    async fn save(store: &InMemoryLeadStore, lead: Lead) {
        let scope = TenantScope::new(lead.tenant_id.clone());
        store.save(&scope, lead).await.expect("save lead");
    }

    fn completed(result: GhostRunResult) -> leadline_core::ghost::GhostCycleReport {
        match result {
            GhostRunResult::Completed(report) => report,
            GhostRunResult::AlreadyRunning => panic!("cycle unexpectedly skipped"),
        }
    }

    #[tokio::test]
    async fn reminds_each_stale_lead_once_across_batches() {
        let store = Arc::new(InMemoryLeadStore::default());
        for (index, user) in ["tg-1", "tg-2", "tg-3"].into_iter().enumerate() {
            save(&store, quiet_lead("acme-realty", user, Language::English, at(index as u32))).await;
        }
        let mut fresh = quiet_lead("acme-realty", "tg-fresh", Language::English, at(10));
        fresh.last_interaction_at = at(10) + ChronoDuration::days(1);
        save(&store, fresh).await;
        let mut won = quiet_lead("acme-realty", "tg-won", Language::English, at(1));
        won.status = LeadStatus::Won;
        save(&store, won).await;

        let sender = Arc::new(RecordingSender::default());
        let scheduler = scheduler(store.clone(), sender.clone(), 2);
        let now = at(0) + ChronoDuration::days(2);

        let report = completed(scheduler.run_once(now).await.expect("cycle runs"));
        assert_eq!(report.batches, 2);
        assert_eq!(report.selected, 3);
        assert_eq!(report.delivered, 3);
        assert_eq!(report.marked(), 3);
        assert!(report.finished_at.is_some());

        let delivered = sender.delivered();
        assert_eq!(delivered.len(), 3);
        assert!(delivered[0].reply.text.contains("Omar"));
        assert!(delivered.iter().all(|message| message.channel == Channel::Telegram));

        let again = completed(scheduler.run_once(now + ChronoDuration::days(5)).await.expect("rerun"));
        assert_eq!(again.selected, 0);
        assert_eq!(sender.delivered().len(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_still_set_the_flag() {
        let store = Arc::new(InMemoryLeadStore::default());
        let lead = quiet_lead("acme-realty", "tg-9", Language::Russian, at(0));
        let lead_id = lead.id.clone();
        save(&store, lead).await;

        let failures = vec![DeliveryError::Timeout(200); 3];
        let sender = Arc::new(RecordingSender::failing_with(failures));
        let scheduler = scheduler(store.clone(), sender.clone(), 10);

        let report =
            completed(scheduler.run_once(at(0) + ChronoDuration::days(2)).await.expect("cycle"));
        assert_eq!(report.exhausted, 1);
        assert!(matches!(
            report.leads[0].result,
            GhostLeadResult::RetriesExhausted { attempts: 3, .. }
        ));
        assert_eq!(sender.attempts().len(), 3);
        assert!(sender.attempts()[0].reply.text.contains("Здравствуйте"));

        let stored = store
            .find_by_id(&TenantScope::new(TenantId::new("acme-realty")), &lead_id)
            .await
            .expect("load")
            .expect("lead exists");
        assert!(stored.ghost_reminder_sent);
        assert_eq!(stored.ghost_reminder_outcome, Some(GhostOutcome::RetriesExhausted));
    }

    /// Hands out candidates but loses every mark race after the first.
    struct RacingRepository {
        inner: InMemoryLeadStore,
        fail_for: LeadId,
    }

    #[async_trait]
    impl GhostRepository for RacingRepository {
        async fn select_candidates(
            &self,
            cutoff: DateTime<Utc>,
            after: Option<&GhostCursor>,
            limit: u32,
        ) -> Result<Vec<GhostCandidate>, RepositoryError> {
            self.inner.select_candidates(cutoff, after, limit).await
        }

        async fn mark_reminder(
            &self,
            scope: &TenantScope,
            lead_id: &LeadId,
            outcome: GhostOutcome,
            at: DateTime<Utc>,
        ) -> Result<bool, RepositoryError> {
            if lead_id == &self.fail_for {
                return Err(RepositoryError::Conflict("database is locked".to_string()));
            }
            let first = self.inner.mark_reminder(scope, lead_id, outcome, at).await?;
            // A second worker got there too.
            let second = self.inner.mark_reminder(scope, lead_id, outcome, at).await?;
            Ok(first && second)
        }
    }

    #[tokio::test]
    async fn per_lead_failures_are_isolated() {
        let inner = InMemoryLeadStore::default();
        let broken = quiet_lead("acme-realty", "tg-broken", Language::English, at(0));
        let broken_id = broken.id.clone();
        save(&inner, broken).await;
        save(&inner, quiet_lead("globex-homes", "ig-1", Language::Arabic, at(1))).await;

        let repository = Arc::new(RacingRepository { inner, fail_for: broken_id.clone() });
        let sender = Arc::new(RecordingSender::default());
        let scheduler = scheduler(repository, sender.clone(), 10);

        let report =
            completed(scheduler.run_once(at(0) + ChronoDuration::days(2)).await.expect("cycle"));
        assert_eq!(report.selected, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
        let broken_report = report
            .leads
            .iter()
            .find(|lead| lead.lead_id == broken_id)
            .expect("broken lead reported");
        assert!(matches!(&broken_report.result, GhostLeadResult::Failed { error } if error.contains("locked")));
        assert_eq!(sender.delivered().len(), 2);
    }

    /// Fails the first `failures` mark calls, then behaves.
    struct FlakyMarks {
        inner: Arc<InMemoryLeadStore>,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl GhostRepository for FlakyMarks {
        async fn select_candidates(
            &self,
            cutoff: DateTime<Utc>,
            after: Option<&GhostCursor>,
            limit: u32,
        ) -> Result<Vec<GhostCandidate>, RepositoryError> {
            self.inner.select_candidates(cutoff, after, limit).await
        }

        async fn mark_reminder(
            &self,
            scope: &TenantScope,
            lead_id: &LeadId,
            outcome: GhostOutcome,
            at: DateTime<Utc>,
        ) -> Result<bool, RepositoryError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(RepositoryError::Conflict("database is locked".to_string()));
            }
            self.inner.mark_reminder(scope, lead_id, outcome, at).await
        }
    }

    #[tokio::test]
    async fn a_transient_mark_failure_after_delivery_is_retried() {
        let store = Arc::new(InMemoryLeadStore::default());
        let lead = quiet_lead("acme-realty", "tg-77", Language::English, at(0));
        let lead_id = lead.id.clone();
        save(&store, lead).await;

        let repository =
            Arc::new(FlakyMarks { inner: store.clone(), failures: AtomicUsize::new(1) });
        let sender = Arc::new(RecordingSender::default());
        let scheduler = scheduler(repository, sender.clone(), 10);
        let now = at(0) + ChronoDuration::days(2);

        let report = completed(scheduler.run_once(now).await.expect("cycle"));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 0);
        assert!(matches!(report.leads[0].result, GhostLeadResult::Delivered { .. }));

        let stored = store
            .find_by_id(&TenantScope::new(TenantId::new("acme-realty")), &lead_id)
            .await
            .expect("load")
            .expect("lead exists");
        assert!(stored.ghost_reminder_sent);
        assert_eq!(stored.ghost_reminder_outcome, Some(GhostOutcome::Delivered));

        let again = completed(scheduler.run_once(now + ChronoDuration::days(1)).await.expect("rerun"));
        assert_eq!(again.selected, 0);
        assert_eq!(sender.delivered().len(), 1);
    }

    #[tokio::test]
    async fn overlapping_runs_are_single_flight() {
        let store = Arc::new(InMemoryLeadStore::default());
        let sender = Arc::new(RecordingSender::default());
        let scheduler = scheduler(store, sender, 10);

        let _held = scheduler.running.lock().await;
        let result = scheduler.run_once(at(12)).await.expect("returns immediately");
        assert_eq!(result, GhostRunResult::AlreadyRunning);
    }
}
