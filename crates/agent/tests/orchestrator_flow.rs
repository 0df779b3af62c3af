use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};

use leadline_agent::extraction::{ExtractionClient, ExtractionError, ExtractionRequest};
use leadline_agent::{
    KeywordExtractor, Orchestrator, OrchestratorParts, OrchestratorSettings, ReplyTemplates,
};
use leadline_channels::InboundMessage;
use leadline_core::audit::InMemoryAuditSink;
use leadline_core::domain::conversation::Channel;
use leadline_core::domain::lead::{Lead, LeadId, LeadStatus, PropertyType};
use leadline_core::domain::tenant::{TenantId, TenantScope};
use leadline_core::errors::ApplicationError;
use leadline_core::flows::ConversationState;
use leadline_core::matching::{MatchStage, MatchingEngine};
use leadline_core::scoring::LeadScorer;
use leadline_core::slots::{RawExtraction, SlotLogEntry};
use leadline_db::repositories::{
    InMemoryInventoryRepository, InMemoryLeadStore, InMemoryTenantRepository, LeadRepository,
    RepositoryError, TenantRepository, TurnCommit,
};
use leadline_db::DemoSeedDataset;

struct FailingExtractor;

#[async_trait]
impl ExtractionClient for FailingExtractor {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn extract(&self, _: &ExtractionRequest) -> Result<RawExtraction, ExtractionError> {
        Err(ExtractionError::Transport("connection refused".to_string()))
    }
}

/// The keyword extractor behind a fixed delay.
struct SlowExtractor(Duration);

#[async_trait]
impl ExtractionClient for SlowExtractor {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<RawExtraction, ExtractionError> {
        tokio::time::sleep(self.0).await;
        KeywordExtractor::new().extract(request).await
    }
}

/// Reads go straight to the store; commits hang.
struct StalledCommits(Arc<InMemoryLeadStore>);

#[async_trait]
impl LeadRepository for StalledCommits {
    async fn find_by_id(
        &self,
        scope: &TenantScope,
        id: &LeadId,
    ) -> Result<Option<Lead>, RepositoryError> {
        self.0.find_by_id(scope, id).await
    }

    async fn find_by_external_user(
        &self,
        scope: &TenantScope,
        external_user_id: &str,
    ) -> Result<Option<Lead>, RepositoryError> {
        self.0.find_by_external_user(scope, external_user_id).await
    }

    async fn save(&self, scope: &TenantScope, lead: Lead) -> Result<(), RepositoryError> {
        self.0.save(scope, lead).await
    }

    async fn slot_log(
        &self,
        scope: &TenantScope,
        lead_id: &LeadId,
    ) -> Result<Vec<SlotLogEntry>, RepositoryError> {
        self.0.slot_log(scope, lead_id).await
    }

    async fn commit_turn(
        &self,
        scope: &TenantScope,
        turn: TurnCommit,
    ) -> Result<(), RepositoryError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        self.0.commit_turn(scope, turn).await
    }
}

struct Harness {
    orchestrator: Orchestrator,
    leads: Arc<InMemoryLeadStore>,
    audit: InMemoryAuditSink,
}

async fn harness_with(
    extractor: Arc<dyn ExtractionClient>,
    settings: OrchestratorSettings,
) -> Harness {
    harness_over(extractor, settings, |store| store as Arc<dyn LeadRepository>).await
}

async fn harness_over(
    extractor: Arc<dyn ExtractionClient>,
    settings: OrchestratorSettings,
    lead_repository: impl FnOnce(Arc<InMemoryLeadStore>) -> Arc<dyn LeadRepository>,
) -> Harness {
    let tenants = Arc::new(InMemoryTenantRepository::default());
    for tenant in DemoSeedDataset::tenants() {
        tenants.save(tenant).await.expect("seed tenant");
    }
    let leads = Arc::new(InMemoryLeadStore::default());
    let audit = InMemoryAuditSink::default();
    let orchestrator = Orchestrator::new(
        OrchestratorParts {
            tenants,
            conversations: leads.clone(),
            leads: lead_repository(leads.clone()),
            inventory: Arc::new(InMemoryInventoryRepository::with_items(
                DemoSeedDataset::inventory(),
            )),
            extractor,
            audit: Arc::new(audit.clone()),
            templates: Arc::new(ReplyTemplates::embedded().expect("templates load")),
            scorer: LeadScorer::default(),
            matching: MatchingEngine::default(),
        },
        settings,
    );
    Harness { orchestrator, leads, audit }
}

async fn harness() -> Harness {
    harness_with(Arc::new(KeywordExtractor::new()), OrchestratorSettings::default()).await
}

fn at(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).single().expect("valid time")
        + ChronoDuration::minutes(minute)
}

fn acme() -> TenantId {
    TenantId::new("acme-realty")
}

fn text(user: &str, body: &str, minute: i64) -> InboundMessage {
    InboundMessage::text(acme(), user, Channel::Telegram, body, at(minute))
}

fn callback(user: &str, data: &str, minute: i64) -> InboundMessage {
    InboundMessage::callback(acme(), user, Channel::Telegram, data, at(minute))
}

fn callbacks(outcome: &leadline_agent::TurnOutcome) -> Vec<&str> {
    outcome.reply.buttons.iter().map(|button| button.callback.as_str()).collect()
}

#[tokio::test]
async fn a_complete_first_message_goes_straight_to_matches() {
    let harness = harness().await;

    let outcome = harness
        .orchestrator
        .handle(text(
            "tg-100",
            "3-bedroom villa in Dubai Marina, 3 million, need pool and gym, urgent",
            0,
        ))
        .await
        .expect("turn succeeds");

    assert_eq!(outcome.state, ConversationState::PresentMatches);
    assert_eq!(outcome.match_stage, Some(MatchStage::Exact));
    assert_eq!(outcome.lead_status, LeadStatus::MatchesPresented);
    assert!(!outcome.degraded);
    assert!(outcome.reply.text.contains("Acme Realty"), "greets first: {}", outcome.reply.text);
    assert!(outcome.reply.text.contains("1. Marina Crest Villa: AED 2,950,000, Dubai Marina, 3 BR"));
    assert_eq!(callbacks(&outcome), vec!["matches:more", "consult:request"]);

    let lead = harness
        .leads
        .find_by_id(&TenantScope::new(acme()), &outcome.lead_id)
        .await
        .expect("load lead")
        .expect("lead stored");
    assert_eq!(lead.bedrooms, Some(3));
    assert_eq!(lead.location.as_deref(), Some("Dubai Marina"));
    assert!(lead.urgency);
    assert!(lead.amenities.contains("pool") && lead.amenities.contains("gym"));
    assert_eq!(lead.score, outcome.score);

    let events = harness.audit.events();
    assert!(events.iter().any(|event| event.event_type == "turn.committed"));
}

#[tokio::test]
async fn extraction_outage_degrades_to_buttons_and_callbacks_keep_working() {
    let harness =
        harness_with(Arc::new(FailingExtractor), OrchestratorSettings::default()).await;

    let first = harness.orchestrator.handle(text("tg-200", "hello there", 0)).await.expect("turn");
    assert!(first.degraded);
    assert_eq!(first.state, ConversationState::GoalSelection);
    assert!(first.reply.text.contains("didn't quite catch that"));
    assert_eq!(callbacks(&first), vec!["goal:buy", "goal:rent", "goal:invest"]);

    let goal = harness.orchestrator.handle(callback("tg-200", "goal:buy", 1)).await.expect("turn");
    assert!(!goal.degraded);
    assert_eq!(goal.state, ConversationState::SlotFilling);
    assert!(callbacks(&goal).contains(&"slot:budget:0-1000000"));

    let again =
        harness.orchestrator.handle(text("tg-200", "around three", 2)).await.expect("turn");
    assert!(again.degraded);
    assert!(again.reply.text.contains("What budget"));
    assert_eq!(again.reply.buttons.len(), 5);

    let budget = harness
        .orchestrator
        .handle(callback("tg-200", "slot:budget:3000000-5000000", 3))
        .await
        .expect("turn");
    assert!(!budget.degraded);
    assert!(callbacks(&budget).contains(&"slot:property_type:villa"));
    assert_eq!(budget.lead_id, first.lead_id);

    let failures = harness
        .audit
        .events()
        .into_iter()
        .filter(|event| event.event_type == "extraction.failed")
        .count();
    assert_eq!(failures, 2);
}

#[tokio::test]
async fn price_objection_is_countered_and_counted() {
    let harness = harness().await;

    let outcome = harness
        .orchestrator
        .handle(text("tg-300", "The price is too expensive for me", 0))
        .await
        .expect("turn");

    assert_eq!(outcome.state, ConversationState::ObjectionHandling);
    assert!(outcome.reply.text.contains("price matters"));
    assert!(outcome.reply.text.contains("What budget"));

    let lead = harness
        .leads
        .find_by_id(&TenantScope::new(acme()), &outcome.lead_id)
        .await
        .expect("load")
        .expect("stored");
    assert_eq!(lead.objections.price, 1);
    let conversations = harness.leads.conversations().await;
    assert_eq!(conversations[0].objection_count, 1);
}

#[tokio::test]
async fn a_slow_extractor_falls_back_to_buttons_within_the_turn() {
    let settings =
        OrchestratorSettings { turn_timeout: Duration::from_millis(200), ..Default::default() };
    let harness =
        harness_with(Arc::new(SlowExtractor(Duration::from_secs(5))), settings).await;

    let outcome = harness
        .orchestrator
        .handle(text("tg-410", "2 bedroom apartment in JVC", 0))
        .await
        .expect("a slow extractor must not fail the turn");

    assert!(outcome.degraded);
    assert!(outcome.reply.text.contains("didn't quite catch that"));
    assert_eq!(callbacks(&outcome), vec!["goal:buy", "goal:rent", "goal:invest"]);

    let conversations = harness.leads.conversations().await;
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].message_count, 1);
    let failure = harness
        .audit
        .events()
        .into_iter()
        .find(|event| event.event_type == "extraction.failed")
        .expect("timeout is audited as an extraction failure");
    assert!(failure.metadata.get("error").is_some_and(|error| error.contains("timed out")));
}

#[tokio::test]
async fn a_turn_that_times_out_persists_nothing() {
    let settings =
        OrchestratorSettings { turn_timeout: Duration::from_millis(50), ..Default::default() };
    let harness = harness_over(Arc::new(KeywordExtractor::new()), settings, |store| {
        Arc::new(StalledCommits(store)) as Arc<dyn LeadRepository>
    })
    .await;

    let error = harness
        .orchestrator
        .handle(text("tg-400", "2 bedroom apartment in JVC", 0))
        .await
        .expect_err("turn must time out");
    assert!(
        matches!(error, ApplicationError::ExternalService { service: "turn", .. }),
        "got {error:?}"
    );

    assert!(harness.leads.conversations().await.is_empty());
    let stored = harness
        .leads
        .find_by_external_user(&TenantScope::new(acme()), "tg-400")
        .await
        .expect("lookup");
    assert!(stored.is_none());
}

#[tokio::test]
async fn the_same_user_id_under_two_tenants_stays_separate() {
    let harness = harness().await;

    let acme_turn = harness.orchestrator.handle(text("shared-1", "/start", 0)).await.expect("turn");
    let globex_turn = harness
        .orchestrator
        .handle(InboundMessage::text(
            TenantId::new("globex-homes"),
            "shared-1",
            Channel::Telegram,
            "/start",
            at(1),
        ))
        .await
        .expect("turn");

    assert_ne!(acme_turn.lead_id, globex_turn.lead_id);
    assert!(globex_turn.reply.text.contains("Globex Homes"));
    assert!(globex_turn.reply.text.contains("Здравствуйте"));

    let leaked = harness
        .leads
        .find_by_id(&TenantScope::new(TenantId::new("globex-homes")), &acme_turn.lead_id)
        .await
        .expect("lookup");
    assert!(leaked.is_none());
}

#[tokio::test]
async fn unknown_tenants_and_disabled_channels_are_refused() {
    let harness = harness().await;

    let unknown = harness
        .orchestrator
        .handle(InboundMessage::text(
            TenantId::new("nobody"),
            "u-1",
            Channel::Telegram,
            "hi",
            at(0),
        ))
        .await;
    assert!(matches!(unknown, Err(ApplicationError::NotFound { .. })));

    let wrong_channel = harness
        .orchestrator
        .handle(InboundMessage::text(acme(), "u-1", Channel::Instagram, "hi", at(0)))
        .await;
    assert!(matches!(wrong_channel, Err(ApplicationError::NotFound { .. })));
}

#[tokio::test]
async fn a_second_channel_continues_the_same_lead() {
    let harness = harness().await;

    let telegram = harness
        .orchestrator
        .handle(text("user-500", "I want to buy a villa", 0))
        .await
        .expect("turn");
    let whatsapp = harness
        .orchestrator
        .handle(InboundMessage::text(
            acme(),
            "user-500",
            Channel::WhatsApp,
            "budget 3 million",
            at(5),
        ))
        .await
        .expect("turn");

    assert_eq!(telegram.lead_id, whatsapp.lead_id);
    assert_ne!(telegram.conversation_id, whatsapp.conversation_id);

    let lead = harness
        .leads
        .find_by_id(&TenantScope::new(acme()), &whatsapp.lead_id)
        .await
        .expect("load")
        .expect("stored");
    assert_eq!(lead.last_channel, Channel::WhatsApp);
    assert!(lead.budget.is_some());
    assert!(lead.property_type.is_some());
}

#[tokio::test]
async fn overlapping_turns_on_two_channels_keep_both_slot_updates() {
    let harness = harness_with(
        Arc::new(SlowExtractor(Duration::from_millis(50))),
        OrchestratorSettings::default(),
    )
    .await;
    let first = harness.orchestrator.handle(text("user-900", "hello", 0)).await.expect("turn");

    let (telegram, whatsapp) = tokio::join!(
        harness.orchestrator.handle(text("user-900", "I want to buy a villa", 1)),
        harness.orchestrator.handle(InboundMessage::text(
            acme(),
            "user-900",
            Channel::WhatsApp,
            "budget 3 million",
            at(1),
        )),
    );
    let telegram = telegram.expect("telegram turn");
    let whatsapp = whatsapp.expect("whatsapp turn");
    assert_eq!(telegram.lead_id, first.lead_id);
    assert_eq!(whatsapp.lead_id, first.lead_id);

    let lead = harness
        .leads
        .find_by_id(&TenantScope::new(acme()), &first.lead_id)
        .await
        .expect("load")
        .expect("stored");
    assert_eq!(lead.property_type, Some(PropertyType::Villa));
    assert!(lead.budget.is_some(), "budget from the other channel was overwritten");
    assert_eq!(lead.engagement.message_count, 3);
}

#[tokio::test]
async fn a_backdated_message_does_not_rewind_lead_activity() {
    let harness = harness().await;

    let recent = harness.orchestrator.handle(text("user-950", "hello", 30)).await.expect("turn");
    harness
        .orchestrator
        .handle(text("user-950", "I want to buy a villa", 2))
        .await
        .expect("backdated turn");

    let lead = harness
        .leads
        .find_by_id(&TenantScope::new(acme()), &recent.lead_id)
        .await
        .expect("load")
        .expect("stored");
    assert_eq!(lead.last_interaction_at, at(30));
    assert_eq!(lead.property_type, Some(PropertyType::Villa));
    assert_eq!(harness.leads.conversations().await[0].last_activity_at, at(30));
}

#[tokio::test]
async fn stop_then_restart_reopens_the_lead_in_a_new_session() {
    let harness = harness().await;

    let started = harness.orchestrator.handle(text("tg-600", "/start", 0)).await.expect("turn");
    assert_eq!(started.state, ConversationState::GoalSelection);

    let stopped = harness.orchestrator.handle(text("tg-600", "/stop", 1)).await.expect("turn");
    assert_eq!(stopped.state, ConversationState::Close);
    assert_eq!(stopped.lead_status, LeadStatus::Lost);
    assert!(stopped.reply.text.contains("won't message you again"));

    let restarted =
        harness.orchestrator.handle(text("tg-600", "/restart", 2)).await.expect("turn");
    assert_eq!(restarted.state, ConversationState::GoalSelection);
    assert_eq!(restarted.lead_status, LeadStatus::Qualifying);
    assert_eq!(restarted.lead_id, started.lead_id);
    assert_ne!(restarted.conversation_id, started.conversation_id);

    let conversations = harness.leads.conversations().await;
    assert_eq!(conversations.len(), 2);
    assert_eq!(conversations.iter().filter(|conversation| conversation.is_active()).count(), 1);
}

#[tokio::test]
async fn idle_sessions_are_archived_by_housekeeping() {
    let harness = harness().await;
    harness.orchestrator.handle(text("tg-700", "/start", 0)).await.expect("turn");

    let report = harness
        .orchestrator
        .housekeeping(at(0) + ChronoDuration::hours(73))
        .await
        .expect("housekeeping");
    assert_eq!(report.archived_conversations, 1);
    assert_eq!(report.evicted_contexts, 1);

    let next = harness
        .orchestrator
        .handle(text("tg-700", "hi again", 73 * 60 + 1))
        .await
        .expect("turn");
    let conversations = harness.leads.conversations().await;
    assert_eq!(conversations.len(), 2);
    assert_eq!(conversations[1].id, next.conversation_id);
}
