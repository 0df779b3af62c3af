//! One conversational turn, start to finish.
//!
//! A turn resolves the tenant, loads (or starts) the session and the lead,
//! applies the inbound command, callback or free text, rescores the lead,
//! drives the qualification state machine and renders the reply. Nothing is
//! written until the very end, where conversation, lead and slot log commit
//! together. A turn that times out before that point leaves no trace.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tera::Context;
use tracing::{debug, info, warn};

use leadline_channels::commands::slot_callback;
use leadline_channels::{
    parse_intent, Button, CallbackAction, ChatCommand, InboundIntent, InboundMessage, MediaKind,
    Reply, ReplyBuilder,
};
use leadline_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use leadline_core::config::{ConversationConfig, ExtractionConfig};
use leadline_core::domain::conversation::{
    Conversation, ConversationId, ConversationKey, Language, MessageId,
};
use leadline_core::domain::lead::{Lead, LeadId, LeadStatus, PropertyType, Temperature};
use leadline_core::domain::tenant::{Tenant, TenantId, TenantScope};
use leadline_core::errors::ApplicationError;
use leadline_core::flows::{
    ConversationState, FlowAction, FlowContext, FlowEngine, FlowEvent, QualificationFlow,
};
use leadline_core::matching::{InventorySource, MatchResult, MatchStage, MatchingEngine};
use leadline_core::objections::ObjectionDetector;
use leadline_core::scoring::LeadScorer;
use leadline_core::slots::{
    merge_slots, next_missing_slot, normalize_phone, qualification_complete, rejection_log,
    validate_extraction, validate_slot, RawExtraction, RawSlot, SlotLogEntry, SlotName,
    SlotPayload, ValidatedSlot,
};
use leadline_db::repositories::{
    ConversationRepository, LeadRepository, TenantRepository, TurnCommit,
};

use crate::extraction::{ExtractionClient, ExtractionError, ExtractionRequest};
use crate::locks::KeyedLocks;
use crate::templates::ReplyTemplates;
use crate::tenancy::{ActiveContextCache, TenantResolver};

const BUDGET_BUTTONS: [(&str, &str); 5] = [
    ("Up to 1M", "0-1000000"),
    ("1M-2M", "1000000-2000000"),
    ("2M-3M", "2000000-3000000"),
    ("3M-5M", "3000000-5000000"),
    ("5M+", "5000000-20000000"),
];

const PROPERTY_BUTTONS: [PropertyType; 5] = [
    PropertyType::Apartment,
    PropertyType::Villa,
    PropertyType::Townhouse,
    PropertyType::Penthouse,
    PropertyType::Studio,
];

const AMENITY_BUTTONS: [(&str, &str); 4] = [
    ("label_pool", "pool"),
    ("label_gym", "gym"),
    ("label_parking", "parking"),
    ("label_sea_view", "sea view"),
];

const DEGRADED_FALLBACK: &str =
    "Sorry, something went wrong on our side. Please try again in a moment.";

#[derive(Clone, Debug, PartialEq)]
pub struct OrchestratorSettings {
    pub confidence_threshold: f32,
    pub turn_timeout: Duration,
    pub extraction_timeout: Duration,
    pub session_ttl: chrono::Duration,
    pub context_cache_ttl: chrono::Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.6,
            turn_timeout: Duration::from_secs(10),
            extraction_timeout: Duration::from_secs(3),
            session_ttl: chrono::Duration::hours(72),
            context_cache_ttl: chrono::Duration::minutes(15),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &ConversationConfig, extraction: &ExtractionConfig) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            turn_timeout: Duration::from_millis(config.turn_timeout_ms),
            extraction_timeout: Duration::from_millis(extraction.timeout_ms),
            session_ttl: seconds(config.session_ttl_secs),
            context_cache_ttl: seconds(config.context_cache_ttl_secs),
        }
    }

    /// Time one extraction call may take. Capped at three quarters of the
    /// turn so the button fallback still has time to render and commit.
    pub fn extraction_budget(&self) -> Duration {
        self.extraction_timeout.min(self.turn_timeout.saturating_mul(3) / 4)
    }
}

fn seconds(value: u64) -> chrono::Duration {
    i64::try_from(value)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or_else(|| chrono::Duration::days(365))
}

/// Collaborators the orchestrator is wired from.
pub struct OrchestratorParts {
    pub tenants: Arc<dyn TenantRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub leads: Arc<dyn LeadRepository>,
    pub inventory: Arc<dyn InventorySource>,
    pub extractor: Arc<dyn ExtractionClient>,
    pub audit: Arc<dyn AuditSink>,
    pub templates: Arc<ReplyTemplates>,
    pub scorer: LeadScorer,
    pub matching: MatchingEngine,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TurnOutcome {
    pub reply: Reply,
    pub lead_id: LeadId,
    pub conversation_id: ConversationId,
    pub state: ConversationState,
    pub lead_status: LeadStatus,
    pub score: u8,
    pub temperature: Temperature,
    /// Extraction failed and the reply fell back to buttons.
    pub degraded: bool,
    pub match_stage: Option<MatchStage>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HousekeepingReport {
    pub archived_conversations: u64,
    pub evicted_contexts: usize,
    pub pruned_locks: usize,
}

pub struct Orchestrator {
    resolver: TenantResolver,
    conversations: Arc<dyn ConversationRepository>,
    leads: Arc<dyn LeadRepository>,
    inventory: Arc<dyn InventorySource>,
    extractor: Arc<dyn ExtractionClient>,
    audit: Arc<dyn AuditSink>,
    templates: Arc<ReplyTemplates>,
    scorer: LeadScorer,
    matching: MatchingEngine,
    flow: FlowEngine<QualificationFlow>,
    locks: KeyedLocks<ConversationKey>,
    lead_locks: KeyedLocks<(TenantId, String)>,
    contexts: ActiveContextCache,
    settings: OrchestratorSettings,
}

/// Working copy of everything a turn may change.
struct TurnDraft {
    key: ConversationKey,
    lead: Lead,
    conversation: Conversation,
    archived: Option<Conversation>,
    slot_log: Vec<SlotLogEntry>,
    fresh: bool,
    degraded: bool,
    from_callback: bool,
    stopped: bool,
    notices: Vec<&'static str>,
    match_stage: Option<MatchStage>,
}

impl Orchestrator {
    pub fn new(parts: OrchestratorParts, settings: OrchestratorSettings) -> Self {
        Self {
            resolver: TenantResolver::new(parts.tenants),
            conversations: parts.conversations,
            leads: parts.leads,
            inventory: parts.inventory,
            extractor: parts.extractor,
            audit: parts.audit,
            templates: parts.templates,
            scorer: parts.scorer,
            matching: parts.matching,
            flow: FlowEngine::default(),
            locks: KeyedLocks::new(),
            lead_locks: KeyedLocks::new(),
            contexts: ActiveContextCache::new(settings.context_cache_ttl),
            settings,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Runs one turn. Turns for the same conversation key run one at a time in
    /// arrival order, and so do turns for the same lead arriving on different
    /// channels. The turn itself is bounded by `turn_timeout`.
    pub async fn handle(&self, message: InboundMessage) -> Result<TurnOutcome, ApplicationError> {
        let key = message.key();
        let _turn = self.locks.acquire(&key).await;
        // Every turn rewrites the whole lead row. Always taken after the conversation lock.
        let _lead =
            self.lead_locks.acquire(&(key.tenant_id.clone(), key.external_user_id.clone())).await;
        let budget = self.settings.turn_timeout;

        match tokio::time::timeout(budget, self.run_turn(&message)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    event_name = "agent.turn.timed_out",
                    tenant_id = %message.tenant_id,
                    external_user_id = %message.external_user_id,
                    channel = %message.channel,
                    timeout_ms = budget.as_millis() as u64,
                    "turn exceeded its time budget; nothing was persisted"
                );
                Err(ApplicationError::external(
                    "turn",
                    format!("turn exceeded {} ms", budget.as_millis()),
                ))
            }
        }
    }

    /// Generic "please try again" text for turns that failed.
    pub fn degraded_reply(&self, language: Language) -> Reply {
        match self.templates.text(language, "degraded") {
            Ok(text) => Reply::text(text),
            Err(error) => {
                warn!(event_name = "agent.templates.degraded_missing", error = %error);
                Reply::text(DEGRADED_FALLBACK)
            }
        }
    }

    /// Archives idle sessions and drops expired cache entries and unused locks.
    pub async fn housekeeping(
        &self,
        now: DateTime<Utc>,
    ) -> Result<HousekeepingReport, ApplicationError> {
        let archived_conversations =
            self.conversations.archive_idle(now - self.settings.session_ttl, now).await?;
        let report = HousekeepingReport {
            archived_conversations,
            evicted_contexts: self.contexts.evict_expired(now).await,
            pruned_locks: self.locks.prune() + self.lead_locks.prune(),
        };
        debug!(
            event_name = "agent.housekeeping.completed",
            archived = report.archived_conversations,
            evicted = report.evicted_contexts,
            pruned = report.pruned_locks,
        );
        Ok(report)
    }

    async fn run_turn(&self, message: &InboundMessage) -> Result<TurnOutcome, ApplicationError> {
        let now = message.received_at;
        let tenant = self.resolver.resolve(&message.tenant_id, message.channel).await?;
        let scope = TenantScope::new(tenant.id.clone());
        let source = message.message_id();
        let mut draft = self.load_draft(&tenant, &scope, message, now).await?;

        let audit = AuditContext::new(
            tenant.id.clone(),
            Some(draft.lead.id.clone()),
            Some(draft.conversation.id.0.clone()),
            source.0.clone(),
            "orchestrator",
        );

        let event = match parse_intent(message) {
            InboundIntent::Command(command) => {
                self.apply_command(&mut draft, command, &source, now)
            }
            InboundIntent::Callback(action) => {
                draft.from_callback = true;
                self.apply_callback(&mut draft, action, &source, now)
            }
            InboundIntent::FreeText(text) => {
                self.apply_free_text(&mut draft, &tenant, &text, &source, now, &audit).await
            }
            InboundIntent::MediaOnly | InboundIntent::Empty
                if draft.conversation.current_state == ConversationState::Greeting =>
            {
                Some(FlowEvent::ConversationStarted)
            }
            InboundIntent::MediaOnly => None,
            InboundIntent::Unrecognized(raw) => {
                debug!(event_name = "agent.turn.unrecognized_input", input = %raw);
                draft.notices.push("help");
                None
            }
            InboundIntent::Empty => {
                draft.notices.push("help");
                None
            }
        };

        let threshold = self.settings.confidence_threshold;
        draft.lead.advance_to(LeadStatus::Qualifying);
        if qualification_complete(&draft.lead, threshold) {
            draft.lead.advance_to(LeadStatus::Qualified);
        }
        let breakdown = self.scorer.apply(&mut draft.lead);
        debug!(
            event_name = "agent.turn.scored",
            lead_id = %draft.lead.id,
            budget = breakdown.budget,
            contact = breakdown.contact,
            intent = breakdown.intent,
            engagement = breakdown.engagement,
            urgency = breakdown.urgency,
            total = breakdown.total,
            temperature = breakdown.temperature.as_str(),
        );

        let language = draft.conversation.language;
        let mut composer = Composer::new(&self.templates, language, &tenant, &draft.lead);
        for notice in std::mem::take(&mut draft.notices) {
            composer.say(notice)?;
        }

        let mut next_state = None;
        let mut re_ask = event.is_none() && composer.is_empty();
        if let Some(event) = event {
            let context = self.flow_context(&draft.lead);
            match self.flow.apply_with_audit(
                &draft.conversation.current_state,
                &event,
                &context,
                self.audit.as_ref(),
                &audit,
            ) {
                Ok(outcome) => {
                    next_state = Some(outcome.to);
                    for action in outcome.actions {
                        self.perform(action, &mut draft, &mut composer, &tenant, now).await?;
                    }
                }
                Err(error) => {
                    debug!(
                        event_name = "agent.turn.transition_rejected",
                        lead_id = %draft.lead.id,
                        error = %error,
                    );
                    re_ask = true;
                }
            }
        }
        if re_ask || composer.is_empty() {
            let buttons = draft.degraded || draft.from_callback;
            self.follow_up(&mut composer, &draft.lead, buttons)?;
        }
        if let Some(state) = next_state {
            draft.conversation.current_state = state;
        }

        let reply = composer.finish();
        self.commit(&scope, &mut draft, message, &audit, now).await?;

        info!(
            event_name = "agent.turn.completed",
            correlation_id = %source.0,
            tenant_id = %tenant.id,
            external_user_id = %message.external_user_id,
            lead_id = %draft.lead.id,
            state = draft.conversation.current_state.as_str(),
            lead_status = draft.lead.status.as_str(),
            score = draft.lead.score,
            degraded = draft.degraded,
            "turn committed"
        );

        Ok(TurnOutcome {
            reply,
            lead_id: draft.lead.id,
            conversation_id: draft.conversation.id,
            state: draft.conversation.current_state,
            lead_status: draft.lead.status,
            score: draft.lead.score,
            temperature: draft.lead.temperature,
            degraded: draft.degraded,
            match_stage: draft.match_stage,
        })
    }

    async fn load_draft(
        &self,
        tenant: &Tenant,
        scope: &TenantScope,
        message: &InboundMessage,
        now: DateTime<Utc>,
    ) -> Result<TurnDraft, ApplicationError> {
        let key = message.key();
        let mut archived = None;
        let active = match self.conversations.find_active(scope, &key).await? {
            Some(mut stale) if stale.is_stale(now, self.settings.session_ttl) => {
                debug!(
                    event_name = "agent.session.expired",
                    conversation_id = %stale.id.0,
                    "inactive session archived; starting a new one"
                );
                stale.archive(now);
                archived = Some(stale);
                None
            }
            other => other,
        };

        let mut lead = match &active {
            Some(conversation) => self.leads.find_by_id(scope, &conversation.lead_id).await?,
            None => None,
        };
        if lead.is_none() {
            if let Some(context) =
                self.contexts.get(&tenant.id, &message.external_user_id, now).await
            {
                lead = self.leads.find_by_id(scope, &context.lead_id).await?;
            }
        }
        if lead.is_none() {
            lead = self.leads.find_by_external_user(scope, &message.external_user_id).await?;
        }

        let language = message
            .language_hint
            .or_else(|| active.as_ref().map(|conversation| conversation.language))
            .or_else(|| lead.as_ref().map(|lead| lead.language))
            .unwrap_or(tenant.default_language);

        let mut lead = lead.unwrap_or_else(|| {
            Lead::new(
                tenant.id.clone(),
                message.external_user_id.clone(),
                message.channel,
                language,
                now,
            )
        });
        lead.language = language;
        lead.last_channel = message.channel;
        // A late or backdated delivery never moves activity backwards.
        lead.last_interaction_at = lead.last_interaction_at.max(now);
        lead.updated_at = lead.updated_at.max(now);
        lead.engagement.message_count = lead.engagement.message_count.saturating_add(1);
        match message.media.as_ref().map(|media| media.kind) {
            Some(MediaKind::Voice) => {
                lead.engagement.voice_messages = lead.engagement.voice_messages.saturating_add(1)
            }
            Some(MediaKind::Image | MediaKind::Video) => {
                lead.engagement.media_shared = lead.engagement.media_shared.saturating_add(1)
            }
            Some(MediaKind::Document) | None => {}
        }

        let fresh = active.is_none();
        let mut conversation = active
            .unwrap_or_else(|| Conversation::start(key.clone(), lead.id.clone(), language, now));
        conversation.language = language;
        conversation.record_inbound(now);

        Ok(TurnDraft {
            key,
            lead,
            conversation,
            archived,
            slot_log: Vec::new(),
            fresh,
            degraded: false,
            from_callback: false,
            stopped: false,
            notices: Vec::new(),
            match_stage: None,
        })
    }

    fn apply_command(
        &self,
        draft: &mut TurnDraft,
        command: ChatCommand,
        source: &MessageId,
        now: DateTime<Utc>,
    ) -> Option<FlowEvent> {
        match command {
            ChatCommand::Start { deep_link: Some(link) } => {
                let mut slots = vec![ValidatedSlot::certain(SlotPayload::Goal(link.goal))];
                if let Some(property_type) = link.property_type {
                    slots.push(ValidatedSlot::certain(SlotPayload::PropertyType(property_type)));
                }
                self.merge(draft, slots, source, now);
                Some(FlowEvent::GoalSelected)
            }
            ChatCommand::Start { deep_link: None }
                if draft.fresh
                    || draft.conversation.current_state == ConversationState::Greeting =>
            {
                Some(FlowEvent::ConversationStarted)
            }
            ChatCommand::Start { deep_link: None } | ChatCommand::Restart => {
                Some(FlowEvent::RestartRequested)
            }
            ChatCommand::Stop => Some(FlowEvent::StopRequested),
            ChatCommand::Help => {
                draft.notices.push("help");
                None
            }
        }
    }

    fn apply_callback(
        &self,
        draft: &mut TurnDraft,
        action: CallbackAction,
        source: &MessageId,
        now: DateTime<Utc>,
    ) -> Option<FlowEvent> {
        match action {
            CallbackAction::Slot { slot, value } => {
                let raw = RawSlot { value: Value::String(value), confidence: 1.0 };
                match validate_slot(slot.as_str(), &raw) {
                    Ok(validated) => {
                        self.merge(draft, vec![validated], source, now);
                        Some(if slot == SlotName::Goal {
                            FlowEvent::GoalSelected
                        } else {
                            FlowEvent::SlotsUpdated
                        })
                    }
                    Err(error) => {
                        warn!(
                            event_name = "agent.callback.invalid_value",
                            lead_id = %draft.lead.id,
                            slot = slot.as_str(),
                            error = %error,
                        );
                        let raw = RawExtraction::from([(slot.as_str().to_string(), raw)]);
                        let log = rejection_log(&draft.lead, &[error], &raw, source, now);
                        draft.slot_log.extend(log);
                        None
                    }
                }
            }
            CallbackAction::Goal(goal) => {
                let slot = ValidatedSlot::certain(SlotPayload::Goal(goal));
                self.merge(draft, vec![slot], source, now);
                Some(FlowEvent::GoalSelected)
            }
            CallbackAction::Consult => {
                let slot = ValidatedSlot::certain(SlotPayload::Consultation(true));
                self.merge(draft, vec![slot], source, now);
                Some(FlowEvent::ConsultationRequested)
            }
            CallbackAction::Contact { phone } => {
                let Some((number, _)) = normalize_phone(&phone) else {
                    warn!(
                        event_name = "agent.callback.invalid_contact",
                        lead_id = %draft.lead.id,
                        "shared contact is not a phone number"
                    );
                    draft.notices.push("help");
                    return None;
                };
                // Shared through the platform's contact button, so the number is the user's own.
                let slot = ValidatedSlot::certain(SlotPayload::Phone { number, verified: true });
                self.merge(draft, vec![slot], source, now);
                draft.notices.push("contact_received");
                (draft.conversation.current_state != ConversationState::Close)
                    .then_some(FlowEvent::SlotsUpdated)
            }
            CallbackAction::MoreMatches => Some(FlowEvent::MoreMatchesRequested),
        }
    }

    async fn apply_free_text(
        &self,
        draft: &mut TurnDraft,
        tenant: &Tenant,
        text: &str,
        source: &MessageId,
        now: DateTime<Utc>,
        audit: &AuditContext,
    ) -> Option<FlowEvent> {
        let objection = ObjectionDetector::new(tenant.objection_taxonomy()).detect(text);

        let request = ExtractionRequest::all_slots(text, draft.conversation.language);
        let mut applied = Vec::new();
        let budget = self.settings.extraction_budget();
        let extracted = match tokio::time::timeout(budget, self.extractor.extract(&request)).await
        {
            Ok(result) => result,
            Err(_) => Err(ExtractionError::Timeout(budget.as_millis() as u64)),
        };
        match extracted {
            Ok(raw) => {
                let report = validate_extraction(&raw);
                for error in &report.rejected {
                    warn!(
                        event_name = "agent.extraction.field_rejected",
                        lead_id = %draft.lead.id,
                        error = %error,
                    );
                    self.audit.emit(
                        audit
                            .event(
                                "slots.field_discarded",
                                AuditCategory::Slots,
                                AuditOutcome::Rejected,
                            )
                            .with_metadata("error", error.to_string()),
                    );
                }
                let log = rejection_log(&draft.lead, &report.rejected, &raw, source, now);
                draft.slot_log.extend(log);
                applied = self.merge(draft, report.accepted, source, now);
            }
            Err(error) => {
                warn!(
                    event_name = "agent.extraction.degraded",
                    extractor = self.extractor.name(),
                    lead_id = %draft.lead.id,
                    error = %error,
                    "extraction failed; falling back to buttons for this turn"
                );
                draft.degraded = true;
                draft.notices.push("extraction_fallback");
                self.audit.emit(
                    audit
                        .event("extraction.failed", AuditCategory::Slots, AuditOutcome::Failed)
                        .with_metadata("extractor", self.extractor.name())
                        .with_metadata("error", error.to_string()),
                );
            }
        }

        if let Some(found) = objection {
            debug!(
                event_name = "agent.objection.detected",
                lead_id = %draft.lead.id,
                kind = found.kind.as_str(),
                keywords = ?found.keywords,
            );
            draft.lead.objections.increment(found.kind);
            let conversation = &mut draft.conversation;
            conversation.objection_count = conversation.objection_count.saturating_add(1);
            return Some(FlowEvent::ObjectionRaised(found.kind));
        }
        if applied.contains(&SlotName::Consultation) && draft.lead.consultation_requested {
            return Some(FlowEvent::ConsultationRequested);
        }
        if applied.contains(&SlotName::Goal) {
            return Some(FlowEvent::GoalSelected);
        }
        Some(FlowEvent::SlotsUpdated)
    }

    fn merge(
        &self,
        draft: &mut TurnDraft,
        slots: Vec<ValidatedSlot>,
        source: &MessageId,
        now: DateTime<Utc>,
    ) -> Vec<SlotName> {
        let report = merge_slots(&mut draft.lead, slots, source, now);
        for entry in &report.log {
            debug!(
                event_name = "agent.slot.written",
                lead_id = %draft.lead.id,
                slot = %entry.slot,
                outcome = entry.outcome.as_str(),
                confidence = entry.confidence,
            );
        }
        draft.slot_log.extend(report.log);
        report.applied
    }

    fn flow_context(&self, lead: &Lead) -> FlowContext {
        let threshold = self.settings.confidence_threshold;
        FlowContext {
            qualification_complete: qualification_complete(lead, threshold),
            next_missing_slot: next_missing_slot(lead, threshold),
            goal_known: lead.goal.is_some(),
            contact_known: lead.contact.is_present(),
        }
    }

    async fn perform(
        &self,
        action: FlowAction,
        draft: &mut TurnDraft,
        composer: &mut Composer<'_>,
        tenant: &Tenant,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        match action {
            FlowAction::ResetSession => {
                if draft.lead.status == LeadStatus::Lost {
                    draft.lead.reopen()?;
                }
                if !draft.fresh {
                    let mut previous = draft.conversation.clone();
                    previous.archive(now);
                    draft.archived = Some(previous);
                }
                let mut restarted = Conversation::start(
                    draft.key.clone(),
                    draft.lead.id.clone(),
                    draft.conversation.language,
                    now,
                );
                restarted.record_inbound(now);
                draft.conversation = restarted;
                draft.fresh = true;
            }
            FlowAction::SendGreeting => composer.say("greeting")?,
            FlowAction::PromptGoal => {
                composer.say("goal_prompt")?;
                let goals =
                    [("label_buy", "buy"), ("label_rent", "rent"), ("label_invest", "invest")];
                for (label, goal) in goals {
                    let label = composer.label(label)?;
                    composer.button(label, format!("goal:{goal}"));
                }
            }
            FlowAction::AskSlot(slot) => {
                let buttons = draft.degraded || draft.from_callback;
                self.ask_slot(composer, slot, buttons)?;
            }
            FlowAction::CounterObjection(kind) => {
                composer.say(&format!("objection_{}", kind.as_str()))?;
            }
            FlowAction::PresentMatches => {
                draft.lead.advance_to(LeadStatus::Qualified);
                let result =
                    self.matching.find_matches(&draft.lead, self.inventory.as_ref()).await?;
                info!(
                    event_name = "agent.matching.completed",
                    lead_id = %draft.lead.id,
                    stage = result.stage.as_str(),
                    results = result.items.len(),
                );
                self.render_matches(composer, tenant, &result)?;
                if !result.is_empty() {
                    draft.lead.advance_to(LeadStatus::MatchesPresented);
                    let more = composer.label("label_more")?;
                    composer.button(more, "matches:more".to_string());
                }
                let consult = composer.label("label_consult")?;
                composer.button(consult, "consult:request".to_string());
                draft.match_stage = Some(result.stage);
            }
            FlowAction::OfferConsultation => {
                composer.say("offer_consultation")?;
                let consult = composer.label("label_consult")?;
                composer.button(consult, "consult:request".to_string());
            }
            FlowAction::ConfirmConsultation => {
                draft.lead.advance_to(LeadStatus::ConsultationRequested);
                composer.say("consultation_confirmed")?;
            }
            FlowAction::RequestContact => composer.say("request_contact")?,
            FlowAction::MarkLeadLost => {
                if !draft.lead.status.is_terminal() {
                    draft.lead.transition_to(LeadStatus::Lost)?;
                }
                draft.stopped = true;
                composer.say("stopped")?;
            }
        }
        Ok(())
    }

    /// The next question, or the consultation offer once nothing is missing.
    fn follow_up(
        &self,
        composer: &mut Composer<'_>,
        lead: &Lead,
        buttons: bool,
    ) -> Result<(), ApplicationError> {
        match next_missing_slot(lead, self.settings.confidence_threshold) {
            Some(slot) => self.ask_slot(composer, slot, buttons),
            None => {
                composer.say("offer_consultation")?;
                let consult = composer.label("label_consult")?;
                composer.button(consult, "consult:request".to_string());
                Ok(())
            }
        }
    }

    fn ask_slot(
        &self,
        composer: &mut Composer<'_>,
        slot: SlotName,
        buttons: bool,
    ) -> Result<(), ApplicationError> {
        composer.say(&format!("ask_{}", slot.as_str()))?;
        if !buttons {
            return Ok(());
        }
        match slot {
            SlotName::Budget => {
                for (label, range) in BUDGET_BUTTONS {
                    composer.button(label.to_string(), slot_callback(slot, range));
                }
            }
            SlotName::PropertyType => {
                for property_type in PROPERTY_BUTTONS {
                    let label = composer.label(&format!("label_{}", property_type.as_str()))?;
                    composer.button(label, slot_callback(slot, property_type.as_str()));
                }
            }
            SlotName::Bedrooms => {
                let studio = composer.label("label_studio")?;
                composer.button(studio, slot_callback(slot, "studio"));
                for count in ["1", "2", "3", "4", "5+"] {
                    composer.button(count.to_string(), slot_callback(slot, count));
                }
            }
            SlotName::Amenities => {
                for (label, amenity) in AMENITY_BUTTONS {
                    let label = composer.label(label)?;
                    composer.button(label, slot_callback(slot, amenity));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn render_matches(
        &self,
        composer: &mut Composer<'_>,
        tenant: &Tenant,
        result: &MatchResult,
    ) -> Result<(), ApplicationError> {
        let header = match result.stage {
            MatchStage::Exact => "matches_exact",
            MatchStage::Widened => "matches_widened",
            MatchStage::ClosestAlternatives => "matches_closest",
            MatchStage::Empty => "matches_none",
        };
        let mut context = Context::new();
        context.insert("count", &result.items.len());
        composer.say_with(header, context)?;

        let mut lines = Vec::with_capacity(result.items.len());
        for (index, ranked) in result.items.iter().enumerate() {
            let item = &ranked.item;
            let mut context = Context::new();
            context.insert("index", &(index + 1));
            context.insert("title", &item.title);
            context.insert("currency", &tenant.currency);
            context.insert("price", &item.price.normalize().to_string());
            context.insert("location", &item.location);
            context.insert("bedrooms", &item.bedrooms);
            lines.push(composer.render("match_item", context)?);
        }
        if !lines.is_empty() {
            composer.push(lines.join("\n"));
        }
        Ok(())
    }

    async fn commit(
        &self,
        scope: &TenantScope,
        draft: &mut TurnDraft,
        message: &InboundMessage,
        audit: &AuditContext,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        let turn = TurnCommit {
            archived: draft.archived.clone(),
            conversation: draft.conversation.clone(),
            lead: draft.lead.clone(),
            slot_log: std::mem::take(&mut draft.slot_log),
        };
        let written = turn.slot_log.len();
        if let Err(error) = self.leads.commit_turn(scope, turn).await {
            self.audit.emit(
                audit
                    .event("turn.commit_failed", AuditCategory::Persistence, AuditOutcome::Failed)
                    .with_metadata("error", error.to_string()),
            );
            return Err(error.into());
        }
        self.audit.emit(
            audit
                .event("turn.committed", AuditCategory::Persistence, AuditOutcome::Success)
                .with_metadata("state", draft.conversation.current_state.as_str())
                .with_metadata("slot_log_entries", written.to_string()),
        );

        if draft.stopped {
            self.contexts.forget(&message.tenant_id, &message.external_user_id).await;
        } else {
            self.contexts
                .remember(
                    &message.tenant_id,
                    &message.external_user_id,
                    draft.lead.id.clone(),
                    draft.conversation.id.clone(),
                    message.channel,
                    draft.conversation.language,
                    draft.conversation.current_state,
                    now,
                )
                .await;
        }
        Ok(())
    }
}

/// Renders localized paragraphs and buttons into one reply.
struct Composer<'a> {
    templates: &'a ReplyTemplates,
    language: Language,
    base: Context,
    reply: ReplyBuilder,
}

impl<'a> Composer<'a> {
    fn new(
        templates: &'a ReplyTemplates,
        language: Language,
        tenant: &Tenant,
        lead: &Lead,
    ) -> Self {
        let mut base = Context::new();
        base.insert("agency", &tenant.display_name);
        base.insert("currency", &tenant.currency);
        base.insert("name", &lead.contact.name);
        Self { templates, language, base, reply: ReplyBuilder::new() }
    }

    fn render(&self, name: &str, extra: Context) -> Result<String, ApplicationError> {
        let mut context = self.base.clone();
        context.extend(extra);
        Ok(self.templates.render(self.language, name, &context)?)
    }

    fn say(&mut self, name: &str) -> Result<(), ApplicationError> {
        self.say_with(name, Context::new())
    }

    fn say_with(&mut self, name: &str, extra: Context) -> Result<(), ApplicationError> {
        let text = self.render(name, extra)?;
        self.push(text);
        Ok(())
    }

    fn push(&mut self, text: String) {
        self.reply.push_paragraph(text);
    }

    fn label(&self, name: &str) -> Result<String, ApplicationError> {
        Ok(self.templates.text(self.language, name)?)
    }

    fn button(&mut self, label: String, callback: String) {
        self.reply.push_button(Button::new(label, callback));
    }

    fn is_empty(&self) -> bool {
        self.reply.is_empty()
    }

    fn finish(self) -> Reply {
        self.reply.build()
    }
}
