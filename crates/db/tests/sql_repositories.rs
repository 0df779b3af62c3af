use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use leadline_core::domain::conversation::{Channel, Conversation, ConversationKey, Language, MessageId};
use leadline_core::domain::inventory::InventoryQuery;
use leadline_core::domain::lead::{BudgetRange, GhostOutcome, Lead, LeadStatus, PropertyType};
use leadline_core::domain::tenant::{TenantId, TenantScope};
use leadline_core::flows::ConversationState;
use leadline_core::matching::{InventorySource, MatchStage, MatchingEngine};
use leadline_core::slots::{merge_slots, SlotPayload, ValidatedSlot};
use leadline_db::repositories::{
    ConversationRepository, GhostCursor, GhostRepository, LeadRepository, RepositoryError,
    SqlConversationRepository, SqlInventoryRepository, SqlLeadRepository,
};
use leadline_db::{connect_with_settings, migrations, DbPool, DemoSeedDataset, TurnCommit};

async fn setup_pool() -> DbPool {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
    migrations::run_pending(&pool).await.expect("run migrations");
    DemoSeedDataset::load(&pool).await.expect("seed demo data");
    pool
}

fn ts(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
}

fn acme() -> TenantScope {
    TenantScope::new(TenantId::new("acme-realty"))
}

fn first_turn(user: &str, at: DateTime<Utc>) -> TurnCommit {
    let tenant_id = TenantId::new("acme-realty");
    let mut lead = Lead::new(tenant_id.clone(), user, Channel::Telegram, Language::English, at);
    let message = MessageId(format!("msg-{user}-1"));
    let slots = vec![
        ValidatedSlot::new(
            SlotPayload::Budget(BudgetRange::up_to(Decimal::from(3_000_000))),
            0.9,
        ),
        ValidatedSlot::new(SlotPayload::PropertyType(PropertyType::Villa), 0.95),
        ValidatedSlot::new(SlotPayload::Location("Dubai Marina".to_string()), 0.85),
        ValidatedSlot::new(SlotPayload::Bedrooms(3), 0.9),
        ValidatedSlot::new(
            SlotPayload::Amenities(["pool".to_string(), "gym".to_string()].into_iter().collect()),
            0.8,
        ),
        ValidatedSlot::new(SlotPayload::Urgency(true), 0.7),
    ];
    let report = merge_slots(&mut lead, slots, &message, at);
    let key = ConversationKey::new(tenant_id, user, Channel::Telegram);
    let mut conversation = Conversation::start(key, lead.id.clone(), Language::English, at);
    conversation.current_state = ConversationState::PresentMatches;
    conversation.record_inbound(at);
    TurnCommit { archived: None, conversation, lead, slot_log: report.log }
}

#[tokio::test]
async fn committed_turn_round_trips_lead_conversation_and_slot_log() {
    let pool = setup_pool().await;
    let leads = SqlLeadRepository::new(pool.clone());
    let conversations = SqlConversationRepository::new(pool.clone());
    let turn = first_turn("tg-100", ts("2026-03-01T09:00:00Z"));

    leads.commit_turn(&acme(), turn.clone()).await.expect("commit turn");

    let stored = leads.find_by_id(&acme(), &turn.lead.id).await.expect("find lead").expect("lead");
    assert_eq!(stored, turn.lead);
    assert_eq!(stored.amenities, BTreeSet::from(["gym".to_string(), "pool".to_string()]));

    let by_user =
        leads.find_by_external_user(&acme(), "tg-100").await.expect("find by user").expect("lead");
    assert_eq!(by_user.id, turn.lead.id);

    let active = conversations
        .find_active(&acme(), &turn.conversation.key)
        .await
        .expect("find conversation")
        .expect("active conversation");
    assert_eq!(active, turn.conversation);

    let log = leads.slot_log(&acme(), &turn.lead.id).await.expect("slot log");
    assert_eq!(log.len(), 6);
    assert_eq!(log, turn.slot_log);

    pool.close().await;
}

#[tokio::test]
async fn failed_turn_leaves_no_partial_writes() {
    let pool = setup_pool().await;
    let leads = SqlLeadRepository::new(pool.clone());
    let conversations = SqlConversationRepository::new(pool.clone());

    let first = first_turn("tg-200", ts("2026-03-01T09:00:00Z"));
    leads.commit_turn(&acme(), first.clone()).await.expect("first turn");

    let mut clash = first_turn("tg-200", ts("2026-03-01T09:05:00Z"));
    clash.lead = first.lead.clone();
    clash.lead.urgency = false;
    clash.conversation.lead_id = first.lead.id.clone();
    let result = leads.commit_turn(&acme(), clash.clone()).await;
    assert!(matches!(result, Err(RepositoryError::Database(_))));

    let stored = leads.find_by_id(&acme(), &first.lead.id).await.expect("find").expect("lead");
    assert!(stored.urgency, "lead update must roll back with the failed conversation insert");
    assert_eq!(leads.slot_log(&acme(), &first.lead.id).await.expect("log").len(), 6);

    let mut archived = first.conversation.clone();
    archived.archive(ts("2026-03-05T09:00:00Z"));
    clash.archived = Some(archived);
    leads.commit_turn(&acme(), clash.clone()).await.expect("archive then restart");
    let active = conversations
        .find_active(&acme(), &first.conversation.key)
        .await
        .expect("find")
        .expect("active");
    assert_eq!(active.id, clash.conversation.id);

    pool.close().await;
}

#[tokio::test]
async fn reads_and_writes_never_cross_tenants() {
    let pool = setup_pool().await;
    let leads = SqlLeadRepository::new(pool.clone());
    let turn = first_turn("tg-300", ts("2026-03-01T09:00:00Z"));
    leads.commit_turn(&acme(), turn.clone()).await.expect("commit");

    let globex = TenantScope::new(TenantId::new("globex-homes"));
    assert_eq!(leads.find_by_id(&globex, &turn.lead.id).await.expect("find"), None);
    assert_eq!(leads.find_by_external_user(&globex, "tg-300").await.expect("find"), None);

    let error = leads.commit_turn(&globex, turn).await.expect_err("foreign commit");
    assert!(matches!(error, RepositoryError::TenantIsolation { .. }));

    pool.close().await;
}

#[tokio::test]
async fn ghost_selection_pages_and_marks_exactly_once() {
    let pool = setup_pool().await;
    let leads = SqlLeadRepository::new(pool.clone());
    let base = ts("2026-03-01T09:00:00Z");

    for (index, user) in ["wa-1", "wa-2", "wa-3"].into_iter().enumerate() {
        let mut turn = first_turn(user, base + Duration::minutes(index as i64));
        turn.lead.contact.phone = Some(format!("+97150000000{index}"));
        leads.commit_turn(&acme(), turn).await.expect("commit");
    }
    let mut silent = first_turn("wa-4", base);
    silent.lead.status = LeadStatus::Lost;
    silent.lead.contact.phone = Some("+971500000009".to_string());
    leads.commit_turn(&acme(), silent).await.expect("commit lost lead");

    let cutoff = base + Duration::days(2);
    let first_page = leads.select_candidates(cutoff, None, 2).await.expect("first page");
    assert_eq!(
        first_page.iter().map(|c| c.external_user_id.as_str()).collect::<Vec<_>>(),
        vec!["wa-1", "wa-2"]
    );
    let cursor = GhostCursor::after(&first_page[1]);
    let second_page = leads.select_candidates(cutoff, Some(&cursor), 2).await.expect("second page");
    assert_eq!(second_page.len(), 1);
    assert_eq!(second_page[0].external_user_id, "wa-3");

    let target = &first_page[0];
    let scope = TenantScope::new(target.tenant_id.clone());
    let at = cutoff + Duration::minutes(1);
    assert!(leads
        .mark_reminder(&scope, &target.lead_id, GhostOutcome::Delivered, at)
        .await
        .expect("first mark"));
    assert!(!leads
        .mark_reminder(&scope, &target.lead_id, GhostOutcome::RetriesExhausted, at)
        .await
        .expect("second mark"));

    let stored = leads.find_by_id(&scope, &target.lead_id).await.expect("find").expect("lead");
    assert!(stored.ghost_reminder_sent);
    assert_eq!(stored.ghost_reminder_outcome, Some(GhostOutcome::Delivered));

    let remaining = leads.select_candidates(cutoff, None, 10).await.expect("rescan");
    assert_eq!(remaining.len(), 2);

    pool.close().await;
}

#[tokio::test]
async fn inventory_source_applies_hard_filters() {
    let pool = setup_pool().await;
    let inventory = SqlInventoryRepository::new(pool.clone());

    let query = InventoryQuery {
        tenant_id: TenantId::new("acme-realty"),
        price_min: Decimal::from(2_000_000),
        price_max: Decimal::from(3_000_000),
        available_only: true,
    };
    let items = inventory.query(&query).await.expect("query");
    let ids: Vec<_> = items.iter().map(|item| item.id.0.as_str()).collect();
    assert_eq!(ids, vec!["acme-marina-villa-3"], "unavailable townhouse must be filtered");

    let turn = first_turn("tg-400", ts("2026-03-01T09:00:00Z"));
    let result = MatchingEngine::default().find_matches(&turn.lead, &inventory).await.expect("match");
    assert_eq!(result.stage, MatchStage::Exact);
    assert_eq!(result.items[0].item.id.0, "acme-marina-villa-3");
    assert!(result.items.iter().all(|ranked| ranked.item.tenant_id.as_str() == "acme-realty"));

    pool.close().await;
}

#[tokio::test]
async fn demo_seed_is_idempotent_and_verifiable() {
    let pool = setup_pool().await;
    DemoSeedDataset::load(&pool).await.expect("reseed");

    let verification = DemoSeedDataset::verify(&pool).await.expect("verify");
    assert!(verification.passed, "{:?}", verification.checks);
    assert_eq!(verification.checks.len(), 4);

    pool.close().await;
}
