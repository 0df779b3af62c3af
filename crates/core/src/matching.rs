//! Inventory ranking for qualified leads.
//!
//! Matching runs in stages. The exact budget band is tried first; an empty result
//! triggers exactly one widen by `widen_tolerance`; if that is still empty, the
//! closest listings inside the widened band are offered regardless of type and
//! bedroom count. Every stage keeps the hard filters: tenant, price band and
//! availability.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::inventory::{InventoryItem, InventoryQuery};
use crate::domain::lead::{Goal, Lead};
use crate::errors::ApplicationError;

const LOCATION_WEIGHT: f32 = 0.4;
const AMENITY_WEIGHT: f32 = 0.3;
const LIFESTYLE_WEIGHT: f32 = 0.3;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub max_results: usize,
    pub widen_tolerance: Decimal,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self { max_results: 5, widen_tolerance: Decimal::new(20, 2) }
    }
}

impl MatchingConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_results == 0 || self.max_results > 50 {
            return Err("matching.max_results must be in range 1..=50".to_string());
        }
        if self.widen_tolerance < Decimal::ZERO || self.widen_tolerance >= Decimal::ONE {
            return Err("matching.widen_tolerance must be in range 0..1".to_string());
        }
        Ok(())
    }
}

/// Read-only, tenant-scoped inventory lookup.
#[async_trait]
pub trait InventorySource: Send + Sync {
    async fn query(&self, query: &InventoryQuery) -> Result<Vec<InventoryItem>, ApplicationError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStage {
    Exact,
    Widened,
    ClosestAlternatives,
    Empty,
}

impl MatchStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Widened => "widened",
            Self::ClosestAlternatives => "closest_alternatives",
            Self::Empty => "empty",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankedItem {
    pub item: InventoryItem,
    pub score: f32,
    pub location_match: f32,
    pub amenity_overlap: f32,
    pub lifestyle_overlap: f32,
    pub price_distance: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub stage: MatchStage,
    pub items: Vec<RankedItem>,
    pub price_min: Decimal,
    pub price_max: Decimal,
}

impl MatchResult {
    fn empty(price_min: Decimal, price_max: Decimal) -> Self {
        Self { stage: MatchStage::Empty, items: Vec::new(), price_min, price_max }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MatchingEngine {
    config: MatchingConfig,
}

impl MatchingEngine {
    pub fn new(config: MatchingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    pub async fn find_matches<S>(
        &self,
        lead: &Lead,
        source: &S,
    ) -> Result<MatchResult, ApplicationError>
    where
        S: InventorySource + ?Sized,
    {
        let Some(budget) = lead.budget.as_ref() else {
            return Ok(MatchResult::empty(Decimal::ZERO, Decimal::ZERO));
        };
        let floor = budget.floor();

        let exact = self.band_query(lead, floor, budget.max);
        let candidates = fetch(source, &exact).await?;
        let matched = self.rank(lead, criteria_matches(lead, candidates), floor, budget.max);
        if !matched.is_empty() {
            return Ok(self.result(MatchStage::Exact, matched, &exact));
        }

        let tolerance = self.config.widen_tolerance;
        let widened = self.band_query(
            lead,
            (floor * (Decimal::ONE - tolerance)).round_dp(2),
            (budget.max * (Decimal::ONE + tolerance)).round_dp(2),
        );
        let candidates = fetch(source, &widened).await?;
        let matched = self.rank(lead, criteria_matches(lead, candidates.clone()), floor, budget.max);
        if !matched.is_empty() {
            return Ok(self.result(MatchStage::Widened, matched, &widened));
        }

        let alternatives = self.rank_by_distance(lead, candidates, floor, budget.max);
        if !alternatives.is_empty() {
            return Ok(self.result(MatchStage::ClosestAlternatives, alternatives, &widened));
        }

        Ok(MatchResult::empty(widened.price_min, widened.price_max))
    }

    fn band_query(&self, lead: &Lead, price_min: Decimal, price_max: Decimal) -> InventoryQuery {
        InventoryQuery { tenant_id: lead.tenant_id.clone(), price_min, price_max, available_only: true }
    }

    fn result(&self, stage: MatchStage, mut items: Vec<RankedItem>, query: &InventoryQuery) -> MatchResult {
        items.truncate(self.config.max_results);
        MatchResult { stage, items, price_min: query.price_min, price_max: query.price_max }
    }

    fn rank(
        &self,
        lead: &Lead,
        candidates: Vec<InventoryItem>,
        floor: Decimal,
        ceiling: Decimal,
    ) -> Vec<RankedItem> {
        let mut ranked = candidates
            .into_iter()
            .map(|item| score_item(lead, item, floor, ceiling))
            .collect::<Vec<_>>();
        ranked.sort_by(compare_by_score);
        ranked
    }

    fn rank_by_distance(
        &self,
        lead: &Lead,
        candidates: Vec<InventoryItem>,
        floor: Decimal,
        ceiling: Decimal,
    ) -> Vec<RankedItem> {
        let mut ranked = candidates
            .into_iter()
            .map(|item| score_item(lead, item, floor, ceiling))
            .collect::<Vec<_>>();
        ranked.sort_by(|left, right| {
            left.price_distance
                .cmp(&right.price_distance)
                .then_with(|| compare_by_score(left, right))
        });
        ranked
    }
}

async fn fetch<S>(source: &S, query: &InventoryQuery) -> Result<Vec<InventoryItem>, ApplicationError>
where
    S: InventorySource + ?Sized,
{
    let items = source.query(query).await?;
    Ok(items.into_iter().filter(|item| query.admits(item)).collect())
}

fn criteria_matches(lead: &Lead, candidates: Vec<InventoryItem>) -> Vec<InventoryItem> {
    candidates
        .into_iter()
        .filter(|item| lead.property_type.map_or(true, |wanted| item.property_type == wanted))
        .filter(|item| lead.bedrooms.map_or(true, |wanted| item.bedrooms >= wanted))
        .collect()
}

fn compare_by_score(left: &RankedItem, right: &RankedItem) -> Ordering {
    right
        .score
        .total_cmp(&left.score)
        .then_with(|| right.item.featured.cmp(&left.item.featured))
        .then_with(|| left.item.price.cmp(&right.item.price))
        .then_with(|| left.item.id.cmp(&right.item.id))
}

fn score_item(lead: &Lead, item: InventoryItem, floor: Decimal, ceiling: Decimal) -> RankedItem {
    let location_match = location_match(lead.location.as_deref(), &item.location);
    let amenity_overlap = overlap(&lead.amenities, &item.amenities);
    let lifestyle_overlap = overlap(&lifestyle_tags(lead), &item.lifestyle_tags);
    let score = LOCATION_WEIGHT * location_match
        + AMENITY_WEIGHT * amenity_overlap
        + LIFESTYLE_WEIGHT * lifestyle_overlap;
    let price_distance = if item.price < floor {
        floor - item.price
    } else if item.price > ceiling {
        item.price - ceiling
    } else {
        Decimal::ZERO
    };

    RankedItem { item, score, location_match, amenity_overlap, lifestyle_overlap, price_distance }
}

fn location_match(wanted: Option<&str>, actual: &str) -> f32 {
    let Some(wanted) = wanted else {
        return 0.0;
    };
    let wanted = wanted.trim().to_lowercase();
    let actual = actual.trim().to_lowercase();
    if wanted.is_empty() {
        return 0.0;
    }
    if wanted == actual || actual.contains(&wanted) || wanted.contains(&actual) {
        return 1.0;
    }

    let wanted_words = wanted.split_whitespace().collect::<BTreeSet<_>>();
    let actual_words = actual.split_whitespace().collect::<BTreeSet<_>>();
    if wanted_words.intersection(&actual_words).next().is_some() {
        0.5
    } else {
        0.0
    }
}

fn overlap(wanted: &BTreeSet<String>, offered: &BTreeSet<String>) -> f32 {
    if wanted.is_empty() {
        return 0.0;
    }
    let shared = wanted.intersection(offered).count();
    let ratio = Decimal::from(shared) / Decimal::from(wanted.len());
    ratio.to_f32().unwrap_or(0.0)
}

/// Lifestyle tags implied by the lead's amenities and goal.
pub fn lifestyle_tags(lead: &Lead) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    for amenity in &lead.amenities {
        let tag = match amenity.as_str() {
            "pool" | "gym" => "active",
            "playground" | "garden" => "family",
            "sea view" | "beach access" => "waterfront",
            "security" | "concierge" => "premium",
            _ => continue,
        };
        tags.insert(tag.to_string());
    }
    match lead.goal {
        Some(Goal::Invest) => {
            tags.insert("investment".to_string());
        }
        Some(Goal::Rent) | Some(Goal::Buy) => {
            tags.insert("residential".to_string());
        }
        None => {}
    }
    tags
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use crate::domain::conversation::{Channel, Language};
    use crate::domain::inventory::{InventoryItem, InventoryItemId, InventoryQuery};
    use crate::domain::lead::{BudgetRange, Lead, PropertyType};
    use crate::domain::tenant::TenantId;
    use crate::errors::ApplicationError;

    use super::{InventorySource, MatchStage, MatchingConfig, MatchingEngine};

    #[derive(Default)]
    struct RecordingSource {
        items: Vec<InventoryItem>,
        queries: Mutex<Vec<InventoryQuery>>,
    }

    impl RecordingSource {
        fn with(items: Vec<InventoryItem>) -> Self {
            Self { items, queries: Mutex::new(Vec::new()) }
        }

        fn queries(&self) -> Vec<InventoryQuery> {
            self.queries.lock().expect("query log").clone()
        }
    }

    #[async_trait]
    impl InventorySource for RecordingSource {
        async fn query(&self, query: &InventoryQuery) -> Result<Vec<InventoryItem>, ApplicationError> {
            self.queries.lock().expect("query log").push(query.clone());
            // Deliberately sloppy: returns everything so the engine's own filtering is exercised.
            Ok(self.items.clone())
        }
    }

    fn item(id: &str, tenant: &str, price: i64, property_type: PropertyType) -> InventoryItem {
        InventoryItem {
            id: InventoryItemId(id.to_string()),
            tenant_id: TenantId::new(tenant),
            title: format!("Listing {id}"),
            property_type,
            price: Decimal::from(price),
            location: "Dubai Marina".to_string(),
            bedrooms: 3,
            amenities: BTreeSet::new(),
            lifestyle_tags: BTreeSet::new(),
            availability: true,
            featured: false,
        }
    }

    fn lead(min: i64, max: i64) -> Lead {
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).single().expect("valid time");
        let mut lead =
            Lead::new(TenantId::new("acme-realty"), "wa-1", Channel::WhatsApp, Language::English, now);
        lead.budget = Some(BudgetRange::between(Decimal::from(min), Decimal::from(max)));
        lead.property_type = Some(PropertyType::Villa);
        lead.location = Some("Dubai Marina".to_string());
        lead
    }

    #[tokio::test]
    async fn exact_stage_enforces_tenant_availability_and_budget() {
        let mut unavailable = item("unavailable", "acme-realty", 2_500_000, PropertyType::Villa);
        unavailable.availability = false;
        let source = RecordingSource::with(vec![
            item("in-band", "acme-realty", 2_500_000, PropertyType::Villa),
            item("other-tenant", "globex-homes", 2_500_000, PropertyType::Villa),
            item("too-expensive", "acme-realty", 3_400_000, PropertyType::Villa),
            unavailable,
        ]);

        let result = MatchingEngine::default()
            .find_matches(&lead(2_000_000, 3_000_000), &source)
            .await
            .expect("match");

        assert_eq!(result.stage, MatchStage::Exact);
        let ids = result.items.iter().map(|ranked| ranked.item.id.0.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["in-band"]);
        assert_eq!(source.queries().len(), 1);
    }

    #[tokio::test]
    async fn widens_exactly_once_by_twenty_percent() {
        let source =
            RecordingSource::with(vec![item("stretch", "acme-realty", 3_400_000, PropertyType::Villa)]);

        let result = MatchingEngine::default()
            .find_matches(&lead(2_000_000, 3_000_000), &source)
            .await
            .expect("match");

        assert_eq!(result.stage, MatchStage::Widened);
        let queries = source.queries();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[1].price_min, Decimal::from(1_600_000));
        assert_eq!(queries[1].price_max, Decimal::from(3_600_000));
        assert_eq!(result.items[0].item.id.0, "stretch");
    }

    #[tokio::test]
    async fn no_match_after_widen_stops_without_further_queries() {
        let source =
            RecordingSource::with(vec![item("far-away", "acme-realty", 9_000_000, PropertyType::Villa)]);

        let result = MatchingEngine::default()
            .find_matches(&lead(2_000_000, 3_000_000), &source)
            .await
            .expect("match");

        assert_eq!(result.stage, MatchStage::Empty);
        assert!(result.is_empty());
        assert_eq!(source.queries().len(), 2);
    }

    #[tokio::test]
    async fn closest_alternatives_relax_property_type_within_widened_band() {
        let source = RecordingSource::with(vec![
            item("apartment-near", "acme-realty", 3_100_000, PropertyType::Apartment),
            item("apartment-nearer", "acme-realty", 1_900_000, PropertyType::Apartment),
            item("apartment-out", "acme-realty", 4_000_000, PropertyType::Apartment),
        ]);

        let result = MatchingEngine::default()
            .find_matches(&lead(2_000_000, 3_000_000), &source)
            .await
            .expect("match");

        assert_eq!(result.stage, MatchStage::ClosestAlternatives);
        let ids = result.items.iter().map(|ranked| ranked.item.id.0.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["apartment-nearer", "apartment-near"]);
        for ranked in &result.items {
            assert!(ranked.item.price >= Decimal::from(1_600_000));
            assert!(ranked.item.price <= Decimal::from(3_600_000));
        }
    }

    #[tokio::test]
    async fn ranking_uses_soft_score_then_featured_price_and_id() {
        let mut pool_villa = item("b-pool", "acme-realty", 2_800_000, PropertyType::Villa);
        pool_villa.amenities = ["pool".to_string()].into_iter().collect();
        let mut featured = item("c-featured", "acme-realty", 2_900_000, PropertyType::Villa);
        featured.featured = true;
        let cheaper = item("d-cheaper", "acme-realty", 2_100_000, PropertyType::Villa);
        let same_price = item("a-same", "acme-realty", 2_100_000, PropertyType::Villa);

        let mut lead = lead(2_000_000, 3_000_000);
        lead.amenities = ["pool".to_string()].into_iter().collect();
        let source = RecordingSource::with(vec![cheaper, featured, pool_villa, same_price]);

        let result = MatchingEngine::default().find_matches(&lead, &source).await.expect("match");

        let ids = result.items.iter().map(|ranked| ranked.item.id.0.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["b-pool", "c-featured", "a-same", "d-cheaper"]);
        assert!((result.items[0].score - 0.7).abs() < 1e-6);
    }

    #[tokio::test]
    async fn results_are_capped_and_missing_budget_is_empty() {
        let items = (0..8)
            .map(|index| item(&format!("v-{index}"), "acme-realty", 2_000_000 + index, PropertyType::Villa))
            .collect();
        let source = RecordingSource::with(items);
        let engine = MatchingEngine::new(MatchingConfig { max_results: 5, ..MatchingConfig::default() });

        let result = engine.find_matches(&lead(2_000_000, 3_000_000), &source).await.expect("match");
        assert_eq!(result.items.len(), 5);

        let mut no_budget = lead(0, 1);
        no_budget.budget = None;
        let empty = engine.find_matches(&no_budget, &source).await.expect("match");
        assert_eq!(empty.stage, MatchStage::Empty);
    }
}
