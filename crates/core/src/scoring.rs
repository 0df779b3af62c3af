use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::lead::{Lead, Temperature};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetBand {
    pub min_budget: Decimal,
    pub points: u8,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Ascending by `min_budget`; the highest band reached by `budget_max` applies.
    pub budget_bands: Vec<BudgetBand>,
    pub verified_phone_points: u8,
    pub consultation_points: u8,
    pub urgency_points: u8,
    pub voice_message_points: u8,
    pub media_points: u8,
    pub message_count_points: u8,
    pub message_count_threshold: u32,
    pub engagement_cap: u8,
    pub burning_threshold: u8,
    pub hot_threshold: u8,
    pub warm_threshold: u8,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let band = |min_budget: i64, points: u8| BudgetBand { min_budget: Decimal::from(min_budget), points };
        Self {
            budget_bands: vec![
                band(0, 10),
                band(1_000_000, 20),
                band(2_000_000, 30),
                band(3_000_000, 40),
                band(5_000_000, 50),
            ],
            verified_phone_points: 20,
            consultation_points: 30,
            urgency_points: 10,
            voice_message_points: 5,
            media_points: 5,
            message_count_points: 5,
            message_count_threshold: 5,
            engagement_cap: 10,
            burning_threshold: 80,
            hot_threshold: 60,
            warm_threshold: 40,
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.budget_bands.is_empty() {
            return Err("scoring.budget_bands must not be empty".to_string());
        }
        let ascending = self
            .budget_bands
            .windows(2)
            .all(|pair| pair[0].min_budget < pair[1].min_budget && pair[0].points <= pair[1].points);
        if !ascending {
            return Err("scoring.budget_bands must ascend in both min_budget and points".to_string());
        }
        if !(self.warm_threshold < self.hot_threshold && self.hot_threshold < self.burning_threshold)
        {
            return Err("scoring thresholds must satisfy warm < hot < burning".to_string());
        }
        if self.burning_threshold > 100 {
            return Err("scoring.burning_threshold must be at most 100".to_string());
        }
        Ok(())
    }

    pub fn temperature_for(&self, score: u8) -> Temperature {
        if score >= self.burning_threshold {
            Temperature::Burning
        } else if score >= self.hot_threshold {
            Temperature::Hot
        } else if score >= self.warm_threshold {
            Temperature::Warm
        } else {
            Temperature::Cold
        }
    }
}

/// Points per signal, kept for logs and the operator CLI.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub budget: u8,
    pub contact: u8,
    pub intent: u8,
    pub engagement: u8,
    pub urgency: u8,
    pub total: u8,
    pub temperature: Temperature,
}

#[derive(Clone, Debug, Default)]
pub struct LeadScorer {
    config: ScoringConfig,
}

impl LeadScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn score(&self, lead: &Lead) -> ScoreBreakdown {
        let config = &self.config;
        let budget = lead
            .budget_max()
            .and_then(|max| {
                config.budget_bands.iter().rev().find(|band| max >= band.min_budget)
            })
            .map(|band| band.points)
            .unwrap_or(0);
        let contact =
            if lead.contact.has_verified_phone() { config.verified_phone_points } else { 0 };
        let intent = if lead.consultation_requested { config.consultation_points } else { 0 };
        let urgency = if lead.urgency { config.urgency_points } else { 0 };

        let mut engagement = 0u8;
        if lead.engagement.voice_messages > 0 {
            engagement = engagement.saturating_add(config.voice_message_points);
        }
        if lead.engagement.media_shared > 0 {
            engagement = engagement.saturating_add(config.media_points);
        }
        if lead.engagement.message_count >= config.message_count_threshold {
            engagement = engagement.saturating_add(config.message_count_points);
        }
        let engagement = engagement.min(config.engagement_cap);

        let total = [budget, contact, intent, engagement, urgency]
            .into_iter()
            .fold(0u8, u8::saturating_add)
            .min(100);

        ScoreBreakdown {
            budget,
            contact,
            intent,
            engagement,
            urgency,
            total,
            temperature: config.temperature_for(total),
        }
    }

    /// Recomputes the derived fields on the lead in place.
    pub fn apply(&self, lead: &mut Lead) -> ScoreBreakdown {
        let breakdown = self.score(lead);
        lead.score = breakdown.total;
        lead.temperature = breakdown.temperature;
        breakdown
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use crate::domain::conversation::{Channel, Language};
    use crate::domain::lead::{BudgetRange, Lead, Temperature};
    use crate::domain::tenant::TenantId;

    use super::{LeadScorer, ScoringConfig};

    fn lead() -> Lead {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("valid time");
        Lead::new(TenantId::new("acme-realty"), "tg-1", Channel::Telegram, Language::English, now)
    }

    #[test]
    fn empty_lead_is_cold_with_zero_score() {
        let breakdown = LeadScorer::default().score(&lead());
        assert_eq!(breakdown.total, 0);
        assert_eq!(breakdown.temperature, Temperature::Cold);
    }

    #[test]
    fn top_budget_with_verified_phone_and_consultation_is_burning() {
        let mut lead = lead();
        lead.budget = Some(BudgetRange::up_to(Decimal::from(5_500_000)));
        lead.contact.phone = Some("+971501234567".to_string());
        lead.contact.phone_verified = true;
        lead.consultation_requested = true;

        let breakdown = LeadScorer::default().apply(&mut lead);

        assert_eq!(breakdown.budget, 50);
        assert_eq!(breakdown.total, 100);
        assert_eq!(lead.score, 100);
        assert_eq!(lead.temperature, Temperature::Burning);
    }

    #[test]
    fn budget_bands_follow_thresholds() {
        let scorer = LeadScorer::default();
        let mut lead = lead();
        for (amount, points) in
            [(500_000, 10), (1_000_000, 20), (2_500_000, 30), (3_000_000, 40), (9_000_000, 50)]
        {
            lead.budget = Some(BudgetRange::up_to(Decimal::from(amount)));
            assert_eq!(scorer.score(&lead).budget, points, "budget {amount}");
        }
    }

    #[test]
    fn unverified_phone_earns_no_contact_points() {
        let mut lead = lead();
        lead.contact.phone = Some("0501234567".to_string());
        assert_eq!(LeadScorer::default().score(&lead).contact, 0);
    }

    #[test]
    fn engagement_is_capped_at_ten() {
        let mut lead = lead();
        lead.engagement.voice_messages = 2;
        lead.engagement.media_shared = 1;
        lead.engagement.message_count = 12;

        let breakdown = LeadScorer::default().score(&lead);
        assert_eq!(breakdown.engagement, 10);
    }

    #[test]
    fn score_is_clamped_and_monotonic_under_positive_signals() {
        let scorer = LeadScorer::default();
        let mut lead = lead();
        let mut previous = scorer.score(&lead).total;

        let steps: Vec<Box<dyn Fn(&mut Lead)>> = vec![
            Box::new(|lead| lead.budget = Some(BudgetRange::up_to(Decimal::from(1_200_000)))),
            Box::new(|lead| lead.urgency = true),
            Box::new(|lead| lead.engagement.voice_messages = 1),
            Box::new(|lead| lead.budget = Some(BudgetRange::up_to(Decimal::from(7_000_000)))),
            Box::new(|lead| {
                lead.contact.phone = Some("+971501234567".to_string());
                lead.contact.phone_verified = true;
            }),
            Box::new(|lead| lead.consultation_requested = true),
            Box::new(|lead| lead.engagement.media_shared = 3),
        ];

        for step in steps {
            step(&mut lead);
            let current = scorer.score(&lead).total;
            assert!(current >= previous, "score dropped from {previous} to {current}");
            assert!(current <= 100);
            previous = current;
        }
        assert_eq!(previous, 100);
    }

    #[test]
    fn default_config_is_valid_and_inverted_thresholds_are_rejected() {
        assert!(ScoringConfig::default().validate().is_ok());

        let inverted = ScoringConfig { hot_threshold: 90, ..ScoringConfig::default() };
        assert!(inverted.validate().is_err());
    }
}
