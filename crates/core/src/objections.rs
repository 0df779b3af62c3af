//! Keyword taxonomy for buyer objections. Detection runs before generic
//! handling so that a hesitant buyer gets a counter-argument, not a re-ask.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectionKind {
    Price,
    Timing,
    Uncertainty,
}

impl ObjectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Timing => "timing",
            Self::Uncertainty => "uncertainty",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "price" => Some(Self::Price),
            "timing" => Some(Self::Timing),
            "uncertainty" => Some(Self::Uncertainty),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectionTaxonomy {
    pub price: Vec<String>,
    pub timing: Vec<String>,
    pub uncertainty: Vec<String>,
}

impl Default for ObjectionTaxonomy {
    fn default() -> Self {
        let words = |items: &[&str]| items.iter().map(|item| (*item).to_string()).collect();
        Self {
            price: words(&[
                "too expensive",
                "expensive",
                "overpriced",
                "too much",
                "can't afford",
                "cannot afford",
                "cheaper",
                "discount",
                "дорого",
                "слишком дорого",
                "скидк",
                "غالي",
                "مكلف",
            ]),
            timing: words(&[
                "not now",
                "later",
                "next year",
                "not ready",
                "no rush",
                "in a few months",
                "call me later",
                "позже",
                "не сейчас",
                "потом",
                "لاحقا",
                "ليس الآن",
            ]),
            uncertainty: words(&[
                "not sure",
                "unsure",
                "maybe",
                "thinking about it",
                "need to think",
                "just looking",
                "just browsing",
                "не уверен",
                "подумаю",
                "может быть",
                "لست متأكد",
                "ربما",
            ]),
        }
    }
}

impl ObjectionTaxonomy {
    pub fn keywords(&self, kind: ObjectionKind) -> &[String] {
        match kind {
            ObjectionKind::Price => &self.price,
            ObjectionKind::Timing => &self.timing,
            ObjectionKind::Uncertainty => &self.uncertainty,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.price.is_empty() && self.timing.is_empty() && self.uncertainty.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectionMatch {
    pub kind: ObjectionKind,
    pub keywords: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ObjectionDetector {
    taxonomy: ObjectionTaxonomy,
}

impl ObjectionDetector {
    pub fn new(taxonomy: ObjectionTaxonomy) -> Self {
        Self { taxonomy }
    }

    pub fn taxonomy(&self) -> &ObjectionTaxonomy {
        &self.taxonomy
    }

    /// The kind with the most keyword hits wins; ties go to price, then timing.
    pub fn detect(&self, message: &str) -> Option<ObjectionMatch> {
        let normalized = message.to_lowercase();
        [ObjectionKind::Price, ObjectionKind::Timing, ObjectionKind::Uncertainty]
            .into_iter()
            .map(|kind| ObjectionMatch { kind, keywords: self.matches(kind, &normalized) })
            .filter(|candidate| !candidate.keywords.is_empty())
            .fold(None, |best: Option<ObjectionMatch>, candidate| match best {
                Some(current) if current.keywords.len() >= candidate.keywords.len() => {
                    Some(current)
                }
                _ => Some(candidate),
            })
    }

    fn matches(&self, kind: ObjectionKind, normalized_message: &str) -> Vec<String> {
        self.taxonomy
            .keywords(kind)
            .iter()
            .filter(|keyword| contains_phrase(normalized_message, &keyword.to_lowercase()))
            .cloned()
            .collect()
    }
}

/// Phrase match on word boundaries so that "later" does not fire inside "translater".
/// Keywords ending in a stem (e.g. "скидк") match any continuation.
fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    haystack.match_indices(phrase).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        !before.is_some_and(char::is_alphanumeric)
    })
}
