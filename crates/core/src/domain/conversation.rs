use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::lead::LeadId;
use crate::domain::tenant::TenantId;
use crate::flows::states::ConversationState;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Stable id for channels that do not supply their own message ids.
    pub fn derive(key: &ConversationKey, text: &str, received_at: DateTime<Utc>) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(key.tenant_id.as_str().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(key.external_user_id.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(key.channel.as_str().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(text.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(received_at.to_rfc3339().as_bytes());
        let digest = hasher.finalize().to_hex();
        Self(format!("msg-{}", &digest.as_str()[..24]))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Telegram,
    WhatsApp,
    Instagram,
    Web,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Telegram => "telegram",
            Self::WhatsApp => "whatsapp",
            Self::Instagram => "instagram",
            Self::Web => "web",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "telegram" => Some(Self::Telegram),
            "whatsapp" | "whats_app" => Some(Self::WhatsApp),
            "instagram" => Some(Self::Instagram),
            "web" | "webchat" => Some(Self::Web),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[default]
    #[serde(rename = "en")]
    English,
    #[serde(rename = "ru")]
    Russian,
    #[serde(rename = "ar")]
    Arabic,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Self::English => "en",
            Self::Russian => "ru",
            Self::Arabic => "ar",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        let primary = normalized.split(['-', '_']).next().unwrap_or_default();
        match primary {
            "en" | "english" => Some(Self::English),
            "ru" | "russian" => Some(Self::Russian),
            "ar" | "arabic" => Some(Self::Arabic),
            _ => None,
        }
    }

    pub fn all() -> [Self; 3] {
        [Self::English, Self::Russian, Self::Arabic]
    }
}

/// Identity of a single dialogue: one per tenant, user and channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub tenant_id: TenantId,
    pub external_user_id: String,
    pub channel: Channel,
}

impl ConversationKey {
    pub fn new(tenant_id: TenantId, external_user_id: impl Into<String>, channel: Channel) -> Self {
        Self { tenant_id, external_user_id: external_user_id.into(), channel }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.tenant_id, self.channel, self.external_user_id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub key: ConversationKey,
    pub lead_id: LeadId,
    pub current_state: ConversationState,
    pub language: Language,
    pub objection_count: u32,
    pub message_count: u32,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn start(key: ConversationKey, lead_id: LeadId, language: Language, now: DateTime<Utc>) -> Self {
        Self {
            id: ConversationId::generate(),
            key,
            lead_id,
            current_state: ConversationState::Greeting,
            language,
            objection_count: 0,
            message_count: 0,
            last_activity_at: now,
            created_at: now,
            archived_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.archived_at.is_none()
    }

    pub fn is_stale(&self, now: DateTime<Utc>, inactivity_window: Duration) -> bool {
        now - self.last_activity_at > inactivity_window
    }

    pub fn archive(&mut self, now: DateTime<Utc>) {
        self.archived_at.get_or_insert(now);
    }

    /// Activity only moves forward, whatever order messages arrive in.
    pub fn record_inbound(&mut self, now: DateTime<Utc>) {
        self.message_count = self.message_count.saturating_add(1);
        self.last_activity_at = self.last_activity_at.max(now);
    }
}
