use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use leadline_core::domain::conversation::{Channel, ConversationKey, Language, MessageId};
use leadline_core::domain::tenant::TenantId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Voice,
    Image,
    Video,
    Document,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Voice => "voice",
            Self::Image => "image",
            Self::Video => "video",
            Self::Document => "document",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "voice" | "audio" => Some(Self::Voice),
            "image" | "photo" => Some(Self::Image),
            "video" => Some(Self::Video),
            "document" | "file" => Some(Self::Document),
            _ => None,
        }
    }
}

/// Opaque pointer to an attachment, written as `<kind>:<id>` by the channel bridge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub id: String,
}

impl MediaRef {
    pub fn parse(raw: &str) -> Option<Self> {
        let (kind, id) = raw.split_once(':')?;
        let id = id.trim();
        if id.is_empty() {
            return None;
        }
        Some(Self { kind: MediaKind::parse(kind)?, id: id.to_string() })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub tenant_id: TenantId,
    pub external_user_id: String,
    pub channel: Channel,
    pub text: Option<String>,
    pub callback: Option<String>,
    pub media: Option<MediaRef>,
    pub language_hint: Option<Language>,
    pub message_id: Option<MessageId>,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn text(
        tenant_id: TenantId,
        external_user_id: impl Into<String>,
        channel: Channel,
        text: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id,
            external_user_id: external_user_id.into(),
            channel,
            text: Some(text.into()),
            callback: None,
            media: None,
            language_hint: None,
            message_id: None,
            received_at,
        }
    }

    pub fn callback(
        tenant_id: TenantId,
        external_user_id: impl Into<String>,
        channel: Channel,
        callback: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            text: None,
            callback: Some(callback.into()),
            ..Self::text(tenant_id, external_user_id, channel, "", received_at)
        }
    }

    pub fn key(&self) -> ConversationKey {
        ConversationKey::new(self.tenant_id.clone(), self.external_user_id.clone(), self.channel)
    }

    /// The channel's own id when supplied, otherwise a stable derived one.
    pub fn message_id(&self) -> MessageId {
        if let Some(id) = &self.message_id {
            return id.clone();
        }
        let body = self.text.as_deref().or(self.callback.as_deref()).unwrap_or_default();
        MessageId::derive(&self.key(), body, self.received_at)
    }

    pub fn trimmed_text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|text| !text.is_empty())
    }
}
