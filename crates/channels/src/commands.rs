use leadline_core::domain::lead::{Goal, PropertyType};
use leadline_core::slots::SlotName;

use crate::message::InboundMessage;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeepLink {
    pub goal: Goal,
    pub property_type: Option<PropertyType>,
}

impl DeepLink {
    /// Accepts `<goal>` or `<goal>_<property>`, optionally prefixed with `start=`.
    pub fn parse(raw: &str) -> Option<Self> {
        let payload = raw.trim();
        let payload = payload.strip_prefix("start=").unwrap_or(payload);
        let (goal, property) = match payload.split_once('_') {
            Some((goal, property)) => (goal, Some(property)),
            None => (payload, None),
        };
        let goal = Goal::parse(goal)?;
        let property_type = match property {
            Some(property) => Some(PropertyType::parse(property)?),
            None => None,
        };
        Some(Self { goal, property_type })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatCommand {
    Start { deep_link: Option<DeepLink> },
    Restart,
    Help,
    Stop,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallbackAction {
    Slot { slot: SlotName, value: String },
    Goal(Goal),
    Consult,
    /// Phone shared through the platform's contact button, so already verified.
    Contact { phone: String },
    MoreMatches,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundIntent {
    Command(ChatCommand),
    Callback(CallbackAction),
    FreeText(String),
    /// Attachment without text; only engagement counters change.
    MediaOnly,
    Unrecognized(String),
    Empty,
}

pub fn parse_intent(message: &InboundMessage) -> InboundIntent {
    let callback = message.callback.as_deref().map(str::trim).filter(|raw| !raw.is_empty());
    if let Some(callback) = callback {
        return match parse_callback(callback) {
            Some(action) => InboundIntent::Callback(action),
            None => InboundIntent::Unrecognized(callback.to_string()),
        };
    }

    let Some(text) = message.trimmed_text() else {
        return if message.media.is_some() { InboundIntent::MediaOnly } else { InboundIntent::Empty };
    };

    if text.starts_with('/') {
        return match parse_command(text) {
            Some(command) => InboundIntent::Command(command),
            None => InboundIntent::Unrecognized(text.to_string()),
        };
    }

    if text.starts_with("start=") {
        if let Some(link) = DeepLink::parse(text) {
            return InboundIntent::Command(ChatCommand::Start { deep_link: Some(link) });
        }
    }

    InboundIntent::FreeText(text.to_string())
}

pub fn parse_command(text: &str) -> Option<ChatCommand> {
    let mut parts = text.split_whitespace();
    let head = parts.next()?.to_ascii_lowercase();
    // Group chats append the bot handle: `/start@acme_bot`.
    let verb = head.split('@').next().unwrap_or_default();
    let argument = parts.next();

    match verb {
        "/start" => Some(ChatCommand::Start { deep_link: argument.and_then(DeepLink::parse) }),
        "/restart" | "/reset" => Some(ChatCommand::Restart),
        "/help" => Some(ChatCommand::Help),
        "/stop" => Some(ChatCommand::Stop),
        _ => None,
    }
}

pub fn parse_callback(raw: &str) -> Option<CallbackAction> {
    let mut parts = raw.splitn(3, ':');
    let kind = parts.next()?.trim().to_ascii_lowercase();
    match kind.as_str() {
        "slot" => {
            let slot = SlotName::parse(parts.next()?)?;
            let value = parts.next()?.trim();
            if value.is_empty() {
                return None;
            }
            Some(CallbackAction::Slot { slot, value: value.to_string() })
        }
        "goal" => Goal::parse(parts.next()?).map(CallbackAction::Goal),
        "consult" => match parts.next().map(str::trim) {
            Some("request") | None => Some(CallbackAction::Consult),
            Some(_) => None,
        },
        "contact" => {
            let phone = raw.split_once(':').map(|(_, rest)| rest.trim()).unwrap_or_default();
            (!phone.is_empty()).then(|| CallbackAction::Contact { phone: phone.to_string() })
        }
        "matches" => match parts.next().map(str::trim) {
            Some("more") => Some(CallbackAction::MoreMatches),
            _ => None,
        },
        _ => None,
    }
}

pub fn slot_callback(slot: SlotName, value: impl std::fmt::Display) -> String {
    format!("slot:{}:{value}", slot.as_str())
}
