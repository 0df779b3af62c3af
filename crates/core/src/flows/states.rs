use serde::{Deserialize, Serialize};

use crate::objections::ObjectionKind;
use crate::slots::SlotName;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    Greeting,
    GoalSelection,
    SlotFilling,
    ObjectionHandling,
    PresentMatches,
    Close,
}

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::GoalSelection => "goal_selection",
            Self::SlotFilling => "slot_filling",
            Self::ObjectionHandling => "objection_handling",
            Self::PresentMatches => "present_matches",
            Self::Close => "close",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "greeting" => Some(Self::Greeting),
            "goal_selection" => Some(Self::GoalSelection),
            "slot_filling" => Some(Self::SlotFilling),
            "objection_handling" => Some(Self::ObjectionHandling),
            "present_matches" => Some(Self::PresentMatches),
            "close" => Some(Self::Close),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    ConversationStarted,
    RestartRequested,
    StopRequested,
    GoalSelected,
    SlotsUpdated,
    ObjectionRaised(ObjectionKind),
    MoreMatchesRequested,
    ConsultationRequested,
}

/// Facts about the lead that the transition table needs but does not own.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlowContext {
    pub qualification_complete: bool,
    pub next_missing_slot: Option<SlotName>,
    pub goal_known: bool,
    pub contact_known: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    ResetSession,
    SendGreeting,
    PromptGoal,
    AskSlot(SlotName),
    CounterObjection(ObjectionKind),
    PresentMatches,
    OfferConsultation,
    ConfirmConsultation,
    RequestContact,
    MarkLeadLost,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: ConversationState,
    pub to: ConversationState,
    pub event: FlowEvent,
    pub actions: Vec<FlowAction>,
}
