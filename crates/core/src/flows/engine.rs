use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::flows::states::{
    ConversationState, FlowAction, FlowContext, FlowEvent, TransitionOutcome,
};

pub trait FlowDefinition {
    fn name(&self) -> &'static str;
    fn initial_state(&self) -> ConversationState;
    fn transition(
        &self,
        current: &ConversationState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// Greeting, goal selection, slot filling with objection detours, then matches.
#[derive(Clone, Debug, Default)]
pub struct QualificationFlow;

impl FlowDefinition for QualificationFlow {
    fn name(&self) -> &'static str {
        "qualification"
    }

    fn initial_state(&self) -> ConversationState {
        ConversationState::Greeting
    }

    fn transition(
        &self,
        current: &ConversationState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_qualification(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn flow_name(&self) -> &'static str {
        self.flow.name()
    }

    pub fn initial_state(&self) -> ConversationState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &ConversationState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &ConversationState,
        event: &FlowEvent,
        context: &FlowContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    audit
                        .event("flow.transition_applied", AuditCategory::Flow, AuditOutcome::Success)
                        .with_metadata("flow", self.flow_name())
                        .with_metadata("from", outcome.from.as_str())
                        .with_metadata("to", outcome.to.as_str())
                        .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    audit
                        .event("flow.transition_rejected", AuditCategory::Flow, AuditOutcome::Rejected)
                        .with_metadata("flow", self.flow_name())
                        .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<QualificationFlow> {
    fn default() -> Self {
        Self::new(QualificationFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: ConversationState, event: FlowEvent },
}

/// Next step once slots changed: matches when qualified, otherwise one question.
fn progress(context: &FlowContext) -> (ConversationState, Vec<FlowAction>) {
    if context.qualification_complete {
        return (ConversationState::PresentMatches, vec![FlowAction::PresentMatches]);
    }
    match context.next_missing_slot {
        Some(slot) => (ConversationState::SlotFilling, vec![FlowAction::AskSlot(slot)]),
        None => (ConversationState::SlotFilling, Vec::new()),
    }
}

fn transition_qualification(
    current: &ConversationState,
    event: &FlowEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use ConversationState::{
        Close, GoalSelection, Greeting, ObjectionHandling, PresentMatches, SlotFilling,
    };
    use FlowAction::{
        AskSlot, ConfirmConsultation, CounterObjection, MarkLeadLost, OfferConsultation,
        PromptGoal, RequestContact, ResetSession, SendGreeting,
    };

    let (to, actions) = match (current, event) {
        (_, FlowEvent::RestartRequested) => {
            (GoalSelection, vec![ResetSession, SendGreeting, PromptGoal])
        }
        (_, FlowEvent::StopRequested) => (Close, vec![MarkLeadLost]),
        (
            Greeting,
            FlowEvent::ConversationStarted | FlowEvent::SlotsUpdated | FlowEvent::GoalSelected,
        ) => {
            if context.qualification_complete || context.goal_known {
                let (to, mut actions) = progress(context);
                actions.insert(0, SendGreeting);
                (to, actions)
            } else {
                (GoalSelection, vec![SendGreeting, PromptGoal])
            }
        }
        (GoalSelection | SlotFilling | ObjectionHandling, FlowEvent::GoalSelected)
        | (GoalSelection | SlotFilling | ObjectionHandling, FlowEvent::SlotsUpdated)
        | (PresentMatches, FlowEvent::SlotsUpdated)
        | (Close, FlowEvent::SlotsUpdated)
        | (Close, FlowEvent::GoalSelected)
        | (PresentMatches, FlowEvent::GoalSelected)
        | (PresentMatches | Close, FlowEvent::MoreMatchesRequested) => progress(context),
        (_, FlowEvent::ObjectionRaised(kind)) => {
            let mut actions = vec![CounterObjection(*kind)];
            if context.qualification_complete {
                actions.push(OfferConsultation);
            } else if let Some(slot) = context.next_missing_slot {
                actions.push(AskSlot(slot));
            }
            (ObjectionHandling, actions)
        }
        (_, FlowEvent::ConsultationRequested) => {
            let mut actions = vec![ConfirmConsultation];
            if !context.contact_known {
                actions.push(RequestContact);
            }
            (Close, actions)
        }
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                state: *current,
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: event.clone(), actions })
}
