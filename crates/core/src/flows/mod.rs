pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, QualificationFlow};
pub use states::{ConversationState, FlowAction, FlowContext, FlowEvent, TransitionOutcome};
