//! Conversation reducer
//!
//! Implements the Elm Architecture pattern: provider events and user actions
//! are folded into an immutable transcript snapshot by a pure transition
//! function, which returns the effects for the session to run.

mod action;
mod effect;
mod message;
mod state;
mod transition;


pub use action::Action;
pub use effect::Effect;
pub use message::{
    ContentItem, FunctionCallResult, FunctionCallStatus, Message, PageContextSnapshot, Role,
    Thread,
};
pub use state::{ConversationState, TurnPhase, TurnRef};
pub use transition::{transition, TransitionError, TransitionResult};
