pub mod aggregate;
pub mod events;
pub mod value_object;

pub use aggregate::ActionRecord;
pub use events::{DispatchEvent, DispatchEventEnvelope};
pub use value_object::{ActionFlags, ActionId, ActionTarget, HandlerId, InternalAction, SessionId};
