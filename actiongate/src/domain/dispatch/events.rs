use super::value_object::{ActionId, ActionTarget, HandlerId, SessionId};
use chrono::{DateTime, Utc};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchEvent {
    ActionRegistered {
        action_id: ActionId,
        target: ActionTarget,
        persist: bool,
    },
    ActionConsumed {
        action_id: ActionId,
    },
    ActionRevoked {
        action_id: ActionId,
    },
    SessionCreated {
        session_id: SessionId,
    },
    SessionRevoked {
        session_id: SessionId,
    },
    HandlerRegistered {
        handler_id: HandlerId,
    },
}

impl DispatchEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchEvent::ActionRegistered { .. } => "action.registered",
            DispatchEvent::ActionConsumed { .. } => "action.consumed",
            DispatchEvent::ActionRevoked { .. } => "action.revoked",
            DispatchEvent::SessionCreated { .. } => "session.created",
            DispatchEvent::SessionRevoked { .. } => "session.revoked",
            DispatchEvent::HandlerRegistered { .. } => "handler.registered",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchEventEnvelope {
    pub occurred_at: DateTime<Utc>,
    pub event: DispatchEvent,
}

impl DispatchEventEnvelope {
    pub fn new(event: DispatchEvent) -> Self {
        Self {
            occurred_at: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_records_timestamp() {
        let id = ActionId::generate("ACT");
        let envelope = DispatchEventEnvelope::new(DispatchEvent::ActionConsumed {
            action_id: id.clone(),
        });
        assert_eq!(envelope.event.kind(), "action.consumed");
        assert!(envelope.occurred_at <= Utc::now());
        assert!(matches!(
            envelope.event,
            DispatchEvent::ActionConsumed { action_id } if action_id == id
        ));
    }
}
