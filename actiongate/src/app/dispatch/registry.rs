use super::service::DispatchError;
use crate::domain::dispatch::{ActionFlags, ActionId, ActionRecord, ActionTarget, SessionId};
use crate::ports::datastore::Datastore;
use serde_json::{json, Value};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const SESSION_NAMESPACE: &str = "session";

/// Allocates action ids and holds one record per live id.
///
/// Every operation is a single critical section over the map, so a poisoned
/// lock still guards consistent data and is recovered rather than propagated.
pub struct ActionRegistry {
    prefix: String,
    actions: Mutex<HashMap<ActionId, ActionRecord>>,
}

impl ActionRegistry {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            actions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ActionId, ActionRecord>> {
        self.actions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, target: ActionTarget, params: Value, flags: ActionFlags) -> ActionId {
        let record = ActionRecord::new(target, params, flags);
        let mut actions = self.lock();
        loop {
            let id = ActionId::generate(&self.prefix);
            if let Entry::Vacant(slot) = actions.entry(id.clone()) {
                slot.insert(record);
                return id;
            }
        }
    }

    pub fn resolve(&self, id: &ActionId) -> Option<ActionRecord> {
        self.lock().get(id).cloned()
    }

    /// Removes the record. Returns whether it was present.
    pub fn consume(&self, id: &ActionId) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Resolve, validate and consume under one lock. A single-use record is
    /// removed only after validation passes, so a rejected caller cannot burn
    /// it, and two concurrent redemptions cannot both succeed.
    pub fn redeem(&self, id: &ActionId, validated: bool) -> Result<ActionRecord, DispatchError> {
        let mut actions = self.lock();
        let record = actions.get(id).ok_or(DispatchError::BadRequest)?;
        if !record.admits(validated) {
            return Err(DispatchError::Unauthorized);
        }
        if record.persist() {
            Ok(record.clone())
        } else {
            actions.remove(id).ok_or(DispatchError::BadRequest)
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Tracks valid sessions in the datastore under the `session` namespace.
pub struct SessionRegistry {
    prefix: String,
    store: Arc<dyn Datastore>,
}

impl SessionRegistry {
    pub fn new(prefix: impl Into<String>, store: Arc<dyn Datastore>) -> Self {
        Self {
            prefix: prefix.into(),
            store,
        }
    }

    pub async fn create(&self) -> SessionId {
        loop {
            let id = SessionId::generate(&self.prefix);
            if !self.store.has(SESSION_NAMESPACE, id.as_str()).await {
                self.store
                    .put(SESSION_NAMESPACE, id.as_str(), json!(true))
                    .await;
                return id;
            }
        }
    }

    pub async fn is_valid(&self, id: &SessionId) -> bool {
        self.store.has(SESSION_NAMESPACE, id.as_str()).await
    }

    /// Idempotent. Returns whether the session was valid before the call.
    pub async fn revoke(&self, id: &SessionId) -> bool {
        let existed = self.is_valid(id).await;
        self.store.delete(SESSION_NAMESPACE, id.as_str()).await;
        existed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::datastore::InMemoryDatastore;
    use crate::domain::dispatch::InternalAction;

    fn ping_target() -> ActionTarget {
        ActionTarget::Internal(InternalAction::Ping)
    }

    #[test]
    fn register_then_resolve_without_side_effect() {
        let registry = ActionRegistry::new("ACT");
        let id = registry.register(ping_target(), Value::Null, ActionFlags::single_use());
        assert!(id.as_str().starts_with("ACT:"));
        assert!(registry.resolve(&id).is_some());
        assert!(registry.resolve(&id).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn consume_is_idempotent() {
        let registry = ActionRegistry::new("ACT");
        let id = registry.register(ping_target(), Value::Null, ActionFlags::single_use());
        assert!(registry.consume(&id));
        assert!(!registry.consume(&id));
        assert!(registry.is_empty());
    }

    #[test]
    fn redeem_single_use_only_once() {
        let registry = ActionRegistry::new("ACT");
        let id = registry.register(
            ping_target(),
            Value::Null,
            ActionFlags::single_use().insecure(),
        );
        assert!(registry.redeem(&id, false).is_ok());
        assert_eq!(
            registry.redeem(&id, false).unwrap_err(),
            DispatchError::BadRequest
        );
    }

    #[test]
    fn unauthorized_redeem_keeps_record() {
        let registry = ActionRegistry::new("ACT");
        let id = registry.register(ping_target(), Value::Null, ActionFlags::single_use());
        assert_eq!(
            registry.redeem(&id, false).unwrap_err(),
            DispatchError::Unauthorized
        );
        assert!(registry.resolve(&id).is_some());
        assert!(registry.redeem(&id, true).is_ok());
        assert!(registry.resolve(&id).is_none());
    }

    #[test]
    fn persistent_records_survive_redemption() {
        let registry = ActionRegistry::new("ACT");
        let id = registry.register(
            ping_target(),
            Value::Null,
            ActionFlags::single_use().persistent().insecure(),
        );
        for _ in 0..3 {
            assert!(registry.redeem(&id, false).is_ok());
        }
        assert!(registry.resolve(&id).is_some());
    }

    #[test]
    fn concurrent_redemptions_yield_one_winner() {
        let registry = Arc::new(ActionRegistry::new("ACT"));
        let id = registry.register(
            ping_target(),
            Value::Null,
            ActionFlags::single_use().insecure(),
        );
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let id = id.clone();
                std::thread::spawn(move || registry.redeem(&id, false).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn sessions_are_valid_until_revoked() {
        let store = Arc::new(InMemoryDatastore::new());
        let sessions = SessionRegistry::new("TKN", store.clone());
        let id = sessions.create().await;
        assert!(id.as_str().starts_with("TKN:"));
        assert!(sessions.is_valid(&id).await);
        assert!(store.has("session", id.as_str()).await);
        assert!(sessions.revoke(&id).await);
        assert!(!sessions.revoke(&id).await);
        assert!(!sessions.is_valid(&id).await);
    }

    #[tokio::test]
    async fn unknown_session_is_invalid() {
        let sessions = SessionRegistry::new("TKN", Arc::new(InMemoryDatastore::new()));
        let bogus = SessionId::parse("badsession").unwrap();
        assert!(!sessions.is_valid(&bogus).await);
    }
}
