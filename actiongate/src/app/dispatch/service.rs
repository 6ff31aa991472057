use super::model::{
    ActionInvocation, ClientValue, ResponseData, ServiceAction, ServiceRequest, ServiceResponse,
};
use super::registry::{ActionRegistry, SessionRegistry};
use crate::domain::dispatch::{
    ActionFlags, ActionId, ActionRecord, ActionTarget, DispatchEvent, DispatchEventEnvelope,
    HandlerId, InternalAction, SessionId,
};
use crate::ports::datastore::Datastore;
use crate::ports::dispatch::ActionService;
use crate::settings::DispatcherSettings;
use crate::telemetry::DispatchMetrics;
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Bad Request")]
    BadRequest,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Action not Implemented")]
    ActionNotImplemented,
    #[error("action service {id} is already registered")]
    RegistrationConflict { id: HandlerId },
}

impl DispatchError {
    fn outcome(&self) -> &'static str {
        match self {
            DispatchError::BadRequest => "bad_request",
            DispatchError::Unauthorized => "unauthorized",
            DispatchError::ActionNotImplemented => "not_implemented",
            DispatchError::RegistrationConflict { .. } => "registration_conflict",
        }
    }
}

impl From<DispatchError> for ServiceResponse {
    fn from(err: DispatchError) -> Self {
        ServiceResponse::error(err.to_string())
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Capability-token dispatcher. Owns the action registry, the session
/// registry and the handler map; nothing else mutates them.
pub struct Dispatcher {
    actions: ActionRegistry,
    sessions: SessionRegistry,
    handlers: RwLock<HashMap<HandlerId, Arc<dyn ActionService>>>,
    datastore: Arc<dyn Datastore>,
    metrics: Option<Arc<DispatchMetrics>>,
    events: broadcast::Sender<DispatchEventEnvelope>,
    create_session_action: ActionId,
    ping_action: ActionId,
}

impl Dispatcher {
    pub fn new(settings: &DispatcherSettings, datastore: Arc<dyn Datastore>) -> Self {
        Self::with_metrics(settings, datastore, None)
    }

    pub fn with_metrics(
        settings: &DispatcherSettings,
        datastore: Arc<dyn Datastore>,
        metrics: Option<Arc<DispatchMetrics>>,
    ) -> Self {
        let actions = ActionRegistry::new(settings.action_prefix.clone());
        let builtin = ActionFlags::single_use().persistent().insecure();
        let create_session_action = actions.register(
            ActionTarget::Internal(InternalAction::CreateSession),
            Value::Null,
            builtin,
        );
        let ping_action = actions.register(
            ActionTarget::Internal(InternalAction::Ping),
            Value::Null,
            builtin,
        );
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            actions,
            sessions: SessionRegistry::new(settings.session_prefix.clone(), datastore.clone()),
            handlers: RwLock::new(HashMap::new()),
            datastore,
            metrics,
            events,
            create_session_action,
            ping_action,
        }
    }

    pub fn create_session_action(&self) -> &ActionId {
        &self.create_session_action
    }

    pub fn ping_action(&self) -> &ActionId {
        &self.ping_action
    }

    pub fn datastore(&self) -> Arc<dyn Datastore> {
        self.datastore.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEventEnvelope> {
        self.events.subscribe()
    }

    /// Registers a handler under its self-declared id. A second registration
    /// under the same id is a configuration error; the first stays active.
    pub fn register_action_service(
        &self,
        service: Arc<dyn ActionService>,
    ) -> DispatchResult<HandlerId> {
        let id = service.id();
        {
            let mut handlers = self
                .handlers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            match handlers.entry(id.clone()) {
                Entry::Occupied(_) => {
                    warn!(handler = %id, "rejecting duplicate action service registration");
                    return Err(DispatchError::RegistrationConflict { id });
                }
                Entry::Vacant(slot) => {
                    slot.insert(service);
                }
            }
        }
        info!(handler = %id, "action service registered");
        self.publish(DispatchEvent::HandlerRegistered {
            handler_id: id.clone(),
        });
        Ok(id)
    }

    pub fn register_action(
        &self,
        target: ActionTarget,
        params: Value,
        flags: ActionFlags,
    ) -> ActionId {
        let action_id = self.actions.register(target.clone(), params, flags);
        if let Some(metrics) = &self.metrics {
            metrics.record_action_minted(&target.to_string());
        }
        self.publish(DispatchEvent::ActionRegistered {
            action_id: action_id.clone(),
            target,
            persist: flags.persist(),
        });
        action_id
    }

    /// Grants an action targeting `handler`, ready to hand back to a caller.
    pub fn create_service_action(
        &self,
        handler: HandlerId,
        params: Value,
        flags: ActionFlags,
    ) -> ServiceAction {
        ServiceAction::from(self.register_action(ActionTarget::External(handler), params, flags))
    }

    pub fn resolve_action(&self, id: &ActionId) -> Option<ActionRecord> {
        self.actions.resolve(id)
    }

    /// Idempotent. Returns whether the action was live.
    pub fn revoke_action(&self, id: &ActionId) -> bool {
        let removed = self.actions.consume(id);
        if removed {
            self.publish(DispatchEvent::ActionRevoked {
                action_id: id.clone(),
            });
        }
        removed
    }

    pub async fn is_session_valid(&self, id: &SessionId) -> bool {
        self.sessions.is_valid(id).await
    }

    /// Idempotent. Returns whether the session was valid.
    ///
    /// Requests already past their session check when this lands still
    /// redeem as validated: the check runs before the registry lock is
    /// taken. Requests that start afterwards see the session as invalid.
    pub async fn revoke_session(&self, id: &SessionId) -> bool {
        let revoked = self.sessions.revoke(id).await;
        if revoked {
            self.publish(DispatchEvent::SessionRevoked {
                session_id: id.clone(),
            });
        }
        revoked
    }

    pub async fn request(
        &self,
        action_id: impl AsRef<str>,
        params: Value,
        session_id: Option<&SessionId>,
    ) -> ServiceResponse {
        self.post(ServiceRequest::new(action_id, params, session_id))
            .await
    }

    /// Redeems one action. Request-time failures come back as an error
    /// response, never as `Err`.
    pub async fn post(&self, request: ServiceRequest) -> ServiceResponse {
        match self.dispatch(request).await {
            Ok(response) => {
                self.record_outcome("ok");
                response
            }
            Err(err) => {
                debug!(error = %err, "request rejected");
                self.record_outcome(err.outcome());
                err.into()
            }
        }
    }

    async fn dispatch(&self, request: ServiceRequest) -> DispatchResult<ServiceResponse> {
        let action_id = request
            .action_id
            .ok_or(DispatchError::BadRequest)
            .and_then(|raw| ActionId::parse(raw).map_err(|_| DispatchError::BadRequest))?;
        let params = ClientValue::flag(request.action_params);

        let session_id = request
            .session_id
            .and_then(|raw| SessionId::parse(raw).ok());
        let validated = match &session_id {
            Some(id) => self.sessions.is_valid(id).await,
            None => false,
        };

        let record = self.actions.redeem(&action_id, validated)?;
        if !record.persist() {
            self.publish(DispatchEvent::ActionConsumed {
                action_id: action_id.clone(),
            });
        }

        match record.target() {
            ActionTarget::Internal(InternalAction::CreateSession) => {
                let session_id = self.sessions.create().await;
                if let Some(metrics) = &self.metrics {
                    metrics.record_session_created();
                }
                self.publish(DispatchEvent::SessionCreated {
                    session_id: session_id.clone(),
                });
                Ok(ServiceResponse::ok(
                    ResponseData::SessionCreated { session_id },
                    Vec::new(),
                ))
            }
            ActionTarget::Internal(InternalAction::Ping) => {
                let actions = if validated {
                    vec![ServiceAction::from(self.register_action(
                        ActionTarget::Internal(InternalAction::Pong),
                        Value::Null,
                        ActionFlags::single_use(),
                    ))]
                } else {
                    Vec::new()
                };
                Ok(ServiceResponse::ok(
                    ResponseData::Ping {
                        valid_login: validated,
                    },
                    actions,
                ))
            }
            ActionTarget::Internal(InternalAction::Pong) => Ok(ServiceResponse::ok(
                ResponseData::Ping {
                    valid_login: validated,
                },
                Vec::new(),
            )),
            ActionTarget::External(handler_id) => {
                let handler = self
                    .handler(handler_id)
                    .ok_or(DispatchError::ActionNotImplemented)?;
                let invocation = ActionInvocation {
                    action_id,
                    params,
                    config: record.params().clone(),
                    session_id,
                    validated,
                };
                let start = Instant::now();
                let response = handler.handle_event(self, invocation).await;
                if let Some(metrics) = &self.metrics {
                    metrics.record_handler_latency(
                        start.elapsed().as_secs_f64() * 1000.0,
                        handler_id.as_str(),
                    );
                }
                Ok(response)
            }
        }
    }

    fn handler(&self, id: &HandlerId) -> Option<Arc<dyn ActionService>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn publish(&self, event: DispatchEvent) {
        let envelope = DispatchEventEnvelope::new(event);
        debug!(kind = envelope.event.kind(), "dispatch event");
        // No subscribers is fine.
        let _ = self.events.send(envelope);
    }

    fn record_outcome(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_request(outcome);
        }
    }
}
