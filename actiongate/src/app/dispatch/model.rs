use crate::domain::dispatch::{ActionId, SessionId};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Inbound request. Field names follow the wire contract
/// (`sessionID`, `actionID`, `actionParams`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    #[serde(rename = "sessionID", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(rename = "actionID", default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
    #[serde(rename = "actionParams", default)]
    pub action_params: Value,
}

impl ServiceRequest {
    pub fn new(
        action_id: impl AsRef<str>,
        action_params: Value,
        session_id: Option<&SessionId>,
    ) -> Self {
        Self {
            session_id: session_id.map(|id| id.as_str().to_string()),
            action_id: Some(action_id.as_ref().to_string()),
            action_params,
        }
    }
}

/// An action granted back to the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAction {
    #[serde(rename = "actionID")]
    pub action_id: ActionId,
}

impl From<ActionId> for ServiceAction {
    fn from(action_id: ActionId) -> Self {
        Self { action_id }
    }
}

/// Response body. Serializes to the bare object; decoding goes through
/// [`ResponseData::from_wire`] so handler payloads survive a round trip.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseData {
    Error {
        message: String,
    },
    SessionCreated {
        #[serde(rename = "sessionID")]
        session_id: SessionId,
    },
    Ping {
        #[serde(rename = "validLogin")]
        valid_login: bool,
    },
    Payload(Value),
}

impl ResponseData {
    /// Picks the typed variant only when `data` is exactly that variant's
    /// single member and `success` agrees. Anything else stays a payload.
    pub fn from_wire(success: bool, data: Value) -> Self {
        if let Value::Object(members) = &data {
            if members.len() == 1 {
                match (success, members.iter().next()) {
                    (false, Some((key, Value::String(message)))) if key.as_str() == "message" => {
                        return ResponseData::Error {
                            message: message.clone(),
                        };
                    }
                    (true, Some((key, Value::Bool(valid_login))))
                        if key.as_str() == "validLogin" =>
                    {
                        return ResponseData::Ping {
                            valid_login: *valid_login,
                        };
                    }
                    (true, Some((key, Value::String(raw)))) if key.as_str() == "sessionID" => {
                        if let Ok(session_id) = SessionId::parse(raw.as_str()) {
                            return ResponseData::SessionCreated { session_id };
                        }
                    }
                    _ => {}
                }
            }
        }
        ResponseData::Payload(data)
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            ResponseData::Error { message } => Some(message),
            ResponseData::Payload(value) => value.get("message").and_then(Value::as_str),
            _ => None,
        }
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            ResponseData::SessionCreated { session_id } => Some(session_id),
            _ => None,
        }
    }

    pub fn valid_login(&self) -> Option<bool> {
        match self {
            ResponseData::Ping { valid_login } => Some(*valid_login),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ServiceResponse {
    pub success: bool,
    pub actions: Vec<ServiceAction>,
    pub data: ResponseData,
}

#[derive(Deserialize)]
struct WireResponse {
    success: bool,
    #[serde(default)]
    actions: Vec<ServiceAction>,
    #[serde(default)]
    data: Value,
}

impl<'de> Deserialize<'de> for ServiceResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = WireResponse::deserialize(deserializer)?;
        Ok(Self {
            success: wire.success,
            actions: wire.actions,
            data: ResponseData::from_wire(wire.success, wire.data),
        })
    }
}

impl ServiceResponse {
    pub fn ok(data: ResponseData, actions: Vec<ServiceAction>) -> Self {
        Self {
            success: true,
            actions,
            data,
        }
    }

    pub fn payload(data: Value, actions: Vec<ServiceAction>) -> Self {
        Self::ok(ResponseData::Payload(data), actions)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            actions: Vec::new(),
            data: ResponseData::Error {
                message: message.into(),
            },
        }
    }

    pub fn action_ids(&self) -> impl Iterator<Item = &ActionId> {
        self.actions.iter().map(|action| &action.action_id)
    }
}

/// Marks a value as having crossed the dispatcher's trust boundary.
///
/// Only the dispatch module can mint one, so a handler can never be handed a
/// caller payload that skipped the dispatcher.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientValue<T> {
    value: T,
}

impl<T> ClientValue<T> {
    pub(in crate::app::dispatch) fn flag(value: T) -> Self {
        Self { value }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl ClientValue<Value> {
    /// Member `key` of an object payload, still enveloped.
    pub fn field(&self, key: &str) -> Option<ClientValue<Value>> {
        self.value.get(key).cloned().map(ClientValue::flag)
    }

    /// Member `key`, or `default` when the payload lacks it.
    pub fn field_or(&self, key: &str, default: Value) -> ClientValue<Value> {
        self.field(key).unwrap_or_else(|| ClientValue::flag(default))
    }
}

/// Everything a handler receives for one redeemed action.
#[derive(Clone, Debug)]
pub struct ActionInvocation {
    pub action_id: ActionId,
    /// Caller-supplied parameters.
    pub params: ClientValue<Value>,
    /// Parameters attached when the action was registered; server-minted.
    pub config: Value,
    pub session_id: Option<SessionId>,
    pub validated: bool,
}
