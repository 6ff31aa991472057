use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Builds `PREFIX:<32 hex chars>` from OS randomness. Nothing about the
/// result is derivable from sequence or time.
fn random_token(prefix: &str) -> String {
    format!("{prefix}:{}", Uuid::new_v4().simple())
}

/// Capability token naming one registered action.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ActionId(String);

impl ActionId {
    pub fn generate(prefix: &str) -> Self {
        Self(random_token(prefix))
    }

    pub fn parse(value: impl Into<String>) -> Result<Self, String> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err("action id cannot be empty".into());
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ActionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for ActionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ActionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        ActionId::parse(value).map_err(D::Error::custom)
    }
}

/// Opaque token for an authenticated interaction context.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate(prefix: &str) -> Self {
        Self(random_token(prefix))
    }

    pub fn parse(value: impl Into<String>) -> Result<Self, String> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err("session id cannot be empty".into());
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for SessionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        SessionId::parse(value).map_err(D::Error::custom)
    }
}

/// Self-declared identifier of an action service. Case sensitive.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(String);

impl HandlerId {
    pub fn new(value: impl Into<String>) -> Result<Self, String> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err("handler id cannot be empty".into());
        }
        Ok(Self(value))
    }

    /// For ids baked into a service. Must not be blank.
    pub fn from_static(value: &'static str) -> Self {
        debug_assert!(!value.trim().is_empty(), "blank handler id");
        Self(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for HandlerId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for HandlerId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        HandlerId::new(value).map_err(D::Error::custom)
    }
}

/// Built-in action kinds handled by the dispatcher itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InternalAction {
    CreateSession,
    Ping,
    Pong,
}

impl InternalAction {
    pub fn slug(&self) -> &'static str {
        match self {
            InternalAction::CreateSession => "svc.create_session",
            InternalAction::Ping => "svc.ping",
            InternalAction::Pong => "svc.pong",
        }
    }
}

impl fmt::Display for InternalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.slug())
    }
}

impl FromStr for InternalAction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "svc.create_session" => Ok(InternalAction::CreateSession),
            "svc.ping" => Ok(InternalAction::Ping),
            "svc.pong" => Ok(InternalAction::Pong),
            other => Err(format!("unknown internal action: {other}")),
        }
    }
}

/// What an action resolves to: a built-in kind or a registered handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionTarget {
    Internal(InternalAction),
    External(HandlerId),
}

impl fmt::Display for ActionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionTarget::Internal(kind) => write!(f, "{kind}"),
            ActionTarget::External(handler) => write!(f, "handler:{handler}"),
        }
    }
}

/// Lifetime and validation flags chosen when an action is registered.
///
/// The default is a single-use action that requires a valid session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ActionFlags {
    persist: bool,
    insecure: bool,
}

impl ActionFlags {
    pub fn single_use() -> Self {
        Self::default()
    }

    pub fn persistent(mut self) -> Self {
        self.persist = true;
        self
    }

    pub fn insecure(mut self) -> Self {
        self.insecure = true;
        self
    }

    pub fn persist(&self) -> bool {
        self.persist
    }

    pub fn requires_validation(&self) -> bool {
        !self.insecure
    }
}
