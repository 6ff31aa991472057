use super::value_object::{ActionFlags, ActionTarget};
use serde_json::Value;

/// Registry entry for one action id.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionRecord {
    persist: bool,
    requires_validation: bool,
    target: ActionTarget,
    params: Value,
}

impl ActionRecord {
    pub fn new(target: ActionTarget, params: Value, flags: ActionFlags) -> Self {
        Self {
            persist: flags.persist(),
            requires_validation: flags.requires_validation(),
            target,
            params,
        }
    }

    pub fn persist(&self) -> bool {
        self.persist
    }

    pub fn requires_validation(&self) -> bool {
        self.requires_validation
    }

    pub fn target(&self) -> &ActionTarget {
        &self.target
    }

    /// Handler-specific configuration attached at registration time.
    pub fn params(&self) -> &Value {
        &self.params
    }

    /// Returns `true` when a caller with the given validation status may
    /// redeem this action.
    pub fn admits(&self, validated: bool) -> bool {
        !self.requires_validation || validated
    }
}
