use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_ACTION_PREFIX: &str = "ACT";
pub const DEFAULT_SESSION_PREFIX: &str = "TKN";
pub const DEFAULT_MAX_STEPS: usize = 1024;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing settings: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid settings: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    pub action_prefix: String,
    pub session_prefix: String,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            action_prefix: DEFAULT_ACTION_PREFIX.to_string(),
            session_prefix: DEFAULT_SESSION_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowchartSettings {
    pub path: Option<PathBuf>,
    pub max_steps: usize,
}

impl Default for FlowchartSettings {
    fn default() -> Self {
        Self {
            path: None,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub dispatcher: DispatcherSettings,
    pub flowchart: FlowchartSettings,
    pub telemetry: TelemetrySettings,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        check_prefix("action_prefix", &self.dispatcher.action_prefix)?;
        check_prefix("session_prefix", &self.dispatcher.session_prefix)?;
        if self.flowchart.max_steps == 0 {
            return Err(SettingsError::Invalid(
                "flowchart.max_steps must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn check_prefix(field: &str, value: &str) -> Result<(), SettingsError> {
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(SettingsError::Invalid(format!(
            "{field} must be non-empty ASCII alphanumerics, got {value:?}"
        )));
    }
    Ok(())
}
