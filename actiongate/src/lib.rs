mod adapters;
mod app;
mod domain;
mod ports;
pub mod repl;
pub mod settings;
pub mod telemetry; // Public for benchmarks

pub use adapters::datastore::InMemoryDatastore;
pub use adapters::flowchart::{FlowchartService, FLOWCHART_HANDLER_ID};
pub use app::dispatch::{
    ActionInvocation, ClientValue, DispatchError, DispatchResult, Dispatcher, ResponseData,
    ServiceAction, ServiceRequest, ServiceResponse,
};
pub use app::flowchart::{FlowchartInterpreter, LogicalThread, RunState, StepReport};
pub use domain::dispatch::{
    ActionFlags, ActionId, ActionRecord, ActionTarget, DispatchEvent, DispatchEventEnvelope,
    HandlerId, InternalAction, SessionId,
};
pub use domain::flowchart::{Flowchart, FlowchartDocument, FlowchartError, Node, NodeId, NodeKind};
pub use ports::datastore::{get_as, Datastore, DatastoreError};
pub use ports::dispatch::ActionService;
pub use settings::{Settings, SettingsError};

use anyhow::{anyhow, Context, Result};
use repl::{run_repl, ReplContext};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{info, warn};

/// Reads and validates a flowchart document, returning it as raw JSON for
/// the `load` command.
pub async fn load_flowchart(path: &Path) -> Result<Value> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading flowchart {}", path.display()))?;
    let document: Value = serde_json::from_str(&raw)
        .with_context(|| format!("parsing flowchart {}", path.display()))?;
    let parsed: FlowchartDocument = serde_json::from_value(document.clone())
        .with_context(|| format!("decoding flowchart {}", path.display()))?;
    let chart = Flowchart::from_document(parsed)
        .with_context(|| format!("validating flowchart {}", path.display()))?;
    info!(path = %path.display(), nodes = chart.len(), "flowchart loaded");
    Ok(document)
}

/// Builds a dispatcher with the flowchart service registered.
pub fn build_dispatcher(
    settings: &Settings,
    metrics: Option<Arc<telemetry::DispatchMetrics>>,
) -> Result<(Dispatcher, Arc<FlowchartService>)> {
    let datastore: Arc<dyn Datastore> = Arc::new(InMemoryDatastore::new());
    let dispatcher = Dispatcher::with_metrics(&settings.dispatcher, datastore, metrics);
    let flowcharts = Arc::new(FlowchartService::new(settings.flowchart.max_steps));
    dispatcher
        .register_action_service(flowcharts.clone())
        .map_err(|err| anyhow!("registering flowchart service: {err}"))?;
    Ok((dispatcher, flowcharts))
}

pub async fn run(settings: Settings) -> Result<()> {
    settings.validate()?;

    let telemetry = match settings.telemetry.otlp_endpoint.as_deref() {
        Some(endpoint) => match telemetry::init_telemetry(endpoint, "actiongate") {
            Ok((provider, metrics)) => Some((provider, Arc::new(metrics))),
            Err(err) => {
                warn!("Failed to initialize telemetry: {err:#}");
                None
            }
        },
        None => None,
    };
    let metrics = telemetry.as_ref().map(|(_, metrics)| metrics.clone());

    let (dispatcher, flowcharts) = build_dispatcher(&settings, metrics)?;

    let flowchart = match settings.flowchart.path.as_deref() {
        Some(path) => Some(load_flowchart(path).await?),
        None => None,
    };

    let created = dispatcher
        .request(dispatcher.create_session_action(), Value::Null, None)
        .await;
    let session = match (created.success, created.data.session_id()) {
        (true, Some(session)) => session.clone(),
        _ => return Err(anyhow!("could not create session: {:?}", created.data)),
    };
    println!("Created Session with ID: {session}");

    let context = ReplContext {
        session,
        loader: Some(flowcharts.grant_loader(&dispatcher)),
        flowchart,
    };
    let result = run_repl(
        &dispatcher,
        &context,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await;

    if let Some((provider, _)) = telemetry {
        if let Err(err) = telemetry::shutdown_telemetry(provider) {
            warn!("Telemetry shutdown failed: {err:#}");
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn load_flowchart_validates_document() {
        let mut good = NamedTempFile::new().unwrap();
        write!(
            good,
            r#"{{"nodes": [{{"id": "start", "kind": "on_load"}}]}}"#
        )
        .unwrap();
        let document = load_flowchart(good.path()).await.unwrap();
        assert_eq!(document["nodes"][0]["id"], "start");

        let mut dangling = NamedTempFile::new().unwrap();
        write!(
            dangling,
            r#"{{"nodes": [{{"id": "e", "kind": "edge", "from": "a", "to": "b"}}]}}"#
        )
        .unwrap();
        assert!(load_flowchart(dangling.path()).await.is_err());
        assert!(load_flowchart(Path::new("/nonexistent/flow.json"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn build_dispatcher_registers_flowchart_service() {
        let (dispatcher, flowcharts) = build_dispatcher(&Settings::default(), None).unwrap();
        let err = dispatcher.register_action_service(flowcharts).unwrap_err();
        assert!(matches!(err, DispatchError::RegistrationConflict { .. }));
    }
}
