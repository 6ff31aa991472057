use crate::app::dispatch::{Dispatcher, ServiceAction, ServiceResponse};
use crate::domain::dispatch::{ActionId, SessionId};
use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

const PROMPT: &str = "> ";
const HELP: &str = "commands: ping, flow, help, exit";

/// What the console needs beyond the dispatcher itself.
pub struct ReplContext {
    pub session: SessionId,
    /// Action that loads flowcharts, granted at startup.
    pub loader: Option<ServiceAction>,
    /// Flowchart document `flow` loads.
    pub flowchart: Option<Value>,
}

/// Reads commands from `input` until `exit` or end of input.
pub async fn run_repl<R, W>(
    dispatcher: &Dispatcher,
    context: &ReplContext,
    input: R,
    mut output: W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    loop {
        output.write_all(PROMPT.as_bytes()).await?;
        output.flush().await?;
        let Some(line) = lines.next_line().await.context("reading command")? else {
            break;
        };
        let command = line.trim();
        debug!(command, "repl command");
        match command {
            "" => continue,
            "exit" => break,
            "help" => write_line(&mut output, HELP).await?,
            "ping" => ping(dispatcher, context, &mut output).await?,
            "flow" => flow(dispatcher, context, &mut output).await?,
            other => write_line(&mut output, &format!("Command not found: {other}")).await?,
        }
    }
    output.flush().await?;
    Ok(())
}

async fn ping<W: AsyncWrite + Unpin>(
    dispatcher: &Dispatcher,
    context: &ReplContext,
    output: &mut W,
) -> Result<()> {
    let response = dispatcher
        .request(dispatcher.ping_action(), Value::Null, Some(&context.session))
        .await;
    let line = match response.data.valid_login() {
        Some(true) if response.success => "pong valid login".to_string(),
        Some(false) if response.success => "pong invalid login".to_string(),
        _ => format!("ping failed: {}", describe(&response)),
    };
    write_line(output, &line).await
}

async fn flow<W: AsyncWrite + Unpin>(
    dispatcher: &Dispatcher,
    context: &ReplContext,
    output: &mut W,
) -> Result<()> {
    let (Some(loader), Some(document)) = (&context.loader, &context.flowchart) else {
        return write_line(output, "no flowchart configured").await;
    };
    let loaded = dispatcher
        .request(
            &loader.action_id,
            json!({"flowchart": document}),
            Some(&context.session),
        )
        .await;
    if !loaded.success {
        return write_line(output, &format!("flow failed: {}", describe(&loaded))).await;
    }
    let (Some(run_action), Some(cancel_action)) =
        (granted(&loaded, "run"), granted(&loaded, "cancel"))
    else {
        return write_line(output, "flow failed: run actions not granted").await;
    };

    let finished = dispatcher
        .request(&run_action, Value::Null, Some(&context.session))
        .await;
    if !finished.success {
        return write_line(output, &format!("flow failed: {}", describe(&finished))).await;
    }
    let report = payload(&finished);
    if let Some(emitted) = report.get("emitted").and_then(Value::as_array) {
        for line in emitted {
            let text = line.as_str().map(str::to_string).unwrap_or_else(|| line.to_string());
            write_line(output, &text).await?;
        }
    }
    let state = report.get("state").and_then(Value::as_str).unwrap_or("unknown");
    let steps = report.get("steps").and_then(Value::as_u64).unwrap_or(0);
    if state != "running" {
        return write_line(output, &format!("flowchart {state} after {steps} steps")).await;
    }

    // Step budget spent; release the run and its actions.
    let cancelled = dispatcher
        .request(&cancel_action, Value::Null, Some(&context.session))
        .await;
    let line = if cancelled.success {
        format!("flowchart still running after {steps} steps, cancelled")
    } else {
        format!(
            "flowchart still running after {steps} steps, cancel failed: {}",
            describe(&cancelled)
        )
    };
    write_line(output, &line).await
}

fn payload(response: &ServiceResponse) -> Value {
    serde_json::to_value(&response.data).unwrap_or(Value::Null)
}

fn granted(response: &ServiceResponse, name: &str) -> Option<ActionId> {
    payload(response)
        .get("actions")
        .and_then(|actions| actions.get(name))
        .and_then(Value::as_str)
        .and_then(|raw| ActionId::parse(raw).ok())
}

fn describe(response: &ServiceResponse) -> String {
    response
        .data
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| payload(response).to_string())
}

async fn write_line<W: AsyncWrite + Unpin>(output: &mut W, line: &str) -> Result<()> {
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::datastore::InMemoryDatastore;
    use crate::adapters::flowchart::FlowchartService;
    use crate::domain::dispatch::DispatchEvent;
    use crate::settings::DispatcherSettings;
    use std::collections::HashSet;
    use std::sync::Arc;

    async fn session(dispatcher: &Dispatcher) -> SessionId {
        dispatcher
            .request(dispatcher.create_session_action(), Value::Null, None)
            .await
            .data
            .session_id()
            .cloned()
            .unwrap()
    }

    async fn drive(dispatcher: &Dispatcher, context: &ReplContext, script: &str) -> String {
        let mut output = Vec::new();
        run_repl(dispatcher, context, script.as_bytes(), &mut output)
            .await
            .unwrap();
        String::from_utf8(output).unwrap()
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            &DispatcherSettings::default(),
            Arc::new(InMemoryDatastore::new()),
        )
    }

    #[tokio::test]
    async fn ping_reports_login_state() {
        let dispatcher = dispatcher();
        let context = ReplContext {
            session: session(&dispatcher).await,
            loader: None,
            flowchart: None,
        };
        let transcript = drive(&dispatcher, &context, "ping\nbogus\nexit\nping\n").await;
        assert_eq!(
            transcript,
            "> pong valid login\n> Command not found: bogus\n> "
        );

        let stranger = ReplContext {
            session: SessionId::parse("TKN:unknown").unwrap(),
            loader: None,
            flowchart: None,
        };
        let transcript = drive(&dispatcher, &stranger, "ping\n").await;
        assert!(transcript.contains("pong invalid login"));
    }

    #[tokio::test]
    async fn flow_runs_configured_chart() {
        let dispatcher = dispatcher();
        let service = Arc::new(FlowchartService::new(16));
        dispatcher.register_action_service(service.clone()).unwrap();
        let context = ReplContext {
            session: session(&dispatcher).await,
            loader: Some(service.grant_loader(&dispatcher)),
            flowchart: Some(json!({
                "nodes": [
                    {"id": "start", "kind": "on_load"},
                    {"id": "msg", "kind": "literal", "value": "hello flow"},
                    {"id": "log", "kind": "server_log", "message": "msg"},
                    {"id": "stop", "kind": "shutdown_server"},
                    {"id": "e1", "kind": "edge", "from": "start", "to": "log"},
                    {"id": "e2", "kind": "edge", "from": "log", "to": "stop"}
                ]
            })),
        };
        let transcript = drive(&dispatcher, &context, "flow\nflow\n").await;
        assert_eq!(
            transcript.matches("hello flow\nflowchart shutdown after 2 steps\n").count(),
            2
        );
    }

    #[tokio::test]
    async fn flow_cancels_runs_that_exhaust_their_steps() {
        let dispatcher = dispatcher();
        let service = Arc::new(FlowchartService::new(2));
        dispatcher.register_action_service(service.clone()).unwrap();
        let context = ReplContext {
            session: session(&dispatcher).await,
            loader: Some(service.grant_loader(&dispatcher)),
            flowchart: Some(json!({
                "nodes": [
                    {"id": "start", "kind": "on_load"},
                    {"id": "msg", "kind": "literal", "value": "tick"},
                    {"id": "loop", "kind": "server_log", "message": "msg"},
                    {"id": "e1", "kind": "edge", "from": "start", "to": "loop"},
                    {"id": "e2", "kind": "edge", "from": "loop", "to": "loop"}
                ]
            })),
        };
        let mut events = dispatcher.subscribe();
        let transcript = drive(&dispatcher, &context, &"flow\n".repeat(5)).await;
        assert_eq!(
            transcript
                .matches("flowchart still running after 2 steps, cancelled\n")
                .count(),
            5
        );

        let mut live = HashSet::new();
        while let Ok(envelope) = events.try_recv() {
            match envelope.event {
                DispatchEvent::ActionRegistered { action_id, .. } => {
                    live.insert(action_id);
                }
                DispatchEvent::ActionRevoked { action_id }
                | DispatchEvent::ActionConsumed { action_id } => {
                    live.remove(&action_id);
                }
                _ => {}
            }
        }
        assert!(live.is_empty(), "leaked actions: {live:?}");
    }

    #[tokio::test]
    async fn flow_without_chart_and_help() {
        let dispatcher = dispatcher();
        let context = ReplContext {
            session: session(&dispatcher).await,
            loader: None,
            flowchart: None,
        };
        let transcript = drive(&dispatcher, &context, "help\n\nflow\n").await;
        assert!(transcript.contains(HELP));
        assert!(transcript.contains("no flowchart configured"));
    }
}
