use crate::app::dispatch::{ActionInvocation, Dispatcher, ServiceAction, ServiceResponse};
use crate::app::flowchart::{FlowchartInterpreter, RunState, StepReport};
use crate::domain::dispatch::{ActionFlags, ActionId, HandlerId};
use crate::domain::flowchart::{Flowchart, FlowchartDocument, FlowchartError};
use crate::ports::datastore::{get_as, DatastoreError};
use crate::ports::dispatch::ActionService;
use crate::settings::DEFAULT_MAX_STEPS;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

pub const FLOWCHART_HANDLER_ID: &str = "flowchart.interpreter";
pub const DEFAULT_MAX_LIVE_RUNS: usize = 32;
pub const DEFAULT_RETAINED_RUNS: usize = 32;
const RUN_NAMESPACE: &str = "flowchart.run";

#[derive(Debug, Error)]
enum FlowchartServiceError {
    #[error("unknown flowchart command: {0}")]
    UnknownCommand(String),
    #[error("missing flowchart document")]
    MissingDocument,
    #[error("malformed flowchart document: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown run: {0}")]
    UnknownRun(String),
    #[error("too many active flowchart runs (limit {0})")]
    TooManyRuns(usize),
    #[error(transparent)]
    Flowchart(#[from] FlowchartError),
    #[error(transparent)]
    Datastore(#[from] DatastoreError),
}

/// Actions granted for one run.
struct RunActions {
    step: ActionId,
    run: ActionId,
    status: ActionId,
    cancel: ActionId,
}

struct RunEntry {
    interpreter: FlowchartInterpreter,
    actions: RunActions,
}

#[derive(Default)]
struct RunTable {
    live: HashMap<String, RunEntry>,
    /// Finished runs whose summary and `status` action are still kept,
    /// oldest first.
    finished: VecDeque<(String, ActionId)>,
}

/// Action service hosting flowchart runs.
///
/// `load` grants `step`, `run`, `status` and `cancel` actions bound to the
/// new run. A finished run loses everything but `status`, which answers from
/// a datastore summary until the run ages out of the retention window.
/// `cancel` drops a run and all four of its actions.
pub struct FlowchartService {
    id: HandlerId,
    max_steps: usize,
    max_live_runs: usize,
    retained_runs: usize,
    runs: Mutex<RunTable>,
}

impl FlowchartService {
    pub fn new(max_steps: usize) -> Self {
        Self {
            id: HandlerId::from_static(FLOWCHART_HANDLER_ID),
            max_steps: max_steps.max(1),
            max_live_runs: DEFAULT_MAX_LIVE_RUNS,
            retained_runs: DEFAULT_RETAINED_RUNS,
            runs: Mutex::new(RunTable::default()),
        }
    }

    pub fn with_run_limits(mut self, max_live_runs: usize, retained_runs: usize) -> Self {
        self.max_live_runs = max_live_runs.max(1);
        self.retained_runs = retained_runs;
        self
    }

    /// Grants a persistent, session-bound action that loads flowcharts.
    pub fn grant_loader(&self, dispatcher: &Dispatcher) -> ServiceAction {
        dispatcher.create_service_action(
            self.id.clone(),
            json!({"command": "load"}),
            ActionFlags::single_use().persistent(),
        )
    }

    async fn execute(
        &self,
        dispatcher: &Dispatcher,
        invocation: ActionInvocation,
    ) -> Result<ServiceResponse, FlowchartServiceError> {
        let command = invocation
            .config
            .get("command")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                invocation
                    .params
                    .field("command")
                    .and_then(|value| value.into_inner().as_str().map(str::to_string))
            })
            .unwrap_or_default();
        let run_id = invocation
            .config
            .get("run")
            .and_then(Value::as_str)
            .map(str::to_string);

        match (command.as_str(), run_id) {
            ("load", _) => self.load(dispatcher, &invocation).await,
            ("step", Some(run_id)) => self.advance(dispatcher, &run_id, 1).await,
            ("run", Some(run_id)) => self.advance(dispatcher, &run_id, self.max_steps).await,
            ("status", Some(run_id)) => self.status(dispatcher, &run_id).await,
            ("cancel", Some(run_id)) => self.cancel(dispatcher, &run_id).await,
            (other, _) => Err(FlowchartServiceError::UnknownCommand(other.to_string())),
        }
    }

    async fn load(
        &self,
        dispatcher: &Dispatcher,
        invocation: &ActionInvocation,
    ) -> Result<ServiceResponse, FlowchartServiceError> {
        let document = invocation
            .params
            .field("flowchart")
            .ok_or(FlowchartServiceError::MissingDocument)?
            .into_inner();
        let document: FlowchartDocument = serde_json::from_value(document)?;
        let chart = Flowchart::from_document(document)?;
        let interpreter = FlowchartInterpreter::load(chart);

        let mut table = self.runs.lock().await;
        if table.live.len() >= self.max_live_runs {
            return Err(FlowchartServiceError::TooManyRuns(self.max_live_runs));
        }

        let run_id = Uuid::new_v4().simple().to_string();
        let bound = |command: &str| {
            dispatcher.create_service_action(
                self.id.clone(),
                json!({"command": command, "run": run_id}),
                ActionFlags::single_use().persistent(),
            )
        };
        let granted = vec![bound("step"), bound("run"), bound("status"), bound("cancel")];
        let actions = RunActions {
            step: granted[0].action_id.clone(),
            run: granted[1].action_id.clone(),
            status: granted[2].action_id.clone(),
            cancel: granted[3].action_id.clone(),
        };

        let payload = json!({
            "run": run_id,
            "threads": interpreter.threads().len(),
            "state": interpreter.state(),
            "actions": {
                "step": actions.step,
                "run": actions.run,
                "status": actions.status,
                "cancel": actions.cancel,
            },
        });
        info!(run = %run_id, threads = interpreter.threads().len(), "flowchart run loaded");
        table.live.insert(
            run_id,
            RunEntry {
                interpreter,
                actions,
            },
        );
        Ok(ServiceResponse::payload(payload, granted))
    }

    async fn advance(
        &self,
        dispatcher: &Dispatcher,
        run_id: &str,
        max_steps: usize,
    ) -> Result<ServiceResponse, FlowchartServiceError> {
        let mut table = self.runs.lock().await;
        let entry = table
            .live
            .get_mut(run_id)
            .ok_or_else(|| FlowchartServiceError::UnknownRun(run_id.to_string()))?;
        let outcome = entry.interpreter.run(max_steps);
        let steps = entry.interpreter.steps();

        let finished = match &outcome {
            Ok(report) => report.state != RunState::Running,
            Err(_) => true,
        };
        if finished {
            self.retire(dispatcher, &mut table, run_id).await;
        }

        let StepReport { emitted, state } = match outcome {
            Ok(report) => report,
            Err(err) => {
                error!(run = %run_id, error = %err, "flowchart run aborted");
                self.record_summary(dispatcher, run_id, RunState::Shutdown, steps, Some(&err))
                    .await;
                return Err(err.into());
            }
        };
        if finished {
            self.record_summary(dispatcher, run_id, state, steps, None)
                .await;
        }
        Ok(ServiceResponse::payload(
            json!({
                "run": run_id,
                "emitted": emitted,
                "state": state,
                "steps": steps,
            }),
            Vec::new(),
        ))
    }

    /// Moves a live run to the finished window, revoking all but `status`.
    /// Runs pushed out of the window lose their `status` action and summary.
    async fn retire(&self, dispatcher: &Dispatcher, table: &mut RunTable, run_id: &str) {
        let Some(entry) = table.live.remove(run_id) else {
            return;
        };
        let RunActions {
            step,
            run,
            status,
            cancel,
        } = entry.actions;
        for action in [&step, &run, &cancel] {
            dispatcher.revoke_action(action);
        }
        table.finished.push_back((run_id.to_string(), status));
        while table.finished.len() > self.retained_runs {
            let Some((expired, status)) = table.finished.pop_front() else {
                break;
            };
            dispatcher.revoke_action(&status);
            dispatcher.datastore().delete(RUN_NAMESPACE, &expired).await;
        }
    }

    async fn cancel(
        &self,
        dispatcher: &Dispatcher,
        run_id: &str,
    ) -> Result<ServiceResponse, FlowchartServiceError> {
        let entry = self
            .runs
            .lock()
            .await
            .live
            .remove(run_id)
            .ok_or_else(|| FlowchartServiceError::UnknownRun(run_id.to_string()))?;
        let RunActions {
            step,
            run,
            status,
            cancel,
        } = &entry.actions;
        for action in [step, run, status, cancel] {
            dispatcher.revoke_action(action);
        }
        let steps = entry.interpreter.steps();
        info!(run = %run_id, steps, "flowchart run cancelled");
        Ok(ServiceResponse::payload(
            json!({"run": run_id, "state": "cancelled", "steps": steps}),
            Vec::new(),
        ))
    }

    async fn status(
        &self,
        dispatcher: &Dispatcher,
        run_id: &str,
    ) -> Result<ServiceResponse, FlowchartServiceError> {
        if let Some(entry) = self.runs.lock().await.live.get(run_id) {
            return Ok(ServiceResponse::payload(
                json!({
                    "run": run_id,
                    "state": entry.interpreter.state(),
                    "threads": entry.interpreter.threads(),
                    "steps": entry.interpreter.steps(),
                }),
                Vec::new(),
            ));
        }
        let store = dispatcher.datastore();
        let summary: Option<Value> = get_as(store.as_ref(), RUN_NAMESPACE, run_id, None).await?;
        let summary =
            summary.ok_or_else(|| FlowchartServiceError::UnknownRun(run_id.to_string()))?;
        Ok(ServiceResponse::payload(summary, Vec::new()))
    }

    async fn record_summary(
        &self,
        dispatcher: &Dispatcher,
        run_id: &str,
        state: RunState,
        steps: u64,
        failure: Option<&FlowchartError>,
    ) {
        if self.retained_runs == 0 {
            return;
        }
        let summary = json!({
            "run": run_id,
            "state": state,
            "threads": [],
            "steps": steps,
            "error": failure.map(ToString::to_string),
        });
        dispatcher
            .datastore()
            .put(RUN_NAMESPACE, run_id, summary)
            .await;
    }
}

impl Default for FlowchartService {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STEPS)
    }
}

#[async_trait]
impl ActionService for FlowchartService {
    fn id(&self) -> HandlerId {
        self.id.clone()
    }

    async fn handle_event(
        &self,
        dispatcher: &Dispatcher,
        invocation: ActionInvocation,
    ) -> ServiceResponse {
        match self.execute(dispatcher, invocation).await {
            Ok(response) => response,
            Err(err) => ServiceResponse::error(err.to_string()),
        }
    }
}
