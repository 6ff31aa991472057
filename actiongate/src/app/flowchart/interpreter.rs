use crate::domain::flowchart::{Flowchart, FlowchartError, NodeId, NodeKind};
use serde::Serialize;
use serde_json::Value;
use std::mem;
use tracing::{debug, info};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LogicalThread {
    pub id: u64,
    pub current: NodeId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Idle,
    Shutdown,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StepReport {
    pub emitted: Vec<String>,
    pub state: RunState,
}

/// Cooperative interpreter: every active thread advances one node per step.
#[derive(Debug)]
pub struct FlowchartInterpreter {
    chart: Flowchart,
    threads: Vec<LogicalThread>,
    next_thread: u64,
    steps: u64,
    halted: bool,
}

impl FlowchartInterpreter {
    /// Spawns one thread per edge leaving each `OnLoad` node.
    pub fn load(chart: Flowchart) -> Self {
        let starts: Vec<NodeId> = chart
            .entry_points()
            .flat_map(|entry| chart.outgoing(entry))
            .collect();
        let mut interpreter = Self {
            chart,
            threads: Vec::with_capacity(starts.len()),
            next_thread: 0,
            steps: 0,
            halted: false,
        };
        for start in starts {
            interpreter.spawn(start);
        }
        debug!(threads = interpreter.threads.len(), "flowchart loaded");
        interpreter
    }

    fn spawn(&mut self, current: NodeId) {
        self.threads.push(LogicalThread {
            id: self.next_thread,
            current,
        });
        self.next_thread += 1;
    }

    pub fn threads(&self) -> &[LogicalThread] {
        &self.threads
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn state(&self) -> RunState {
        if self.halted {
            RunState::Shutdown
        } else if self.threads.is_empty() {
            RunState::Idle
        } else {
            RunState::Running
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state() != RunState::Running
    }

    /// Advances every thread by one node. Executing a data node halts the
    /// run and surfaces the error.
    pub fn step(&mut self) -> Result<StepReport, FlowchartError> {
        let mut emitted = Vec::new();
        if self.is_finished() {
            return Ok(StepReport {
                emitted,
                state: self.state(),
            });
        }
        self.steps += 1;

        let mut survivors = Vec::with_capacity(self.threads.len());
        for thread in mem::take(&mut self.threads) {
            let node = self.chart.node(&thread.current)?;
            match &node.kind {
                NodeKind::ServerLog { message } => {
                    let line = render(self.chart.literal(&node.id, message)?);
                    info!(thread = thread.id, node = %node.id, "{line}");
                    emitted.push(line);
                    if let Some(next) = self.chart.outgoing(&node.id).into_iter().next() {
                        survivors.push(LogicalThread {
                            id: thread.id,
                            current: next,
                        });
                    }
                }
                NodeKind::ShutdownServer => {
                    info!(thread = thread.id, node = %node.id, "flowchart shutdown");
                    self.halted = true;
                    return Ok(StepReport {
                        emitted,
                        state: RunState::Shutdown,
                    });
                }
                NodeKind::OnLoad => {
                    debug!(thread = thread.id, "thread reached on_load, terminating");
                }
                NodeKind::Edge { .. } | NodeKind::Literal { .. } => {
                    self.halted = true;
                    return Err(FlowchartError::NotExecutable {
                        node: node.id.clone(),
                        kind: node.kind.name(),
                    });
                }
            }
        }
        self.threads = survivors;
        Ok(StepReport {
            emitted,
            state: self.state(),
        })
    }

    /// Steps until the run is no longer running or `max_steps` is reached.
    pub fn run(&mut self, max_steps: usize) -> Result<StepReport, FlowchartError> {
        let mut emitted = Vec::new();
        for _ in 0..max_steps {
            if self.is_finished() {
                break;
            }
            let report = self.step()?;
            emitted.extend(report.emitted);
        }
        Ok(StepReport {
            emitted,
            state: self.state(),
        })
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
