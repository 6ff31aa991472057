pub mod interpreter;

pub use interpreter::{FlowchartInterpreter, LogicalThread, RunState, StepReport};
