pub mod service;

pub use service::{FlowchartService, FLOWCHART_HANDLER_ID};
