pub mod dispatch;
pub mod flowchart;
