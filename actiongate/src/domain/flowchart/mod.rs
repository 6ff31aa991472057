pub mod aggregate;
pub mod value_object;

pub use aggregate::{Flowchart, FlowchartDocument, FlowchartError};
pub use value_object::{Node, NodeId, NodeKind};
