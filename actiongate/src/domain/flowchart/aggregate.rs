use super::value_object::{Node, NodeId, NodeKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FlowchartError {
    #[error("duplicate node id: {0}")]
    DuplicateNode(NodeId),
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),
    #[error("edge {edge} points at missing node {endpoint}")]
    DanglingEdge { edge: NodeId, endpoint: NodeId },
    #[error("node {node} references {target}, which is not a literal")]
    NotLiteral { node: NodeId, target: NodeId },
    #[error("node {node} ({kind}) is data and cannot be executed")]
    NotExecutable { node: NodeId, kind: &'static str },
}

/// Serialized form: `{"nodes": [...]}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FlowchartDocument {
    pub nodes: Vec<Node>,
}

/// A validated graph of nodes keyed by id. Declaration order is kept so that
/// edge traversal is deterministic.
#[derive(Clone, Debug)]
pub struct Flowchart {
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
}

impl Flowchart {
    pub fn new(nodes: Vec<Node>) -> Result<Self, FlowchartError> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (position, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), position).is_some() {
                return Err(FlowchartError::DuplicateNode(node.id.clone()));
            }
        }
        let chart = Self { nodes, index };
        chart.check_references()?;
        Ok(chart)
    }

    pub fn from_document(document: FlowchartDocument) -> Result<Self, FlowchartError> {
        Self::new(document.nodes)
    }

    fn check_references(&self) -> Result<(), FlowchartError> {
        for node in &self.nodes {
            match &node.kind {
                NodeKind::Edge { from, to } => {
                    for endpoint in [from, to] {
                        if !self.index.contains_key(endpoint) {
                            return Err(FlowchartError::DanglingEdge {
                                edge: node.id.clone(),
                                endpoint: endpoint.clone(),
                            });
                        }
                    }
                }
                NodeKind::ServerLog { message } => {
                    self.literal(&node.id, message)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn node(&self, id: &NodeId) -> Result<&Node, FlowchartError> {
        self.index
            .get(id)
            .map(|position| &self.nodes[*position])
            .ok_or_else(|| FlowchartError::UnknownNode(id.clone()))
    }

    /// Resolves the literal `target` on behalf of `referrer`.
    pub fn literal(&self, referrer: &NodeId, target: &NodeId) -> Result<&Value, FlowchartError> {
        match &self.node(target)?.kind {
            NodeKind::Literal { value } => Ok(value),
            _ => Err(FlowchartError::NotLiteral {
                node: referrer.clone(),
                target: target.clone(),
            }),
        }
    }

    /// Targets of every edge leaving `id`, in declaration order.
    pub fn outgoing(&self, id: &NodeId) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter_map(|node| match &node.kind {
                NodeKind::Edge { from, to } if from == id => Some(to.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn entry_points(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes
            .iter()
            .filter(|node| matches!(node.kind, NodeKind::OnLoad))
            .map(|node| &node.id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
