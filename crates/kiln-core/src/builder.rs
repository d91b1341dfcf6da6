//! Node descriptors and a fluent builder for graph construction.
//!
//! `NodeDesc` is what the front-end hands to [`Graph::add_node`]; passes use
//! the same builder when they insert nodes of their own.

use crate::ir::{Graph, NodeId};
use crate::op_kind::OpKind;
use crate::types::{AttrValue, TensorDesc};
use std::collections::HashMap;

/// Everything needed to create a node: identity, attributes, slot descriptors.
#[derive(Debug, Clone)]
pub struct NodeDesc {
    pub name: String,
    pub op: OpKind,
    pub attributes: HashMap<String, AttrValue>,
    pub inputs: Vec<TensorDesc>,
    pub outputs: Vec<TensorDesc>,
}

impl NodeDesc {
    pub fn new(name: impl Into<String>, op: impl Into<OpKind>) -> Self {
        Self {
            name: name.into(),
            op: op.into(),
            attributes: HashMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

/// Fluent builder for [`NodeDesc`].
///
/// # Example
///
/// ```
/// use kiln_core::{DataType, Graph, NodeBuilder, TensorDesc};
///
/// let mut graph = Graph::new("main");
/// let relu = NodeBuilder::new("relu", "Relu")
///     .input(TensorDesc::fixed(DataType::F32, &[4]))
///     .output(TensorDesc::fixed(DataType::F32, &[4]))
///     .add_to(&mut graph);
/// assert_eq!(graph.node(relu).unwrap().name, "relu");
/// ```
#[derive(Debug, Clone)]
pub struct NodeBuilder {
    desc: NodeDesc,
}

impl NodeBuilder {
    pub fn new(name: impl Into<String>, op: impl Into<OpKind>) -> Self {
        Self {
            desc: NodeDesc::new(name, op),
        }
    }

    /// Set an attribute.
    pub fn attr(mut self, name: impl Into<String>, value: AttrValue) -> Self {
        self.desc.attributes.insert(name.into(), value);
        self
    }

    /// Append an input-data slot.
    pub fn input(mut self, desc: TensorDesc) -> Self {
        self.desc.inputs.push(desc);
        self
    }

    /// Append an output-data slot.
    pub fn output(mut self, desc: TensorDesc) -> Self {
        self.desc.outputs.push(desc);
        self
    }

    pub fn build(self) -> NodeDesc {
        self.desc
    }

    /// Build the descriptor and add the node to a graph.
    pub fn add_to(self, graph: &mut Graph) -> NodeId {
        graph.add_node(self.desc)
    }
}
