//! Staged graph edits.
//!
//! A pass that discovers all of its rewrites before touching the graph can
//! record them in an [`EditList`] and apply them in one go. Application
//! checks that every referenced node is live before the first edit runs, so
//! an edit list built against a stale snapshot fails without side effects.

use crate::Result;
use crate::ir::{Graph, InPort, NodeId, OutPort};
use crate::types::{AttrValue, TensorDesc};

/// A single structural or attribute change.
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    AddEdge { src: OutPort, dst: InPort },
    RemoveEdge { src: OutPort, dst: InPort },
    /// Replace the producer of `dst` with `src`.
    RelinkInput { dst: InPort, src: OutPort },
    AddControlEdge { src: NodeId, dst: NodeId },
    RemoveControlEdge { src: NodeId, dst: NodeId },
    SetAttr {
        node: NodeId,
        name: String,
        value: AttrValue,
    },
    /// Set an attribute on an output-slot descriptor.
    SetOutputAttr {
        port: OutPort,
        name: String,
        value: AttrValue,
    },
    SetInputDesc { port: InPort, desc: TensorDesc },
    SetOutputDesc { port: OutPort, desc: TensorDesc },
    /// Splice a node out, see [`Graph::bypass_node`].
    BypassNode {
        node: NodeId,
        input: usize,
        output: usize,
    },
    /// Unlink and delete a node.
    RemoveNode(NodeId),
}

impl Edit {
    /// Fail if any node or port this edit names does not exist.
    fn check(&self, graph: &Graph) -> Result<()> {
        match self {
            Edit::AddEdge { src, dst }
            | Edit::RemoveEdge { src, dst }
            | Edit::RelinkInput { dst, src } => {
                graph.node(src.node)?.output(src.index)?;
                graph.node(dst.node)?.input(dst.index)?;
            }
            Edit::AddControlEdge { src, dst } | Edit::RemoveControlEdge { src, dst } => {
                graph.node(*src)?;
                graph.node(*dst)?;
            }
            Edit::SetAttr { node, .. } | Edit::RemoveNode(node) => {
                graph.node(*node)?;
            }
            Edit::BypassNode {
                node,
                input,
                output,
            } => {
                let node = graph.node(*node)?;
                node.input(*input)?;
                node.output(*output)?;
            }
            Edit::SetOutputAttr { port, .. } | Edit::SetOutputDesc { port, .. } => {
                graph.node(port.node)?.output(port.index)?;
            }
            Edit::SetInputDesc { port, .. } => {
                graph.node(port.node)?.input(port.index)?;
            }
        }
        Ok(())
    }

    fn apply(self, graph: &mut Graph) -> Result<()> {
        match self {
            Edit::AddEdge { src, dst } => graph.add_edge(src, dst),
            Edit::RemoveEdge { src, dst } => graph.remove_edge(src, dst),
            Edit::RelinkInput { dst, src } => graph.relink_input(dst, src),
            Edit::AddControlEdge { src, dst } => graph.add_control_edge(src, dst),
            Edit::RemoveControlEdge { src, dst } => graph.remove_control_edge(src, dst),
            Edit::SetAttr { node, name, value } => {
                graph.node_mut(node)?.set_attr(name, value);
                Ok(())
            }
            Edit::SetOutputAttr { port, name, value } => {
                graph
                    .node_mut(port.node)?
                    .output_desc_mut(port.index)?
                    .attrs
                    .insert(name, value);
                Ok(())
            }
            Edit::SetInputDesc { port, desc } => {
                *graph.node_mut(port.node)?.input_desc_mut(port.index)? = desc;
                Ok(())
            }
            Edit::SetOutputDesc { port, desc } => {
                *graph.node_mut(port.node)?.output_desc_mut(port.index)? = desc;
                Ok(())
            }
            Edit::BypassNode {
                node,
                input,
                output,
            } => graph.bypass_node(node, input, output),
            Edit::RemoveNode(node) => graph.remove_node_force(node),
        }
    }
}

/// Ordered list of staged edits.
#[derive(Debug, Clone, Default)]
pub struct EditList {
    edits: Vec<Edit>,
}

impl EditList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, edit: Edit) {
        self.edits.push(edit);
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Edit> {
        self.edits.iter()
    }

    /// Check that every node and port named by the list exists.
    pub fn check(&self, graph: &Graph) -> Result<()> {
        self.edits.iter().try_for_each(|edit| edit.check(graph))
    }

    /// Apply all edits in order and return how many were applied.
    ///
    /// # Errors
    ///
    /// Fails before touching the graph if any edit names a node or port
    /// that does not exist. An edit that fails midway (e.g. a second
    /// producer) aborts the rest; earlier edits stay applied.
    pub fn apply(self, graph: &mut Graph) -> Result<usize> {
        self.check(graph)?;

        let count = self.edits.len();
        for edit in self.edits {
            edit.apply(graph)?;
        }
        Ok(count)
    }
}

impl Extend<Edit> for EditList {
    fn extend<T: IntoIterator<Item = Edit>>(&mut self, iter: T) {
        self.edits.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::builder::NodeBuilder;
    use crate::types::DataType;

    fn unary(graph: &mut Graph, name: &str) -> NodeId {
        NodeBuilder::new(name, "Relu")
            .input(TensorDesc::fixed(DataType::F32, &[2]))
            .output(TensorDesc::fixed(DataType::F32, &[2]))
            .add_to(graph)
    }

    #[test]
    fn test_apply_in_order() {
        let mut graph = Graph::default();
        let a = unary(&mut graph, "a");
        let b = unary(&mut graph, "b");
        let c = unary(&mut graph, "c");
        graph.add_edge(a.output(0), c.input(0)).unwrap();

        let mut edits = EditList::new();
        edits.push(Edit::RelinkInput {
            dst: c.input(0),
            src: b.output(0),
        });
        edits.push(Edit::SetAttr {
            node: c,
            name: "visited".to_string(),
            value: AttrValue::Bool(true),
        });
        edits.push(Edit::RemoveNode(a));

        assert_eq!(edits.apply(&mut graph).unwrap(), 3);
        assert_eq!(graph.producer(c.input(0)).unwrap(), Some(b.output(0)));
        assert_eq!(graph.node(c).unwrap().attr_bool("visited"), Some(true));
        assert!(!graph.contains(a));
        graph.validate().unwrap();
    }

    #[test]
    fn test_stale_handle_rejected_before_any_edit() {
        let mut graph = Graph::default();
        let a = unary(&mut graph, "a");
        let b = unary(&mut graph, "b");
        let gone = unary(&mut graph, "gone");
        graph.remove_node(gone).unwrap();

        let mut edits = EditList::new();
        edits.push(Edit::AddEdge {
            src: a.output(0),
            dst: b.input(0),
        });
        edits.push(Edit::RemoveNode(gone));

        let err = edits.apply(&mut graph).unwrap_err();
        assert!(matches!(err, Error::NodeNotFound(_)));
        assert_eq!(graph.producer(b.input(0)).unwrap(), None);
    }

    #[test]
    fn test_missing_port_rejected_before_any_edit() {
        let mut graph = Graph::default();
        let a = unary(&mut graph, "a");
        let b = unary(&mut graph, "b");

        let mut edits = EditList::new();
        edits.push(Edit::SetAttr {
            node: b,
            name: "visited".to_string(),
            value: AttrValue::Bool(true),
        });
        edits.push(Edit::AddEdge {
            src: a.output(0),
            dst: b.input(3),
        });

        assert!(edits.check(&graph).is_err());
        assert!(edits.apply(&mut graph).is_err());
        assert_eq!(graph.node(b).unwrap().attr_bool("visited"), None);
    }
}
