//! Slice hoisting pass.
//!
//! Moves a slice in front of the chain of unary elementwise ops feeding it,
//! so the chain computes on the smaller, sliced tensor.

use kiln_core::{
    Edit, EditList, Error, Graph, NodeId, OutPort, Pass, PassContext, PassStatus, Result,
    TensorDesc,
};
use tracing::debug;

/// Pass that splices slice-family nodes ahead of elementwise chains.
///
/// Walking backward from the slice, a predecessor joins the chain while it
/// is classified elementwise and shape preserving, has exactly one consumer,
/// has no control edges, and keeps its input dtype. A dtype change ends the
/// chain at that node.
///
/// ```text
/// before:  src -> e1 -> e2 -> slice -> users
/// after:   src -> slice -> e1 -> e2 -> users
/// ```
pub struct SliceHoistPass;

impl SliceHoistPass {
    /// Create a new slice hoisting pass.
    pub fn new() -> Self {
        Self
    }

    /// Collect the chain feeding `slice`, nearest node first.
    fn collect_chain(
        &self,
        graph: &Graph,
        ctx: &PassContext,
        slice: NodeId,
    ) -> Result<Vec<NodeId>> {
        let mut chain = Vec::new();
        let mut cursor = graph.producer(slice.input(0))?;

        while let Some(port) = cursor {
            let node = graph.node(port.node)?;
            if port.index != 0
                || !ctx.classifier().is_elementwise_shape_preserving(node)
                || node.consumer_count() != 1
                || node.has_control_edges()
            {
                break;
            }
            let input = node.input(0)?;
            if input.peer().is_none() {
                break;
            }
            if input.desc.dtype != node.output(0)?.desc.dtype {
                debug!(node = %node.name, "slice hoist stops at dtype change");
                break;
            }

            chain.push(port.node);
            cursor = input.peer();
        }
        Ok(chain)
    }

    fn hoist(&self, graph: &mut Graph, slice: NodeId, chain: &[NodeId]) -> Result<()> {
        let (Some(&last), Some(&first)) = (chain.first(), chain.last()) else {
            return Ok(());
        };
        let src: OutPort = graph.producer(first.input(0))?.ok_or_else(|| {
            Error::InvalidGraph(format!("Chain node {} lost its producer", first))
        })?;

        let slice_node = graph.node(slice)?;
        let sliced = slice_node.output(0)?.desc.clone();
        let users = slice_node.output(0)?.peers().to_vec();
        let chain_input = graph.node(first)?.input(0)?.desc.clone();

        let mut edits = EditList::new();
        edits.push(Edit::RemoveEdge {
            src: last.output(0),
            dst: slice.input(0),
        });
        edits.push(Edit::RelinkInput {
            dst: first.input(0),
            src: slice.output(0),
        });
        edits.push(Edit::AddEdge {
            src,
            dst: slice.input(0),
        });
        for user in users {
            edits.push(Edit::RelinkInput {
                dst: user,
                src: last.output(0),
            });
        }

        edits.push(Edit::SetInputDesc {
            port: slice.input(0),
            desc: chain_input,
        });
        for &id in chain {
            let node = graph.node(id)?;
            edits.push(Edit::SetInputDesc {
                port: id.input(0),
                desc: reshaped(&node.input(0)?.desc, &sliced),
            });
            edits.push(Edit::SetOutputDesc {
                port: id.output(0),
                desc: reshaped(&node.output(0)?.desc, &sliced),
            });
        }

        edits.apply(graph)?;
        Ok(())
    }
}

/// `desc` with the shape and symbolic shape of `like`.
fn reshaped(desc: &TensorDesc, like: &TensorDesc) -> TensorDesc {
    TensorDesc {
        shape: like.shape.clone(),
        symbolic: like.symbolic.clone(),
        ..desc.clone()
    }
}

impl Default for SliceHoistPass {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for SliceHoistPass {
    fn name(&self) -> &str {
        "slice_hoist"
    }

    fn run(&self, graph: &mut Graph, ctx: &PassContext) -> Result<PassStatus> {
        let mut hoisted = 0usize;

        for slice in graph.nodes_of_kind(|op| op.is_slice_family()) {
            let chain = self.collect_chain(graph, ctx, slice)?;
            if chain.is_empty() {
                continue;
            }
            debug!(
                node = %graph.node(slice)?.name,
                chain_len = chain.len(),
                "hoisting slice"
            );
            self.hoist(graph, slice, &chain)?;
            hoisted += 1;
        }

        if hoisted > 0 {
            debug!(hoisted, "hoisted slices through elementwise chains");
        }
        Ok(PassStatus::from_changed(hoisted > 0))
    }
}
