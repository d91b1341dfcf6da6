//! Transpose-after-broadcast elimination pass.
//!
//! `ZerosLike`, `OnesLike` and scalar `Fill` produce the same value at every
//! position, so transposing their output only changes its shape. The shape
//! is moved onto the producer and the transpose is removed.

use kiln_core::{Graph, NodeId, OpKind, OutPort, Pass, PassContext, PassStatus, Result};
use tracing::debug;

/// Index of the `Fill` input carrying the fill value.
const FILL_VALUE_INPUT: usize = 1;

/// Pass that removes transposes of layout-independent broadcast constants.
pub struct TransposeBroadcastPass;

impl TransposeBroadcastPass {
    /// Create a new transpose/broadcast elimination pass.
    pub fn new() -> Self {
        Self
    }

    /// The producer a transpose can be folded into, if any.
    fn foldable_producer(
        &self,
        graph: &Graph,
        ctx: &PassContext,
        transpose: NodeId,
    ) -> Result<Option<OutPort>> {
        let node = graph.node(transpose)?;
        let Some(src) = graph.producer(transpose.input(0))? else {
            return Ok(None);
        };
        let producer = graph.node(src.node)?;
        if !producer.op.is_shape_agnostic_fill() {
            return Ok(None);
        }
        if producer.consumer_count() != 1 {
            debug!(node = %node.name, reason = "producer has other consumers", "transpose kept");
            return Ok(None);
        }

        if producer.op == OpKind::Fill {
            let value_rank = match ctx
                .constants()
                .constant_input(graph, src.node.input(FILL_VALUE_INPUT))?
            {
                Some(value) => Some(value.ndim()),
                None => producer
                    .input(FILL_VALUE_INPUT)
                    .ok()
                    .and_then(|slot| slot.desc.shape.ndim()),
            };
            match value_rank {
                Some(rank) if rank <= 1 => {}
                Some(_) => {
                    debug!(node = %node.name, reason = "tensor-valued fill", "transpose kept");
                    return Ok(None);
                }
                None => {
                    debug!(node = %node.name, reason = "fill value rank unknown", "transpose kept");
                    return Ok(None);
                }
            }
        }

        Ok(Some(src))
    }
}

impl Default for TransposeBroadcastPass {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for TransposeBroadcastPass {
    fn name(&self) -> &str {
        "transpose_broadcast_elimination"
    }

    fn run(&self, graph: &mut Graph, ctx: &PassContext) -> Result<PassStatus> {
        let mut removed = 0usize;

        for transpose in graph.nodes_of_kind(|op| op.is_transpose_family()) {
            let Some(src) = self.foldable_producer(graph, ctx, transpose)? else {
                continue;
            };

            let transposed = graph.node(transpose)?.output(0)?.desc.clone();
            let desc = graph.node_mut(src.node)?.output_desc_mut(src.index)?;
            desc.shape = transposed.shape;
            if transposed.symbolic.is_some() {
                desc.symbolic = transposed.symbolic;
            }

            graph.bypass_node(transpose, 0, 0)?;
            graph.remove_node(transpose)?;
            removed += 1;
        }

        if removed > 0 {
            debug!(removed, "removed transposes of broadcast constants");
        }
        Ok(PassStatus::from_changed(removed > 0))
    }
}
