//! Pad-before-Slice elimination pass.
//!
//! A `Pad` whose consumers are all `Slice` nodes reading only from the
//! original, unpadded region computes padding nobody looks at. Each slice is
//! re-pointed at the pad's input with its offsets shifted back by the
//! leading padding, and the pad is deleted.

use kiln_core::context::CONST_VALUE_ATTR;
use kiln_core::{
    AttrValue, ConstTensor, DataType, Edit, EditList, Error, Graph, InPort, NodeBuilder, NodeDesc,
    NodeId, OpKind, OutPort, Pass, PassContext, PassStatus, Result, TensorDesc,
};
use tracing::debug;

const PADDINGS_ATTR: &str = "paddings";
const OFFSETS_ATTR: &str = "offsets";
const SIZE_ATTR: &str = "size";

/// Where a slice window falls relative to the padded layout, on one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AxisWindow {
    /// Entirely inside the original extent.
    Removable,
    /// Entirely inside one padding margin. Blocks the rewrite: the window
    /// reads padding values, and its shifted offset would leave the input.
    MarginOnly,
    /// Crosses a margin boundary, or the window is malformed.
    Unsupported,
}

/// Classify one axis. `size == -1` extends the window to the end of the
/// padded axis.
fn classify_axis(before: i64, extent: i64, after: i64, offset: i64, size: i64) -> AxisWindow {
    if offset < 0 || size < -1 {
        return AxisWindow::Unsupported;
    }
    let Some(unpadded_end) = before.checked_add(extent) else {
        return AxisWindow::Unsupported;
    };
    let Some(padded) = unpadded_end.checked_add(after) else {
        return AxisWindow::Unsupported;
    };
    let end = if size == -1 {
        padded
    } else {
        match offset.checked_add(size) {
            Some(end) => end,
            None => return AxisWindow::Unsupported,
        }
    };
    if end > padded {
        return AxisWindow::Unsupported;
    }

    if offset >= before && end <= unpadded_end {
        AxisWindow::Removable
    } else if end <= before || offset >= unpadded_end {
        AxisWindow::MarginOnly
    } else {
        AxisWindow::Unsupported
    }
}

/// How a slice's rewritten offsets get back into the graph.
#[derive(Debug)]
enum OffsetTarget {
    Attribute,
    /// The constant producer feeds nothing but this slice.
    Producer { node: NodeId, dtype: DataType },
    /// The constant is shared; stage a fresh one.
    NewConst { dtype: DataType },
}

#[derive(Debug)]
struct SliceRewrite {
    slice: NodeId,
    offsets: Vec<i64>,
    target: OffsetTarget,
}

#[derive(Debug)]
struct PadRewrite {
    pad: NodeId,
    src: OutPort,
    slices: Vec<SliceRewrite>,
}

/// Pass that removes `Pad` nodes whose padding no consuming slice reads.
///
/// A pad is rewritten only if every consumer is a `Slice` on its data input
/// and every axis of every window lies inside the unpadded extent. Windows
/// reaching into a margin, pads with control edges, and non-constant
/// paddings or windows leave that pad untouched; other pads in the same
/// graph are still considered.
pub struct PadSliceEliminationPass;

impl PadSliceEliminationPass {
    /// Create a new pad/slice elimination pass.
    pub fn new() -> Self {
        Self
    }

    /// Work out the rewrite for one pad without touching the graph.
    fn plan(&self, graph: &Graph, ctx: &PassContext, pad: NodeId) -> Result<Option<PadRewrite>> {
        let node = graph.node(pad)?;
        let skip = |reason: &str| {
            debug!(node = %node.name, reason, "pad not eliminated");
            Ok(None)
        };

        if node.has_control_edges() {
            return skip("control edges");
        }
        let src = graph.producer(pad.input(0))?.ok_or_else(|| {
            Error::InvalidGraph(format!("Pad node '{}' has no data producer", node.name))
        })?;
        let Some(dims) = node.input(0)?.desc.shape.as_static() else {
            return skip("input shape unknown");
        };
        let rank = dims.len();

        let Some(paddings) = int_operand(graph, ctx, pad, PADDINGS_ATTR, 1)? else {
            return skip("paddings not constant");
        };
        if paddings.len() != 2 * rank {
            return Err(Error::Attribute(format!(
                "Pad node '{}' has {} padding values for rank {}",
                node.name,
                paddings.len(),
                rank
            )));
        }
        if paddings.iter().any(|&p| p < 0) {
            return skip("negative padding");
        }

        let consumers = graph.consumers(pad.output(0))?;
        if consumers.is_empty() || consumers.len() != node.consumer_count() {
            return skip("no consumers on the padded output");
        }

        let mut slices = Vec::with_capacity(consumers.len());
        for &port in consumers {
            let slice = graph.node(port.node)?;
            if slice.op != OpKind::Slice || port.index != 0 {
                return skip("consumer is not a slice");
            }

            let offsets = int_operand(graph, ctx, port.node, OFFSETS_ATTR, 1)?;
            let sizes = int_operand(graph, ctx, port.node, SIZE_ATTR, 2)?;
            let (Some(offsets), Some(sizes)) = (offsets, sizes) else {
                return skip("slice window not constant");
            };
            if offsets.len() != rank || sizes.len() != rank {
                return skip("slice window rank mismatch");
            }

            let mut shifted = Vec::with_capacity(rank);
            for axis in 0..rank {
                let before = paddings[2 * axis];
                let after = paddings[2 * axis + 1];
                let window =
                    classify_axis(before, dims[axis] as i64, after, offsets[axis], sizes[axis]);
                if window != AxisWindow::Removable {
                    debug!(
                        node = %node.name,
                        slice = %slice.name,
                        axis,
                        ?window,
                        "pad not eliminated"
                    );
                    return Ok(None);
                }
                shifted.push(offsets[axis] - before);
            }

            let target = offset_target(graph, ctx, port.node)?;
            slices.push(SliceRewrite {
                slice: port.node,
                offsets: shifted,
                target,
            });
        }

        Ok(Some(PadRewrite { pad, src, slices }))
    }

    fn apply(&self, graph: &mut Graph, rewrite: PadRewrite) -> Result<()> {
        let unpadded = graph.node(rewrite.pad)?.input(0)?.desc.clone();
        let mut edits = EditList::new();
        // Fresh offset constants, created only once the edits check out.
        let mut new_consts: Vec<(InPort, NodeDesc)> = Vec::new();

        for slice in rewrite.slices {
            match slice.target {
                OffsetTarget::Attribute => edits.push(Edit::SetAttr {
                    node: slice.slice,
                    name: OFFSETS_ATTR.to_string(),
                    value: AttrValue::Ints(slice.offsets),
                }),
                OffsetTarget::Producer { node, dtype } => edits.push(Edit::SetAttr {
                    node,
                    name: CONST_VALUE_ATTR.to_string(),
                    value: AttrValue::Tensor(encode_offsets(&slice.offsets, dtype)?),
                }),
                OffsetTarget::NewConst { dtype } => {
                    let name = format!("{}_offsets", graph.node(slice.slice)?.name);
                    let konst = NodeBuilder::new(name, OpKind::Const)
                        .attr(
                            CONST_VALUE_ATTR,
                            AttrValue::Tensor(encode_offsets(&slice.offsets, dtype)?),
                        )
                        .output(TensorDesc::fixed(dtype, &[slice.offsets.len()]))
                        .build();
                    graph.node(slice.slice)?.input(1)?;
                    new_consts.push((slice.slice.input(1), konst));
                }
            }
            edits.push(Edit::SetInputDesc {
                port: slice.slice.input(0),
                desc: unpadded.clone(),
            });
            edits.push(Edit::RelinkInput {
                dst: slice.slice.input(0),
                src: rewrite.src,
            });
        }
        edits.push(Edit::RemoveNode(rewrite.pad));
        edits.check(graph)?;

        for (dst, desc) in new_consts {
            let konst = graph.add_node(desc);
            edits.push(Edit::RelinkInput {
                dst,
                src: konst.output(0),
            });
        }
        edits.apply(graph)?;
        Ok(())
    }
}

impl Default for PadSliceEliminationPass {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for PadSliceEliminationPass {
    fn name(&self) -> &str {
        "pad_slice_elimination"
    }

    fn run(&self, graph: &mut Graph, ctx: &PassContext) -> Result<PassStatus> {
        let mut eliminated = 0usize;

        for pad in graph.nodes_of_kind(|op| *op == OpKind::Pad) {
            if let Some(rewrite) = self.plan(graph, ctx, pad)? {
                self.apply(graph, rewrite)?;
                eliminated += 1;
            }
        }

        if eliminated > 0 {
            debug!(eliminated, "eliminated pads feeding slices");
        }
        Ok(PassStatus::from_changed(eliminated > 0))
    }
}

/// Read an int-list operand from an attribute, or else from a constant
/// input. `None` if neither is available.
fn int_operand(
    graph: &Graph,
    ctx: &PassContext,
    node: NodeId,
    attr: &str,
    input: usize,
) -> Result<Option<Vec<i64>>> {
    let n = graph.node(node)?;
    if let Some(value) = n.attr(attr) {
        return value.as_ints().map(|v| Some(v.to_vec())).ok_or_else(|| {
            Error::Attribute(format!(
                "Attribute '{}' of node '{}' is not an int list",
                attr, n.name
            ))
        });
    }
    if input >= n.inputs().len() {
        return Ok(None);
    }
    match ctx.constants().constant_input(graph, node.input(input))? {
        Some(tensor) => Ok(Some(tensor.to_i64_vec()?)),
        None => Ok(None),
    }
}

fn offset_target(graph: &Graph, ctx: &PassContext, slice: NodeId) -> Result<OffsetTarget> {
    if graph.node(slice)?.attr(OFFSETS_ATTR).is_some() {
        return Ok(OffsetTarget::Attribute);
    }

    let port = slice.input(1);
    let dtype = ctx
        .constants()
        .constant_input(graph, port)?
        .map(|tensor| tensor.dtype)
        .unwrap_or(DataType::I64);
    let src = graph.producer(port)?.ok_or_else(|| {
        Error::InvalidGraph(format!("Slice node {} lost its offsets producer", slice))
    })?;

    if graph.node(src.node)?.consumer_count() == 1 {
        Ok(OffsetTarget::Producer {
            node: src.node,
            dtype,
        })
    } else {
        Ok(OffsetTarget::NewConst { dtype })
    }
}

fn encode_offsets(offsets: &[i64], dtype: DataType) -> Result<ConstTensor> {
    let shape = vec![offsets.len()];
    match dtype {
        DataType::I32 => {
            let narrowed = offsets
                .iter()
                .map(|&v| i32::try_from(v))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::ConstantEvaluation(format!("Offset out of i32 range: {e}")))?;
            Ok(ConstTensor::from_i32(&narrowed, shape))
        }
        _ => Ok(ConstTensor::from_i64(offsets, shape)),
    }
}
