//! Aliasing-safety copy insertion pass.
//!
//! A reference node writes its output into the storage of one of its
//! inputs. If that input's producer also feeds other nodes which run after
//! the reference node, they would observe the overwritten value. This pass
//! puts an explicit `MemcpyAsync` between the producer and the reference
//! input, and moves the downstream readers onto the copy.

use kiln_core::{
    ConnectionMatrix, Error, Graph, InPort, NodeBuilder, NodeId, OpKind, OptLevel, OutPort, Pass,
    PassContext, PassStatus, Result,
};
use std::collections::HashSet;
use tracing::debug;

/// Pass that inserts copies in front of aliased inputs of reference nodes.
///
/// Producers that already own stable storage (variables and legacy
/// control-flow ops) are left alone, as is a copy that feeds no other
/// aliased input. Aliased inputs of other reference nodes are never moved as
/// readers: every reference gets its own copy. The connection matrix is
/// built once per run and extended with every copy node as it is inserted,
/// so reachability queries after an insertion see the new edges.
///
/// There is no rollback: if an insertion fails midway, earlier copies stay.
/// Missing producers are detected before the first insertion.
pub struct RefCopyInsertionPass;

impl RefCopyInsertionPass {
    /// Create a new copy insertion pass.
    pub fn new() -> Self {
        Self
    }

    /// `(reference node, aliased input)` pairs, each checked to have a
    /// producer.
    fn aliased_inputs(&self, graph: &Graph) -> Result<Vec<(NodeId, usize)>> {
        let mut targets = Vec::new();
        for node in graph.nodes().filter(|node| node.is_reference()) {
            let mut inputs: Vec<usize> = node.ref_outputs().into_iter().map(|(_, k)| k).collect();
            inputs.sort_unstable();
            inputs.dedup();

            for k in inputs {
                if graph.producer(node.id().input(k))?.is_none() {
                    return Err(Error::InvalidGraph(format!(
                        "Reference node '{}' has no producer on aliased input {}",
                        node.name, k
                    )));
                }
                targets.push((node.id(), k));
            }
        }
        Ok(targets)
    }

    /// Whether `src` can be aliased by `port` in place.
    fn owns_storage(
        &self,
        graph: &Graph,
        src: OutPort,
        aliased: &HashSet<InPort>,
    ) -> Result<bool> {
        let op = &graph.node(src.node)?.op;
        if op.is_variable_like() || op.is_legacy_control() {
            return Ok(true);
        }
        if *op != OpKind::MemcpyAsync {
            return Ok(false);
        }
        // A copy is private to one aliased input.
        let sharing = graph
            .consumers(src)?
            .iter()
            .filter(|port| aliased.contains(*port))
            .count();
        Ok(sharing == 1)
    }

    fn insert_copy(
        &self,
        graph: &mut Graph,
        matrix: &ConnectionMatrix,
        aliased: &HashSet<InPort>,
        reference: NodeId,
        input: usize,
        src: OutPort,
    ) -> Result<NodeId> {
        let name = format!("{}_copy_{}", graph.node(reference)?.name, input);
        let mut desc = graph.node(src.node)?.output(src.index)?.desc.clone();
        desc.attrs.clear();

        let readers: Vec<InPort> = graph
            .consumers(src)?
            .iter()
            .copied()
            .filter(|port| {
                port.node != reference
                    && !aliased.contains(port)
                    && matrix.is_connected(reference, port.node)
            })
            .collect();

        let copy = NodeBuilder::new(name, OpKind::MemcpyAsync)
            .input(desc.clone())
            .output(desc)
            .add_to(graph);
        graph.add_edge(src, copy.input(0))?;
        graph.relink_input(reference.input(input), copy.output(0))?;
        for port in readers {
            debug!(reader = %graph.node(port.node)?.name, "reader moved onto copy");
            graph.relink_input(port, copy.output(0))?;
        }
        Ok(copy)
    }
}

impl Default for RefCopyInsertionPass {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for RefCopyInsertionPass {
    fn name(&self) -> &str {
        "ref_copy_insertion"
    }

    fn min_opt_level(&self) -> OptLevel {
        OptLevel::O0
    }

    fn run(&self, graph: &mut Graph, _ctx: &PassContext) -> Result<PassStatus> {
        let targets = self.aliased_inputs(graph)?;
        if targets.is_empty() {
            return Ok(PassStatus::NotChanged);
        }

        let aliased: HashSet<InPort> = targets
            .iter()
            .map(|&(reference, input)| reference.input(input))
            .collect();
        let mut matrix = ConnectionMatrix::generate(graph)?;
        let mut inserted = 0usize;

        for (reference, input) in targets {
            let src = graph.producer(reference.input(input))?.ok_or_else(|| {
                Error::InvalidGraph(format!(
                    "Reference node {} lost its producer on input {}",
                    reference, input
                ))
            })?;
            if self.owns_storage(graph, src, &aliased)? {
                debug!(
                    node = %graph.node(reference)?.name,
                    producer = %graph.node(src.node)?.name,
                    "aliased input already safe"
                );
                continue;
            }

            let copy = self.insert_copy(graph, &matrix, &aliased, reference, input, src)?;
            matrix.update(graph, &[copy])?;
            inserted += 1;
        }

        if inserted > 0 {
            debug!(inserted, "inserted aliasing-safety copies");
        }
        Ok(PassStatus::from_changed(inserted > 0))
    }
}
