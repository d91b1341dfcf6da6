//! Resource-identity propagation pass.
//!
//! Stateful stack ops share an opaque handle created by a `Stack` source.
//! This pass traces each consumer's handle back to its source through
//! handle-forwarding ops and stamps every op of one resource with the same
//! integer handle id.

use kiln_core::{
    AttrValue, Edit, EditList, Error, Graph, NodeId, OpKind, OptLevel, Pass, PassContext,
    PassStatus, Result,
};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Attribute carrying the shared handle id of a resource group.
pub const HANDLE_ID_ATTR: &str = "_handle_id";

/// Attribute carrying the constant sizing operand of a resource source.
pub const MAX_SIZE_ATTR: &str = "max_size";

/// Input of a consumer op carrying the resource handle.
const HANDLE_INPUT: usize = 0;

/// Input of a handle-forwarding op that carries the handle to `output`, or
/// `None` if the op doesn't forward handles on that output.
fn forwarded_input(op: &OpKind, output: usize) -> Option<usize> {
    match (op, output) {
        (
            OpKind::Identity
            | OpKind::Enter
            | OpKind::RefEnter
            | OpKind::Exit
            | OpKind::NextIteration
            | OpKind::Merge
            | OpKind::RefMerge,
            0,
        ) => Some(0),
        (OpKind::Switch | OpKind::RefSwitch, 0 | 1) => Some(0),
        _ => None,
    }
}

/// One resource: its source and every consumer resolved to it.
#[derive(Debug)]
struct HandleGroup {
    source: NodeId,
    members: Vec<NodeId>,
}

/// Pass that assigns shared handle ids to resource sources and consumers.
///
/// Only the graph it is given is processed, not its subgraphs. A consumer
/// whose handle cannot be traced to a source fails the pass with
/// [`Error::UnresolvedResource`] before any attribute is written.
pub struct ResourceIdentityPass;

impl ResourceIdentityPass {
    /// Create a new resource identity pass.
    pub fn new() -> Self {
        Self
    }

    /// Follow a consumer's handle input back to its source.
    fn trace_source(&self, graph: &Graph, consumer: NodeId) -> Result<NodeId> {
        let consumer_name = &graph.node(consumer)?.name;
        let unresolved = |reason: String| Error::UnresolvedResource {
            node: consumer_name.clone(),
            reason,
        };

        let mut visited = HashSet::new();
        let mut port = graph
            .producer(consumer.input(HANDLE_INPUT))?
            .ok_or_else(|| unresolved("handle input has no producer".to_string()))?;

        loop {
            let node = graph.node(port.node)?;
            if node.op.is_resource_source() {
                return Ok(port.node);
            }
            if !visited.insert(port.node) {
                return Err(unresolved(format!("handle cycles through '{}'", node.name)));
            }
            let input = forwarded_input(&node.op, port.index).ok_or_else(|| {
                unresolved(format!(
                    "'{}' ({}) does not forward a handle on output {}",
                    node.name, node.op, port.index
                ))
            })?;
            port = graph.producer(port.node.input(input))?.ok_or_else(|| {
                unresolved(format!("'{}' has no producer on input {}", node.name, input))
            })?;
        }
    }

    fn max_size(&self, graph: &Graph, ctx: &PassContext, source: NodeId) -> Result<Option<i64>> {
        if graph.node(source)?.inputs().is_empty() {
            return Ok(None);
        }
        match ctx.constants().constant_input(graph, source.input(0))? {
            Some(value) => Ok(value.to_i64_vec()?.first().copied()),
            None => Ok(None),
        }
    }
}

impl Default for ResourceIdentityPass {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for ResourceIdentityPass {
    fn name(&self) -> &str {
        "resource_identity"
    }

    fn min_opt_level(&self) -> OptLevel {
        OptLevel::O0
    }

    fn run(&self, graph: &mut Graph, ctx: &PassContext) -> Result<PassStatus> {
        let mut edits = EditList::new();
        let mut groups: Vec<HandleGroup> = Vec::new();
        let mut group_of: HashMap<NodeId, usize> = HashMap::new();

        for source in graph.nodes_of_kind(OpKind::is_resource_source) {
            if let Some(size) = self.max_size(graph, ctx, source)? {
                edits.push(Edit::SetAttr {
                    node: source,
                    name: MAX_SIZE_ATTR.to_string(),
                    value: AttrValue::Int(size),
                });
            }
            group_of.insert(source, groups.len());
            groups.push(HandleGroup {
                source,
                members: vec![source],
            });
        }

        for consumer in graph.nodes_of_kind(OpKind::is_resource_consumer) {
            let source = self.trace_source(graph, consumer)?;
            if let Some(&group) = group_of.get(&source) {
                groups[group].members.push(consumer);
            }
        }

        for (handle_id, group) in groups.iter().enumerate() {
            debug!(
                source = %graph.node(group.source)?.name,
                handle_id,
                members = group.members.len(),
                "resource group"
            );
            for &member in &group.members {
                edits.push(Edit::SetAttr {
                    node: member,
                    name: HANDLE_ID_ATTR.to_string(),
                    value: AttrValue::Int(handle_id as i64),
                });
            }
        }

        // Only count edits that change something, so a rerun reports NotChanged.
        let mut pending = EditList::new();
        for edit in edits.iter() {
            let unchanged = match edit {
                Edit::SetAttr { node, name, value } => {
                    graph.node(*node)?.attr(name) == Some(value)
                }
                _ => false,
            };
            if !unchanged {
                pending.push(edit.clone());
            }
        }

        let changed = pending.apply(graph)?;
        Ok(PassStatus::from_changed(changed > 0))
    }
}
