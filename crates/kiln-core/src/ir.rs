//! Intermediate representation for the compiler graph.
//!
//! The IR is a directed dataflow graph where:
//! - **Nodes** (`Node`) are operator instances (e.g. Pad, Slice, StackPush)
//! - **Ports** are the typed connection points of a node: indexed input-data
//!   and output-data slots plus one in-control and one out-control port
//! - **Edges** are peer links between ports, always updated on both sides
//!
//! Nodes live in an arena owned by their `Graph` and are addressed by
//! generation-checked `NodeId` handles. Removing a node bumps the slot
//! generation, so a stale handle fails every lookup instead of aliasing
//! whatever node reuses the slot.
//!
//! An input-data port has at most one producer. An output-data port may fan
//! out to any number of consumers. Control ports carry no value and may have
//! many peers on both sides.

use crate::builder::NodeDesc;
use crate::op_kind::OpKind;
use crate::types::{AttrValue, TensorDesc};
use crate::{Error, Result};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::cell::OnceCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Node attribute marking a node whose outputs alias input storage.
pub const IS_REF_ATTR: &str = "is_ref";

/// Output-descriptor attribute naming the input slot a reference output aliases.
pub const REF_PORT_INDEX_ATTR: &str = "ref_port_index";

// ──────────────────────────────── Handles ────────────────────────────────

/// Generation-checked handle of a node in a graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    /// Arena slot index.
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Slot generation this handle was issued for.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Output-data port `index` of this node.
    pub fn output(self, index: usize) -> OutPort {
        OutPort { node: self, index }
    }

    /// Input-data port `index` of this node.
    pub fn input(self, index: usize) -> InPort {
        InPort { node: self, index }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// An output-data port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutPort {
    pub node: NodeId,
    pub index: usize,
}

/// An input-data port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InPort {
    pub node: NodeId,
    pub index: usize,
}

impl fmt::Display for OutPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:out{}", self.node, self.index)
    }
}

impl fmt::Display for InPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:in{}", self.node, self.index)
    }
}

// ──────────────────────────────── Node ───────────────────────────────────

/// Input-data slot: descriptor plus at most one producer.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSlot {
    pub desc: TensorDesc,
    peer: Option<OutPort>,
}

impl InputSlot {
    /// The producer feeding this slot, if connected.
    pub fn peer(&self) -> Option<OutPort> {
        self.peer
    }
}

/// Output-data slot: descriptor plus its consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSlot {
    pub desc: TensorDesc,
    peers: Vec<InPort>,
}

impl OutputSlot {
    /// Consumers of this slot, in connection order.
    pub fn peers(&self) -> &[InPort] {
        &self.peers
    }
}

/// A node in the IR graph: one operator instance.
///
/// Port peers are private; they only change through `Graph` edge operations
/// so both sides of every link stay consistent.
#[derive(Debug, Clone)]
pub struct Node {
    /// Node name (unique by convention, not enforced).
    pub name: String,

    /// Operator kind.
    pub op: OpKind,

    /// Operator attributes.
    pub attributes: HashMap<String, AttrValue>,

    inputs: Vec<InputSlot>,
    outputs: Vec<OutputSlot>,
    in_control: Vec<NodeId>,
    out_control: Vec<NodeId>,
    subgraphs: Vec<String>,
    id: NodeId,
}

impl Node {
    fn from_desc(desc: NodeDesc, id: NodeId) -> Self {
        Self {
            name: desc.name,
            op: desc.op,
            attributes: desc.attributes,
            inputs: desc
                .inputs
                .into_iter()
                .map(|desc| InputSlot { desc, peer: None })
                .collect(),
            outputs: desc
                .outputs
                .into_iter()
                .map(|desc| OutputSlot {
                    desc,
                    peers: Vec::new(),
                })
                .collect(),
            in_control: Vec::new(),
            out_control: Vec::new(),
            subgraphs: Vec::new(),
            id,
        }
    }

    /// Handle of this node in its owning graph.
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn op(&self) -> &OpKind {
        &self.op
    }

    pub fn inputs(&self) -> &[InputSlot] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputSlot] {
        &self.outputs
    }

    /// Get an input slot, failing if the node has no such input.
    pub fn input(&self, index: usize) -> Result<&InputSlot> {
        self.inputs.get(index).ok_or_else(|| {
            Error::InvalidGraph(format!("Node '{}' has no input {}", self.name, index))
        })
    }

    /// Get an output slot, failing if the node has no such output.
    pub fn output(&self, index: usize) -> Result<&OutputSlot> {
        self.outputs.get(index).ok_or_else(|| {
            Error::InvalidGraph(format!("Node '{}' has no output {}", self.name, index))
        })
    }

    pub fn input_desc_mut(&mut self, index: usize) -> Result<&mut TensorDesc> {
        let name = &self.name;
        self.inputs
            .get_mut(index)
            .map(|slot| &mut slot.desc)
            .ok_or_else(|| Error::InvalidGraph(format!("Node '{}' has no input {}", name, index)))
    }

    pub fn output_desc_mut(&mut self, index: usize) -> Result<&mut TensorDesc> {
        let name = &self.name;
        self.outputs
            .get_mut(index)
            .map(|slot| &mut slot.desc)
            .ok_or_else(|| Error::InvalidGraph(format!("Node '{}' has no output {}", name, index)))
    }

    /// Nodes with a control edge into this node.
    pub fn in_control(&self) -> &[NodeId] {
        &self.in_control
    }

    /// Nodes this node has a control edge to.
    pub fn out_control(&self) -> &[NodeId] {
        &self.out_control
    }

    pub fn has_control_edges(&self) -> bool {
        !self.in_control.is_empty() || !self.out_control.is_empty()
    }

    /// Names of subgraphs owned by this node, in call-argument order.
    pub fn subgraph_names(&self) -> &[String] {
        &self.subgraphs
    }

    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: AttrValue) {
        self.attributes.insert(name.into(), value);
    }

    pub fn attr_int(&self, name: &str) -> Option<i64> {
        self.attr(name).and_then(AttrValue::as_int)
    }

    pub fn attr_ints(&self, name: &str) -> Option<&[i64]> {
        self.attr(name).and_then(AttrValue::as_ints)
    }

    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attr(name).and_then(AttrValue::as_str)
    }

    pub fn attr_bool(&self, name: &str) -> Option<bool> {
        self.attr(name).and_then(AttrValue::as_bool)
    }

    /// Whether the node declares outputs aliasing input storage.
    pub fn is_reference(&self) -> bool {
        self.attr_bool(IS_REF_ATTR).unwrap_or(false)
    }

    /// `(output, input)` pairs where the output reuses the input's storage.
    pub fn ref_outputs(&self) -> Vec<(usize, usize)> {
        self.outputs
            .iter()
            .enumerate()
            .filter_map(|(out_idx, slot)| {
                let in_idx = slot.desc.attr(REF_PORT_INDEX_ATTR)?.as_int()?;
                usize::try_from(in_idx).ok().map(|in_idx| (out_idx, in_idx))
            })
            .collect()
    }

    /// Whether any data or control port is linked.
    pub fn is_connected(&self) -> bool {
        self.inputs.iter().any(|slot| slot.peer.is_some())
            || self.outputs.iter().any(|slot| !slot.peers.is_empty())
            || self.has_control_edges()
    }

    /// Number of data consumers across all outputs.
    pub fn consumer_count(&self) -> usize {
        self.outputs.iter().map(|slot| slot.peers.len()).sum()
    }

    /// Producers of this node (data and control), deduplicated.
    pub fn predecessor_ids(&self) -> Vec<NodeId> {
        let mut preds = Vec::new();
        let data = self.inputs.iter().filter_map(|slot| slot.peer.map(|p| p.node));
        for id in data.chain(self.in_control.iter().copied()) {
            if !preds.contains(&id) {
                preds.push(id);
            }
        }
        preds
    }

    /// Consumers of this node (data and control), deduplicated.
    pub fn successor_ids(&self) -> Vec<NodeId> {
        let mut succs = Vec::new();
        let data = self
            .outputs
            .iter()
            .flat_map(|slot| slot.peers.iter().map(|p| p.node));
        for id in data.chain(self.out_control.iter().copied()) {
            if !succs.contains(&id) {
                succs.push(id);
            }
        }
        succs
    }
}

// ──────────────────────────────── Graph ──────────────────────────────────

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Dataflow graph: node arena, cached topological order, nested subgraphs.
///
/// Iteration follows node insertion order so every pass scans
/// deterministically. All mutation is synchronous and in place; callers that
/// need atomicity across a pass clone the graph first.
#[derive(Debug, Clone)]
pub struct Graph {
    name: String,
    slots: Vec<Slot>,
    free: Vec<u32>,
    order: Vec<NodeId>,
    topo_cache: OnceCell<Vec<NodeId>>,
    parent_node: Option<NodeId>,
    subgraphs: BTreeMap<String, Graph>,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slots: Vec::new(),
            free: Vec::new(),
            order: Vec::new(),
            topo_cache: OnceCell::new(),
            parent_node: None,
            subgraphs: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The call node owning this graph in its parent graph, if nested.
    pub fn parent_node(&self) -> Option<NodeId> {
        self.parent_node
    }

    fn invalidate(&mut self) {
        self.topo_cache.take();
    }

    // ── Node access ──

    /// Get an immutable reference to a node.
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
            .ok_or(Error::NodeNotFound(id))
    }

    /// Get a mutable reference to a node.
    ///
    /// Attributes and descriptors may be edited in place; links can only be
    /// changed through the graph's edge operations.
    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
            .ok_or(Error::NodeNotFound(id))
    }

    /// Check whether a handle refers to a live node of this graph.
    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_ok()
    }

    /// Iterate over all nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|&id| self.node(id).ok())
    }

    /// Snapshot of all node handles in insertion order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.order.clone()
    }

    pub fn node_count(&self) -> usize {
        self.order.len()
    }

    /// Find the first node with the given name.
    pub fn find_node_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes().find(|node| node.name == name).map(Node::id)
    }

    /// Handles of all nodes matching a predicate on their kind.
    pub fn nodes_of_kind(&self, pred: impl Fn(&OpKind) -> bool) -> Vec<NodeId> {
        self.nodes()
            .filter(|node| pred(&node.op))
            .map(Node::id)
            .collect()
    }

    /// The producer feeding an input port.
    pub fn producer(&self, port: InPort) -> Result<Option<OutPort>> {
        Ok(self.node(port.node)?.input(port.index)?.peer)
    }

    /// The consumers of an output port.
    pub fn consumers(&self, port: OutPort) -> Result<&[InPort]> {
        Ok(self.node(port.node)?.output(port.index)?.peers())
    }

    /// Data and control successors of a node.
    pub fn successors(&self, id: NodeId) -> Result<Vec<NodeId>> {
        Ok(self.node(id)?.successor_ids())
    }

    /// Data and control predecessors of a node.
    pub fn predecessors(&self, id: NodeId) -> Result<Vec<NodeId>> {
        Ok(self.node(id)?.predecessor_ids())
    }

    // ── Graph mutation ──

    /// Add a new, unconnected node and return its handle.
    pub fn add_node(&mut self, desc: NodeDesc) -> NodeId {
        let (index, generation) = match self.free.pop() {
            Some(index) => (index, self.slots[index as usize].generation),
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: None,
                });
                ((self.slots.len() - 1) as u32, 0)
            }
        };
        let id = NodeId { index, generation };
        self.slots[index as usize].node = Some(Node::from_desc(desc, id));
        self.order.push(id);
        self.invalidate();
        id
    }

    /// Remove a fully disconnected node.
    ///
    /// Subgraphs owned by the node are dropped with it.
    ///
    /// # Errors
    ///
    /// Fails if the node doesn't exist or any of its ports is still linked;
    /// use [`Graph::remove_node_force`] to unlink first.
    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        let node = self.node(id)?;
        if node.is_connected() {
            return Err(Error::InvalidGraph(format!(
                "Cannot remove node '{}': ports still connected",
                node.name
            )));
        }
        let owned = node.subgraphs.clone();
        for name in owned {
            self.subgraphs.remove(&name);
        }

        let slot = &mut self.slots[id.index()];
        slot.node = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.order.retain(|&other| other != id);
        self.invalidate();
        Ok(())
    }

    /// Disconnect every port of a node, then remove it.
    pub fn remove_node_force(&mut self, id: NodeId) -> Result<()> {
        self.isolate_node(id, &[])?;
        self.remove_node(id)
    }

    /// Link an output-data port to an input-data port.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::SingleProducer`] if `dst` already has a producer,
    /// and with a structural error if either port doesn't exist. Nothing is
    /// modified on failure.
    pub fn add_edge(&mut self, src: OutPort, dst: InPort) -> Result<()> {
        self.node(src.node)?.output(src.index)?;
        let dst_node = self.node(dst.node)?;
        if let Some(existing) = dst_node.input(dst.index)?.peer {
            return Err(Error::SingleProducer {
                port: dst,
                existing,
            });
        }
        if src.node == dst.node {
            return Err(Error::InvalidGraph(format!(
                "Self loop on node '{}'",
                dst_node.name
            )));
        }

        self.node_mut(dst.node)?.inputs[dst.index].peer = Some(src);
        self.node_mut(src.node)?.outputs[src.index].peers.push(dst);
        self.invalidate();
        Ok(())
    }

    /// Unlink an output-data port from an input-data port.
    pub fn remove_edge(&mut self, src: OutPort, dst: InPort) -> Result<()> {
        let linked = self.node(dst.node)?.input(dst.index)?.peer == Some(src)
            && self.node(src.node)?.output(src.index)?.peers.contains(&dst);
        if !linked {
            return Err(Error::EdgeNotFound { src, dst });
        }

        self.node_mut(dst.node)?.inputs[dst.index].peer = None;
        self.node_mut(src.node)?.outputs[src.index]
            .peers
            .retain(|&peer| peer != dst);
        self.invalidate();
        Ok(())
    }

    /// Replace the producer of an input-data port.
    pub fn relink_input(&mut self, dst: InPort, src: OutPort) -> Result<()> {
        self.node(src.node)?.output(src.index)?;
        match self.producer(dst)? {
            Some(current) if current == src => return Ok(()),
            Some(current) => self.remove_edge(current, dst)?,
            None => {}
        }
        self.add_edge(src, dst)
    }

    /// Add a control edge. Adding an existing edge is a no-op.
    pub fn add_control_edge(&mut self, src: NodeId, dst: NodeId) -> Result<()> {
        self.node(dst)?;
        let src_node = self.node(src)?;
        if src == dst {
            return Err(Error::InvalidGraph(format!(
                "Control self loop on node '{}'",
                src_node.name
            )));
        }
        if src_node.out_control.contains(&dst) {
            return Ok(());
        }

        self.node_mut(src)?.out_control.push(dst);
        self.node_mut(dst)?.in_control.push(src);
        self.invalidate();
        Ok(())
    }

    /// Remove a control edge.
    pub fn remove_control_edge(&mut self, src: NodeId, dst: NodeId) -> Result<()> {
        let linked = self.node(src)?.out_control.contains(&dst)
            && self.node(dst)?.in_control.contains(&src);
        if !linked {
            return Err(Error::InvalidGraph(format!(
                "No control edge {} -> {}",
                src, dst
            )));
        }

        self.node_mut(src)?.out_control.retain(|&n| n != dst);
        self.node_mut(dst)?.in_control.retain(|&n| n != src);
        self.invalidate();
        Ok(())
    }

    /// Disconnect every port of a node except the listed data inputs.
    pub fn isolate_node(&mut self, id: NodeId, keep_inputs: &[usize]) -> Result<()> {
        let node = self.node(id)?;
        let inputs: Vec<(usize, OutPort)> = node
            .inputs
            .iter()
            .enumerate()
            .filter(|(idx, _)| !keep_inputs.contains(idx))
            .filter_map(|(idx, slot)| slot.peer.map(|peer| (idx, peer)))
            .collect();
        let outputs: Vec<(usize, InPort)> = node
            .outputs
            .iter()
            .enumerate()
            .flat_map(|(idx, slot)| slot.peers.iter().map(move |&peer| (idx, peer)))
            .collect();
        let in_control = node.in_control.clone();
        let out_control = node.out_control.clone();

        for (idx, src) in inputs {
            self.remove_edge(src, id.input(idx))?;
        }
        for (idx, dst) in outputs {
            self.remove_edge(id.output(idx), dst)?;
        }
        for src in in_control {
            self.remove_control_edge(src, id)?;
        }
        for dst in out_control {
            self.remove_control_edge(id, dst)?;
        }
        Ok(())
    }

    /// Splice a node out of the dataflow.
    ///
    /// Every consumer of output `output` is reconnected to the producer of
    /// input `input`. Control predecessors of the node gain control edges to
    /// its consumers and control successors; control successors gain a
    /// control edge from the producer. The node is left fully isolated but
    /// not removed.
    pub fn bypass_node(&mut self, id: NodeId, input: usize, output: usize) -> Result<()> {
        let node = self.node(id)?;
        let src = node.input(input)?.peer.ok_or_else(|| {
            Error::InvalidGraph(format!(
                "Cannot bypass node '{}': input {} has no producer",
                node.name, input
            ))
        })?;
        let consumers = node.output(output)?.peers.clone();
        let in_control = node.in_control.clone();
        let out_control = node.out_control.clone();

        for &dst in &consumers {
            self.remove_edge(id.output(output), dst)?;
            self.add_edge(src, dst)?;
        }

        let mut targets: Vec<NodeId> = Vec::new();
        for target in consumers
            .iter()
            .map(|port| port.node)
            .chain(out_control.iter().copied())
        {
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
        for &ctrl in &in_control {
            for &target in &targets {
                if ctrl != target {
                    self.add_control_edge(ctrl, target)?;
                }
            }
        }
        for &target in &out_control {
            if src.node != target {
                self.add_control_edge(src.node, target)?;
            }
        }

        self.isolate_node(id, &[])
    }

    // ── Subgraphs ──

    /// Attach a subgraph under a node of this graph.
    pub fn attach_subgraph(&mut self, owner: NodeId, mut subgraph: Graph) -> Result<()> {
        let name = subgraph.name.clone();
        if self.subgraphs.contains_key(&name) {
            return Err(Error::InvalidGraph(format!(
                "Subgraph '{}' is already attached to graph '{}'",
                name, self.name
            )));
        }
        subgraph.parent_node = Some(owner);
        self.node_mut(owner)?.subgraphs.push(name.clone());
        self.subgraphs.insert(name, subgraph);
        Ok(())
    }

    /// Detach a subgraph from its owning node and hand it back.
    pub fn detach_subgraph(&mut self, owner: NodeId, name: &str) -> Result<Graph> {
        let node = self.node(owner)?;
        let position = node
            .subgraphs
            .iter()
            .position(|sub| sub == name)
            .filter(|_| self.subgraphs.contains_key(name))
            .ok_or_else(|| {
                Error::InvalidGraph(format!(
                    "Node '{}' does not own subgraph '{}'",
                    node.name, name
                ))
            })?;

        self.node_mut(owner)?.subgraphs.remove(position);
        let mut subgraph = self
            .subgraphs
            .remove(name)
            .ok_or_else(|| Error::InvalidGraph(format!("Subgraph '{}' not found", name)))?;
        subgraph.parent_node = None;
        Ok(subgraph)
    }

    pub fn subgraph(&self, name: &str) -> Option<&Graph> {
        self.subgraphs.get(name)
    }

    pub fn subgraph_mut(&mut self, name: &str) -> Option<&mut Graph> {
        self.subgraphs.get_mut(name)
    }

    /// Nested subgraphs of this graph, ordered by name.
    pub fn subgraphs(&self) -> impl Iterator<Item = (&str, &Graph)> {
        self.subgraphs.iter().map(|(name, graph)| (name.as_str(), graph))
    }

    // ── Graph queries ──

    /// Get the topological order of nodes in the graph.
    ///
    /// Data and control edges both order nodes. The order is cached until
    /// the next structural mutation.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph contains a cycle.
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        if let Some(order) = self.topo_cache.get() {
            return Ok(order.clone());
        }

        let mut dag: DiGraph<NodeId, ()> = DiGraph::with_capacity(self.order.len(), 0);
        let mut index: HashMap<NodeId, NodeIndex> = HashMap::with_capacity(self.order.len());
        for &id in &self.order {
            index.insert(id, dag.add_node(id));
        }
        for node in self.nodes() {
            let from = index[&node.id];
            for succ in node.successor_ids() {
                if let Some(&to) = index.get(&succ) {
                    dag.add_edge(from, to, ());
                }
            }
        }

        let sorted = toposort(&dag, None).map_err(|cycle| {
            let id = dag[cycle.node_id()];
            let name = self.node(id).map(|n| n.name.as_str()).unwrap_or("?");
            Error::InvalidGraph(format!(
                "Graph '{}' contains a cycle through node '{}'",
                self.name, name
            ))
        })?;
        let order: Vec<NodeId> = sorted.into_iter().map(|ix| dag[ix]).collect();
        let _ = self.topo_cache.set(order.clone());
        Ok(order)
    }

    /// Check the structural invariants of this graph and its subgraphs.
    ///
    /// Verifies that every peer link is present on both sides and points at a
    /// live node (single producer, no dangling peers), and that the subgraph
    /// tree is consistent with the nodes' owned-subgraph lists.
    pub fn validate(&self) -> Result<()> {
        let mut owners: HashMap<&str, usize> = HashMap::new();

        for node in self.nodes() {
            let id = node.id;
            for (idx, slot) in node.inputs.iter().enumerate() {
                let Some(src) = slot.peer else { continue };
                let mirrored = self
                    .node(src.node)
                    .ok()
                    .and_then(|producer| producer.outputs.get(src.index))
                    .is_some_and(|out| out.peers.contains(&id.input(idx)));
                if !mirrored {
                    return Err(Error::InvalidGraph(format!(
                        "Input {} of node '{}' points at {} which does not list it",
                        idx, node.name, src
                    )));
                }
            }

            for (idx, slot) in node.outputs.iter().enumerate() {
                for (pos, &dst) in slot.peers.iter().enumerate() {
                    if slot.peers[..pos].contains(&dst) {
                        return Err(Error::InvalidGraph(format!(
                            "Output {} of node '{}' lists {} twice",
                            idx, node.name, dst
                        )));
                    }
                    let mirrored = self
                        .node(dst.node)
                        .ok()
                        .and_then(|consumer| consumer.inputs.get(dst.index))
                        .is_some_and(|input| input.peer == Some(id.output(idx)));
                    if !mirrored {
                        return Err(Error::InvalidGraph(format!(
                            "Output {} of node '{}' lists {} which has another producer",
                            idx, node.name, dst
                        )));
                    }
                }
            }

            for &src in &node.in_control {
                if !self.node(src).is_ok_and(|n| n.out_control.contains(&id)) {
                    return Err(Error::InvalidGraph(format!(
                        "Control edge {} -> '{}' is one-sided",
                        src, node.name
                    )));
                }
            }
            for &dst in &node.out_control {
                if !self.node(dst).is_ok_and(|n| n.in_control.contains(&id)) {
                    return Err(Error::InvalidGraph(format!(
                        "Control edge '{}' -> {} is one-sided",
                        node.name, dst
                    )));
                }
            }

            for name in &node.subgraphs {
                let subgraph = self.subgraphs.get(name).ok_or_else(|| {
                    Error::InvalidGraph(format!(
                        "Node '{}' owns missing subgraph '{}'",
                        node.name, name
                    ))
                })?;
                if subgraph.parent_node != Some(id) {
                    return Err(Error::InvalidGraph(format!(
                        "Subgraph '{}' does not point back at node '{}'",
                        name, node.name
                    )));
                }
                *owners.entry(name.as_str()).or_default() += 1;
            }
        }

        for (name, subgraph) in &self.subgraphs {
            if owners.get(name.as_str()) != Some(&1) {
                return Err(Error::InvalidGraph(format!(
                    "Subgraph '{}' must have exactly one owning node",
                    name
                )));
            }
            subgraph.validate()?;
        }
        Ok(())
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new("graph")
    }
}
