//! Reachability cache over one graph.
//!
//! `ConnectionMatrix::generate` walks the graph once in reverse topological
//! order, giving every node a bit row of the nodes reachable from it along
//! data and control edges. Rows are unioned word-wise, so generation costs
//! O(N·E/64).
//!
//! The matrix reflects the edge set it was built from. Nodes added
//! afterwards must be registered with [`ConnectionMatrix::update`] before
//! they are queried. Removed nodes are never compacted away: their rows stay
//! and may still report paths that ran through them. Since handles are
//! generation-checked, a removed node's handle never matches a new node.

use crate::ir::{Graph, NodeId};
use crate::Result;
use std::collections::{HashMap, HashSet};

/// Growable bit row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct BitRow {
    words: Vec<u64>,
}

impl BitRow {
    fn set(&mut self, bit: usize) {
        let word = bit / 64;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (bit % 64);
    }

    fn get(&self, bit: usize) -> bool {
        self.words
            .get(bit / 64)
            .is_some_and(|word| word & (1u64 << (bit % 64)) != 0)
    }

    fn union_with(&mut self, other: &BitRow) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (dst, src) in self.words.iter_mut().zip(&other.words) {
            *dst |= *src;
        }
    }
}

/// Precomputed "is there a directed path from A to B" relation.
#[derive(Debug, Clone, Default)]
pub struct ConnectionMatrix {
    index: HashMap<NodeId, usize>,
    rows: Vec<BitRow>,
}

impl ConnectionMatrix {
    /// Compute reachability for every node of `graph`.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph contains a cycle.
    #[tracing::instrument(skip_all, fields(graph = graph.name(), num_nodes = graph.node_count()))]
    pub fn generate(graph: &Graph) -> Result<Self> {
        let order = graph.topological_order()?;
        let mut matrix = Self {
            index: HashMap::with_capacity(order.len()),
            rows: vec![BitRow::default(); order.len()],
        };
        for (slot, &id) in order.iter().enumerate() {
            matrix.index.insert(id, slot);
        }

        for &id in order.iter().rev() {
            let row_idx = matrix.index[&id];
            let mut row = BitRow::default();
            for succ in graph.successors(id)? {
                if let Some(&succ_idx) = matrix.index.get(&succ) {
                    row.set(succ_idx);
                    row.union_with(&matrix.rows[succ_idx]);
                }
            }
            matrix.rows[row_idx] = row;
        }

        Ok(matrix)
    }

    /// Extend the matrix with nodes inserted since it was generated.
    ///
    /// All edges incident to `new_nodes` must already be in place. Only rows
    /// of the new nodes and of their ancestors are touched; existing rows act
    /// as shortcuts when walking downstream, so each new node costs O(E).
    pub fn update(&mut self, graph: &Graph, new_nodes: &[NodeId]) -> Result<()> {
        let fresh: HashSet<NodeId> = new_nodes
            .iter()
            .copied()
            .filter(|id| !self.index.contains_key(id))
            .collect();
        for &id in new_nodes {
            if fresh.contains(&id) && !self.index.contains_key(&id) {
                self.index.insert(id, self.rows.len());
                self.rows.push(BitRow::default());
            }
        }

        for &id in new_nodes.iter().filter(|id| fresh.contains(*id)) {
            let reach = self.descendants(graph, id, &fresh)?;
            let row_idx = self.index[&id];
            self.rows[row_idx] = reach.clone();

            for ancestor in Self::ancestors(graph, id)? {
                if let Some(&anc_idx) = self.index.get(&ancestor) {
                    let row = &mut self.rows[anc_idx];
                    row.set(row_idx);
                    row.union_with(&reach);
                }
            }
        }
        Ok(())
    }

    /// Whether a directed path leads from `from` to `to`.
    ///
    /// Nodes unknown to the matrix are never connected.
    pub fn is_connected(&self, from: NodeId, to: NodeId) -> bool {
        match (self.index.get(&from), self.index.get(&to)) {
            (Some(&from), Some(&to)) => self.rows[from].get(to),
            _ => false,
        }
    }

    /// Whether a node has a row in the matrix.
    pub fn contains(&self, id: NodeId) -> bool {
        self.index.contains_key(&id)
    }

    /// Number of nodes with a row.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Downstream closure of `start`, reusing rows of already-indexed nodes.
    fn descendants(&self, graph: &Graph, start: NodeId, fresh: &HashSet<NodeId>) -> Result<BitRow> {
        let mut reach = BitRow::default();
        let mut visited = HashSet::new();
        let mut stack = graph.successors(start)?;

        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            let Some(&idx) = self.index.get(&id) else {
                continue;
            };
            reach.set(idx);
            if fresh.contains(&id) {
                stack.extend(graph.successors(id)?);
            } else {
                reach.union_with(&self.rows[idx]);
            }
        }
        Ok(reach)
    }

    fn ancestors(graph: &Graph, start: NodeId) -> Result<Vec<NodeId>> {
        let mut visited = HashSet::new();
        let mut stack = graph.predecessors(start)?;
        let mut found = Vec::new();

        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            found.push(id);
            stack.extend(graph.predecessors(id)?);
        }
        Ok(found)
    }
}
