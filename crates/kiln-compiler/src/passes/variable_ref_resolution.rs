//! Reference-indirection resolution pass.
//!
//! A `VariableRef` node stands in for "the value of variable X, as produced
//! by my input". This pass records that fact directly on the producing
//! output, looking through one level of call indirection, and deletes the
//! ref node.

use kiln_core::{
    AttrValue, Edit, EditList, Error, Graph, NodeId, OpKind, OptLevel, OutPort, Pass, PassContext,
    PassStatus, Result,
};
use std::collections::HashSet;
use tracing::debug;

/// Attribute naming the variable a ref node (or an annotated output) aliases.
pub const REF_VAR_SRC_VAR_NAME_ATTR: &str = "ref_var_src_var_name";

/// Input-descriptor attribute on a subgraph's `NetOutput` giving the output
/// index of the owning call node that the input feeds.
pub const PARENT_NODE_INDEX_ATTR: &str = "parent_node_index";

/// Output to annotate; `subgraph` is `None` for the root graph.
#[derive(Debug)]
struct Terminal {
    subgraph: Option<String>,
    port: OutPort,
    name: String,
}

#[derive(Debug)]
struct RefRewrite {
    node: NodeId,
    variable: String,
    terminal: Terminal,
}

/// Pass that folds `VariableRef` nodes into output annotations.
///
/// Every ref node is checked before anything is modified: a ref naming a
/// variable that does not exist in the root graph fails the whole pass with
/// [`Error::MissingVariable`].
pub struct VariableRefResolutionPass;

impl VariableRefResolutionPass {
    /// Create a new variable-ref resolution pass.
    pub fn new() -> Self {
        Self
    }

    fn plan(&self, graph: &Graph, variables: &HashSet<&str>, node: NodeId) -> Result<RefRewrite> {
        let ref_node = graph.node(node)?;
        let variable = ref_node
            .attr_str(REF_VAR_SRC_VAR_NAME_ATTR)
            .ok_or_else(|| {
                Error::Attribute(format!(
                    "VariableRef node '{}' has no '{}' attribute",
                    ref_node.name, REF_VAR_SRC_VAR_NAME_ATTR
                ))
            })?
            .to_string();
        if !variables.contains(variable.as_str()) {
            return Err(Error::MissingVariable {
                variable,
                node: ref_node.name.clone(),
            });
        }

        // Chained refs resolve to the first real producer.
        let mut visited = HashSet::from([node]);
        let mut src = self.producer_of(graph, node)?;
        while graph.node(src.node)?.op == OpKind::VariableRef {
            if !visited.insert(src.node) {
                return Err(Error::InvalidGraph(format!(
                    "VariableRef node '{}' is part of a reference cycle",
                    ref_node.name
                )));
            }
            src = self.producer_of(graph, src.node)?;
        }

        let producer = graph.node(src.node)?;
        let terminal = if producer.op.is_call() {
            self.through_call(graph, src)?
        } else {
            Terminal {
                subgraph: None,
                port: src,
                name: producer.name.clone(),
            }
        };

        Ok(RefRewrite {
            node,
            variable,
            terminal,
        })
    }

    fn producer_of(&self, graph: &Graph, node: NodeId) -> Result<OutPort> {
        graph.producer(node.input(0))?.ok_or_else(|| {
            let name = graph.node(node).map(|n| n.name.as_str()).unwrap_or("?");
            Error::InvalidGraph(format!("Node '{}' has no producer on input 0", name))
        })
    }

    /// Find the node inside a call's subgraph producing call output `src`.
    fn through_call(&self, graph: &Graph, src: OutPort) -> Result<Terminal> {
        let call = graph.node(src.node)?;

        for name in call.subgraph_names() {
            let Some(body) = graph.subgraph(name) else {
                continue;
            };
            for output in body.nodes().filter(|n| n.op == OpKind::NetOutput) {
                for (idx, slot) in output.inputs().iter().enumerate() {
                    let parent_index = slot
                        .desc
                        .attr(PARENT_NODE_INDEX_ATTR)
                        .and_then(AttrValue::as_int);
                    if parent_index != Some(src.index as i64) {
                        continue;
                    }
                    let port = body.producer(output.id().input(idx))?.ok_or_else(|| {
                        Error::InvalidGraph(format!(
                            "Result {} of subgraph '{}' has no producer",
                            idx, name
                        ))
                    })?;
                    return Ok(Terminal {
                        subgraph: Some(name.clone()),
                        port,
                        name: body.node(port.node)?.name.clone(),
                    });
                }
            }
        }

        Err(Error::InvalidGraph(format!(
            "Call node '{}' has no subgraph result for output {}",
            call.name, src.index
        )))
    }

    fn apply(&self, graph: &mut Graph, rewrite: RefRewrite) -> Result<()> {
        let RefRewrite {
            node,
            variable,
            terminal,
        } = rewrite;
        let mut edits = EditList::new();
        let mut nested = None;

        if terminal.name == variable {
            debug!(node = %terminal.name, "producer is the variable itself, no annotation");
        } else {
            match terminal.subgraph {
                None => edits.push(Edit::SetOutputAttr {
                    port: terminal.port,
                    name: REF_VAR_SRC_VAR_NAME_ATTR.to_string(),
                    value: AttrValue::String(variable.clone()),
                }),
                Some(ref name) => {
                    graph
                        .subgraph(name)
                        .ok_or_else(|| {
                            Error::InvalidGraph(format!("Subgraph '{}' disappeared", name))
                        })?
                        .node(terminal.port.node)?
                        .output(terminal.port.index)?;
                    nested = Some(name.clone());
                }
            }
        }

        if !graph.node(node)?.outputs().is_empty() {
            edits.push(Edit::BypassNode {
                node,
                input: 0,
                output: 0,
            });
        }
        edits.push(Edit::RemoveNode(node));
        edits.apply(graph)?;

        // The subgraph annotation is written once the root edits are in.
        if let Some(name) = nested {
            let body = graph.subgraph_mut(&name).ok_or_else(|| {
                Error::InvalidGraph(format!("Subgraph '{}' disappeared", name))
            })?;
            body.node_mut(terminal.port.node)?
                .output_desc_mut(terminal.port.index)?
                .attrs
                .insert(
                    REF_VAR_SRC_VAR_NAME_ATTR.to_string(),
                    AttrValue::String(variable.clone()),
                );
        }

        debug!(variable = %variable, producer = %terminal.name, "resolved variable ref");
        Ok(())
    }
}

impl Default for VariableRefResolutionPass {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for VariableRefResolutionPass {
    fn name(&self) -> &str {
        "variable_ref_resolution"
    }

    fn min_opt_level(&self) -> OptLevel {
        OptLevel::O0
    }

    fn run(&self, graph: &mut Graph, _ctx: &PassContext) -> Result<PassStatus> {
        let refs = graph.nodes_of_kind(|op| *op == OpKind::VariableRef);
        if refs.is_empty() {
            return Ok(PassStatus::NotChanged);
        }

        let rewrites = {
            let variables: HashSet<&str> = graph
                .nodes()
                .filter(|node| node.op.is_variable_like())
                .map(|node| node.name.as_str())
                .collect();
            refs.iter()
                .map(|&node| self.plan(graph, &variables, node))
                .collect::<Result<Vec<_>>>()?
        };

        for rewrite in rewrites {
            self.apply(graph, rewrite)?;
        }
        Ok(PassStatus::Success)
    }
}
