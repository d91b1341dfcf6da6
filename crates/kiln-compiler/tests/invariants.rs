//! Property tests: the default pipeline keeps random graphs well formed.

mod common;

use common::*;
use kiln_compiler::RefCopyInsertionPass;
use kiln_core::{Graph, NodeBuilder, OpKind, Pass, PassStatus};
use proptest::prelude::*;
use std::collections::HashSet;

const KINDS: &[&str] = &["Relu", "Sigmoid", "Slice", "Transpose", "ZerosLike", "Add", "Assign"];

/// One random node: its kind and two parent picks among earlier nodes.
fn node_spec(kinds: usize) -> impl Strategy<Value = (usize, usize, usize)> {
    (0..kinds, any::<usize>(), any::<usize>())
}

/// Build a DAG rooted at a single `Data` node. Every node reads only from
/// nodes created before it.
fn build(specs: &[(usize, usize, usize)]) -> Graph {
    let mut graph = Graph::new("random");
    let mut nodes = vec![data(&mut graph, "input", &[4])];

    for (i, &(kind, seed, seed2)) in specs.iter().enumerate() {
        let a = nodes[seed % nodes.len()];
        let b = nodes[seed2 % nodes.len()];
        let name = format!("n{i}");
        let node = match KINDS[kind] {
            "Add" => {
                let node = NodeBuilder::new(name, "Add")
                    .input(f32(&[4]))
                    .input(f32(&[4]))
                    .output(f32(&[4]))
                    .add_to(&mut graph);
                graph.add_edge(a.output(0), node.input(0)).unwrap();
                graph.add_edge(b.output(0), node.input(1)).unwrap();
                node
            }
            "Assign" => assign(&mut graph, &name, a, b),
            op => unary(&mut graph, &name, op, a, &[4], &[4]),
        };
        nodes.push(node);
    }
    graph
}

/// Every aliased input of every reference node reads from a producer with
/// its own storage, and no two aliased inputs share a copy.
fn aliasing_is_safe(graph: &Graph) -> bool {
    let mut copies = HashSet::new();
    for node in graph.nodes().filter(|node| node.is_reference()) {
        for (_, input) in node.ref_outputs() {
            let Some(src) = graph.producer(node.id().input(input)).unwrap() else {
                return false;
            };
            let op = &graph.node(src.node).unwrap().op;
            if op.is_variable_like() || op.is_legacy_control() {
                continue;
            }
            if *op != OpKind::MemcpyAsync || !copies.insert(src) {
                return false;
            }
        }
    }
    true
}

proptest! {
    #[test]
    fn test_pipeline_preserves_structure(
        specs in prop::collection::vec(node_spec(KINDS.len() - 1), 1..24)
    ) {
        let mut graph = build(&specs);

        let pipeline = PassPipeline::with_default_passes(PipelineOptions::default());
        pipeline
            .run_to_fixed_point(&mut graph, &PassContext::default())
            .unwrap();

        prop_assert!(graph.validate().is_ok());
        prop_assert!(graph.topological_order().is_ok());
        prop_assert!(graph.nodes_of_kind(|op| *op == OpKind::Transpose).iter().all(|&t| {
            let src = graph.producer(t.input(0)).unwrap().unwrap();
            graph.node(src.node).unwrap().op != OpKind::ZerosLike
                || graph.node(src.node).unwrap().consumer_count() > 1
        }), "transpose fed by a single-use ZerosLike survived the pipeline");
    }

    #[test]
    fn test_copy_insertion_protects_every_reference(
        specs in prop::collection::vec(node_spec(KINDS.len()), 1..24)
    ) {
        let mut graph = build(&specs);
        let pass = RefCopyInsertionPass::new();
        let ctx = PassContext::default();

        pass.run(&mut graph, &ctx).unwrap();

        prop_assert!(aliasing_is_safe(&graph));
        prop_assert!(graph.validate().is_ok());
        prop_assert!(graph.topological_order().is_ok());
        prop_assert_eq!(pass.run(&mut graph, &ctx).unwrap(), PassStatus::NotChanged);
    }

    #[test]
    fn test_full_pipeline_with_references(
        specs in prop::collection::vec(node_spec(KINDS.len()), 1..24)
    ) {
        let mut graph = build(&specs);

        let pipeline = PassPipeline::with_default_passes(PipelineOptions::default());
        pipeline
            .run_to_fixed_point(&mut graph, &PassContext::default())
            .unwrap();

        prop_assert!(aliasing_is_safe(&graph));
        prop_assert!(graph.validate().is_ok());
        prop_assert!(graph.topological_order().is_ok());
    }
}
