//! End-to-end runs of the default pass pipeline.

mod common;

use common::*;
use kiln_compiler::passes::{HANDLE_ID_ATTR, MAX_SIZE_ATTR, REF_VAR_SRC_VAR_NAME_ATTR};
use kiln_compiler::{Error, OptLevel, PassOutcome};
use kiln_core::{AttrValue, DataType, Graph, NodeBuilder, NodeId, OpKind, TensorDesc};

struct Model {
    graph: Graph,
    input: NodeId,
    pad: NodeId,
    pad_slice: NodeId,
    relu: NodeId,
    hoisted_slice: NodeId,
    transpose: NodeId,
    zeros: NodeId,
    stack: NodeId,
    push: NodeId,
    pop: NodeId,
    producer: NodeId,
    assign: NodeId,
    reader: NodeId,
    var_ref: NodeId,
}

/// A graph with one match for every built-in pass.
fn model() -> Model {
    let mut graph = Graph::new("model");

    // Pad -> Slice reading only the unpadded region.
    let input = data(&mut graph, "input", &[8]);
    let pad = NodeBuilder::new("pad", "Pad")
        .attr("paddings", AttrValue::Ints(vec![1, 1]))
        .input(f32(&[8]))
        .output(f32(&[10]))
        .add_to(&mut graph);
    graph.add_edge(input.output(0), pad.input(0)).unwrap();
    let pad_slice = NodeBuilder::new("pad_slice", "Slice")
        .attr("offsets", AttrValue::Ints(vec![2]))
        .attr("size", AttrValue::Ints(vec![4]))
        .input(f32(&[10]))
        .output(f32(&[4]))
        .add_to(&mut graph);
    graph.add_edge(pad.output(0), pad_slice.input(0)).unwrap();
    sink(&mut graph, "out_pad", pad_slice, &[4]);

    // Relu -> Slice, hoistable.
    let wide = data(&mut graph, "wide", &[16]);
    let relu = unary(&mut graph, "relu", "Relu", wide, &[16], &[16]);
    let hoisted_slice = unary(&mut graph, "hoisted_slice", "Slice", relu, &[16], &[4]);
    sink(&mut graph, "out_relu", hoisted_slice, &[4]);

    // ZerosLike -> Transpose.
    let x = data(&mut graph, "x", &[2, 3]);
    let zeros = unary(&mut graph, "zeros", "ZerosLike", x, &[2, 3], &[2, 3]);
    let transpose = unary(&mut graph, "transpose", "Transpose", zeros, &[2, 3], &[3, 2]);
    sink(&mut graph, "out_zeros", transpose, &[3, 2]);

    // Stack with a constant size and two users.
    let size = const_i64(&mut graph, "stack_size", &[32], vec![]);
    let stack = NodeBuilder::new("stack", "Stack")
        .input(TensorDesc::fixed(DataType::I64, &[]))
        .output(TensorDesc::fixed(DataType::Resource, &[]))
        .add_to(&mut graph);
    graph.add_edge(size.output(0), stack.input(0)).unwrap();
    let mut stack_user = |name: &str, op: &str| {
        let node = NodeBuilder::new(name, op)
            .input(TensorDesc::fixed(DataType::Resource, &[]))
            .add_to(&mut graph);
        graph.add_edge(stack.output(0), node.input(0)).unwrap();
        node
    };
    let push = stack_user("push", "StackPush");
    let pop = stack_user("pop", "StackPop");

    // Variable w, an in-place Assign aliasing a computed value, and a
    // reader ordered after the Assign.
    NodeBuilder::new("w", "Variable")
        .output(f32(&[4]))
        .add_to(&mut graph);
    let seed = data(&mut graph, "seed", &[4]);
    let value = data(&mut graph, "value", &[4]);
    let producer = unary(&mut graph, "producer", "Neg", seed, &[4], &[4]);
    let assign = assign(&mut graph, "assign", producer, value);
    let reader = NodeBuilder::new("reader", "Add")
        .input(f32(&[4]))
        .input(f32(&[4]))
        .output(f32(&[4]))
        .add_to(&mut graph);
    graph.add_edge(producer.output(0), reader.input(0)).unwrap();
    graph.add_edge(assign.output(0), reader.input(1)).unwrap();
    sink(&mut graph, "out_reader", reader, &[4]);

    let var_ref = NodeBuilder::new("w_ref", "VariableRef")
        .attr(
            REF_VAR_SRC_VAR_NAME_ATTR,
            AttrValue::String("w".to_string()),
        )
        .input(f32(&[4]))
        .add_to(&mut graph);
    graph.add_edge(assign.output(0), var_ref.input(0)).unwrap();

    Model {
        graph,
        input,
        pad,
        pad_slice,
        relu,
        hoisted_slice,
        transpose,
        zeros,
        stack,
        push,
        pop,
        producer,
        assign,
        reader,
        var_ref,
    }
}

#[test]
fn test_default_pipeline_end_to_end() {
    init_tracing();

    let Model {
        mut graph,
        input,
        pad,
        pad_slice,
        relu,
        hoisted_slice,
        transpose,
        zeros,
        stack,
        push,
        pop,
        producer,
        assign,
        reader,
        var_ref,
    } = model();

    let pipeline = PassPipeline::with_default_passes(PipelineOptions::default());
    let report = pipeline
        .run_to_fixed_point(&mut graph, &PassContext::default())
        .unwrap();

    assert!(report.converged);
    assert!(report.changed());
    assert_eq!(report.failures().count(), 0);

    // Variable ref folded into an annotation on the Assign output.
    assert!(!graph.contains(var_ref));
    assert_eq!(
        graph
            .node(assign)
            .unwrap()
            .output(0)
            .unwrap()
            .desc
            .attr(REF_VAR_SRC_VAR_NAME_ATTR),
        Some(&AttrValue::String("w".to_string()))
    );

    // Stack group stamped.
    let id = graph.node(stack).unwrap().attr_int(HANDLE_ID_ATTR);
    assert!(id.is_some());
    assert_eq!(graph.node(push).unwrap().attr_int(HANDLE_ID_ATTR), id);
    assert_eq!(graph.node(pop).unwrap().attr_int(HANDLE_ID_ATTR), id);
    assert_eq!(graph.node(stack).unwrap().attr_int(MAX_SIZE_ATTR), Some(32));

    // Pad removed, slice reads the original input.
    assert!(!graph.contains(pad));
    assert_eq!(
        graph.producer(pad_slice.input(0)).unwrap(),
        Some(input.output(0))
    );

    // Transpose removed, ZerosLike produces the transposed shape.
    assert!(!graph.contains(transpose));
    assert_eq!(
        graph
            .node(zeros)
            .unwrap()
            .output(0)
            .unwrap()
            .desc
            .shape
            .as_static(),
        Some(&[3usize, 2][..])
    );

    // Slice now runs before the Relu.
    assert_eq!(
        graph.producer(relu.input(0)).unwrap(),
        Some(hoisted_slice.output(0))
    );

    // Copy protects the Assign input, and the later reader uses it.
    let copy = graph.find_node_by_name("assign_copy_0").unwrap();
    assert_eq!(graph.node(copy).unwrap().op, OpKind::MemcpyAsync);
    assert_eq!(
        graph.producer(copy.input(0)).unwrap(),
        Some(producer.output(0))
    );
    assert_eq!(graph.producer(assign.input(0)).unwrap(), Some(copy.output(0)));
    assert_eq!(graph.producer(reader.input(0)).unwrap(), Some(copy.output(0)));

    graph.validate().unwrap();
    graph.topological_order().unwrap();
}

#[test]
fn test_o0_runs_only_correctness_passes() {
    let Model {
        mut graph,
        pad,
        transpose,
        var_ref,
        ..
    } = model();

    let options = PipelineOptions {
        opt_level: OptLevel::O0,
        ..PipelineOptions::default()
    };
    let pipeline = PassPipeline::with_default_passes(options);
    let report = pipeline.run(&mut graph, &PassContext::default()).unwrap();

    let skipped: Vec<&str> = report
        .records
        .iter()
        .filter(|record| matches!(record.outcome, PassOutcome::Skipped))
        .map(|record| record.pass.as_str())
        .collect();
    assert_eq!(
        skipped,
        vec![
            "pad_slice_elimination",
            "transpose_broadcast_elimination",
            "slice_hoist"
        ]
    );

    assert!(graph.contains(pad));
    assert!(graph.contains(transpose));
    assert!(!graph.contains(var_ref));
    assert!(graph.find_node_by_name("assign_copy_0").is_some());
}

#[test]
fn test_missing_variable_aborts_pipeline() {
    let mut graph = Graph::new("broken");
    let x = data(&mut graph, "x", &[4]);
    let var_ref = NodeBuilder::new("ghost_ref", "VariableRef")
        .attr(
            REF_VAR_SRC_VAR_NAME_ATTR,
            AttrValue::String("ghost".to_string()),
        )
        .input(f32(&[4]))
        .add_to(&mut graph);
    graph.add_edge(x.output(0), var_ref.input(0)).unwrap();

    let pipeline = PassPipeline::with_default_passes(PipelineOptions::default());
    let err = pipeline
        .run(&mut graph, &PassContext::default())
        .unwrap_err();

    match err {
        Error::PassFailed { pass, source } => {
            assert_eq!(pass, "variable_ref_resolution");
            assert!(matches!(*source, Error::MissingVariable { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(graph.contains(var_ref));
}

#[test]
fn test_failure_recorded_when_not_fail_fast() {
    let Model { mut graph, pad, .. } = model();
    let ghost = NodeBuilder::new("ghost_ref", "VariableRef")
        .attr(
            REF_VAR_SRC_VAR_NAME_ATTR,
            AttrValue::String("ghost".to_string()),
        )
        .input(f32(&[4]))
        .add_to(&mut graph);
    let x = data(&mut graph, "ghost_input", &[4]);
    graph.add_edge(x.output(0), ghost.input(0)).unwrap();

    let options = PipelineOptions {
        fail_fast: false,
        ..PipelineOptions::default()
    };
    let pipeline = PassPipeline::with_default_passes(options);
    let report = pipeline.run(&mut graph, &PassContext::default()).unwrap();

    let failed: Vec<&str> = report.failures().map(|r| r.pass.as_str()).collect();
    assert_eq!(failed, vec!["variable_ref_resolution"]);
    // Later passes still ran.
    assert!(!graph.contains(pad));
}
