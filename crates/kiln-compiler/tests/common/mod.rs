//! Common test utilities for pass and pipeline tests.
//!
//! Small graph builders shared by the integration tests. Every tensor is
//! `F32` unless a helper says otherwise.

#![allow(dead_code)]

use kiln_core::context::CONST_VALUE_ATTR;
use kiln_core::ir::{IS_REF_ATTR, REF_PORT_INDEX_ATTR};
use kiln_core::{AttrValue, ConstTensor, DataType, Graph, NodeBuilder, NodeId, TensorDesc};

// Re-export types commonly used in tests
pub use kiln_compiler::{PassPipeline, PipelineOptions};
pub use kiln_core::PassContext;

/// Initialize a tracing subscriber with timing, once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_test_writer()
        .try_init();
}

pub fn f32(dims: &[usize]) -> TensorDesc {
    TensorDesc::fixed(DataType::F32, dims)
}

/// Graph input with one output.
pub fn data(graph: &mut Graph, name: &str, dims: &[usize]) -> NodeId {
    NodeBuilder::new(name, "Data").output(f32(dims)).add_to(graph)
}

/// Graph result consuming `from`.
pub fn sink(graph: &mut Graph, name: &str, from: NodeId, dims: &[usize]) -> NodeId {
    let node = NodeBuilder::new(name, "NetOutput")
        .input(f32(dims))
        .add_to(graph);
    graph.add_edge(from.output(0), node.input(0)).unwrap();
    node
}

/// One-input, one-output node consuming `from`.
pub fn unary(
    graph: &mut Graph,
    name: &str,
    op: &str,
    from: NodeId,
    in_dims: &[usize],
    out_dims: &[usize],
) -> NodeId {
    let node = NodeBuilder::new(name, op)
        .input(f32(in_dims))
        .output(f32(out_dims))
        .add_to(graph);
    graph.add_edge(from.output(0), node.input(0)).unwrap();
    node
}

/// `Const` node holding an `I64` tensor.
pub fn const_i64(graph: &mut Graph, name: &str, values: &[i64], shape: Vec<usize>) -> NodeId {
    NodeBuilder::new(name, "Const")
        .attr(
            CONST_VALUE_ATTR,
            AttrValue::Tensor(ConstTensor::from_i64(values, shape.clone())),
        )
        .output(TensorDesc::fixed(DataType::I64, &shape))
        .add_to(graph)
}

/// Reference node writing output 0 into input 0, fed by `target` and `value`.
pub fn assign(graph: &mut Graph, name: &str, target: NodeId, value: NodeId) -> NodeId {
    let node = NodeBuilder::new(name, "Assign")
        .attr(IS_REF_ATTR, AttrValue::Bool(true))
        .input(f32(&[4]))
        .input(f32(&[4]))
        .output(f32(&[4]).with_attr(REF_PORT_INDEX_ATTR, AttrValue::Int(0)))
        .add_to(graph);
    graph.add_edge(target.output(0), node.input(0)).unwrap();
    graph.add_edge(value.output(0), node.input(1)).unwrap();
    node
}
