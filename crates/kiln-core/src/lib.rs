//! Core intermediate representation and pass contract for kiln.
//!
//! This crate provides the foundational abstractions the rewrite passes in
//! `kiln-compiler` are written against:
//! - Arena-backed dataflow graph (`Graph`, `Node`, `OutPort`, `InPort`)
//! - Reachability cache over a graph (`ConnectionMatrix`)
//! - Staged graph edits applied after validation (`EditList`)
//! - External collaborators passed in explicitly (`PassContext`)
//! - The `Pass` trait and its `PassStatus` outcome

pub mod builder;
pub mod connection_matrix;
pub mod context;
pub mod edit;
pub mod ir;
pub mod op_kind;
pub mod pass;
pub mod types;

// Re-export commonly used types
pub use builder::{NodeBuilder, NodeDesc};
pub use connection_matrix::ConnectionMatrix;
pub use context::{
    BuiltinClassifier, ConstNodeEvaluator, ConstantEvaluator, OpClassifier, PassContext,
};
pub use edit::{Edit, EditList};
pub use ir::{Graph, InPort, InputSlot, Node, NodeId, OutPort, OutputSlot};
pub use op_kind::OpKind;
pub use pass::{OptLevel, Pass, PassStatus};
pub use types::{AttrValue, ConstTensor, DataType, SymbolicDim, TensorDesc, TensorShape};

/// Result type using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for kiln graph operations and passes.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),

    #[error("Node {0} not found (removed or foreign handle)")]
    NodeNotFound(NodeId),

    #[error("Input {port} already has a producer ({existing})")]
    SingleProducer { port: InPort, existing: OutPort },

    #[error("Edge {src} -> {dst} does not exist")]
    EdgeNotFound { src: OutPort, dst: InPort },

    #[error("Attribute error: {0}")]
    Attribute(String),

    #[error("Constant evaluation failed: {0}")]
    ConstantEvaluation(String),

    #[error("Variable '{variable}' referenced by node '{node}' does not exist")]
    MissingVariable { variable: String, node: String },

    #[error("Cannot resolve resource handle of node '{node}': {reason}")]
    UnresolvedResource { node: String, reason: String },

    #[error("Pass '{pass}' failed: {source}")]
    PassFailed {
        pass: String,
        #[source]
        source: Box<Error>,
    },
}
