//! External collaborators a pass may consult, bundled into a `PassContext`.
//!
//! Collaborators are plain trait objects handed to every pass explicitly, so
//! tests can build independent contexts with their own stand-ins.

use crate::ir::{Graph, InPort, Node};
use crate::types::ConstTensor;
use crate::{Error, Result};

/// Evaluates compile-time-constant node inputs.
pub trait ConstantEvaluator: Send + Sync {
    /// The constant value feeding `port`, or `None` if it isn't constant.
    ///
    /// # Errors
    ///
    /// Returns an error if the producer claims to be constant but its value
    /// cannot be extracted.
    fn constant_input(&self, graph: &Graph, port: InPort) -> Result<Option<ConstTensor>>;
}

/// Classifies operators by behaviour.
pub trait OpClassifier: Send + Sync {
    /// Whether the node is a unary elementwise op whose output shape equals
    /// its input shape.
    fn is_elementwise_shape_preserving(&self, node: &Node) -> bool;
}

/// Attribute holding the tensor value of a constant node.
pub const CONST_VALUE_ATTR: &str = "value";

/// Reads constants from `Const`/`Constant` producers' `value` attribute.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConstNodeEvaluator;

impl ConstantEvaluator for ConstNodeEvaluator {
    fn constant_input(&self, graph: &Graph, port: InPort) -> Result<Option<ConstTensor>> {
        let Some(src) = graph.producer(port)? else {
            return Ok(None);
        };
        let producer = graph.node(src.node)?;
        if !producer.op.is_constant() {
            return Ok(None);
        }

        match producer.attr(CONST_VALUE_ATTR) {
            Some(value) => value.as_tensor().cloned().map(Some).ok_or_else(|| {
                Error::ConstantEvaluation(format!(
                    "Attribute '{}' of constant node '{}' is not a tensor",
                    CONST_VALUE_ATTR, producer.name
                ))
            }),
            None => Err(Error::ConstantEvaluation(format!(
                "Constant node '{}' has no '{}' attribute",
                producer.name, CONST_VALUE_ATTR
            ))),
        }
    }
}

/// Unary elementwise operators that keep their input shape.
const ELEMENTWISE_SHAPE_PRESERVING: &[&str] = &[
    "Abs",
    "Cast",
    "Ceil",
    "Cos",
    "Elu",
    "Erf",
    "Exp",
    "Floor",
    "Gelu",
    "LeakyRelu",
    "Log",
    "LogicalNot",
    "Neg",
    "Reciprocal",
    "Relu",
    "Relu6",
    "Round",
    "Rsqrt",
    "Sigmoid",
    "Sign",
    "Sin",
    "Softplus",
    "Sqrt",
    "Square",
    "Swish",
    "Tanh",
];

/// Classifier backed by a fixed list of operator kinds.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinClassifier;

impl OpClassifier for BuiltinClassifier {
    fn is_elementwise_shape_preserving(&self, node: &Node) -> bool {
        node.inputs().len() == 1
            && node.outputs().len() == 1
            && ELEMENTWISE_SHAPE_PRESERVING.contains(&node.op.as_str())
    }
}

/// Collaborators available to a pass during one `run`.
pub struct PassContext {
    constants: Box<dyn ConstantEvaluator>,
    classifier: Box<dyn OpClassifier>,
}

impl PassContext {
    pub fn new(
        constants: impl ConstantEvaluator + 'static,
        classifier: impl OpClassifier + 'static,
    ) -> Self {
        Self {
            constants: Box::new(constants),
            classifier: Box::new(classifier),
        }
    }

    pub fn constants(&self) -> &dyn ConstantEvaluator {
        self.constants.as_ref()
    }

    pub fn classifier(&self) -> &dyn OpClassifier {
        self.classifier.as_ref()
    }
}

impl Default for PassContext {
    fn default() -> Self {
        Self::new(ConstNodeEvaluator, BuiltinClassifier)
    }
}
