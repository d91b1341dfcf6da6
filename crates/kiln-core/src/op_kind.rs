//! Operator kinds the rewrite passes pattern-match on.
//!
//! The operator catalogue is open-ended; kinds the core doesn't need to
//! recognise round-trip through [`OpKind::Other`].

use std::fmt;

macro_rules! op_kinds {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// Operator kind of a node.
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum OpKind {
            $($variant,)*
            /// Any kind unknown to the core.
            Other(String),
        }

        impl OpKind {
            /// Canonical string key of this kind.
            pub fn as_str(&self) -> &str {
                match self {
                    $(OpKind::$variant => $name,)*
                    OpKind::Other(name) => name,
                }
            }
        }

        impl From<&str> for OpKind {
            fn from(name: &str) -> Self {
                match name {
                    $($name => OpKind::$variant,)*
                    other => OpKind::Other(other.to_string()),
                }
            }
        }
    };
}

op_kinds! {
    Data => "Data",
    NetOutput => "NetOutput",
    Const => "Const",
    Constant => "Constant",
    Variable => "Variable",
    VariableV2 => "VariableV2",
    VarHandleOp => "VarHandleOp",
    VariableRef => "VariableRef",
    Assign => "Assign",
    AssignAdd => "AssignAdd",
    Pad => "Pad",
    Slice => "Slice",
    StridedSlice => "StridedSlice",
    Transpose => "Transpose",
    TransposeD => "TransposeD",
    ZerosLike => "ZerosLike",
    OnesLike => "OnesLike",
    Fill => "Fill",
    Identity => "Identity",
    MemcpyAsync => "MemcpyAsync",
    Enter => "Enter",
    RefEnter => "RefEnter",
    Exit => "Exit",
    RefExit => "RefExit",
    NextIteration => "NextIteration",
    RefNextIteration => "RefNextIteration",
    Switch => "Switch",
    RefSwitch => "RefSwitch",
    Merge => "Merge",
    RefMerge => "RefMerge",
    LoopCond => "LoopCond",
    PartitionedCall => "PartitionedCall",
    StatefulPartitionedCall => "StatefulPartitionedCall",
    Stack => "Stack",
    StackV2 => "StackV2",
    StackPush => "StackPush",
    StackPop => "StackPop",
    StackClose => "StackClose",
}

impl OpKind {
    pub fn is_slice_family(&self) -> bool {
        matches!(self, OpKind::Slice | OpKind::StridedSlice)
    }

    pub fn is_transpose_family(&self) -> bool {
        matches!(self, OpKind::Transpose | OpKind::TransposeD)
    }

    /// Broadcast-constant producers whose output values don't depend on layout.
    pub fn is_shape_agnostic_fill(&self) -> bool {
        matches!(self, OpKind::ZerosLike | OpKind::OnesLike | OpKind::Fill)
    }

    /// Constant producers readable by the constant evaluator.
    pub fn is_constant(&self) -> bool {
        matches!(self, OpKind::Const | OpKind::Constant)
    }

    /// Nodes that own persistent storage and are safe to alias.
    pub fn is_variable_like(&self) -> bool {
        matches!(
            self,
            OpKind::Variable | OpKind::VariableV2 | OpKind::VarHandleOp
        )
    }

    /// Legacy control-flow operators.
    pub fn is_legacy_control(&self) -> bool {
        matches!(
            self,
            OpKind::Enter
                | OpKind::RefEnter
                | OpKind::Exit
                | OpKind::RefExit
                | OpKind::NextIteration
                | OpKind::RefNextIteration
                | OpKind::Switch
                | OpKind::RefSwitch
                | OpKind::Merge
                | OpKind::RefMerge
                | OpKind::LoopCond
        )
    }

    /// Call operators that own a subgraph.
    pub fn is_call(&self) -> bool {
        matches!(
            self,
            OpKind::PartitionedCall | OpKind::StatefulPartitionedCall
        )
    }

    /// Operators that create a resource handle.
    pub fn is_resource_source(&self) -> bool {
        matches!(self, OpKind::Stack | OpKind::StackV2)
    }

    /// Operators that consume a resource handle on input 0.
    pub fn is_resource_consumer(&self) -> bool {
        matches!(
            self,
            OpKind::StackPush | OpKind::StackPop | OpKind::StackClose
        )
    }
}

impl From<String> for OpKind {
    fn from(name: String) -> Self {
        OpKind::from(name.as_str())
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
