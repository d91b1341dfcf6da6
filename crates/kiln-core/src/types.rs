//! Tensor descriptors, attribute values, and compile-time constants.

use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;

/// Element types a tensor slot can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    F32,
    F16,
    BF16,
    F64,
    I8,
    I16,
    I32,
    I64,
    U8,
    U32,
    Bool,
    /// Opaque resource handle (stacks, tensor arrays).
    Resource,
    Undefined,
}

impl DataType {
    /// Size of one element in bytes (0 for non-numeric types).
    pub fn size(&self) -> usize {
        match self {
            DataType::F64 | DataType::I64 => 8,
            DataType::F32 | DataType::I32 | DataType::U32 => 4,
            DataType::F16 | DataType::BF16 | DataType::I16 => 2,
            DataType::I8 | DataType::U8 | DataType::Bool => 1,
            DataType::Resource | DataType::Undefined => 0,
        }
    }
}

/// Tensor shape as known to the compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TensorShape {
    /// All dimensions are known at compile time.
    Static(Vec<usize>),

    /// Shape has not been inferred.
    Unknown,
}

impl TensorShape {
    /// Check if the shape is fully static.
    pub fn is_static(&self) -> bool {
        matches!(self, TensorShape::Static(_))
    }

    /// Get static dimensions if available.
    pub fn as_static(&self) -> Option<&[usize]> {
        match self {
            TensorShape::Static(dims) => Some(dims),
            TensorShape::Unknown => None,
        }
    }

    /// Number of dimensions, if known.
    pub fn ndim(&self) -> Option<usize> {
        self.as_static().map(<[usize]>::len)
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorShape::Static(dims) => write!(f, "{:?}", dims),
            TensorShape::Unknown => write!(f, "?"),
        }
    }
}

/// A single dimension of a symbolic shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SymbolicDim {
    /// Compile-time constant dimension.
    Fixed(usize),

    /// Named symbolic dimension (e.g. `batch`, `seq_len`).
    Named(String),
}

/// Shape and element-type descriptor of one input or output slot.
///
/// `symbolic` is the optional symbolic-shape record; its absence is never an
/// error. `attrs` carries per-slot annotations such as the alias index of a
/// reference output.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorDesc {
    pub dtype: DataType,
    pub shape: TensorShape,
    pub symbolic: Option<Vec<SymbolicDim>>,
    pub attrs: HashMap<String, AttrValue>,
}

impl TensorDesc {
    /// Create a descriptor with the given element type and shape.
    pub fn new(dtype: DataType, shape: TensorShape) -> Self {
        Self {
            dtype,
            shape,
            symbolic: None,
            attrs: HashMap::new(),
        }
    }

    /// Create a descriptor with a static shape.
    pub fn fixed(dtype: DataType, dims: &[usize]) -> Self {
        Self::new(dtype, TensorShape::Static(dims.to_vec()))
    }

    /// Create a descriptor whose shape is not yet known.
    pub fn unknown(dtype: DataType) -> Self {
        Self::new(dtype, TensorShape::Unknown)
    }

    /// Attach a symbolic shape.
    pub fn with_symbolic(mut self, dims: Vec<SymbolicDim>) -> Self {
        self.symbolic = Some(dims);
        self
    }

    /// Attach a slot attribute.
    pub fn with_attr(mut self, name: impl Into<String>, value: AttrValue) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }
}

impl Default for TensorDesc {
    fn default() -> Self {
        Self::unknown(DataType::Undefined)
    }
}

/// A tensor known at compile time: element type, dimensions, raw
/// little-endian bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstTensor {
    pub dtype: DataType,
    pub shape: Vec<usize>,
    pub data: Vec<u8>,
}

impl ConstTensor {
    /// Create a constant from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the byte length doesn't match the shape product.
    pub fn new(dtype: DataType, shape: Vec<usize>, data: Vec<u8>) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if dtype.size() != 0 && data.len() != numel * dtype.size() {
            return Err(Error::ConstantEvaluation(format!(
                "Invalid byte length for {:?} tensor of shape {:?}: expected {}, got {}",
                dtype,
                shape,
                numel * dtype.size(),
                data.len()
            )));
        }
        Ok(Self { dtype, shape, data })
    }

    /// Encode integer values as an `I64` constant.
    pub fn from_i64(values: &[i64], shape: Vec<usize>) -> Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self {
            dtype: DataType::I64,
            shape,
            data,
        }
    }

    /// Encode integer values as an `I32` constant.
    pub fn from_i32(values: &[i32], shape: Vec<usize>) -> Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self {
            dtype: DataType::I32,
            shape,
            data,
        }
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Decode integer data (`I32` or `I64`) into `i64` values.
    pub fn to_i64_vec(&self) -> Result<Vec<i64>> {
        match self.dtype {
            DataType::I64 => Ok(self
                .data
                .chunks_exact(8)
                .map(|chunk| {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(chunk);
                    i64::from_le_bytes(bytes)
                })
                .collect()),
            DataType::I32 => Ok(self
                .data
                .chunks_exact(4)
                .map(|chunk| {
                    let mut bytes = [0u8; 4];
                    bytes.copy_from_slice(chunk);
                    i64::from(i32::from_le_bytes(bytes))
                })
                .collect()),
            other => Err(Error::ConstantEvaluation(format!(
                "Expected an integer constant, got {:?}",
                other
            ))),
        }
    }
}

/// Attribute value types.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Int(i64),
    Float(f32),
    String(String),
    Bool(bool),
    Ints(Vec<i64>),
    Shape(TensorShape),
    Blob(Vec<u8>),
    Tensor(ConstTensor),
}

impl AttrValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            AttrValue::Ints(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&ConstTensor> {
        match self {
            AttrValue::Tensor(v) => Some(v),
            _ => None,
        }
    }
}

impl TryFrom<AttrValue> for i64 {
    type Error = String;

    fn try_from(value: AttrValue) -> std::result::Result<Self, Self::Error> {
        match value {
            AttrValue::Int(v) => Ok(v),
            _ => Err("Not an int".to_string()),
        }
    }
}

impl TryFrom<AttrValue> for Vec<i64> {
    type Error = String;

    fn try_from(value: AttrValue) -> std::result::Result<Self, Self::Error> {
        match value {
            AttrValue::Ints(v) => Ok(v),
            _ => Err("Not an int array".to_string()),
        }
    }
}

impl TryFrom<AttrValue> for String {
    type Error = String;

    fn try_from(value: AttrValue) -> std::result::Result<Self, Self::Error> {
        match value {
            AttrValue::String(v) => Ok(v),
            _ => Err("Not a string".to_string()),
        }
    }
}

impl TryFrom<AttrValue> for bool {
    type Error = String;

    fn try_from(value: AttrValue) -> std::result::Result<Self, Self::Error> {
        match value {
            AttrValue::Bool(v) => Ok(v),
            _ => Err("Not a bool".to_string()),
        }
    }
}
