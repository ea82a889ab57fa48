//! Kernel dialect definitions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    F32,
    F16,
    BF16,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::F32 => "f32",
            DataType::F16 => "f16",
            DataType::BF16 => "bf16",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TensorSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: DataType,
}

impl TensorSpec {
    pub fn new<N: Into<String>>(name: N, shape: Vec<usize>, dtype: DataType) -> Self {
        Self {
            name: name.into(),
            shape,
            dtype,
        }
    }

    /// Total element count; a rank-0 tensor holds one element. `None` when
    /// the count does not fit in `usize`.
    pub fn numel(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActivationKind {
    #[default]
    None,
    Relu,
    Gelu,
}

impl ActivationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivationKind::None => "none",
            ActivationKind::Relu => "relu",
            ActivationKind::Gelu => "gelu",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BinaryKind {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryKind {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryKind::Add => "+",
            BinaryKind::Sub => "-",
            BinaryKind::Mul => "*",
            BinaryKind::Div => "/",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ElementwiseOp {
    pub name: String,
    pub kind: BinaryKind,
    pub lhs: TensorSpec,
    pub rhs: TensorSpec,
    pub result: TensorSpec,
    /// Elements handled per thread. Set by the vectorize pass.
    pub vector_width: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MatmulOp {
    pub name: String,
    pub lhs: TensorSpec,
    pub rhs: TensorSpec,
    pub result: TensorSpec,
    pub bias: Option<TensorSpec>,
    pub activation: ActivationKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayerNormOp {
    pub name: String,
    pub input: TensorSpec,
    pub epsilon: f32,
    pub result: TensorSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Elementwise(ElementwiseOp),
    Matmul(MatmulOp),
    LayerNorm(LayerNormOp),
}

impl Operation {
    pub fn name(&self) -> &str {
        match self {
            Operation::Elementwise(op) => &op.name,
            Operation::Matmul(op) => &op.name,
            Operation::LayerNorm(op) => &op.name,
        }
    }

    /// Tensors in parameter order: inputs first, result last.
    pub fn tensors(&self) -> Vec<&TensorSpec> {
        match self {
            Operation::Elementwise(op) => vec![&op.lhs, &op.rhs, &op.result],
            Operation::Matmul(op) => {
                let mut tensors = vec![&op.lhs, &op.rhs];
                if let Some(bias) = &op.bias {
                    tensors.push(bias);
                }
                tensors.push(&op.result);
                tensors
            }
            Operation::LayerNorm(op) => vec![&op.input, &op.result],
        }
    }
}
