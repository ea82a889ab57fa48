//! IR builder entrypoints and kernel identity.

use crate::dialect::{
    ActivationKind, BinaryKind, DataType, ElementwiseOp, LayerNormOp, MatmulOp, Operation,
    TensorSpec,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::warn;

#[derive(Debug, Default, Clone)]
pub struct ModuleBuilder {
    name: String,
    operations: Vec<Operation>,
}

impl ModuleBuilder {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            operations: Vec::new(),
        }
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn add_elementwise<N: Into<String>>(
        mut self,
        name: N,
        kind: BinaryKind,
        lhs: TensorSpec,
        rhs: TensorSpec,
        result: TensorSpec,
    ) -> Self {
        let op = ElementwiseOp {
            name: name.into(),
            kind,
            lhs,
            rhs,
            result,
            vector_width: 1,
        };
        self.operations.push(Operation::Elementwise(op));
        self
    }

    pub fn add_matmul<N: Into<String>>(
        mut self,
        name: N,
        lhs: TensorSpec,
        rhs: TensorSpec,
        result: TensorSpec,
        bias: Option<TensorSpec>,
        activation: ActivationKind,
    ) -> Self {
        let op = MatmulOp {
            name: name.into(),
            lhs,
            rhs,
            result,
            bias,
            activation,
        };
        self.operations.push(Operation::Matmul(op));
        self
    }

    pub fn add_layer_norm<N: Into<String>>(
        mut self,
        name: N,
        input: TensorSpec,
        epsilon: f32,
        result: TensorSpec,
    ) -> Self {
        let op = LayerNormOp {
            name: name.into(),
            input,
            epsilon,
            result,
        };
        self.operations.push(Operation::LayerNorm(op));
        self
    }

    pub fn build(self) -> KernelModule {
        KernelModule {
            name: self.name,
            operations: self.operations,
        }
    }
}

/// A kernel definition as handed over by the description layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelModule {
    pub name: String,
    pub operations: Vec<Operation>,
}

impl KernelModule {
    pub fn builder<N: Into<String>>(name: N) -> ModuleBuilder {
        ModuleBuilder::new(name)
    }

    /// Content hash of the module. Two modules built from the same calls
    /// produce the same identity.
    ///
    /// JSON writes every non-finite float as `null`, so float attributes are
    /// also hashed by their bit patterns.
    pub fn identity(&self) -> KernelIdentity {
        let mut hasher = Sha256::new();
        if let Err(err) = serde_json::to_writer(&mut hasher, self) {
            warn!(kernel = %self.name, error = %err, "falling back to debug text for kernel identity");
            hasher = Sha256::new();
            hasher.update(format!("{:?}", self).as_bytes());
        }
        for op in &self.operations {
            if let Operation::LayerNorm(ln) = op {
                hasher.update(ln.epsilon.to_bits().to_le_bytes());
            }
        }
        KernelIdentity(hasher.finalize().into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KernelIdentity([u8; 32]);

impl KernelIdentity {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for KernelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

pub fn tensor(name: &str, shape: &[usize], dtype: DataType) -> TensorSpec {
    TensorSpec::new(name, shape.to_vec(), dtype)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector_add(n: usize) -> KernelModule {
        ModuleBuilder::new("vector_add")
            .add_elementwise(
                "add",
                BinaryKind::Add,
                tensor("a", &[n], DataType::F32),
                tensor("b", &[n], DataType::F32),
                tensor("c", &[n], DataType::F32),
            )
            .build()
    }

    #[test]
    fn identity_is_stable_across_redefinition() {
        assert_eq!(vector_add(1024).identity(), vector_add(1024).identity());
    }

    #[test]
    fn identity_tracks_shape() {
        assert_ne!(vector_add(1024).identity(), vector_add(2048).identity());
    }

    fn norm(epsilon: f32) -> KernelModule {
        ModuleBuilder::new("norm")
            .add_layer_norm(
                "ln",
                tensor("x", &[4, 8], DataType::F32),
                epsilon,
                tensor("y", &[4, 8], DataType::F32),
            )
            .build()
    }

    #[test]
    fn identity_separates_non_finite_epsilons() {
        let nan = norm(f32::NAN).identity();
        let inf = norm(f32::INFINITY).identity();
        assert_ne!(nan, inf);
        assert_ne!(inf, norm(f32::NEG_INFINITY).identity());
        assert_eq!(norm(1e-5).identity(), norm(1e-5).identity());
    }

    #[test]
    fn identity_display_is_short_hex() {
        let text = vector_add(16).identity().to_string();
        assert_eq!(text.len(), 16);
        assert!(text.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
