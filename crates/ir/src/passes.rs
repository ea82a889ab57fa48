//! Transformation passes for kernel modules.

use crate::builder::KernelModule;
use crate::dialect::{Operation, TensorSpec};
use anyhow::{bail, ensure, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

pub const FLAG_VECTORIZE: &str = "vectorize";
pub const FLAG_VECTOR_WIDTH: &str = "vector-width";

/// Value of a compile-time flag. Flags the built-in passes do not know are
/// carried along untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PassFlag {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl PassFlag {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PassFlag::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PassFlag::Int(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<bool> for PassFlag {
    fn from(value: bool) -> Self {
        PassFlag::Bool(value)
    }
}

impl From<i64> for PassFlag {
    fn from(value: i64) -> Self {
        PassFlag::Int(value)
    }
}

impl From<&str> for PassFlag {
    fn from(value: &str) -> Self {
        PassFlag::Str(value.to_string())
    }
}

pub type PassFlags = BTreeMap<String, PassFlag>;

pub trait Pass {
    fn name(&self) -> &str;
    fn run(&self, module: &mut KernelModule) -> Result<()>;
}

/// Rejects modules whose operand shapes cannot produce the declared result.
pub struct VerifyShapes;

impl Pass for VerifyShapes {
    fn name(&self) -> &str {
        "verify-shapes"
    }

    fn run(&self, module: &mut KernelModule) -> Result<()> {
        ensure!(
            !module.operations.is_empty(),
            "kernel `{}` has no operations",
            module.name
        );
        let mut declared: BTreeMap<&str, &TensorSpec> = BTreeMap::new();
        for op in &module.operations {
            for tensor in op.tensors() {
                ensure!(
                    tensor.numel().is_some(),
                    "`{}`: `{}` has too many elements ({:?})",
                    op.name(),
                    tensor.name,
                    tensor.shape
                );
                match declared.get(tensor.name.as_str()) {
                    Some(first) => ensure!(
                        first.shape == tensor.shape && first.dtype == tensor.dtype,
                        "`{}`: `{}` is redeclared as {:?} {} (first declared as {:?} {})",
                        op.name(),
                        tensor.name,
                        tensor.shape,
                        tensor.dtype.as_str(),
                        first.shape,
                        first.dtype.as_str()
                    ),
                    None => {
                        declared.insert(tensor.name.as_str(), tensor);
                    }
                }
            }
            match op {
                Operation::Elementwise(ew) => {
                    same_layout(&ew.name, &ew.lhs, &ew.rhs)?;
                    same_layout(&ew.name, &ew.lhs, &ew.result)?;
                }
                Operation::Matmul(mm) => {
                    let (m, k) = matrix_dims(&mm.name, &mm.lhs)?;
                    let (k2, n) = matrix_dims(&mm.name, &mm.rhs)?;
                    let (rm, rn) = matrix_dims(&mm.name, &mm.result)?;
                    ensure!(
                        k == k2,
                        "`{}`: inner dimensions differ ({} vs {})",
                        mm.name,
                        k,
                        k2
                    );
                    ensure!(
                        (rm, rn) == (m, n),
                        "`{}`: result is {}x{}, expected {}x{}",
                        mm.name,
                        rm,
                        rn,
                        m,
                        n
                    );
                    if let Some(bias) = &mm.bias {
                        ensure!(
                            bias.shape == [n],
                            "`{}`: bias `{}` must have shape [{}]",
                            mm.name,
                            bias.name,
                            n
                        );
                    }
                }
                Operation::LayerNorm(ln) => {
                    ensure!(ln.input.rank() >= 1, "`{}`: input must have rank >= 1", ln.name);
                    ensure!(
                        ln.epsilon.is_finite() && ln.epsilon > 0.0,
                        "`{}`: epsilon must be positive and finite, got {}",
                        ln.name,
                        ln.epsilon
                    );
                    same_layout(&ln.name, &ln.input, &ln.result)?;
                }
            }
        }
        debug!(pass = self.name(), ops = module.operations.len(), "verified shapes");
        Ok(())
    }
}

fn same_layout(op: &str, a: &TensorSpec, b: &TensorSpec) -> Result<()> {
    ensure!(
        a.shape == b.shape,
        "`{}`: `{}` has shape {:?} but `{}` has shape {:?}",
        op,
        a.name,
        a.shape,
        b.name,
        b.shape
    );
    ensure!(
        a.dtype == b.dtype,
        "`{}`: `{}` is {} but `{}` is {}",
        op,
        a.name,
        a.dtype.as_str(),
        b.name,
        b.dtype.as_str()
    );
    Ok(())
}

fn matrix_dims(op: &str, t: &TensorSpec) -> Result<(usize, usize)> {
    match t.shape.as_slice() {
        [rows, cols] => Ok((*rows, *cols)),
        other => bail!("`{}`: `{}` must be rank 2, got {:?}", op, t.name, other),
    }
}

/// Assigns a per-thread vector width to elementwise operations whose element
/// count divides evenly.
pub struct VectorizeElementwise {
    pub width: usize,
}

impl Pass for VectorizeElementwise {
    fn name(&self) -> &str {
        "vectorize-elementwise"
    }

    fn run(&self, module: &mut KernelModule) -> Result<()> {
        ensure!(
            self.width.is_power_of_two() && self.width <= 16,
            "vector width must be a power of two <= 16, got {}",
            self.width
        );
        let mut vectorized = 0;
        for op in module.operations.iter_mut() {
            if let Operation::Elementwise(ew) = op {
                let Some(numel) = ew.result.numel() else {
                    bail!("`{}`: element count of `{}` overflows", ew.name, ew.result.name);
                };
                if self.width > 1 && numel % self.width == 0 {
                    ew.vector_width = self.width;
                    vectorized += 1;
                }
            }
        }
        debug!(pass = self.name(), width = self.width, vectorized, "vectorized elementwise ops");
        Ok(())
    }
}

pub struct PassPipeline {
    passes: Vec<Box<dyn Pass + Send + Sync>>,
}

impl PassPipeline {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Builds the pipeline selected by compile-time flags.
    pub fn from_flags(flags: &PassFlags) -> Result<Self> {
        let mut pipeline = Self::new();
        pipeline.add_pass(VerifyShapes);

        let vectorize = match flags.get(FLAG_VECTORIZE) {
            Some(flag) => flag
                .as_bool()
                .ok_or_else(|| anyhow::anyhow!("flag `{}` expects a boolean", FLAG_VECTORIZE))?,
            None => true,
        };
        if vectorize {
            let width = match flags.get(FLAG_VECTOR_WIDTH) {
                Some(flag) => {
                    let raw = flag.as_int().ok_or_else(|| {
                        anyhow::anyhow!("flag `{}` expects an integer", FLAG_VECTOR_WIDTH)
                    })?;
                    usize::try_from(raw)
                        .map_err(|_| anyhow::anyhow!("vector width must be positive, got {}", raw))?
                }
                None => 4,
            };
            pipeline.add_pass(VectorizeElementwise { width });
        }
        Ok(pipeline)
    }

    pub fn add_pass<P>(&mut self, pass: P)
    where
        P: Pass + Send + Sync + 'static,
    {
        self.passes.push(Box::new(pass));
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|pass| pass.name()).collect()
    }

    pub fn run(&self, module: &mut KernelModule) -> Result<()> {
        for pass in &self.passes {
            pass.run(module)?;
        }
        Ok(())
    }
}

impl Default for PassPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{tensor, ModuleBuilder};
    use crate::dialect::{ActivationKind, BinaryKind, DataType};

    fn add_module(n: usize) -> KernelModule {
        ModuleBuilder::new("add")
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
    fn default_flags_verify_then_vectorize() -> Result<()> {
        let pipeline = PassPipeline::from_flags(&PassFlags::new())?;
        assert_eq!(pipeline.pass_names(), ["verify-shapes", "vectorize-elementwise"]);

        let mut module = add_module(1024);
        pipeline.run(&mut module)?;
        match &module.operations[0] {
            Operation::Elementwise(ew) => assert_eq!(ew.vector_width, 4),
            other => panic!("unexpected op {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn uneven_sizes_stay_scalar() -> Result<()> {
        let mut module = add_module(1023);
        PassPipeline::from_flags(&PassFlags::new())?.run(&mut module)?;
        match &module.operations[0] {
            Operation::Elementwise(ew) => assert_eq!(ew.vector_width, 1),
            other => panic!("unexpected op {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn vectorize_can_be_disabled() -> Result<()> {
        let mut flags = PassFlags::new();
        flags.insert(FLAG_VECTORIZE.into(), false.into());
        flags.insert("unroll-hint".into(), "aggressive".into());
        let pipeline = PassPipeline::from_flags(&flags)?;
        assert_eq!(pipeline.pass_names(), ["verify-shapes"]);
        Ok(())
    }

    #[test]
    fn mistyped_flag_is_rejected() {
        let mut flags = PassFlags::new();
        flags.insert(FLAG_VECTOR_WIDTH.into(), "wide".into());
        assert!(PassPipeline::from_flags(&flags).is_err());
    }

    #[test]
    fn matmul_inner_dimension_mismatch_fails() {
        let mut module = ModuleBuilder::new("bad")
            .add_matmul(
                "mm",
                tensor("a", &[8, 16], DataType::F32),
                tensor("b", &[8, 4], DataType::F32),
                tensor("c", &[8, 4], DataType::F32),
                None,
                ActivationKind::None,
            )
            .build();
        let err = VerifyShapes.run(&mut module).unwrap_err();
        assert!(err.to_string().contains("inner dimensions"));
    }

    #[test]
    fn conflicting_redeclaration_fails() {
        let mut module = ModuleBuilder::new("mixed")
            .add_elementwise(
                "a",
                BinaryKind::Add,
                tensor("x", &[8], DataType::F32),
                tensor("y", &[8], DataType::F32),
                tensor("h", &[8], DataType::F32),
            )
            .add_elementwise(
                "d",
                BinaryKind::Mul,
                tensor("h", &[16], DataType::F16),
                tensor("z", &[16], DataType::F16),
                tensor("out", &[16], DataType::F16),
            )
            .build();
        let err = VerifyShapes.run(&mut module).unwrap_err();
        assert!(err.to_string().contains("`h` is redeclared"), "{err}");
    }

    #[test]
    fn consistent_reuse_is_accepted() -> Result<()> {
        let mut module = ModuleBuilder::new("chain")
            .add_elementwise(
                "first",
                BinaryKind::Add,
                tensor("x", &[8], DataType::F32),
                tensor("x", &[8], DataType::F32),
                tensor("h", &[8], DataType::F32),
            )
            .add_elementwise(
                "second",
                BinaryKind::Sub,
                tensor("h", &[8], DataType::F32),
                tensor("x", &[8], DataType::F32),
                tensor("out", &[8], DataType::F32),
            )
            .build();
        VerifyShapes.run(&mut module)?;
        Ok(())
    }

    #[test]
    fn non_finite_epsilon_fails() {
        for epsilon in [f32::NAN, f32::INFINITY, 0.0] {
            let mut module = ModuleBuilder::new("norm")
                .add_layer_norm(
                    "ln",
                    tensor("x", &[4, 8], DataType::F32),
                    epsilon,
                    tensor("y", &[4, 8], DataType::F32),
                )
                .build();
            let err = VerifyShapes.run(&mut module).unwrap_err();
            assert!(err.to_string().contains("epsilon"), "{err}");
        }
    }

    #[test]
    fn overflowing_shapes_fail_instead_of_wrapping() {
        let huge = [usize::MAX / 2, 4];
        let mut module = ModuleBuilder::new("huge")
            .add_elementwise(
                "add",
                BinaryKind::Add,
                tensor("a", &huge, DataType::F32),
                tensor("b", &huge, DataType::F32),
                tensor("c", &huge, DataType::F32),
            )
            .build();
        let err = VerifyShapes.run(&mut module).unwrap_err();
        assert!(err.to_string().contains("too many elements"), "{err}");
        assert!(VectorizeElementwise { width: 4 }.run(&mut module).is_err());
    }
}
