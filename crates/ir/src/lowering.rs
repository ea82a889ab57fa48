//! Lowering from kernel modules to backend-ready kernels.

use crate::builder::KernelModule;
use crate::dialect::{Operation, TensorSpec};
use crate::options::CompileOptions;
use crate::passes::PassPipeline;
use anyhow::{bail, Result};
use forgejit_target::Backend;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LoweredOp {
    pub name: String,
    pub operation: Operation,
    pub schedule: String,
}

/// The backend-ready form of a kernel module.
#[derive(Debug, Clone)]
pub struct LoweredKernel {
    pub name: String,
    pub backend: Backend,
    /// Unique tensors in first-use order.
    pub params: Vec<TensorSpec>,
    /// Indices into `params` that the runtime treats as outputs.
    pub outputs: Vec<usize>,
    pub operations: Vec<LoweredOp>,
}

impl LoweredKernel {
    pub fn lower(
        source: &KernelModule,
        backend: Backend,
        options: &CompileOptions,
    ) -> Result<Self> {
        let mut module = source.clone();
        let pipeline = PassPipeline::from_flags(&options.pass_flags)?;
        pipeline.run(&mut module)?;

        let mut params: Vec<TensorSpec> = Vec::new();
        for operation in &module.operations {
            for tensor in operation.tensors() {
                if !params.iter().any(|p| p.name == tensor.name) {
                    params.push(tensor.clone());
                }
            }
        }
        let outputs = normalize_out_idx(&options.out_idx, params.len())?;

        let operations = module
            .operations
            .into_iter()
            .map(|operation| LoweredOp {
                name: operation.name().to_string(),
                schedule: default_schedule_for(&operation, backend),
                operation,
            })
            .collect::<Vec<_>>();

        debug!(
            kernel = %module.name,
            backend = %backend,
            params = params.len(),
            ops = operations.len(),
            "lowered kernel"
        );

        Ok(Self {
            name: module.name,
            backend,
            params,
            outputs,
            operations,
        })
    }
}

fn normalize_out_idx(out_idx: &[i64], param_count: usize) -> Result<Vec<usize>> {
    if param_count == 0 {
        bail!("kernel has no parameters");
    }
    if out_idx.is_empty() {
        return Ok(vec![param_count - 1]);
    }
    let count = param_count as i64;
    let mut outputs = Vec::with_capacity(out_idx.len());
    for &raw in out_idx {
        let index = if raw < 0 { count + raw } else { raw };
        if !(0..count).contains(&index) {
            bail!(
                "output index {} out of range for {} parameters",
                raw,
                param_count
            );
        }
        let index = index as usize;
        if !outputs.contains(&index) {
            outputs.push(index);
        }
    }
    Ok(outputs)
}

fn default_schedule_for(operation: &Operation, backend: Backend) -> String {
    match (backend, operation) {
        (Backend::C, _) => "host-loop".to_string(),
        (_, Operation::Elementwise(op)) if op.vector_width > 1 => {
            format!("grid-stride-v{}", op.vector_width)
        }
        (_, Operation::Elementwise(_)) => "grid-stride".to_string(),
        (Backend::Cuda | Backend::Hip, Operation::Matmul(_)) => "simt-per-output".to_string(),
        (Backend::Metal, Operation::Matmul(_)) => "threadgroup-per-output".to_string(),
        (Backend::WebGpu, Operation::Matmul(_)) => "workgroup-per-output".to_string(),
        (_, Operation::LayerNorm(_)) => "row-per-thread".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{tensor, ModuleBuilder};
    use crate::dialect::{ActivationKind, BinaryKind, DataType};

    fn linear() -> KernelModule {
        ModuleBuilder::new("linear")
            .add_matmul(
                "proj",
                tensor("x", &[8, 16], DataType::F32),
                tensor("w", &[16, 4], DataType::F32),
                tensor("h", &[8, 4], DataType::F32),
                None,
                ActivationKind::Relu,
            )
            .add_elementwise(
                "residual",
                BinaryKind::Add,
                tensor("h", &[8, 4], DataType::F32),
                tensor("r", &[8, 4], DataType::F32),
                tensor("y", &[8, 4], DataType::F32),
            )
            .build()
    }

    #[test]
    fn params_are_unique_in_first_use_order() -> Result<()> {
        let lowered = LoweredKernel::lower(&linear(), Backend::Cuda, &CompileOptions::default())?;
        let names: Vec<_> = lowered.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["x", "w", "h", "r", "y"]);
        assert_eq!(lowered.outputs, vec![4]);
        Ok(())
    }

    #[test]
    fn negative_out_idx_counts_from_the_end() -> Result<()> {
        let options = CompileOptions::default().with_out_idx(vec![-1, 2]);
        let lowered = LoweredKernel::lower(&linear(), Backend::Hip, &options)?;
        assert_eq!(lowered.outputs, vec![4, 2]);
        Ok(())
    }

    #[test]
    fn out_of_range_out_idx_is_an_error() {
        let options = CompileOptions::default().with_out_idx(vec![5]);
        assert!(LoweredKernel::lower(&linear(), Backend::Cuda, &options).is_err());
    }

    #[test]
    fn schedules_follow_backend() -> Result<()> {
        let options = CompileOptions::default();
        let gpu = LoweredKernel::lower(&linear(), Backend::Cuda, &options)?;
        assert_eq!(gpu.operations[0].schedule, "simt-per-output");
        assert_eq!(gpu.operations[1].schedule, "grid-stride-v4");

        let host = LoweredKernel::lower(&linear(), Backend::C, &options)?;
        assert!(host.operations.iter().all(|op| op.schedule == "host-loop"));
        Ok(())
    }

    #[test]
    fn redeclared_tensor_with_other_layout_is_rejected() {
        let module = ModuleBuilder::new("mixed")
            .add_elementwise(
                "a",
                BinaryKind::Add,
                tensor("x", &[8], DataType::F32),
                tensor("y", &[8], DataType::F32),
                tensor("h", &[8], DataType::F32),
            )
            .add_elementwise(
                "d",
                BinaryKind::Add,
                tensor("h", &[16], DataType::F16),
                tensor("z", &[16], DataType::F16),
                tensor("out", &[16], DataType::F16),
            )
            .build();
        assert!(LoweredKernel::lower(&module, Backend::WebGpu, &CompileOptions::default()).is_err());
    }

    #[test]
    fn aliased_operands_become_one_param() -> Result<()> {
        let x = tensor("x", &[64], DataType::F32);
        let module = ModuleBuilder::new("square")
            .add_elementwise("sq", BinaryKind::Mul, x.clone(), x, tensor("y", &[64], DataType::F32))
            .build();
        let lowered = LoweredKernel::lower(&module, Backend::Metal, &CompileOptions::default())?;
        let names: Vec<_> = lowered.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["x", "y"]);
        assert_eq!(lowered.outputs, vec![1]);
        Ok(())
    }
}
