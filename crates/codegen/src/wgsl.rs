//! WGSL emission for the WebGPU backend.
//!
//! Every unique kernel parameter gets one storage binding in group 0, numbered
//! by its position in the parameter list. Sizes are baked into each entry
//! point, so no uniform block is needed.

use crate::backend::{element_count, entry_name};
use anyhow::{bail, Result};
use forgejit_ir::{
    ActivationKind, CompileOptions, DataType, ElementwiseOp, LayerNormOp, LoweredKernel,
    LoweredOp, MatmulOp, Operation,
};
use std::collections::BTreeSet;
use std::fmt::Write;

/// Default `maxComputeInvocationsPerWorkgroup` guaranteed by WebGPU.
pub const MAX_WORKGROUP_INVOCATIONS: u32 = 256;

fn scalar_type(dtype: DataType) -> Result<&'static str> {
    match dtype {
        DataType::F32 => Ok("f32"),
        DataType::F16 => Ok("f16"),
        DataType::BF16 => bail!("bf16 tensors are not representable in WGSL"),
    }
}

pub fn emit(kernel: &LoweredKernel, options: &CompileOptions) -> Result<String> {
    if options.threads > MAX_WORKGROUP_INVOCATIONS {
        bail!(
            "webgpu workgroups support at most {} invocations, got {}",
            MAX_WORKGROUP_INVOCATIONS,
            options.threads
        );
    }

    let written: BTreeSet<&str> = kernel
        .operations
        .iter()
        .filter_map(|op| op.operation.tensors().last().copied().map(|t| t.name.as_str()))
        .collect();

    let mut text = String::new();
    let _ = writeln!(
        text,
        "// Generated by forgejit for webgpu: kernel `{}`",
        kernel.name
    );
    if kernel.params.iter().any(|p| p.dtype == DataType::F16) {
        text.push_str("enable f16;\n");
    }

    for (binding, param) in kernel.params.iter().enumerate() {
        let access = if written.contains(param.name.as_str()) {
            "read_write"
        } else {
            "read"
        };
        let _ = write!(
            text,
            "\n@group(0) @binding({})\nvar<storage, {}> {}: array<{}>;\n",
            binding,
            access,
            param.name,
            scalar_type(param.dtype)?
        );
    }

    for op in &kernel.operations {
        text.push('\n');
        text.push_str(&emit_op(kernel, op, options)?);
    }
    Ok(text)
}

fn emit_op(kernel: &LoweredKernel, op: &LoweredOp, options: &CompileOptions) -> Result<String> {
    let mut body = String::new();
    let _ = writeln!(body, "// schedule: {}", op.schedule);
    let _ = writeln!(body, "@compute @workgroup_size({})", options.threads);
    let _ = writeln!(
        body,
        "fn {}(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) groups: vec3<u32>) {{",
        entry_name(&kernel.name, &op.name)
    );
    let _ = writeln!(body, "  let total = groups.x * {}u;", options.threads);
    match &op.operation {
        Operation::Elementwise(ew) => emit_elementwise(&mut body, ew)?,
        Operation::Matmul(mm) => emit_matmul(&mut body, mm)?,
        Operation::LayerNorm(ln) => emit_layer_norm(&mut body, ln)?,
    }
    body.push_str("}\n");
    Ok(body)
}

fn emit_elementwise(body: &mut String, op: &ElementwiseOp) -> Result<()> {
    let width = op.vector_width.max(1);
    let out_ty = scalar_type(op.result.dtype)?;
    let _ = writeln!(body, "  let n = {}u;", element_count(&op.result)?);
    let _ = writeln!(
        body,
        "  for (var i: u32 = gid.x * {width}u; i < n; i = i + total * {width}u) {{"
    );
    let element = |at: &str| {
        format!(
            "{}[{at}] = {out_ty}(f32({}[{at}]) {} f32({}[{at}]));",
            op.result.name,
            op.lhs.name,
            op.kind.symbol(),
            op.rhs.name
        )
    };
    if width > 1 {
        let _ = writeln!(body, "    for (var v: u32 = 0u; v < {width}u; v = v + 1u) {{");
        let _ = writeln!(body, "      {}", element("i + v"));
        body.push_str("    }\n");
    } else {
        let _ = writeln!(body, "    {}", element("i"));
    }
    body.push_str("  }\n");
    Ok(())
}

fn emit_matmul(body: &mut String, op: &MatmulOp) -> Result<()> {
    let (m, k, n) = match (op.lhs.shape.as_slice(), op.rhs.shape.as_slice()) {
        ([m, k], [_, n]) => (*m, *k, *n),
        _ => bail!("matmul `{}` expects rank-2 operands", op.name),
    };
    let out_ty = scalar_type(op.result.dtype)?;
    let _ = writeln!(body, "  let size_m = {m}u;");
    let _ = writeln!(body, "  let size_n = {n}u;");
    let _ = writeln!(body, "  let size_k = {k}u;");
    body.push_str("  for (var idx: u32 = gid.x; idx < size_m * size_n; idx = idx + total) {\n");
    body.push_str("    let row = idx / size_n;\n");
    body.push_str("    let col = idx % size_n;\n");
    body.push_str("    var acc: f32 = 0.0;\n");
    body.push_str("    for (var kk: u32 = 0u; kk < size_k; kk = kk + 1u) {\n");
    let _ = writeln!(
        body,
        "      acc = acc + f32({}[row * size_k + kk]) * f32({}[kk * size_n + col]);",
        op.lhs.name, op.rhs.name
    );
    body.push_str("    }\n");
    if let Some(bias) = &op.bias {
        let _ = writeln!(body, "    acc = acc + f32({}[col]);", bias.name);
    }
    match op.activation {
        ActivationKind::None => {}
        ActivationKind::Relu => body.push_str("    acc = max(acc, 0.0);\n"),
        ActivationKind::Gelu => body.push_str(
            "    acc = 0.5 * acc * (1.0 + tanh(0.7978845608 * (acc + 0.044715 * acc * acc * acc)));\n",
        ),
    }
    let _ = writeln!(body, "    {}[idx] = {out_ty}(acc);", op.result.name);
    body.push_str("  }\n");
    Ok(())
}

fn emit_layer_norm(body: &mut String, op: &LayerNormOp) -> Result<()> {
    let Some(&cols) = op.input.shape.last() else {
        bail!("layer norm `{}` expects rank >= 1 input", op.name);
    };
    let rows = element_count(&op.input)? / cols.max(1);
    let out_ty = scalar_type(op.result.dtype)?;
    let x = &op.input.name;
    let _ = writeln!(body, "  let rows = {rows}u;");
    let _ = writeln!(body, "  let cols = {cols}u;");
    body.push_str("  for (var row: u32 = gid.x; row < rows; row = row + total) {\n");
    body.push_str("    let off = row * cols;\n");
    body.push_str("    var mean: f32 = 0.0;\n");
    body.push_str("    for (var j: u32 = 0u; j < cols; j = j + 1u) {\n");
    let _ = writeln!(body, "      mean = mean + f32({x}[off + j]);");
    body.push_str("    }\n");
    body.push_str("    mean = mean / f32(cols);\n");
    body.push_str("    var var_sum: f32 = 0.0;\n");
    body.push_str("    for (var j: u32 = 0u; j < cols; j = j + 1u) {\n");
    let _ = writeln!(body, "      let d = f32({x}[off + j]) - mean;");
    body.push_str("      var_sum = var_sum + d * d;\n");
    body.push_str("    }\n");
    let _ = writeln!(
        body,
        "    let inv_std = 1.0 / sqrt(var_sum / f32(cols) + {:e});",
        op.epsilon
    );
    body.push_str("    for (var j: u32 = 0u; j < cols; j = j + 1u) {\n");
    let _ = writeln!(
        body,
        "      {}[off + j] = {out_ty}((f32({x}[off + j]) - mean) * inv_std);",
        op.result.name
    );
    body.push_str("    }\n");
    body.push_str("  }\n");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgejit_ir::{tensor, BinaryKind, ModuleBuilder};
    use forgejit_target::Backend;

    fn chain(dtype: DataType) -> LoweredKernel {
        let module = ModuleBuilder::new("chain")
            .add_elementwise(
                "first",
                BinaryKind::Add,
                tensor("a", &[64], dtype),
                tensor("b", &[64], dtype),
                tensor("t", &[64], dtype),
            )
            .add_elementwise(
                "second",
                BinaryKind::Sub,
                tensor("t", &[64], dtype),
                tensor("b", &[64], dtype),
                tensor("out", &[64], dtype),
            )
            .build();
        LoweredKernel::lower(&module, Backend::WebGpu, &CompileOptions::default()).unwrap()
    }

    #[test]
    fn shared_tensors_get_a_single_binding() {
        let source = emit(&chain(DataType::F32), &CompileOptions::default()).unwrap();
        assert_eq!(source.matches("@binding(").count(), 4);
        assert!(source.contains("@group(0) @binding(2)\nvar<storage, read_write> t: array<f32>;"));
        assert!(source.contains("var<storage, read> a: array<f32>;"));
    }

    #[test]
    fn half_precision_enables_extension() {
        let source = emit(&chain(DataType::F16), &CompileOptions::default()).unwrap();
        assert!(source.contains("enable f16;"));
        assert!(source.contains("array<f16>"));
    }

    #[test]
    fn bf16_is_rejected() {
        let err = emit(&chain(DataType::BF16), &CompileOptions::default()).unwrap_err();
        assert!(err.to_string().contains("bf16"));
    }

    #[test]
    fn workgroup_limit_is_enforced() {
        let options = CompileOptions::default().with_threads(512);
        assert!(emit(&chain(DataType::F32), &options).is_err());
    }
}
