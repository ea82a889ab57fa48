//! Emitters for the C family: CUDA, HIP, Metal Shading Language and host C.
//!
//! All four share one body shape: each entry point computes a global thread
//! id and a total thread count, then walks its iteration space with a
//! grid-stride loop. On the host the id is 0 and the count is 1, which turns
//! the same loop into a plain sequential one.

use crate::backend::{element_count, entry_name};
use anyhow::{bail, Result};
use forgejit_ir::{
    ActivationKind, CompileOptions, DataType, ElementwiseOp, LayerNormOp, LoweredKernel,
    LoweredOp, MatmulOp, Operation, TensorSpec,
};
use std::collections::BTreeSet;
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Cuda,
    Hip,
    Metal,
    Host,
}

impl Dialect {
    fn label(&self) -> &'static str {
        match self {
            Dialect::Cuda => "cuda",
            Dialect::Hip => "hip",
            Dialect::Metal => "metal",
            Dialect::Host => "c",
        }
    }

    fn scalar_type(&self, dtype: DataType) -> &'static str {
        match (self, dtype) {
            (_, DataType::F32) => "float",
            (Dialect::Cuda, DataType::F16) | (Dialect::Hip, DataType::F16) => "__half",
            (Dialect::Cuda, DataType::BF16) => "__nv_bfloat16",
            (Dialect::Hip, DataType::BF16) => "__hip_bfloat16",
            (Dialect::Metal, DataType::F16) => "half",
            (Dialect::Metal, DataType::BF16) => "bfloat",
            (Dialect::Host, DataType::F16) => "_Float16",
            (Dialect::Host, DataType::BF16) => "__bf16",
        }
    }

    fn index_type(&self) -> &'static str {
        match self {
            Dialect::Metal => "uint",
            _ => "long",
        }
    }

    fn sqrt(&self) -> &'static str {
        match self {
            Dialect::Metal => "sqrt",
            _ => "sqrtf",
        }
    }

    fn tanh(&self) -> &'static str {
        match self {
            Dialect::Metal => "tanh",
            _ => "tanhf",
        }
    }

    fn prelude(&self, dtypes: &BTreeSet<DataType>) -> String {
        let mut text = String::new();
        match self {
            Dialect::Cuda => {
                if dtypes.contains(&DataType::F16) {
                    text.push_str("#include <cuda_fp16.h>\n");
                }
                if dtypes.contains(&DataType::BF16) {
                    text.push_str("#include <cuda_bf16.h>\n");
                }
            }
            Dialect::Hip => {
                text.push_str("#include <hip/hip_runtime.h>\n");
                if dtypes.contains(&DataType::F16) {
                    text.push_str("#include <hip/hip_fp16.h>\n");
                }
                if dtypes.contains(&DataType::BF16) {
                    text.push_str("#include <hip/hip_bf16.h>\n");
                }
            }
            Dialect::Metal => {
                text.push_str("#include <metal_stdlib>\nusing namespace metal;\n");
            }
            Dialect::Host => {
                text.push_str("#include <math.h>\n");
            }
        }
        text
    }

    /// Every entry point takes the kernel-level parameter list, so argument
    /// positions match `LoweredKernel::params` and the artifact's outputs.
    /// Only the tensor the op writes is non-const.
    fn signature(&self, name: &str, params: &[TensorSpec], written: &str, threads: u32) -> String {
        let args = params
            .iter()
            .enumerate()
            .map(|(index, tensor)| {
                let ty = self.scalar_type(tensor.dtype);
                let constness = if tensor.name == written { "" } else { "const " };
                match self {
                    Dialect::Cuda | Dialect::Hip => {
                        format!("{}{}* __restrict__ {}", constness, ty, tensor.name)
                    }
                    Dialect::Metal => format!(
                        "device {}{}* {} [[buffer({})]]",
                        constness, ty, tensor.name, index
                    ),
                    Dialect::Host => format!("{}{}* restrict {}", constness, ty, tensor.name),
                }
            })
            .collect::<Vec<_>>();

        match self {
            Dialect::Cuda | Dialect::Hip => format!(
                "extern \"C\" __global__ void __launch_bounds__({}) {}({})",
                threads,
                name,
                args.join(", ")
            ),
            Dialect::Metal => format!(
                "[[max_total_threads_per_threadgroup({})]] kernel void {}({}, uint gid_ [[thread_position_in_grid]], uint total_ [[threads_per_grid]])",
                threads,
                name,
                args.join(", ")
            ),
            Dialect::Host => format!("void {}({})", name, args.join(", ")),
        }
    }

    fn thread_setup(&self) -> String {
        let idx = self.index_type();
        match self {
            Dialect::Cuda | Dialect::Hip => format!(
                "  const {idx} gid = ({idx})blockIdx.x * blockDim.x + threadIdx.x;\n  const {idx} total = ({idx})gridDim.x * blockDim.x;\n"
            ),
            Dialect::Metal => format!("  const {idx} gid = gid_;\n  const {idx} total = total_;\n"),
            Dialect::Host => format!("  const {idx} gid = 0;\n  const {idx} total = 1;\n"),
        }
    }

    fn unroll_pragma(&self) -> &'static str {
        match self {
            Dialect::Host => "",
            _ => "    #pragma unroll\n",
        }
    }
}

pub fn emit(kernel: &LoweredKernel, dialect: Dialect, options: &CompileOptions) -> Result<String> {
    if dialect != Dialect::Host && options.threads > 1024 {
        bail!(
            "{} kernels support at most 1024 threads per block, got {}",
            dialect.label(),
            options.threads
        );
    }

    let dtypes: BTreeSet<DataType> = kernel.params.iter().map(|p| p.dtype).collect();
    let mut text = String::new();
    let _ = writeln!(
        text,
        "// Generated by forgejit for {}: kernel `{}`",
        dialect.label(),
        kernel.name
    );
    text.push_str(&dialect.prelude(&dtypes));

    for op in &kernel.operations {
        text.push('\n');
        text.push_str(&emit_op(kernel, op, dialect, options)?);
    }
    Ok(text)
}

fn emit_op(
    kernel: &LoweredKernel,
    op: &LoweredOp,
    dialect: Dialect,
    options: &CompileOptions,
) -> Result<String> {
    let name = entry_name(&kernel.name, &op.name);
    let Some(written) = op.operation.tensors().last().map(|t| t.name.clone()) else {
        bail!("operation `{}` has no result tensor", op.name);
    };
    let mut body = String::new();
    let _ = writeln!(body, "// schedule: {}", op.schedule);
    let _ = writeln!(
        body,
        "{} {{",
        dialect.signature(&name, &kernel.params, &written, options.threads)
    );
    body.push_str(&dialect.thread_setup());
    match &op.operation {
        Operation::Elementwise(ew) => emit_elementwise(&mut body, ew, dialect)?,
        Operation::Matmul(mm) => emit_matmul(&mut body, mm, dialect)?,
        Operation::LayerNorm(ln) => emit_layer_norm(&mut body, ln, dialect)?,
    }
    body.push_str("}\n");
    Ok(body)
}

fn emit_elementwise(body: &mut String, op: &ElementwiseOp, dialect: Dialect) -> Result<()> {
    let idx = dialect.index_type();
    let width = op.vector_width.max(1);
    let out_ty = dialect.scalar_type(op.result.dtype);
    let _ = writeln!(body, "  const {} n = {};", idx, element_count(&op.result)?);
    let _ = writeln!(
        body,
        "  for ({idx} i = gid * {width}; i < n; i += total * {width}) {{"
    );
    let element = |at: &str| {
        format!(
            "{}[{}] = ({})((float){}[{}] {} (float){}[{}]);",
            op.result.name,
            at,
            out_ty,
            op.lhs.name,
            at,
            op.kind.symbol(),
            op.rhs.name,
            at
        )
    };
    if width > 1 {
        body.push_str(dialect.unroll_pragma());
        let _ = writeln!(body, "    for (int v = 0; v < {}; ++v) {{", width);
        let _ = writeln!(body, "      {}", element("i + v"));
        body.push_str("    }\n");
    } else {
        let _ = writeln!(body, "    {}", element("i"));
    }
    body.push_str("  }\n");
    Ok(())
}

fn emit_matmul(body: &mut String, op: &MatmulOp, dialect: Dialect) -> Result<()> {
    let idx = dialect.index_type();
    let (m, k, n) = match (op.lhs.shape.as_slice(), op.rhs.shape.as_slice()) {
        ([m, k], [_, n]) => (*m, *k, *n),
        _ => bail!("matmul `{}` expects rank-2 operands", op.name),
    };
    let out_ty = dialect.scalar_type(op.result.dtype);
    let _ = writeln!(body, "  const {idx} M = {m}, N = {n}, K = {k};");
    let _ = writeln!(body, "  for ({idx} idx = gid; idx < M * N; idx += total) {{");
    let _ = writeln!(body, "    const {idx} row = idx / N;");
    let _ = writeln!(body, "    const {idx} col = idx % N;");
    body.push_str("    float acc = 0.0f;\n");
    let _ = writeln!(body, "    for ({idx} kk = 0; kk < K; ++kk) {{");
    let _ = writeln!(
        body,
        "      acc += (float){}[row * K + kk] * (float){}[kk * N + col];",
        op.lhs.name, op.rhs.name
    );
    body.push_str("    }\n");
    if let Some(bias) = &op.bias {
        let _ = writeln!(body, "    acc += (float){}[col];", bias.name);
    }
    match op.activation {
        ActivationKind::None => {}
        ActivationKind::Relu => body.push_str("    acc = acc > 0.0f ? acc : 0.0f;\n"),
        ActivationKind::Gelu => {
            let _ = writeln!(
                body,
                "    acc = 0.5f * acc * (1.0f + {}(0.7978845608f * (acc + 0.044715f * acc * acc * acc)));",
                dialect.tanh()
            );
        }
    }
    let _ = writeln!(body, "    {}[idx] = ({})acc;", op.result.name, out_ty);
    body.push_str("  }\n");
    Ok(())
}

fn emit_layer_norm(body: &mut String, op: &LayerNormOp, dialect: Dialect) -> Result<()> {
    let idx = dialect.index_type();
    let Some(&cols) = op.input.shape.last() else {
        bail!("layer norm `{}` expects rank >= 1 input", op.name);
    };
    let rows = element_count(&op.input)? / cols.max(1);
    let out_ty = dialect.scalar_type(op.result.dtype);
    let x = &op.input.name;
    let _ = writeln!(body, "  const {idx} rows = {rows}, cols = {cols};");
    let _ = writeln!(body, "  for ({idx} row = gid; row < rows; row += total) {{");
    let _ = writeln!(body, "    const {idx} off = row * cols;");
    body.push_str("    float mean = 0.0f;\n");
    let _ = writeln!(body, "    for ({idx} j = 0; j < cols; ++j) mean += (float){x}[off + j];");
    body.push_str("    mean /= (float)cols;\n");
    body.push_str("    float var = 0.0f;\n");
    let _ = writeln!(body, "    for ({idx} j = 0; j < cols; ++j) {{");
    let _ = writeln!(body, "      const float d = (float){x}[off + j] - mean;");
    body.push_str("      var += d * d;\n");
    body.push_str("    }\n");
    let _ = writeln!(
        body,
        "    const float inv_std = 1.0f / {}(var / (float)cols + {:e}f);",
        dialect.sqrt(),
        op.epsilon
    );
    let _ = writeln!(body, "    for ({idx} j = 0; j < cols; ++j) {{");
    let _ = writeln!(
        body,
        "      {}[off + j] = ({})(((float){x}[off + j] - mean) * inv_std);",
        op.result.name, out_ty
    );
    body.push_str("    }\n");
    body.push_str("  }\n");
    Ok(())
}
