mod array;
mod binary;
mod reduction;
mod unary;

pub use array::*;
pub use binary::*;
pub use reduction::*;
pub use unary::*;

use tapegrad_core::{
    error::Result,
    kernel::{KernelArgs, KernelConfig, KernelRegistry, TensorInfo},
    kernel_names,
};

type CpuKernel = for<'a> fn(KernelArgs<'a>) -> Result<Vec<TensorInfo>>;

/// Registers every cpu kernel under `backend_name`.
pub fn register_cpu_kernels(registry: &KernelRegistry, backend_name: &str) {
    let kernels: [(&str, CpuKernel); 11] = [
        (kernel_names::IDENTITY, identity_kernel),
        (kernel_names::CAST, cast_kernel),
        (kernel_names::FILL, fill_kernel),
        (kernel_names::ADD, add_kernel),
        (kernel_names::SUB, sub_kernel),
        (kernel_names::MUL, mul_kernel),
        (kernel_names::DIV, div_kernel),
        (kernel_names::NEG, neg_kernel),
        (kernel_names::SQUARE, square_kernel),
        (kernel_names::EXP, exp_kernel),
        (kernel_names::SUM, sum_kernel),
    ];
    for (kernel_name, kernel_func) in kernels {
        registry.register(KernelConfig::new(kernel_name, backend_name, kernel_func));
    }
    tracing::debug!(backend = backend_name, "registered cpu kernels");
}
