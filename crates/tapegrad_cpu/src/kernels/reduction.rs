use crate::utils::{cpu_backend, unsupported_dtype, PARALLEL_THRESHOLD};
use rayon::prelude::*;
use tapegrad_core::{
    backend::Backend,
    error::Result,
    kernel::{KernelArgs, TensorInfo},
    kernel_names,
    values::BackendValues,
};

/// Sums every element into a rank-0 tensor.
pub fn sum_kernel(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    let x = args.inputs.require("x")?;
    let backend = cpu_backend(&args)?;
    let values = backend.with_values(x.data_id, |values, _| match values {
        BackendValues::F32(v) => {
            let total: f32 = if v.len() >= PARALLEL_THRESHOLD {
                v.par_iter().sum()
            } else {
                v.iter().sum()
            };
            Ok(BackendValues::F32(vec![total]))
        },
        BackendValues::I32(v) => Ok(BackendValues::I32(vec![v.iter().fold(0i32, |acc, &x| acc.wrapping_add(x))])),
        _ => Err(unsupported_dtype(kernel_names::SUM, x.dtype)),
    })??;

    let data_id = backend.write(values, &[], x.dtype)?;
    Ok(vec![TensorInfo::new(data_id, &[], x.dtype)])
}
