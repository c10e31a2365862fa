use crate::utils::cpu_backend;
use tapegrad_core::{
    attrs::{get_dtype, get_float, get_shape},
    backend::Backend,
    error::Result,
    kernel::{KernelArgs, TensorInfo},
    values::BackendValues,
};

/// Shares the input's data: one more claim on the same data id.
pub fn identity_kernel(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    let x = args.inputs.require("x")?;
    args.backend.inc_ref(x.data_id)?;
    Ok(vec![x.clone()])
}

pub fn cast_kernel(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    let x = args.inputs.require("x")?;
    let dtype = get_dtype(args.attrs, "dtype")?;
    if dtype == x.dtype {
        return identity_kernel(args);
    }

    let backend = cpu_backend(&args)?;
    let values = backend.with_values(x.data_id, |values, _| values.cast(dtype))??;
    let data_id = backend.write(values, &x.shape, dtype)?;
    Ok(vec![TensorInfo::new(data_id, &x.shape, dtype)])
}

pub fn fill_kernel(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    let shape = get_shape(args.attrs, "shape")?;
    let value = get_float(args.attrs, "value")?;
    let dtype = get_dtype(args.attrs, "dtype")?;

    let size = shape.iter().product();
    let data_id = args
        .backend
        .write(BackendValues::filled(dtype, size, value as f32), &shape, dtype)?;
    Ok(vec![TensorInfo::new(data_id, &shape, dtype)])
}
