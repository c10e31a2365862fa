use crate::utils::{cpu_backend, map_unary, unsupported_dtype};
use paste::paste;
use tapegrad_core::{
    backend::Backend,
    error::Result,
    kernel::{KernelArgs, TensorInfo},
    kernel_names,
    values::BackendValues,
};

fn unary<F>(args: KernelArgs<'_>, op: &str, f32_op: F, i32_op: Option<fn(i32) -> i32>) -> Result<Vec<TensorInfo>>
where
    F: Fn(f32) -> f32 + Sync + Send,
{
    let x = args.inputs.require("x")?;
    let backend = cpu_backend(&args)?;
    let values = backend.with_values(x.data_id, |values, _| match (values, i32_op) {
        (BackendValues::F32(v), _) => Ok(BackendValues::F32(map_unary(v, f32_op))),
        (BackendValues::I32(v), Some(i32_op)) => Ok(BackendValues::I32(map_unary(v, i32_op))),
        _ => Err(unsupported_dtype(op, x.dtype)),
    })??;

    let data_id = backend.write(values, &x.shape, x.dtype)?;
    Ok(vec![TensorInfo::new(data_id, &x.shape, x.dtype)])
}

macro_rules! unary_kernel {
    ($($name:ident => $op:expr, $f32_op:expr, $i32_op:expr;)+) => {
        paste! {
            $(
                pub fn [<$name _kernel>](args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
                    unary(args, $op, $f32_op, $i32_op)
                }
            )+
        }
    };
}

unary_kernel! {
    neg => kernel_names::NEG, |x: f32| -x, Some(|x: i32| x.wrapping_neg());
    square => kernel_names::SQUARE, |x: f32| x * x, Some(|x: i32| x.wrapping_mul(x));
    exp => kernel_names::EXP, |x: f32| x.exp(), None;
}
