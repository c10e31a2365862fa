use crate::utils::{broadcast_scalar_shape, cpu_backend, ensure_same_dtype, map_binary, unsupported_dtype};
use paste::paste;
use tapegrad_core::{
    backend::Backend,
    error::Result,
    kernel::{KernelArgs, TensorInfo},
    kernel_names,
    values::BackendValues,
};

fn binary<F, I>(args: KernelArgs<'_>, op: &str, f32_op: F, i32_op: I) -> Result<Vec<TensorInfo>>
where
    F: Fn(f32, f32) -> f32 + Sync + Send,
    I: Fn(i32, i32) -> i32 + Sync + Send,
{
    let a = args.inputs.require("a")?;
    let b = args.inputs.require("b")?;
    let dtype = ensure_same_dtype(op, a, b)?;
    let shape = broadcast_scalar_shape(op, a, b)?;
    let len = shape.iter().product();

    let backend = cpu_backend(&args)?;
    // both guards are released before the output is written
    let values = backend.with_values(a.data_id, |lhs, _| {
        backend.with_values(b.data_id, |rhs, _| match (lhs, rhs) {
            (BackendValues::F32(lhs), BackendValues::F32(rhs)) => Ok(BackendValues::F32(map_binary(lhs, rhs, len, f32_op))),
            (BackendValues::I32(lhs), BackendValues::I32(rhs)) => Ok(BackendValues::I32(map_binary(lhs, rhs, len, i32_op))),
            _ => Err(unsupported_dtype(op, dtype)),
        })
    })???;

    let data_id = backend.write(values, &shape, dtype)?;
    Ok(vec![TensorInfo::new(data_id, &shape, dtype)])
}

macro_rules! binary_kernel {
    ($($name:ident => $op:expr, $f32_op:expr, $i32_op:expr;)+) => {
        paste! {
            $(
                pub fn [<$name _kernel>](args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
                    binary(args, $op, $f32_op, $i32_op)
                }
            )+
        }
    };
}

binary_kernel! {
    add => kernel_names::ADD, |a, b| a + b, |a: i32, b: i32| a.wrapping_add(b);
    sub => kernel_names::SUB, |a, b| a - b, |a: i32, b: i32| a.wrapping_sub(b);
    mul => kernel_names::MUL, |a, b| a * b, |a: i32, b: i32| a.wrapping_mul(b);
    // integer division floors, division by zero saturates
    div => kernel_names::DIV, |a, b| a / b, |a: i32, b: i32| (a as f64 / b as f64).floor() as i32;
}
