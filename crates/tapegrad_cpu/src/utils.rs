use crate::backend::CpuBackend;
use rayon::prelude::*;
use tapegrad_core::{
    dtype::DType,
    error::{Error, Result},
    kernel::{KernelArgs, TensorInfo},
};

/// Element count from which element-wise loops go through rayon.
pub const PARALLEL_THRESHOLD: usize = 1 << 12;

#[inline]
pub fn map_unary<T, U, F>(input: &[T], f: F) -> Vec<U>
where
    T: Copy + Sync,
    U: Send,
    F: Fn(T) -> U + Sync + Send,
{
    if input.len() >= PARALLEL_THRESHOLD {
        input.par_iter().map(|&x| f(x)).collect()
    } else {
        input.iter().map(|&x| f(x)).collect()
    }
}

/// Applies `f` element-wise over `len` outputs. A single-element side is
/// broadcast against the other.
#[inline]
pub fn map_binary<T, F>(lhs: &[T], rhs: &[T], len: usize, f: F) -> Vec<T>
where
    T: Copy + Send + Sync,
    F: Fn(T, T) -> T + Sync + Send,
{
    let lhs_at = |i: usize| if lhs.len() == 1 { lhs[0] } else { lhs[i] };
    let rhs_at = |i: usize| if rhs.len() == 1 { rhs[0] } else { rhs[i] };
    if len >= PARALLEL_THRESHOLD {
        (0..len).into_par_iter().map(|i| f(lhs_at(i), rhs_at(i))).collect()
    } else {
        (0..len).map(|i| f(lhs_at(i), rhs_at(i))).collect()
    }
}

pub fn cpu_backend<'a>(args: &KernelArgs<'a>) -> Result<&'a CpuBackend> {
    args.backend
        .as_any()
        .downcast_ref::<CpuBackend>()
        .ok_or_else(|| Error::InvalidArgument(format!("kernel expects a cpu backend, got '{}'", args.backend.kind())))
}

/// Shape of a binary op's output: equal shapes, or one rank-0 operand.
pub fn broadcast_scalar_shape(op: &str, a: &TensorInfo, b: &TensorInfo) -> Result<Vec<usize>> {
    if a.shape == b.shape {
        Ok(a.shape.clone())
    } else if a.shape.is_empty() {
        Ok(b.shape.clone())
    } else if b.shape.is_empty() {
        Ok(a.shape.clone())
    } else {
        Err(Error::DimensionMismatch {
            expected: a.shape.clone(),
            got: b.shape.clone(),
            msg: format!("{} operands must have equal shapes or one must be a scalar", op),
        })
    }
}

pub fn ensure_same_dtype(op: &str, a: &TensorInfo, b: &TensorInfo) -> Result<DType> {
    if a.dtype != b.dtype {
        return Err(Error::DTypeMismatch {
            expected: a.dtype,
            got: b.dtype,
            msg: op.to_string(),
        });
    }
    Ok(a.dtype)
}

pub fn unsupported_dtype(op: &str, dtype: DType) -> Error {
    Error::DTypeMismatch {
        expected: DType::F32,
        got: dtype,
        msg: format!("{} is not supported for {} on the cpu backend", op, dtype),
    }
}
