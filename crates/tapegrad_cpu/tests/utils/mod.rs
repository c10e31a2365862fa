#![allow(dead_code)]

use tapegrad_core::{
    attrs::Attrs,
    backend::Backend,
    dtype::DType,
    error::{Error, Result},
    kernel::{KernelArgs, KernelRegistry, NamedTensorInfoMap, TensorInfo},
    values::BackendValues,
};
use tapegrad_cpu::{register_cpu_kernels, CpuBackend};

pub fn setup_f32(backend: &CpuBackend, values: Vec<f32>, shape: &[usize]) -> Result<TensorInfo> {
    let data_id = backend.write(values.into(), shape, DType::F32)?;
    Ok(TensorInfo::new(data_id, shape, DType::F32))
}

pub fn setup_i32(backend: &CpuBackend, values: Vec<i32>, shape: &[usize]) -> Result<TensorInfo> {
    let data_id = backend.write(values.into(), shape, DType::I32)?;
    Ok(TensorInfo::new(data_id, shape, DType::I32))
}

/// Dispatches `kernel_name` through a freshly populated registry.
pub fn run(backend: &CpuBackend, kernel_name: &str, inputs: &NamedTensorInfoMap, attrs: &Attrs) -> Result<Vec<TensorInfo>> {
    let registry = KernelRegistry::new();
    register_cpu_kernels(&registry, "cpu");
    let config = registry.get(kernel_name, "cpu").ok_or(Error::KernelNotFound {
        kernel: kernel_name.to_string(),
        backend: "cpu".to_string(),
    })?;
    (config.kernel_func)(KernelArgs { inputs, attrs, backend })
}

pub fn read_f32(backend: &CpuBackend, info: &TensorInfo) -> Result<Vec<f32>> {
    match backend.read_sync(info.data_id)? {
        BackendValues::F32(v) => Ok(v),
        other => other.to_f32_vec(),
    }
}

pub fn assert_close(actual: &[f32], expected: &[f32], epsilon: f32) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() <= epsilon, "expected {:?}, got {:?}", expected, actual);
    }
}
