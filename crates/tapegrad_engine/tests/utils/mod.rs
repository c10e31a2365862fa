#![allow(dead_code)]

use std::sync::Arc;
use tapegrad_core::{
    backend::{BackendInit, FloatPrecision},
    env::EnvFlags,
    error::Result,
};
use tapegrad_cpu::{register_cpu_kernels, CpuBackend, CPU_BACKEND_NAME};
use tapegrad_engine::{register_gradients, Engine, Tensor};

pub const EPSILON: f32 = 1e-3;

/// Engine in leak-checking mode with the cpu backend, its kernels and the
/// built-in gradients.
pub fn setup_engine() -> Result<Engine> {
    setup_engine_with_flags(EnvFlags::test())
}

pub fn setup_engine_with_flags(flags: EnvFlags) -> Result<Engine> {
    let engine = Engine::new(flags);
    register_cpu_kernels(engine.kernel_registry(), CPU_BACKEND_NAME);
    register_gradients(engine.gradient_registry())?;
    engine.register_backend(CPU_BACKEND_NAME, || Ok(BackendInit::Ready(Arc::new(CpuBackend::new()))), 1);
    Ok(engine)
}

/// Adds a second host backend named `name` sharing the cpu kernels.
pub fn add_cpu_backend(engine: &Engine, name: &str, priority: i32) {
    engine
        .kernel_registry()
        .copy_registered_kernels(CPU_BACKEND_NAME, name);
    engine.register_backend(
        name,
        || Ok(BackendInit::Ready(Arc::new(CpuBackend::with_precision(FloatPrecision::Single)))),
        priority,
    );
}

pub fn read(engine: &Engine, tensor: &Tensor) -> Result<Vec<f32>> {
    engine.read_f32_sync(tensor)
}

pub fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len(), "expected {:?}, got {:?}", expected, actual);
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() <= EPSILON, "expected {:?}, got {:?}", expected, actual);
    }
}
