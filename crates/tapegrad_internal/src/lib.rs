#![allow(non_upper_case_globals)]

pub mod prelude;

pub use tapegrad_core as core;
#[cfg(feature = "cpu")]
pub use tapegrad_cpu as cpu;
pub use tapegrad_engine as engine;

pub use tapegrad_core::dtype::{bool, complex64, float32, int32, string};

use tapegrad_core::{env::EnvFlags, error::Result};
use tapegrad_engine::{register_gradients, Engine};

/// Engine configured from the `TAPEGRAD_*` environment variables.
#[cfg(feature = "cpu")]
pub fn default_engine() -> Result<Engine> {
    default_engine_with_flags(EnvFlags::from_process_env())
}

/// Engine with the cpu backend, its kernels and the built-in gradients
/// registered.
#[cfg(feature = "cpu")]
pub fn default_engine_with_flags(flags: EnvFlags) -> Result<Engine> {
    use std::sync::Arc;
    use tapegrad_core::backend::BackendInit;
    use tapegrad_cpu::{register_cpu_kernels, CpuBackend, CPU_BACKEND_NAME};

    let engine = Engine::new(flags);
    register_cpu_kernels(engine.kernel_registry(), CPU_BACKEND_NAME);
    register_gradients(engine.gradient_registry())?;
    engine.register_backend(
        CPU_BACKEND_NAME,
        || Ok(BackendInit::Ready(Arc::new(CpuBackend::new()))),
        1,
    );
    Ok(engine)
}

/// Engine with only the built-in gradients registered; backends and their
/// kernels are added by the caller.
pub fn bare_engine(flags: EnvFlags) -> Result<Engine> {
    let engine = Engine::new(flags);
    register_gradients(engine.gradient_registry())?;
    Ok(engine)
}
