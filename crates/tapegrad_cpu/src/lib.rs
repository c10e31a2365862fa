pub mod backend;
pub mod kernels;
mod utils;

pub use backend::{CpuBackend, CpuEntry};
pub use kernels::register_cpu_kernels;

/// Name the cpu backend registers under by default.
pub const CPU_BACKEND_NAME: &str = "cpu";
