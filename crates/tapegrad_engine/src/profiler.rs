use crate::engine::Engine;
use std::time::Instant;
use tapegrad_core::{
    backend::{Backend, BackendTimingInfo},
    error::{Error, Result},
    values::BackendValues,
};

/// Per-kernel record collected by [`Engine::profile`].
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KernelProfile {
    pub name: String,
    pub bytes_added: i64,
    pub total_bytes_snapshot: usize,
    pub tensors_added: i64,
    pub total_tensors_snapshot: usize,
    pub input_shapes: Vec<Vec<usize>>,
    pub output_shapes: Vec<Vec<usize>>,
    pub kernel_ms: f64,
    pub extra_info: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProfileInfo {
    pub new_bytes: i64,
    pub new_tensors: i64,
    pub peak_bytes: usize,
    pub kernels: Vec<KernelProfile>,
    /// Distinct kernel names in first-call order.
    pub kernel_names: Vec<String>,
}

#[cfg(feature = "serde")]
impl ProfileInfo {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Internal {
            message: format!("failed to serialize profile: {}", e),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimingInfo {
    pub wall_ms: f64,
    pub kernel_ms: f64,
    pub extra_info: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemoryInfo {
    pub num_tensors: usize,
    pub num_data_buffers: usize,
    pub num_bytes: usize,
    pub unreliable: bool,
    pub reasons: Vec<String>,
}

/// Runs `f` under the backend timer, falling back to wall-clock time when the
/// backend has none.
pub(crate) fn time_closure<T>(backend: &dyn Backend, f: impl FnOnce() -> Result<T>) -> Result<(T, BackendTimingInfo)> {
    if !backend.timer_available() {
        let start = Instant::now();
        let value = f()?;
        let timing = BackendTimingInfo {
            kernel_ms: start.elapsed().as_secs_f64() * 1000.0,
            extra_info: String::new(),
        };
        return Ok((value, timing));
    }

    let mut f = Some(f);
    let mut output = None;
    let timing = backend.time(&mut || {
        let f = f.take().ok_or_else(|| Error::Internal {
            message: "timed closure called more than once".into(),
        })?;
        output = Some(f()?);
        Ok::<(), Error>(())
    })?;
    let value = output.ok_or_else(|| Error::Internal {
        message: "backend timer did not run the kernel".into(),
    })?;
    Ok((value, timing))
}

/// Logs a warning when a float kernel output holds NaN or infinity.
pub(crate) fn check_computation_for_errors(values: &BackendValues, kernel_name: &str) -> bool {
    let Some(values) = values.as_f32() else {
        return false;
    };
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => {
            tracing::warn!(
                kernel = kernel_name,
                index,
                value = values[index],
                "found a non-finite value in the output of kernel"
            );
            true
        },
        None => false,
    }
}

pub(crate) fn log_kernel_profile(profile: &KernelProfile) {
    tracing::info!(
        kernel = %profile.name,
        time_ms = profile.kernel_ms,
        bytes_added = profile.bytes_added,
        outputs = ?profile.output_shapes,
        inputs = ?profile.input_shapes,
        extra = %profile.extra_info,
        "kernel profile"
    );
}

impl Engine {
    /// Runs `f` while recording every kernel call, and reports the byte and
    /// tensor deltas, the peak byte count and the per-kernel records.
    pub fn profile<T, F>(&self, f: F) -> Result<(ProfileInfo, T)>
    where
        F: FnOnce(&Engine) -> Result<T>,
    {
        let (start_bytes, start_tensors, was_profiling, outer) = {
            let mut state = self.state.borrow_mut();
            let outer = std::mem::take(&mut state.active_profile);
            let was_profiling = std::mem::replace(&mut state.profiling, true);
            (state.num_bytes, state.num_tensors, was_profiling, outer)
        };

        let result = f(self);

        let mut profile = {
            let mut state = self.state.borrow_mut();
            state.profiling = was_profiling;
            let mut profile = std::mem::replace(&mut state.active_profile, outer);
            profile.new_bytes = state.num_bytes as i64 - start_bytes as i64;
            profile.new_tensors = state.num_tensors as i64 - start_tensors as i64;
            profile
        };
        let value = result?;

        profile.peak_bytes = profile
            .kernels
            .iter()
            .map(|k| k.total_bytes_snapshot)
            .chain(std::iter::once(start_bytes))
            .max()
            .unwrap_or(start_bytes);
        for kernel in &profile.kernels {
            if !profile.kernel_names.contains(&kernel.name) {
                profile.kernel_names.push(kernel.name.clone());
            }
        }
        if was_profiling {
            self.state.borrow_mut().active_profile.kernels.extend(profile.kernels.iter().cloned());
        }
        Ok((profile, value))
    }

    /// Wall-clock and backend kernel time of `f`.
    pub fn time<F>(&self, f: F) -> Result<TimingInfo>
    where
        F: FnOnce(&Engine) -> Result<()>,
    {
        let backend = self.backend()?;
        let start = Instant::now();
        let (_, timing) = time_closure(backend.as_ref(), || f(self))?;
        Ok(TimingInfo {
            wall_ms: start.elapsed().as_secs_f64() * 1000.0,
            kernel_ms: timing.kernel_ms,
            extra_info: timing.extra_info,
        })
    }
}
