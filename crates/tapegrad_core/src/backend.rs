use crate::{
    data::DataId,
    dtype::DType,
    error::{Error, Result},
    values::BackendValues,
};
use std::{any::Any, future::Future, pin::Pin, sync::Arc};

/// Pinned boxed future. The runtime is single-threaded, so no `Send` bound.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatPrecision {
    Half,
    Single,
}

impl FloatPrecision {
    pub fn bits(&self) -> u32 {
        match self {
            Self::Half => 16,
            Self::Single => 32,
        }
    }

    /// Tolerance used when comparing float results produced at this precision.
    pub fn test_epsilon(&self) -> f32 {
        match self {
            Self::Half => 1e-1,
            Self::Single => 1e-3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendMemory {
    pub num_bytes: usize,
    pub num_data_ids: usize,
    pub unreliable: bool,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendTimingInfo {
    pub kernel_ms: f64,
    pub extra_info: String,
}

/// Capability contract every execution backend satisfies.
///
/// Methods with a default body that returns [`Error::NotImplemented`] are
/// optional capabilities: a backend that lacks one fails at the moment the
/// capability is used, never at registration.
pub trait Backend: Send + Sync {
    fn as_any(&self) -> &dyn Any;

    /// Short label used in diagnostics.
    fn kind(&self) -> &str;

    fn read(&self, data_id: DataId) -> BoxFuture<'_, Result<BackendValues>> {
        Box::pin(std::future::ready(self.read_sync(data_id)))
    }

    fn read_sync(&self, _data_id: DataId) -> Result<BackendValues> {
        Err(Error::not_implemented(self.kind(), "read_sync"))
    }

    fn write(&self, values: BackendValues, shape: &[usize], dtype: DType) -> Result<DataId>;

    /// Adopts data migrated from another backend under the same id, keeping `ref_count`.
    fn move_data(
        &self,
        _data_id: DataId,
        _values: BackendValues,
        _shape: &[usize],
        _dtype: DType,
        _ref_count: usize,
    ) -> Result<()> {
        Err(Error::not_implemented(self.kind(), "move_data"))
    }

    /// Drops one claim on `data_id` (all of them when `force`). Returns whether
    /// the storage was actually freed.
    fn dispose_data(&self, data_id: DataId, force: bool) -> bool;

    fn ref_count(&self, data_id: DataId) -> usize;

    fn inc_ref(&self, data_id: DataId) -> Result<()>;

    fn num_data_ids(&self) -> usize;

    fn memory(&self) -> Result<BackendMemory> {
        Err(Error::not_implemented(self.kind(), "memory"))
    }

    fn time(&self, _f: &mut dyn FnMut() -> Result<()>) -> Result<BackendTimingInfo> {
        Err(Error::not_implemented(self.kind(), "time"))
    }

    fn timer_available(&self) -> bool {
        false
    }

    fn float_precision(&self) -> FloatPrecision {
        FloatPrecision::Single
    }

    /// Smallest value treated as non-zero by numerically sensitive kernels.
    fn epsilon(&self) -> f32 {
        match self.float_precision() {
            FloatPrecision::Single => 1e-7,
            FloatPrecision::Half => 1e-4,
        }
    }

    fn dispose(&self);
}

/// What a backend factory hands back: an instance, or a future producing one.
pub enum BackendInit {
    Ready(Arc<dyn Backend>),
    Pending(BoxFuture<'static, Result<Arc<dyn Backend>>>),
}

pub type BackendFactory = Arc<dyn Fn() -> Result<BackendInit>>;
