use half::f16;
use std::{any::Any, time::Instant};
use tapegrad_core::{
    backend::{Backend, BackendMemory, BackendTimingInfo, FloatPrecision},
    data::{next_data_id, DataId, DataStore},
    dtype::DType,
    error::{Error, Result},
    values::BackendValues,
};

pub struct CpuEntry {
    pub values: BackendValues,
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub ref_count: usize,
}

/// Host-memory backend.
///
/// Every entry carries its own refcount; `dispose_data` frees the entry once
/// the last claim is released.
pub struct CpuBackend {
    store: DataStore<CpuEntry>,
    precision: FloatPrecision,
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::with_precision(FloatPrecision::Single)
    }

    /// With [`FloatPrecision::Half`] every float written or moved in is rounded
    /// through `f16`.
    pub fn with_precision(precision: FloatPrecision) -> Self {
        Self {
            store: DataStore::new(),
            precision,
        }
    }

    fn quantize(&self, values: BackendValues) -> BackendValues {
        match (self.precision, values) {
            (FloatPrecision::Half, BackendValues::F32(v)) => {
                BackendValues::F32(v.into_iter().map(|x| f16::from_f32(x).to_f32()).collect())
            },
            (FloatPrecision::Half, BackendValues::C64(v)) => BackendValues::C64(
                v.into_iter()
                    .map(|[re, im]| [f16::from_f32(re).to_f32(), f16::from_f32(im).to_f32()])
                    .collect(),
            ),
            (_, values) => values,
        }
    }

    /// Runs `f` against the stored values of `data_id` without copying them.
    pub fn with_values<R>(&self, data_id: DataId, f: impl FnOnce(&BackendValues, &[usize]) -> R) -> Result<R> {
        let entry = self.store.get(data_id).ok_or(Error::DataNotFound { data_id })?;
        Ok(f(&entry.values, &entry.shape))
    }

    pub fn contains(&self, data_id: DataId) -> bool {
        self.store.has(data_id)
    }
}

fn validate_values(values: &BackendValues, shape: &[usize], dtype: DType) -> Result<()> {
    if values.dtype() != dtype {
        return Err(Error::DTypeMismatch {
            expected: dtype,
            got: values.dtype(),
            msg: "write".into(),
        });
    }
    let size: usize = shape.iter().product();
    if values.len() != size {
        return Err(Error::DimensionMismatch {
            expected: shape.to_vec(),
            got: vec![values.len()],
            msg: format!("values of length {} cannot fill shape {:?}", values.len(), shape),
        });
    }
    Ok(())
}

impl Backend for CpuBackend {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn kind(&self) -> &str {
        "cpu"
    }

    fn read_sync(&self, data_id: DataId) -> Result<BackendValues> {
        self.with_values(data_id, |values, _| values.clone())
    }

    fn write(&self, values: BackendValues, shape: &[usize], dtype: DType) -> Result<DataId> {
        validate_values(&values, shape, dtype)?;
        let data_id = next_data_id();
        self.store.set(
            data_id,
            CpuEntry {
                values: self.quantize(values),
                shape: shape.to_vec(),
                dtype,
                ref_count: 1,
            },
        );
        Ok(data_id)
    }

    fn move_data(&self, data_id: DataId, values: BackendValues, shape: &[usize], dtype: DType, ref_count: usize) -> Result<()> {
        validate_values(&values, shape, dtype)?;
        self.store.set(
            data_id,
            CpuEntry {
                values: self.quantize(values),
                shape: shape.to_vec(),
                dtype,
                ref_count,
            },
        );
        Ok(())
    }

    fn dispose_data(&self, data_id: DataId, force: bool) -> bool {
        {
            let Some(mut entry) = self.store.get_mut(data_id) else {
                return false;
            };
            if !force && entry.ref_count > 1 {
                entry.ref_count -= 1;
                return false;
            }
        }
        self.store.delete(data_id).is_some()
    }

    fn ref_count(&self, data_id: DataId) -> usize {
        self.store.get(data_id).map(|e| e.ref_count).unwrap_or(0)
    }

    fn inc_ref(&self, data_id: DataId) -> Result<()> {
        let mut entry = self.store.get_mut(data_id).ok_or(Error::DataNotFound { data_id })?;
        entry.ref_count += 1;
        Ok(())
    }

    fn num_data_ids(&self) -> usize {
        self.store.num_data_ids()
    }

    fn memory(&self) -> Result<BackendMemory> {
        let mut num_bytes = 0;
        let mut has_strings = false;
        for data_id in self.store.data_ids() {
            if let Some(entry) = self.store.get(data_id) {
                num_bytes += entry.values.num_bytes();
                has_strings |= entry.dtype == DType::STRING;
            }
        }
        let mut memory = BackendMemory {
            num_bytes,
            num_data_ids: self.store.num_data_ids(),
            ..Default::default()
        };
        if has_strings {
            memory.unreliable = true;
            memory.reasons.push("string entries are counted by their encoded byte length".into());
        }
        Ok(memory)
    }

    fn time(&self, f: &mut dyn FnMut() -> Result<()>) -> Result<BackendTimingInfo> {
        let start = Instant::now();
        f()?;
        Ok(BackendTimingInfo {
            kernel_ms: start.elapsed().as_secs_f64() * 1e3,
            extra_info: String::new(),
        })
    }

    fn timer_available(&self) -> bool {
        true
    }

    fn float_precision(&self) -> FloatPrecision {
        self.precision
    }

    fn dispose(&self) {
        let leftover = self.store.num_data_ids();
        if leftover > 0 {
            tracing::debug!(leftover, "disposing cpu backend with live data");
        }
        self.store.clear();
    }
}
