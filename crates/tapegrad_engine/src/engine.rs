use crate::{
    backends::BackendSlots,
    gradient::{GradConfig, GradientRegistry},
    profiler::{MemoryInfo, ProfileInfo},
    scope::ScopeFrame,
    tape::TapeNode,
    tensor::{next_tensor_id, Tensor, TensorId, Variable},
};
use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tapegrad_core::{
    backend::Backend,
    data::DataId,
    dtype::DType,
    env::EnvFlags,
    error::{Error, Result},
    kernel::{KernelConfig, KernelRegistry, TensorInfo},
    values::BackendValues,
};

/// Row of the tensor table.
#[derive(Debug, Clone)]
pub(crate) struct TensorEntry {
    pub data_id: DataId,
    pub dtype: DType,
    pub kept: bool,
    pub scope_id: Option<usize>,
    pub variable: Option<String>,
}

/// Owner pointer and accounting of one live data id.
#[derive(Debug, Clone)]
pub(crate) struct DataInfo {
    pub backend: String,
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub bytes: usize,
}

/// How a freshly created handle is tracked.
pub(crate) enum Track {
    /// Appended to the innermost scope.
    Scoped,
    /// Exempt from scope disposal.
    Kept,
    Variable(String),
}

#[derive(Default)]
pub(crate) struct EngineState {
    pub num_tensors: usize,
    pub num_string_tensors: usize,
    pub num_bytes: usize,
    pub num_data_buffers: usize,

    pub gradient_depth: usize,
    pub kernel_depth: usize,
    pub active_tape: Option<Vec<TapeNode>>,
    pub next_tape_node_id: usize,

    pub scope_stack: Vec<ScopeFrame>,
    pub next_scope_id: usize,
    pub num_data_moves_stack: Vec<usize>,

    pub tensors: HashMap<TensorId, TensorEntry>,
    pub data_info: HashMap<DataId, DataInfo>,
    pub variables: BTreeMap<String, Variable>,
    pub next_variable_id: usize,

    pub profiling: bool,
    pub active_profile: ProfileInfo,
}

/// The runtime context: backends, tensor bookkeeping, scopes and the tape.
///
/// An engine is single-threaded (`!Sync`); state lives behind `RefCell`s and
/// no borrow is held across a kernel, a backward function or an `.await`.
/// The kernel and gradient registries are shared through `Arc`, so several
/// engines may dispatch against the same registrations.
pub struct Engine {
    pub(crate) flags: EnvFlags,
    pub(crate) kernels: Arc<KernelRegistry>,
    pub(crate) gradients: Arc<GradientRegistry>,
    pub(crate) backends: RefCell<BackendSlots>,
    pub(crate) state: RefCell<EngineState>,
}

impl Engine {
    pub fn new(flags: EnvFlags) -> Self {
        Self::with_registries(flags, Arc::new(KernelRegistry::new()), Arc::new(GradientRegistry::new()))
    }

    pub fn with_registries(flags: EnvFlags, kernels: Arc<KernelRegistry>, gradients: Arc<GradientRegistry>) -> Self {
        gradients.set_warn_on_override(flags.warn_on_override());
        Self {
            flags,
            kernels,
            gradients,
            backends: RefCell::new(BackendSlots::default()),
            state: RefCell::new(EngineState::default()),
        }
    }

    pub fn flags(&self) -> EnvFlags {
        self.flags
    }

    pub fn kernel_registry(&self) -> &Arc<KernelRegistry> {
        &self.kernels
    }

    pub fn gradient_registry(&self) -> &Arc<GradientRegistry> {
        &self.gradients
    }

    pub fn register_kernel(&self, config: KernelConfig) {
        self.kernels.register(config);
    }

    pub fn register_gradient(&self, config: GradConfig) -> Result<()> {
        self.gradients.register(config)
    }

    /// Disposes every variable and every backend instance, then rebuilds the
    /// bookkeeping from scratch. Backend factories and kernel / gradient
    /// registrations survive.
    pub fn reset(&self) {
        self.dispose_variables();
        for (name, instance) in self.take_backend_instances() {
            self.dispose_registered_kernels(&name, instance.as_ref());
            instance.dispose();
        }
        *self.state.borrow_mut() = EngineState::default();
        tracing::debug!("engine reset");
    }
}

// ────────────────────────────────────────────────────────────────────────────
//  Tensor table
// ────────────────────────────────────────────────────────────────────────────

impl Engine {
    /// Claims `info.data_id` for a new handle. The caller already holds the
    /// backend-side refcount claim.
    pub(crate) fn track_tensor(&self, info: &TensorInfo, backend_name: &str, bytes: usize, track: Track) -> Tensor {
        let tensor = Tensor::new(next_tensor_id(), &info.shape, info.dtype);
        let mut state = self.state.borrow_mut();

        state.num_tensors += 1;
        if info.dtype == DType::STRING {
            state.num_string_tensors += 1;
        }
        Self::claim_data(&mut state, info, backend_name, bytes);

        let (kept, variable, scoped) = match track {
            Track::Scoped => (false, None, true),
            Track::Kept => (true, None, false),
            Track::Variable(name) => (false, Some(name), false),
        };
        let scope_id = if scoped {
            state.scope_stack.last_mut().map(|scope| {
                scope.track.push(tensor.id());
                scope.id
            })
        } else {
            None
        };
        state.tensors.insert(
            tensor.id(),
            TensorEntry {
                data_id: info.data_id,
                dtype: info.dtype,
                kept,
                scope_id,
                variable,
            },
        );
        tensor
    }

    fn claim_data(state: &mut EngineState, info: &TensorInfo, backend_name: &str, bytes: usize) {
        let bytes = match state.data_info.get(&info.data_id) {
            Some(existing) => existing.bytes,
            None => {
                state.num_data_buffers += 1;
                state.data_info.insert(
                    info.data_id,
                    DataInfo {
                        backend: backend_name.to_string(),
                        dtype: info.dtype,
                        shape: info.shape.clone(),
                        bytes,
                    },
                );
                bytes
            },
        };
        state.num_bytes += bytes;
    }

    /// Drops one claim on `data_id`; forgets the data once its backend frees it.
    fn release_data(&self, state: &mut EngineState, data_id: DataId) {
        let Some(info) = state.data_info.get(&data_id).cloned() else {
            return;
        };
        state.num_bytes = state.num_bytes.saturating_sub(info.bytes);
        let Some(backend) = self.backend_instance(&info.backend) else {
            return;
        };
        if backend.dispose_data(data_id, false) {
            state.data_info.remove(&data_id);
            state.num_data_buffers = state.num_data_buffers.saturating_sub(1);
        }
    }

    pub(crate) fn dispose_tensor_id(&self, id: TensorId) {
        let mut state = self.state.borrow_mut();
        let Some(entry) = state.tensors.remove(&id) else {
            return;
        };
        state.num_tensors = state.num_tensors.saturating_sub(1);
        if entry.dtype == DType::STRING {
            state.num_string_tensors = state.num_string_tensors.saturating_sub(1);
        }
        if let Some(name) = &entry.variable {
            state.variables.remove(name);
        }
        self.release_data(&mut state, entry.data_id);
    }

    /// Points an existing handle at other data, moving its claim.
    pub(crate) fn retarget_tensor(&self, id: TensorId, info: &TensorInfo, backend_name: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let old = state.tensors.get(&id).map(|e| e.data_id).ok_or(Error::TensorDisposed { id: id.0 })?;
        self.release_data(&mut state, old);
        let bytes = Self::default_bytes(info);
        Self::claim_data(&mut state, info, backend_name, bytes);
        if let Some(entry) = state.tensors.get_mut(&id) {
            entry.data_id = info.data_id;
        }
        Ok(())
    }

    pub(crate) fn default_bytes(info: &TensorInfo) -> usize {
        info.size() * info.dtype.size_in_bytes().unwrap_or(0)
    }

    pub(crate) fn tensor_info(&self, tensor: &Tensor) -> Result<TensorInfo> {
        let state = self.state.borrow();
        let entry = state.tensors.get(&tensor.id()).ok_or(Error::TensorDisposed { id: tensor.id().0 })?;
        Ok(TensorInfo::new(entry.data_id, tensor.shape(), entry.dtype))
    }

    pub(crate) fn data_owner(&self, data_id: DataId) -> Result<(String, Arc<dyn Backend>)> {
        let backend_name = self
            .state
            .borrow()
            .data_info
            .get(&data_id)
            .map(|info| info.backend.clone())
            .ok_or(Error::DataNotFound { data_id })?;
        let backend = self
            .backend_instance(&backend_name)
            .ok_or_else(|| Error::BackendNotFound(backend_name.clone()))?;
        Ok((backend_name, backend))
    }

    /// Wraps a kernel output produced on `backend_name` in a scoped handle.
    pub fn make_tensor_from_info(&self, info: &TensorInfo, backend_name: &str) -> Tensor {
        self.track_tensor(info, backend_name, Self::default_bytes(info), Track::Scoped)
    }

    /// Writes `values` to the active backend and wraps them in a scoped handle.
    pub fn make_tensor(&self, values: impl Into<BackendValues>, shape: &[usize], dtype: DType) -> Result<Tensor> {
        let values = values.into();
        let bytes = values.num_bytes();
        let (backend_name, backend) = self.active_backend()?;
        let data_id = backend.write(values, shape, dtype)?;
        Ok(self.track_tensor(&TensorInfo::new(data_id, shape, dtype), &backend_name, bytes, Track::Scoped))
    }

    /// Another handle on the same data, exempt from scope disposal and
    /// invisible to the tape.
    pub(crate) fn keep_clone(&self, tensor: &Tensor) -> Result<Tensor> {
        let info = self.tensor_info(tensor)?;
        let (backend_name, backend) = self.data_owner(info.data_id)?;
        backend.inc_ref(info.data_id)?;
        Ok(self.track_tensor(&info, &backend_name, 0, Track::Kept))
    }

    /// Current data handle behind `tensor`.
    pub fn data_id(&self, tensor: &Tensor) -> Result<DataId> {
        self.tensor_info(tensor).map(|info| info.data_id)
    }

    /// Name of the backend that owns `tensor`'s data.
    pub fn tensor_backend_name(&self, tensor: &Tensor) -> Result<String> {
        let data_id = self.data_id(tensor)?;
        self.data_owner(data_id).map(|(name, _)| name)
    }

    pub fn is_disposed(&self, tensor: &Tensor) -> bool {
        !self.state.borrow().tensors.contains_key(&tensor.id())
    }

    pub fn is_kept(&self, tensor: &Tensor) -> bool {
        self.state.borrow().tensors.get(&tensor.id()).map(|e| e.kept).unwrap_or(false)
    }

    /// Backend refcount of the data behind `tensor`.
    pub fn ref_count(&self, tensor: &Tensor) -> Result<usize> {
        let data_id = self.data_id(tensor)?;
        let (_, backend) = self.data_owner(data_id)?;
        Ok(backend.ref_count(data_id))
    }

    pub fn num_tensors(&self) -> usize {
        self.state.borrow().num_tensors
    }

    pub fn num_data_buffers(&self) -> usize {
        self.state.borrow().num_data_buffers
    }

    // ────  reading  ────

    pub fn read_sync(&self, tensor: &Tensor) -> Result<BackendValues> {
        let info = self.tensor_info(tensor)?;
        let (_, backend) = self.data_owner(info.data_id)?;
        backend.read_sync(info.data_id)
    }

    pub fn read_f32_sync(&self, tensor: &Tensor) -> Result<Vec<f32>> {
        self.read_sync(tensor)?.to_f32_vec()
    }

    /// Asynchronous readback. Refused while a scope or a gradient computation
    /// is open, since both assume synchronous completion.
    pub async fn read(&self, tensor: &Tensor) -> Result<BackendValues> {
        {
            let state = self.state.borrow();
            if !state.scope_stack.is_empty() {
                return Err(Error::AsyncInScope(format!(
                    "cannot read tensor {} asynchronously inside scope '{}'",
                    tensor.id().0,
                    state.scope_stack.last().map(|s| s.name.as_str()).unwrap_or_default()
                )));
            }
            if state.gradient_depth > 0 {
                return Err(Error::AsyncInScope(format!(
                    "cannot read tensor {} asynchronously while gradients are recorded",
                    tensor.id().0
                )));
            }
        }
        let info = self.tensor_info(tensor)?;
        let (_, backend) = self.data_owner(info.data_id)?;
        backend.read(info.data_id).await
    }

    // ────  accounting  ────

    pub fn memory(&self) -> Result<MemoryInfo> {
        let backend_memory = self.backend()?.memory()?;
        let state = self.state.borrow();
        let mut info = MemoryInfo {
            num_tensors: state.num_tensors,
            num_data_buffers: state.num_data_buffers,
            num_bytes: state.num_bytes,
            unreliable: backend_memory.unreliable,
            reasons: backend_memory.reasons,
        };
        if state.num_string_tensors > 0 {
            info.unreliable = true;
            info.reasons
                .push("Memory usage by string tensors is approximate (counted by encoded byte length)".into());
        }
        Ok(info)
    }
}
