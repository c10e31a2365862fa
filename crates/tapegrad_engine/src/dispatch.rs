use crate::{
    engine::Engine,
    gradient::{GradConfig, SaveInputs},
    grads,
    profiler::{self, KernelProfile},
    tensor::{NamedTensors, Tensor},
};
use std::sync::Arc;
use tapegrad_core::{
    attrs::Attrs,
    backend::Backend,
    data::DataId,
    error::{Error, Result},
    kernel::{KernelArgs, KernelConfig, NamedTensorInfoMap, TensorInfo},
    kernel_names::IDENTITY,
};

/// Keeps `kernel_depth` raised while a kernel body runs.
pub(crate) struct KernelDepthGuard<'a> {
    engine: &'a Engine,
}

impl<'a> KernelDepthGuard<'a> {
    pub(crate) fn enter(engine: &'a Engine) -> Self {
        engine.state.borrow_mut().kernel_depth += 1;
        Self { engine }
    }
}

impl Drop for KernelDepthGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.engine.state.try_borrow_mut() {
            state.kernel_depth = state.kernel_depth.saturating_sub(1);
        }
    }
}

struct Executed {
    outputs: Vec<TensorInfo>,
    kernel_ms: f64,
    extra_info: String,
}

impl Engine {
    /// Dispatches `kernel_name` on the active backend.
    ///
    /// Inputs owned by another backend are moved over first. While gradients
    /// are recorded a tape node is appended for the call; every output is
    /// tracked by the innermost scope.
    pub fn run_kernel(&self, kernel_name: &str, inputs: &NamedTensors, attrs: &Attrs) -> Result<Vec<Tensor>> {
        let (backend_name, backend) = self.active_backend()?;
        let config = self
            .kernels
            .get(kernel_name, &backend_name)
            .ok_or_else(|| Error::KernelNotFound {
                kernel: kernel_name.to_string(),
                backend: backend_name.clone(),
            })?;

        let is_tape_on = self.is_tape_on();
        let check_leaks = self.flags.leak_checking();
        let (start_bytes, start_tensors, profiling) = {
            let state = self.state.borrow();
            (state.num_bytes, state.num_tensors, state.profiling)
        };

        let num_data_ids_before = backend.num_data_ids();
        if check_leaks {
            self.state.borrow_mut().num_data_moves_stack.push(0);
        }
        let executed = self.execute_kernel(&config, &backend_name, backend.as_ref(), inputs, attrs, profiling);
        let num_moves = if check_leaks {
            self.state.borrow_mut().num_data_moves_stack.pop().unwrap_or(0)
        } else {
            0
        };
        let executed = executed?;

        if check_leaks {
            let num_data_ids_after = backend.num_data_ids();
            let leaked = num_data_ids_after as isize
                - num_data_ids_before as isize
                - executed.outputs.len() as isize
                - num_moves as isize;
            if leaked > 0 {
                return Err(Error::MemoryLeak {
                    backend: backend_name,
                    kernel: kernel_name.to_string(),
                    leaked: leaked as usize,
                });
            }
        }

        let outputs: Vec<Tensor> = executed
            .outputs
            .iter()
            .map(|info| self.make_tensor_from_info(info, &backend_name))
            .collect();

        if self.flags.check_computation_for_errors {
            for info in executed.outputs.iter().filter(|info| info.dtype.is_float()) {
                let values = backend.read_sync(info.data_id)?;
                profiler::check_computation_for_errors(&values, kernel_name);
            }
        }

        if is_tape_on {
            let grad_config = self.gradients.get(kernel_name);
            let sources = match &grad_config {
                Some(grad_config) => Self::tensors_to_save(grad_config, inputs, &outputs)?,
                None => Vec::new(),
            };
            let saved = self.keep_for_backward(&sources)?;
            self.add_tape_node(
                kernel_name,
                inputs.clone(),
                outputs.clone(),
                saved.clone(),
                attrs.clone(),
                grad_config.map(|c| c.grad_func),
            );
            // links follow the producing node so saved outputs stay reachable
            self.link_saved_tensors(&sources, &saved);
        }

        if profiling || self.flags.debug {
            let (num_bytes, num_tensors) = {
                let state = self.state.borrow();
                (state.num_bytes, state.num_tensors)
            };
            let profile = KernelProfile {
                name: kernel_name.to_string(),
                bytes_added: num_bytes as i64 - start_bytes as i64,
                total_bytes_snapshot: num_bytes,
                tensors_added: num_tensors as i64 - start_tensors as i64,
                total_tensors_snapshot: num_tensors,
                input_shapes: inputs.values().map(|t| t.shape().to_vec()).collect(),
                output_shapes: outputs.iter().map(|t| t.shape().to_vec()).collect(),
                kernel_ms: executed.kernel_ms,
                extra_info: executed.extra_info,
            };
            if self.flags.debug {
                profiler::log_kernel_profile(&profile);
            }
            if profiling {
                self.state.borrow_mut().active_profile.kernels.push(profile);
            }
        }

        Ok(outputs)
    }

    /// Like [`Engine::run_kernel`] for kernels with exactly one output.
    pub fn run_kernel_single(&self, kernel_name: &str, inputs: &NamedTensors, attrs: &Attrs) -> Result<Tensor> {
        let mut outputs = self.run_kernel(kernel_name, inputs, attrs)?;
        if outputs.len() != 1 {
            let count = outputs.len();
            self.dispose(&outputs);
            return Err(Error::Internal {
                message: format!("kernel '{}' returned {} outputs, expected one", kernel_name, count),
            });
        }
        Ok(outputs.remove(0))
    }

    fn execute_kernel(
        &self,
        config: &KernelConfig,
        backend_name: &str,
        backend: &dyn Backend,
        inputs: &NamedTensors,
        attrs: &Attrs,
        profiling: bool,
    ) -> Result<Executed> {
        let mut input_infos = NamedTensorInfoMap::new();
        for (name, tensor) in inputs.iter() {
            let info = self.tensor_info(tensor)?;
            self.ensure_on_backend(info.data_id, backend_name)?;
            input_infos.insert(name, info);
        }

        let _depth = KernelDepthGuard::enter(self);
        let run = || {
            (config.kernel_func)(KernelArgs {
                inputs: &input_infos,
                attrs,
                backend,
            })
        };
        if profiling || self.flags.debug {
            let (outputs, timing) = profiler::time_closure(backend, run)?;
            Ok(Executed {
                outputs,
                kernel_ms: timing.kernel_ms,
                extra_info: timing.extra_info,
            })
        } else {
            Ok(Executed {
                outputs: run()?,
                kernel_ms: 0.0,
                extra_info: String::new(),
            })
        }
    }

    fn ensure_on_backend(&self, data_id: DataId, backend_name: &str) -> Result<()> {
        let owner = self
            .state
            .borrow()
            .data_info
            .get(&data_id)
            .map(|info| info.backend.clone())
            .ok_or(Error::DataNotFound { data_id })?;
        if owner != backend_name {
            self.move_data(backend_name, data_id)?;
        }
        Ok(())
    }

    /// Moves `data_id` from its owning backend into `backend_name`, keeping the
    /// data id and its refcount.
    pub fn move_data(&self, backend_name: &str, data_id: DataId) -> Result<()> {
        let target = self
            .find_backend(backend_name)
            .ok_or_else(|| Error::BackendNotFound(backend_name.to_string()))?;
        let info = self
            .state
            .borrow()
            .data_info
            .get(&data_id)
            .cloned()
            .ok_or(Error::DataNotFound { data_id })?;
        if info.backend == backend_name {
            return Ok(());
        }
        let source = self
            .backend_instance(&info.backend)
            .ok_or_else(|| Error::BackendNotFound(info.backend.clone()))?;

        let values = source.read_sync(data_id)?;
        let ref_count = source.ref_count(data_id);
        target.move_data(data_id, values, &info.shape, info.dtype, ref_count)?;
        source.dispose_data(data_id, true);

        let mut state = self.state.borrow_mut();
        if let Some(info) = state.data_info.get_mut(&data_id) {
            info.backend = backend_name.to_string();
        }
        if self.flags.leak_checking() {
            if let Some(moves) = state.num_data_moves_stack.last_mut() {
                *moves += 1;
            }
        }
        tracing::debug!(data_id = data_id.0, from = %info.backend, to = backend_name, ref_count, "moved data");
        Ok(())
    }

    /// Handles of the tensors `grad_config` asks to retain, inputs first.
    fn tensors_to_save(grad_config: &GradConfig, inputs: &NamedTensors, outputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let mut to_save: Vec<Tensor> = match &grad_config.inputs_to_save {
            SaveInputs::None => Vec::new(),
            SaveInputs::All => inputs.values().cloned().collect(),
            SaveInputs::Named(names) => names
                .iter()
                .map(|name| {
                    inputs.get(name).cloned().ok_or_else(|| {
                        Error::InvalidArgument(format!(
                            "gradient of {} saves input '{}', which the call does not provide",
                            grad_config.kernel_name, name
                        ))
                    })
                })
                .collect::<Result<_>>()?,
        };
        for (output, save) in outputs.iter().zip(&grad_config.outputs_to_save) {
            if *save {
                to_save.push(output.clone());
            }
        }
        Ok(to_save)
    }

    /// Kept clones of `tensors`, invisible to the tape until linked.
    pub(crate) fn keep_for_backward(&self, tensors: &[Tensor]) -> Result<Vec<Tensor>> {
        let mut saved = Vec::with_capacity(tensors.len());
        for tensor in tensors {
            match self.keep_clone(tensor) {
                Ok(clone) => saved.push(clone),
                Err(err) => {
                    self.dispose(&saved);
                    return Err(err);
                },
            }
        }
        Ok(saved)
    }

    /// Records an identity node from each source to its saved clone, so that
    /// higher-order gradients flow through saved tensors.
    ///
    /// Must run after the node whose gradient uses the clones: the backward
    /// walk visits a link before the producer of its source.
    pub(crate) fn link_saved_tensors(&self, sources: &[Tensor], saved: &[Tensor]) {
        for (source, clone) in sources.iter().zip(saved) {
            self.add_tape_node(
                IDENTITY,
                NamedTensors::new().with("x", source.clone()),
                vec![clone.clone()],
                Vec::new(),
                Attrs::new(),
                Some(grads::identity_grad()),
            );
        }
    }

    pub(crate) fn add_tape_node(
        &self,
        kernel_name: &str,
        inputs: NamedTensors,
        outputs: Vec<Tensor>,
        saved: Vec<Tensor>,
        attrs: Attrs,
        grad_fn: Option<Arc<dyn crate::gradient::GradFn>>,
    ) {
        let mut state = self.state.borrow_mut();
        let id = state.next_tape_node_id;
        state.next_tape_node_id += 1;
        let node = crate::tape::TapeNode {
            id,
            kernel_name: kernel_name.to_string(),
            inputs,
            outputs,
            saved,
            attrs,
            grad_fn,
        };
        match state.active_tape.as_mut() {
            Some(tape) => tape.push(node),
            None => state.active_tape = Some(vec![node]),
        }
    }
}
