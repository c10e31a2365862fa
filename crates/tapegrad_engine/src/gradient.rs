use crate::{
    engine::Engine,
    tensor::{NamedTensors, Tensor},
};
use dashmap::DashMap;
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tapegrad_core::{
    attrs::Attrs,
    error::{Error, Result},
    kernel::NamedMap,
};

/// Input gradients keyed by the forward op's input names.
pub type NamedGradients = NamedMap<Tensor>;

/// Everything a backward function can see about the node it differentiates.
pub struct GradContext<'a> {
    pub engine: &'a Engine,
    /// One gradient per forward output. Missing gradients arrive as zeros.
    pub dys: &'a [Tensor],
    /// Tensors retained by the save policy: saved inputs first, in policy
    /// order, then the flagged outputs.
    pub saved: &'a [Tensor],
    /// The forward call's inputs, for their shapes and dtypes.
    pub inputs: &'a NamedTensors,
    pub attrs: &'a Attrs,
    pub(crate) wanted: &'a [String],
}

impl GradContext<'_> {
    /// Whether the input `name` lies on a path from the differentiated
    /// tensors to the result. Gradients for other inputs may be skipped.
    pub fn wants(&self, name: &str) -> bool {
        self.wanted.iter().any(|w| w == name)
    }

    pub fn dy(&self) -> Result<&Tensor> {
        self.dys.first().ok_or_else(|| Error::Internal {
            message: "backward function called without output gradients".into(),
        })
    }

    pub fn saved(&self, index: usize) -> Result<&Tensor> {
        self.saved.get(index).ok_or_else(|| Error::Internal {
            message: format!("no saved tensor at position {} ({} saved)", index, self.saved.len()),
        })
    }

    pub fn input(&self, name: &str) -> Result<&Tensor> {
        self.inputs.require(name)
    }
}

/// Backward function of one operation.
pub trait GradFn: Send + Sync {
    fn backward(&self, ctx: &GradContext<'_>) -> Result<NamedGradients>;
}

impl<F> GradFn for F
where
    F: Fn(&GradContext<'_>) -> Result<NamedGradients> + Send + Sync,
{
    fn backward(&self, ctx: &GradContext<'_>) -> Result<NamedGradients> {
        self(ctx)
    }
}

/// Which inputs a node retains for its backward pass.
///
/// Inputs are addressed by name only; outputs by position through
/// `GradConfig::outputs_to_save`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SaveInputs {
    #[default]
    None,
    All,
    Named(Vec<String>),
}

#[derive(Clone)]
pub struct GradConfig {
    pub kernel_name: String,
    pub inputs_to_save: SaveInputs,
    pub outputs_to_save: Vec<bool>,
    pub grad_func: Arc<dyn GradFn>,
}

impl GradConfig {
    pub fn new<F>(kernel_name: &str, grad_func: F) -> Self
    where
        F: Fn(&GradContext<'_>) -> Result<NamedGradients> + Send + Sync + 'static,
    {
        Self::from_grad_fn(kernel_name, Arc::new(grad_func))
    }

    pub fn from_grad_fn(kernel_name: &str, grad_func: Arc<dyn GradFn>) -> Self {
        Self {
            kernel_name: kernel_name.to_string(),
            inputs_to_save: SaveInputs::None,
            outputs_to_save: Vec::new(),
            grad_func,
        }
    }

    pub fn with_inputs_to_save(mut self, names: &[&str]) -> Self {
        self.inputs_to_save = SaveInputs::Named(names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn with_all_inputs_saved(mut self) -> Self {
        self.inputs_to_save = SaveInputs::All;
        self
    }

    pub fn with_outputs_to_save(mut self, flags: &[bool]) -> Self {
        self.outputs_to_save = flags.to_vec();
        self
    }

    fn validate(&self) -> Result<()> {
        if self.kernel_name.is_empty() {
            return Err(Error::InvalidArgument("gradient registered without a kernel name".into()));
        }
        if let SaveInputs::Named(names) = &self.inputs_to_save {
            let mut seen = HashSet::new();
            for name in names {
                if name.is_empty() {
                    return Err(Error::InvalidArgument(format!(
                        "gradient of {} saves an input with an empty name",
                        self.kernel_name
                    )));
                }
                if !seen.insert(name.as_str()) {
                    return Err(Error::InvalidArgument(format!(
                        "gradient of {} saves input '{}' more than once",
                        self.kernel_name, name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// `kernel name → backward function` table. Last registration wins.
pub struct GradientRegistry {
    grads: DashMap<String, GradConfig>,
    warn_on_override: AtomicBool,
}

impl Default for GradientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GradientRegistry {
    pub fn new() -> Self {
        Self {
            grads: DashMap::new(),
            warn_on_override: AtomicBool::new(true),
        }
    }

    pub fn set_warn_on_override(&self, warn: bool) {
        self.warn_on_override.store(warn, Ordering::Relaxed);
    }

    /// Fails when the save policy names an input twice or names an empty input.
    pub fn register(&self, config: GradConfig) -> Result<()> {
        config.validate()?;
        if self.grads.contains_key(&config.kernel_name) && self.warn_on_override.load(Ordering::Relaxed) {
            tracing::warn!(kernel = %config.kernel_name, "overriding the gradient of kernel");
        }
        self.grads.insert(config.kernel_name.clone(), config);
        Ok(())
    }

    pub fn get(&self, kernel_name: &str) -> Option<GradConfig> {
        self.grads.get(kernel_name).map(|entry| entry.value().clone())
    }

    pub fn unregister(&self, kernel_name: &str) -> Result<()> {
        self.grads.remove(kernel_name).map(|_| ()).ok_or_else(|| Error::GradientNotFound {
            kernel: kernel_name.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.grads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grads.is_empty()
    }
}
