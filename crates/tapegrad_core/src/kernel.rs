use crate::{
    attrs::Attrs,
    backend::Backend,
    data::DataId,
    dtype::DType,
    error::{Error, Result},
};
use dashmap::DashMap;
use std::sync::Arc;

/// Raw kernel output: a data id plus the metadata needed to wrap it in a tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorInfo {
    pub data_id: DataId,
    pub shape: Vec<usize>,
    pub dtype: DType,
}

impl TensorInfo {
    pub fn new(data_id: DataId, shape: &[usize], dtype: DType) -> Self {
        Self {
            data_id,
            shape: shape.to_vec(),
            dtype,
        }
    }

    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Insertion-ordered `name → value` map used for kernel inputs.
///
/// List-valued inputs are flattened under indexed names (`"xs.0"`, `"xs.1"`).
#[derive(Debug, Clone, PartialEq)]
pub struct NamedMap<T> {
    entries: Vec<(String, T)>,
}

impl<T> Default for NamedMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> NamedMap<T> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn with(mut self, name: impl Into<String>, value: T) -> Self {
        self.insert(name, value);
        self
    }

    pub fn with_list(mut self, name: &str, values: impl IntoIterator<Item = T>) -> Self {
        for (i, value) in values.into_iter().enumerate() {
            self.insert(format!("{}.{}", name, i), value);
        }
        self
    }

    /// Inserts or replaces `name`, keeping the original position on replace.
    pub fn insert(&mut self, name: impl Into<String>, value: T) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn require(&self, name: &str) -> Result<&T> {
        self.get(name)
            .ok_or_else(|| Error::InvalidArgument(format!("missing input '{}'", name)))
    }

    pub fn remove(&mut self, name: &str) -> Option<T> {
        let index = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(index).1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> NamedMap<U> {
        NamedMap {
            entries: self.entries.iter().map(|(n, v)| (n.clone(), f(v))).collect(),
        }
    }

    pub fn retain(&mut self, mut f: impl FnMut(&str, &T) -> bool) {
        self.entries.retain(|(n, v)| f(n, v));
    }

    pub fn into_values(self) -> impl Iterator<Item = T> {
        self.entries.into_iter().map(|(_, v)| v)
    }
}

pub type NamedTensorInfoMap = NamedMap<TensorInfo>;

// ────────────────────────────────────────────────────────────────────────────
//  Kernel registry
// ────────────────────────────────────────────────────────────────────────────

pub struct KernelArgs<'a> {
    pub inputs: &'a NamedTensorInfoMap,
    pub attrs: &'a Attrs,
    pub backend: &'a dyn Backend,
}

pub type KernelFunc = Arc<dyn for<'a> Fn(KernelArgs<'a>) -> Result<Vec<TensorInfo>> + Send + Sync>;
pub type KernelSetupFunc = Arc<dyn Fn(&dyn Backend) + Send + Sync>;
pub type KernelDisposeFunc = Arc<dyn Fn(&dyn Backend) + Send + Sync>;

#[derive(Clone)]
pub struct KernelConfig {
    pub kernel_name: String,
    pub backend_name: String,
    pub kernel_func: KernelFunc,
    pub setup_func: Option<KernelSetupFunc>,
    pub dispose_func: Option<KernelDisposeFunc>,
}

impl KernelConfig {
    pub fn new<F>(kernel_name: &str, backend_name: &str, kernel_func: F) -> Self
    where
        F: for<'a> Fn(KernelArgs<'a>) -> Result<Vec<TensorInfo>> + Send + Sync + 'static,
    {
        Self {
            kernel_name: kernel_name.to_string(),
            backend_name: backend_name.to_string(),
            kernel_func: Arc::new(kernel_func),
            setup_func: None,
            dispose_func: None,
        }
    }

    pub fn with_setup<F>(mut self, f: F) -> Self
    where
        F: Fn(&dyn Backend) + Send + Sync + 'static,
    {
        self.setup_func = Some(Arc::new(f));
        self
    }

    pub fn with_dispose<F>(mut self, f: F) -> Self
    where
        F: Fn(&dyn Backend) + Send + Sync + 'static,
    {
        self.dispose_func = Some(Arc::new(f));
        self
    }
}

/// `(kernel, backend) → implementation` table.
///
/// Lookups of unknown pairs only fail when a kernel is dispatched.
#[derive(Default)]
pub struct KernelRegistry {
    kernels: DashMap<(String, String), KernelConfig>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self { kernels: DashMap::new() }
    }

    pub fn register(&self, config: KernelConfig) {
        let key = (config.kernel_name.clone(), config.backend_name.clone());
        if self.kernels.contains_key(&key) {
            tracing::warn!(
                kernel = %config.kernel_name,
                backend = %config.backend_name,
                "kernel is already registered, overwriting"
            );
        }
        self.kernels.insert(key, config);
    }

    pub fn get(&self, kernel_name: &str, backend_name: &str) -> Option<KernelConfig> {
        self.kernels
            .get(&(kernel_name.to_string(), backend_name.to_string()))
            .map(|entry| entry.value().clone())
    }

    pub fn unregister(&self, kernel_name: &str, backend_name: &str) -> Result<()> {
        self.kernels
            .remove(&(kernel_name.to_string(), backend_name.to_string()))
            .map(|_| ())
            .ok_or_else(|| Error::KernelNotFound {
                kernel: kernel_name.to_string(),
                backend: backend_name.to_string(),
            })
    }

    pub fn kernels_for_backend(&self, backend_name: &str) -> Vec<KernelConfig> {
        let mut configs: Vec<KernelConfig> = self
            .kernels
            .iter()
            .filter(|entry| entry.key().1 == backend_name)
            .map(|entry| entry.value().clone())
            .collect();
        configs.sort_by(|a, b| a.kernel_name.cmp(&b.kernel_name));
        configs
    }

    /// Registers every kernel of `from` again under the backend name `to`.
    pub fn copy_registered_kernels(&self, from: &str, to: &str) {
        for mut config in self.kernels_for_backend(from) {
            config.backend_name = to.to_string();
            self.register(config);
        }
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}
