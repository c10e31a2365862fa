use std::sync::atomic::{AtomicUsize, Ordering};
use tapegrad_core::{dtype::DType, kernel::NamedMap};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub usize);
static TENSOR_COUNTER: AtomicUsize = AtomicUsize::new(1);
#[inline]
pub fn next_tensor_id() -> TensorId {
    TensorId(TENSOR_COUNTER.fetch_add(1, Ordering::SeqCst))
}

/// Immutable value handle.
///
/// A `Tensor` only names a row of the engine's tensor table; the data handle
/// and the disposal state live there, so every clone of a handle observes
/// disposal.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    id: TensorId,
    shape: Vec<usize>,
    dtype: DType,
}

impl Tensor {
    pub(crate) fn new(id: TensorId, shape: &[usize], dtype: DType) -> Self {
        Self {
            id,
            shape: shape.to_vec(),
            dtype,
        }
    }

    pub fn id(&self) -> TensorId {
        self.id
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }
}

/// Named, mutable tensor registered with an engine.
///
/// The tensor id never changes; `assign` swaps the data behind it.
#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    tensor: Tensor,
    name: String,
    trainable: bool,
}

impl Variable {
    pub(crate) fn new(tensor: Tensor, name: String, trainable: bool) -> Self {
        Self { tensor, name, trainable }
    }

    pub fn tensor(&self) -> &Tensor {
        &self.tensor
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn trainable(&self) -> bool {
        self.trainable
    }

    pub fn id(&self) -> TensorId {
        self.tensor.id
    }

    pub fn shape(&self) -> &[usize] {
        &self.tensor.shape
    }

    pub fn dtype(&self) -> DType {
        self.tensor.dtype
    }
}

impl AsRef<Tensor> for Variable {
    fn as_ref(&self) -> &Tensor {
        &self.tensor
    }
}

/// Kernel inputs by name.
pub type NamedTensors = NamedMap<Tensor>;
