pub mod autodiff;
mod backends;
pub mod container;
mod dispatch;
pub mod engine;
pub mod gradient;
pub mod grads;
mod ops;
pub mod profiler;
mod scope;
pub mod tape;
pub mod tensor;
mod variables;

pub use autodiff::{CustomGradient, GradientsResult, NoGradientPolicy, VariableGradsResult, CUSTOM_GRAD};
pub use container::TensorContainer;
pub use engine::Engine;
pub use gradient::{GradConfig, GradContext, GradFn, GradientRegistry, NamedGradients, SaveInputs};
pub use grads::register_gradients;
pub use profiler::{KernelProfile, MemoryInfo, ProfileInfo, TimingInfo};
pub use tensor::{NamedTensors, Tensor, TensorId, Variable};
