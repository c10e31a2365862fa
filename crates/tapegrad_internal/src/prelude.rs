pub use crate::core::{
    backend::{Backend, BackendInit},
    dtype::*,
    env::EnvFlags,
    error::{Error, Result},
};
pub use crate::engine::{
    CustomGradient, Engine, GradConfig, GradContext, GradientsResult, NamedTensors, NoGradientPolicy, Tensor,
    TensorContainer, Variable,
};
#[cfg(feature = "cpu")]
pub use crate::{default_engine, default_engine_with_flags};
