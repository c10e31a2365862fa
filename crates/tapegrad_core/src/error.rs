use crate::{data::DataId, dtype::DType};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    // registration
    KernelNotFound {
        kernel: String,
        backend: String,
    },
    GradientNotFound {
        kernel: String,
    },
    DuplicateVariable(String),
    VariableNotFound(String),
    BackendNotFound(String),
    //
    DTypeMismatch {
        expected: DType,
        got: DType,
        msg: String,
    },
    DimensionMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
        msg: String,
    },
    GradientDTypeMismatch {
        op: String,
        input: String,
        got: DType,
    },
    GradientShapeMismatch {
        op: String,
        input: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    TensorDisposed {
        id: usize,
    },
    DataNotFound {
        data_id: DataId,
    },
    // backends
    NotImplemented {
        backend: String,
        method: String,
    },
    BackendNotReady(String),
    NoBackendAvailable,
    MemoryLeak {
        backend: String,
        kernel: String,
        leaked: usize,
    },
    // autodiff
    DisconnectedGraph,
    MissingGradient {
        op: String,
        input: String,
        available: Vec<String>,
    },
    NoGradientForInput {
        index: usize,
    },
    AsyncInScope(String),
    //
    InvalidArgument(String),
    InvalidState(String),
    Internal {
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_implemented(backend: impl Into<String>, method: impl Into<String>) -> Self {
        Self::NotImplemented {
            backend: backend.into(),
            method: method.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KernelNotFound { kernel, backend } => {
                write!(f, "Cannot find registered kernel '{}' for backend '{}'", kernel, backend)
            },
            Self::GradientNotFound { kernel } => {
                write!(f, "Cannot compute gradient: gradient function not found for {}", kernel)
            },
            Self::DuplicateVariable(name) => write!(f, "Variable with name {} was already registered", name),
            Self::VariableNotFound(name) => write!(f, "Variable with name {} is not registered", name),
            Self::BackendNotFound(name) => write!(f, "Backend '{}' not found in registry", name),

            Self::DTypeMismatch { expected, got, msg } => {
                write!(f, "DType mismatch ({}): expected {:?}, got {:?}", msg, expected, got)
            },
            Self::DimensionMismatch { expected, got, msg } => {
                write!(f, "Dimension mismatch ({}): expected {:?}, got {:?}", msg, expected, got)
            },
            Self::GradientDTypeMismatch { op, input, got } => {
                write!(
                    f,
                    "Error in gradient for op {}. The gradient of input '{}' must have '{}' dtype, but has '{}'",
                    op,
                    input,
                    DType::default_float().as_str(),
                    got.as_str()
                )
            },
            Self::GradientShapeMismatch {
                op,
                input,
                expected,
                got,
            } => {
                write!(
                    f,
                    "Error in gradient for op {}. The gradient of input '{}' has shape {:?}, which does not match the shape of the input {:?}",
                    op, input, got, expected
                )
            },
            Self::TensorDisposed { id } => write!(f, "Tensor {} is disposed", id),
            Self::DataNotFound { data_id } => write!(f, "No data found for data id {}", data_id.0),

            Self::NotImplemented { backend, method } => {
                write!(f, "'{}' is not implemented for backend '{}'", method, backend)
            },
            Self::BackendNotReady(msg) => write!(f, "Backend not ready: {}", msg),
            Self::NoBackendAvailable => {
                write!(f, "Could not initialize any backends, all backend initializations failed")
            },
            Self::MemoryLeak { backend, kernel, leaked } => {
                write!(
                    f,
                    "Backend '{}' has an internal memory leak ({} data ids) after running '{}'",
                    backend, leaked, kernel
                )
            },

            Self::DisconnectedGraph => write!(
                f,
                "Cannot compute gradient of y=f(x) with respect to x. Make sure that the f you passed encloses all operations that lead from x to y"
            ),
            Self::MissingGradient { op, input, available } => {
                write!(
                    f,
                    "Cannot backprop through input {} of {}. Available gradients found: {:?}",
                    input, op, available
                )
            },
            Self::NoGradientForInput { index } => {
                write!(f, "x[{}] received no gradient: y=f(x) does not depend on it", index)
            },
            Self::AsyncInScope(msg) => write!(f, "Asynchronous operation inside a synchronous scope: {}", msg),

            Self::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Self::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Self::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for Error {}
