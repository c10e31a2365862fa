//! Thin op layer over [`Engine::run_kernel`].

use crate::{
    engine::Engine,
    tensor::{NamedTensors, Tensor},
};
use tapegrad_core::{
    attrs,
    attrs::Attrs,
    dtype::DType,
    error::{Error, Result},
    kernel_names::{ADD, CAST, DIV, EXP, FILL, IDENTITY, MUL, NEG, SQUARE, SUB, SUM},
};

impl Engine {
    // ────  creation  ────

    pub fn tensor(&self, values: Vec<f32>, shape: &[usize]) -> Result<Tensor> {
        let size: usize = shape.iter().product();
        if values.len() != size {
            return Err(Error::InvalidArgument(format!(
                "{} values cannot fill a tensor of shape {:?}",
                values.len(),
                shape
            )));
        }
        self.make_tensor(values, shape, DType::F32)
    }

    pub fn scalar(&self, value: f32) -> Result<Tensor> {
        self.make_tensor(vec![value], &[], DType::F32)
    }

    pub fn fill(&self, shape: &[usize], value: f32, dtype: DType) -> Result<Tensor> {
        let attrs = attrs! {
            "shape" => shape.to_vec(),
            "value" => value as f64,
            "dtype" => dtype,
        };
        self.run_kernel_single(FILL, &NamedTensors::new(), &attrs)
    }

    pub fn zeros(&self, shape: &[usize], dtype: DType) -> Result<Tensor> {
        self.fill(shape, 0.0, dtype)
    }

    pub fn ones(&self, shape: &[usize], dtype: DType) -> Result<Tensor> {
        self.fill(shape, 1.0, dtype)
    }

    pub fn zeros_like(&self, x: &Tensor) -> Result<Tensor> {
        self.zeros(x.shape(), x.dtype())
    }

    pub fn ones_like(&self, x: &Tensor) -> Result<Tensor> {
        self.ones(x.shape(), x.dtype())
    }

    /// New handle on `x`'s data. Recorded on the tape with gradient `dy`.
    pub fn clone_tensor(&self, x: &Tensor) -> Result<Tensor> {
        self.run_kernel_single(IDENTITY, &NamedTensors::new().with("x", x.clone()), &Attrs::new())
    }

    pub fn identity(&self, x: &Tensor) -> Result<Tensor> {
        self.clone_tensor(x)
    }

    pub fn cast(&self, x: &Tensor, dtype: DType) -> Result<Tensor> {
        if x.dtype() == dtype {
            return self.clone_tensor(x);
        }
        self.run_kernel_single(CAST, &NamedTensors::new().with("x", x.clone()), &attrs! { "dtype" => dtype })
    }

    // ────  arithmetic  ────

    pub fn add(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        self.binary(ADD, a, b)
    }

    pub fn sub(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        self.binary(SUB, a, b)
    }

    pub fn mul(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        self.binary(MUL, a, b)
    }

    pub fn div(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        self.binary(DIV, a, b)
    }

    pub fn neg(&self, x: &Tensor) -> Result<Tensor> {
        self.unary(NEG, x)
    }

    pub fn square(&self, x: &Tensor) -> Result<Tensor> {
        self.unary(SQUARE, x)
    }

    pub fn exp(&self, x: &Tensor) -> Result<Tensor> {
        if !x.dtype().is_float() {
            return Err(Error::DTypeMismatch {
                expected: DType::F32,
                got: x.dtype(),
                msg: "exp expects a float tensor".into(),
            });
        }
        self.unary(EXP, x)
    }

    /// Sum over all elements, as a scalar.
    pub fn sum(&self, x: &Tensor) -> Result<Tensor> {
        self.unary(SUM, x)
    }

    fn unary(&self, kernel_name: &str, x: &Tensor) -> Result<Tensor> {
        if !x.dtype().is_numeric() {
            return Err(Error::InvalidArgument(format!(
                "{} is not defined for {} tensors",
                kernel_name,
                x.dtype()
            )));
        }
        self.run_kernel_single(kernel_name, &NamedTensors::new().with("x", x.clone()), &Attrs::new())
    }

    fn binary(&self, kernel_name: &str, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        if a.dtype() != b.dtype() {
            return Err(Error::DTypeMismatch {
                expected: a.dtype(),
                got: b.dtype(),
                msg: format!("both operands of {} must share a dtype", kernel_name),
            });
        }
        if a.shape() != b.shape() && !a.is_scalar() && !b.is_scalar() {
            return Err(Error::DimensionMismatch {
                expected: a.shape().to_vec(),
                got: b.shape().to_vec(),
                msg: format!("operands of {} must have equal shapes or one must be a scalar", kernel_name),
            });
        }
        let inputs = NamedTensors::new().with("a", a.clone()).with("b", b.clone());
        self.run_kernel_single(kernel_name, &inputs, &Attrs::new())
    }
}
