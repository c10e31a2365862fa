use crate::{
    container::TensorContainer,
    dispatch::KernelDepthGuard,
    engine::Engine,
    gradient::{GradContext, GradFn},
    tape::{prune_tape, PrunedNode, TapeGuard, TapeNode},
    tensor::{NamedTensors, Tensor, TensorId, Variable},
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tapegrad_core::{
    attrs::Attrs,
    dtype::DType,
    error::{Error, Result},
};

/// Kernel name under which [`Engine::custom_grad`] records its node.
pub const CUSTOM_GRAD: &str = "CustomGrad";

/// What to report for a differentiated tensor that the result does not
/// depend on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NoGradientPolicy {
    /// Fail with `DisconnectedGraph` or `NoGradientForInput`.
    #[default]
    Error,
    /// Report `None`.
    Allow,
    /// Report zeros shaped like the tensor.
    ZeroFill,
}

#[derive(Debug, Clone)]
pub struct GradientsResult {
    pub value: Tensor,
    /// One entry per differentiated tensor, in order.
    pub grads: Vec<Option<Tensor>>,
}

impl TensorContainer for GradientsResult {
    fn collect_tensors<'a>(&'a self, out: &mut Vec<&'a Tensor>) {
        self.value.collect_tensors(out);
        self.grads.collect_tensors(out);
    }
}

#[derive(Debug, Clone)]
pub struct VariableGradsResult {
    pub value: Tensor,
    pub grads: BTreeMap<String, Option<Tensor>>,
}

impl TensorContainer for VariableGradsResult {
    fn collect_tensors<'a>(&'a self, out: &mut Vec<&'a Tensor>) {
        self.value.collect_tensors(out);
        self.grads.collect_tensors(out);
    }
}

/// Forward result of a [`Engine::custom_grad`] closure.
pub struct CustomGradient {
    pub outputs: Vec<Tensor>,
    /// Made available to `grad_fn` as `GradContext::saved`.
    pub saved: Vec<Tensor>,
    pub grad_fn: Arc<dyn GradFn>,
}

impl TensorContainer for CustomGradient {
    fn collect_tensors<'a>(&'a self, out: &mut Vec<&'a Tensor>) {
        self.outputs.collect_tensors(out);
        self.saved.collect_tensors(out);
    }
}

impl Engine {
    /// Reverse-mode gradients of `f`'s result with respect to `xs`.
    ///
    /// `f` runs inside its own scope with the tape on, and the backward pass
    /// only visits nodes connecting `xs` to the result. `dy` seeds the
    /// backward pass and defaults to ones. The result and the gradients are
    /// tracked by the caller's scope.
    pub fn gradients<F>(
        &self,
        f: F,
        xs: &[Tensor],
        dy: Option<&Tensor>,
        policy: NoGradientPolicy,
    ) -> Result<GradientsResult>
    where
        F: FnOnce(&Engine) -> Result<Tensor>,
    {
        if xs.is_empty() {
            return Err(Error::InvalidArgument(
                "gradients() received an empty list of xs".into(),
            ));
        }
        let result = self.record_and_backpropagate(f, xs, dy, policy);
        self.release_tape_if_outermost();
        result
    }

    /// Gradients of `f` with respect to `xs`, which must all be connected.
    pub fn value_and_grads<F>(&self, f: F, xs: &[Tensor]) -> Result<(Tensor, Vec<Tensor>)>
    where
        F: FnOnce(&Engine) -> Result<Tensor>,
    {
        let GradientsResult { value, grads } = self.gradients(f, xs, None, NoGradientPolicy::Error)?;
        let grads = grads
            .into_iter()
            .enumerate()
            .map(|(index, grad)| grad.ok_or(Error::NoGradientForInput { index }))
            .collect::<Result<Vec<_>>>();
        if grads.is_err() {
            self.dispose_tensor(&value);
        }
        Ok((value, grads?))
    }

    /// Gradient of `f` with respect to the single tensor `x`. The value of
    /// `f` is disposed.
    pub fn grad<F>(&self, f: F, x: &Tensor) -> Result<Tensor>
    where
        F: FnOnce(&Engine) -> Result<Tensor>,
    {
        let (value, mut grads) = self.value_and_grads(f, std::slice::from_ref(x))?;
        self.dispose_tensor(&value);
        grads.pop().ok_or(Error::NoGradientForInput { index: 0 })
    }

    /// Gradients of the scalar `f` with respect to trainable variables.
    ///
    /// Without `var_list` every registered trainable variable is used.
    /// Non-trainable variables in `var_list` report `None`.
    pub fn variable_grads<F>(&self, f: F, var_list: Option<&[Variable]>) -> Result<VariableGradsResult>
    where
        F: FnOnce(&Engine) -> Result<Tensor>,
    {
        let candidates: Vec<Variable> = match var_list {
            Some(vars) => vars.to_vec(),
            None => self.registered_variables(),
        };
        let trainable: Vec<&Variable> = candidates.iter().filter(|v| v.trainable()).collect();
        if trainable.is_empty() {
            return Err(Error::InvalidArgument(
                "variable_grads() expects at least one trainable variable".into(),
            ));
        }
        for var in &trainable {
            if self.variable(var.name()).is_none() {
                return Err(Error::VariableNotFound(var.name().to_string()));
            }
        }

        let xs: Vec<Tensor> = trainable.iter().map(|v| v.tensor().clone()).collect();
        let scalar_loss = |engine: &Engine| {
            let y = f(engine)?;
            if !y.is_scalar() {
                return Err(Error::InvalidArgument(format!(
                    "the result of the loss function in variable_grads() must be a scalar, got shape {:?}",
                    y.shape()
                )));
            }
            Ok(y)
        };
        let GradientsResult { value, grads } = self.gradients(scalar_loss, &xs, None, NoGradientPolicy::Allow)?;

        if grads.iter().all(Option::is_none) {
            self.dispose_tensor(&value);
            return Err(Error::InvalidArgument(
                "cannot find a connection between any variable and the result of the loss function".into(),
            ));
        }

        let mut named: BTreeMap<String, Option<Tensor>> = trainable
            .iter()
            .zip(grads)
            .map(|(var, grad)| (var.name().to_string(), grad))
            .collect();
        for var in candidates.iter().filter(|v| !v.trainable()) {
            named.entry(var.name().to_string()).or_insert(None);
        }
        Ok(VariableGradsResult { value, grads: named })
    }

    /// Runs `forward` as one opaque operation whose backward pass is the
    /// returned `grad_fn`. Ops inside `forward` are not recorded; the call is
    /// recorded as a single node with inputs named `x.0`, `x.1`, ...
    pub fn custom_grad<F>(&self, inputs: &[Tensor], forward: F) -> Result<Vec<Tensor>>
    where
        F: FnOnce(&Engine, &[Tensor]) -> Result<CustomGradient>,
    {
        let record = self.is_tape_on();
        let custom = {
            let _depth = KernelDepthGuard::enter(self);
            self.tidy_named(Some(CUSTOM_GRAD), |engine| forward(engine, inputs))?
        };
        let CustomGradient { outputs, saved, grad_fn } = custom;

        let retained = if record {
            self.keep_for_backward(&saved)
        } else {
            Ok(Vec::new())
        };
        let passthrough: Vec<TensorId> = inputs.iter().chain(&outputs).map(Tensor::id).collect();
        for tensor in saved.iter().filter(|t| !passthrough.contains(&t.id())) {
            self.dispose_tensor(tensor);
        }
        let retained = match retained {
            Ok(retained) => retained,
            Err(err) => {
                self.dispose(&outputs);
                return Err(err);
            },
        };

        if record {
            let named = NamedTensors::new().with_list("x", inputs.iter().cloned());
            self.add_tape_node(
                CUSTOM_GRAD,
                named,
                outputs.clone(),
                retained.clone(),
                Attrs::new(),
                Some(grad_fn),
            );
            self.link_saved_tensors(&saved, &retained);
        }
        Ok(outputs)
    }

    fn record_and_backpropagate<F>(
        &self,
        f: F,
        xs: &[Tensor],
        dy: Option<&Tensor>,
        policy: NoGradientPolicy,
    ) -> Result<GradientsResult>
    where
        F: FnOnce(&Engine) -> Result<Tensor>,
    {
        let y = {
            let _tape = TapeGuard::start(self);
            self.tidy_named(Some("forward"), f)?
        };
        let grads = self
            .check_seed(&y, dy)
            .and_then(|_| self.backward_pass(xs, &y, dy, policy));
        match grads {
            Ok(grads) => Ok(GradientsResult { value: y, grads }),
            Err(err) => {
                self.dispose_tensor(&y);
                Err(err)
            },
        }
    }

    fn check_seed(&self, y: &Tensor, dy: Option<&Tensor>) -> Result<()> {
        let Some(dy) = dy else {
            return Ok(());
        };
        if dy.dtype() != DType::default_float() {
            return Err(Error::DTypeMismatch {
                expected: DType::default_float(),
                got: dy.dtype(),
                msg: "dy must have a float dtype".into(),
            });
        }
        if dy.shape() != y.shape() {
            return Err(Error::DimensionMismatch {
                expected: y.shape().to_vec(),
                got: dy.shape().to_vec(),
                msg: "the shape of dy must match the shape of y".into(),
            });
        }
        Ok(())
    }

    fn backward_pass(
        &self,
        xs: &[Tensor],
        y: &Tensor,
        dy: Option<&Tensor>,
        policy: NoGradientPolicy,
    ) -> Result<Vec<Option<Tensor>>> {
        let tape = self.tape_snapshot();
        let x_ids: Vec<TensorId> = xs.iter().map(Tensor::id).collect();
        let pruned = prune_tape(&tape, &x_ids, y.id());
        if pruned.is_empty() && policy == NoGradientPolicy::Error {
            return Err(Error::DisconnectedGraph);
        }
        tracing::trace!(tape = tape.len(), pruned = pruned.len(), "backward pass");

        self.tidy_named(Some("backward"), |engine| {
            let seed = match dy {
                Some(dy) => engine.clone_tensor(dy)?,
                None => engine.ones(y.shape(), DType::default_float())?,
            };
            let mut accumulated = HashMap::from([(y.id(), seed)]);
            engine.backpropagate(&tape, &pruned, &mut accumulated)?;

            xs.iter()
                .enumerate()
                .map(|(index, x)| match (accumulated.get(&x.id()), policy) {
                    (Some(grad), _) => Ok(Some(grad.clone())),
                    (None, NoGradientPolicy::Error) => Err(Error::NoGradientForInput { index }),
                    (None, NoGradientPolicy::Allow) => Ok(None),
                    (None, NoGradientPolicy::ZeroFill) => engine.zeros(x.shape(), DType::default_float()).map(Some),
                })
                .collect()
        })
    }

    /// Walks `pruned` in reverse, summing each node's input gradients into
    /// `accumulated` by tensor id.
    fn backpropagate(
        &self,
        tape: &[TapeNode],
        pruned: &[PrunedNode],
        accumulated: &mut HashMap<TensorId, Tensor>,
    ) -> Result<()> {
        for step in pruned.iter().rev() {
            let node = &tape[step.index];
            let grad_fn = node.grad_fn.clone().ok_or_else(|| Error::GradientNotFound {
                kernel: node.kernel_name.clone(),
            })?;

            let mut dys = Vec::with_capacity(node.outputs.len());
            for output in &node.outputs {
                match accumulated.get(&output.id()) {
                    Some(dy) => dys.push(dy.clone()),
                    None => dys.push(self.zeros(output.shape(), DType::default_float())?),
                }
            }

            let input_grads = self.tidy_named(Some(node.kernel_name.as_str()), |engine| {
                grad_fn.backward(&GradContext {
                    engine,
                    dys: &dys,
                    saved: &node.saved,
                    inputs: &node.inputs,
                    attrs: &node.attrs,
                    wanted: &step.inputs,
                })
            })?;

            for name in &step.inputs {
                let x = node.inputs.require(name)?;
                let grad = input_grads.get(name).ok_or_else(|| Error::MissingGradient {
                    op: node.kernel_name.clone(),
                    input: name.clone(),
                    available: input_grads.names().map(str::to_string).collect(),
                })?;
                if grad.dtype() != DType::default_float() {
                    return Err(Error::GradientDTypeMismatch {
                        op: node.kernel_name.clone(),
                        input: name.clone(),
                        got: grad.dtype(),
                    });
                }
                if grad.shape() != x.shape() {
                    return Err(Error::GradientShapeMismatch {
                        op: node.kernel_name.clone(),
                        input: name.clone(),
                        expected: x.shape().to_vec(),
                        got: grad.shape().to_vec(),
                    });
                }

                let sum = match accumulated.remove(&x.id()) {
                    Some(prev) => {
                        let sum = self.add(&prev, grad)?;
                        self.dispose_tensor(&prev);
                        if !accumulated.values().any(|t| t.id() == grad.id()) {
                            self.dispose_tensor(grad);
                        }
                        sum
                    },
                    // one handle may not back two accumulators
                    None if accumulated.values().any(|t| t.id() == grad.id()) => self.clone_tensor(grad)?,
                    None => grad.clone(),
                };
                accumulated.insert(x.id(), sum);
            }
        }
        Ok(())
    }
}
