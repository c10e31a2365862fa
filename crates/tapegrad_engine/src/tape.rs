use crate::{
    engine::Engine,
    gradient::GradFn,
    tensor::{NamedTensors, Tensor, TensorId},
};
use std::{collections::HashSet, sync::Arc};
use tapegrad_core::attrs::Attrs;

/// One recorded kernel call.
#[derive(Clone)]
pub struct TapeNode {
    pub id: usize,
    pub kernel_name: String,
    pub inputs: NamedTensors,
    pub outputs: Vec<Tensor>,
    /// Kept clones retained for the backward pass.
    pub saved: Vec<Tensor>,
    pub attrs: Attrs,
    pub grad_fn: Option<Arc<dyn GradFn>>,
}

/// A node that lies on a path from the differentiated tensors to the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrunedNode {
    /// Position in the full tape.
    pub index: usize,
    /// Inputs that depend on a differentiated tensor, in input order.
    pub inputs: Vec<String>,
}

/// Filters `tape` down to the nodes connecting `xs` to `y`, in execution order.
///
/// A node survives when one of its inputs depends on some `x` and one of its
/// outputs feeds `y`. Each survivor keeps only the inputs that depend on an `x`.
pub fn prune_tape(tape: &[TapeNode], xs: &[TensorId], y: TensorId) -> Vec<PrunedNode> {
    // forward: tensors that depend on some x
    let mut from_x: HashSet<TensorId> = xs.iter().copied().collect();
    let mut forward_nodes = vec![false; tape.len()];
    for (i, node) in tape.iter().enumerate() {
        if node.inputs.values().any(|input| from_x.contains(&input.id())) {
            forward_nodes[i] = true;
            from_x.extend(node.outputs.iter().map(|o| o.id()));
        }
    }

    // backward: tensors that feed y
    let mut leads_to_y: HashSet<TensorId> = HashSet::from([y]);
    let mut backward_nodes = vec![false; tape.len()];
    for (i, node) in tape.iter().enumerate().rev() {
        if node.outputs.iter().any(|output| leads_to_y.contains(&output.id())) {
            backward_nodes[i] = true;
            leads_to_y.extend(node.inputs.values().map(|input| input.id()));
        }
    }

    tape.iter()
        .enumerate()
        .filter(|(i, _)| forward_nodes[*i] && backward_nodes[*i])
        .map(|(index, node)| PrunedNode {
            index,
            inputs: node
                .inputs
                .iter()
                .filter(|(_, input)| from_x.contains(&input.id()))
                .map(|(name, _)| name.to_string())
                .collect(),
        })
        .collect()
}

/// Keeps `gradient_depth` raised for the lifetime of the guard.
pub(crate) struct TapeGuard<'a> {
    engine: &'a Engine,
}

impl<'a> TapeGuard<'a> {
    pub(crate) fn start(engine: &'a Engine) -> Self {
        engine.start_tape();
        Self { engine }
    }
}

impl Drop for TapeGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.engine.state.try_borrow_mut() {
            state.gradient_depth = state.gradient_depth.saturating_sub(1);
        }
    }
}

impl Engine {
    pub(crate) fn start_tape(&self) {
        let mut state = self.state.borrow_mut();
        state.gradient_depth += 1;
        if state.active_tape.is_none() {
            state.active_tape = Some(Vec::new());
        }
    }

    /// Whether the next kernel call is recorded.
    pub fn is_tape_on(&self) -> bool {
        let state = self.state.borrow();
        state.gradient_depth > 0 && state.kernel_depth == 0
    }

    pub fn gradient_depth(&self) -> usize {
        self.state.borrow().gradient_depth
    }

    pub(crate) fn tape_snapshot(&self) -> Vec<TapeNode> {
        self.state.borrow().active_tape.clone().unwrap_or_default()
    }

    /// Drops the tape and disposes its saved tensors once no gradient
    /// computation remains open.
    pub(crate) fn release_tape_if_outermost(&self) {
        let tape = {
            let mut state = self.state.borrow_mut();
            if state.gradient_depth > 0 {
                return;
            }
            state.active_tape.take()
        };
        if let Some(tape) = tape {
            for node in &tape {
                self.dispose(&node.saved);
            }
            tracing::trace!(nodes = tape.len(), "released tape");
        }
    }
}
