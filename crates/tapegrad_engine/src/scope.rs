use crate::{
    container::TensorContainer,
    engine::Engine,
    tensor::{Tensor, TensorId},
};
use std::collections::HashSet;
use tapegrad_core::error::{Error, Result};

pub(crate) struct ScopeFrame {
    pub id: usize,
    pub name: String,
    /// Tensors created while this frame was innermost, in creation order.
    pub track: Vec<TensorId>,
}

/// Closes its scope with an empty result unless it was already ended.
struct ScopeGuard<'a> {
    engine: &'a Engine,
    scope_id: usize,
    armed: bool,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let is_top = self
            .engine
            .state
            .try_borrow()
            .map(|state| state.scope_stack.last().map(|s| s.id) == Some(self.scope_id))
            .unwrap_or(false);
        if is_top {
            self.engine.close_scope(&[]);
        }
    }
}

impl Engine {
    pub fn start_scope(&self, name: Option<&str>) {
        let mut state = self.state.borrow_mut();
        let id = state.next_scope_id;
        state.next_scope_id += 1;
        let name = name.map(str::to_string).unwrap_or_else(|| format!("scope_{}", id));
        tracing::trace!(scope = %name, depth = state.scope_stack.len() + 1, "start scope");
        state.scope_stack.push(ScopeFrame {
            id,
            name,
            track: Vec::new(),
        });
    }

    /// Closes the innermost scope. Its tensors that are neither kept nor
    /// reachable from `result` are disposed; the reachable ones move to the
    /// enclosing scope, or become unscoped at the top level.
    pub fn end_scope<C: TensorContainer + ?Sized>(&self, result: &C) -> Result<()> {
        if self.state.borrow().scope_stack.is_empty() {
            return Err(Error::InvalidState("end_scope called without an open scope".into()));
        }
        self.close_scope(&result.tensor_ids());
        Ok(())
    }

    fn close_scope(&self, keep_ids: &[TensorId]) {
        let Some(frame) = self.state.borrow_mut().scope_stack.pop() else {
            return;
        };
        let keep_ids: HashSet<TensorId> = keep_ids.iter().copied().collect();

        let to_dispose: Vec<TensorId> = {
            let state = self.state.borrow();
            frame
                .track
                .iter()
                .copied()
                .filter(|id| !keep_ids.contains(id))
                .filter(|id| state.tensors.get(id).map(|e| !e.kept).unwrap_or(false))
                .collect()
        };
        for id in to_dispose {
            self.dispose_tensor_id(id);
        }

        let mut state = self.state.borrow_mut();
        let parent = state.scope_stack.last().map(|s| s.id);
        let mut adopted = Vec::new();
        for id in &keep_ids {
            if let Some(entry) = state.tensors.get_mut(id) {
                if entry.scope_id == Some(frame.id) {
                    entry.scope_id = parent;
                    adopted.push(*id);
                }
            }
        }
        if let Some(parent) = state.scope_stack.last_mut() {
            // creation order is kept so disposal order stays deterministic
            for id in frame.track.iter().filter(|id| adopted.contains(id)) {
                parent.track.push(*id);
            }
        }
        tracing::trace!(scope = %frame.name, adopted = adopted.len(), "end scope");
    }

    /// Runs `f` inside a fresh scope and disposes every intermediate tensor
    /// it created, keeping those reachable from its result. The scope is
    /// closed on errors and panics too.
    pub fn tidy<T, F>(&self, f: F) -> Result<T>
    where
        T: TensorContainer,
        F: FnOnce(&Engine) -> Result<T>,
    {
        self.tidy_named(None, f)
    }

    pub fn tidy_named<T, F>(&self, name: Option<&str>, f: F) -> Result<T>
    where
        T: TensorContainer,
        F: FnOnce(&Engine) -> Result<T>,
    {
        self.start_scope(name);
        let scope_id = self.state.borrow().scope_stack.last().map(|s| s.id).unwrap_or_default();
        let mut guard = ScopeGuard {
            engine: self,
            scope_id,
            armed: true,
        };
        let result = f(self);
        guard.armed = false;
        match result {
            Ok(value) => {
                self.close_scope(&value.tensor_ids());
                Ok(value)
            },
            Err(err) => {
                self.close_scope(&[]);
                Err(err)
            },
        }
    }

    /// Exempts `tensor` from scope disposal. It must be disposed explicitly.
    pub fn keep(&self, tensor: &Tensor) -> Result<Tensor> {
        let mut state = self.state.borrow_mut();
        let entry = state
            .tensors
            .get_mut(&tensor.id())
            .ok_or(Error::TensorDisposed { id: tensor.id().0 })?;
        entry.kept = true;
        Ok(tensor.clone())
    }

    /// Disposes every tensor in `container`. Already disposed tensors are skipped.
    pub fn dispose<C: TensorContainer + ?Sized>(&self, container: &C) {
        for id in container.tensor_ids() {
            self.dispose_tensor_id(id);
        }
    }

    pub fn dispose_tensor(&self, tensor: &Tensor) {
        self.dispose_tensor_id(tensor.id());
    }

    pub fn scope_depth(&self) -> usize {
        self.state.borrow().scope_stack.len()
    }
}
