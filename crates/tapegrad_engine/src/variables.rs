use crate::{
    engine::{Engine, Track},
    tensor::{Tensor, Variable},
};
use tapegrad_core::{
    dtype::DType,
    error::{Error, Result},
};

impl Engine {
    /// Registers a variable holding `initial`'s values.
    ///
    /// The variable shares `initial`'s data (or a cast copy when `dtype`
    /// differs) and is exempt from scope disposal. Unnamed variables get a
    /// generated name.
    pub fn make_variable(
        &self,
        initial: &Tensor,
        trainable: bool,
        name: Option<&str>,
        dtype: Option<DType>,
    ) -> Result<Variable> {
        let name = match name {
            Some(name) => name.to_string(),
            None => {
                let mut state = self.state.borrow_mut();
                let id = state.next_variable_id;
                state.next_variable_id += 1;
                id.to_string()
            },
        };
        if self.state.borrow().variables.contains_key(&name) {
            return Err(Error::DuplicateVariable(name));
        }

        let source = match dtype {
            Some(dtype) if dtype != initial.dtype() => Some(self.cast(initial, dtype)?),
            _ => None,
        };
        let info = self.tensor_info(source.as_ref().unwrap_or(initial))?;
        let (backend_name, backend) = self.data_owner(info.data_id)?;
        backend.inc_ref(info.data_id)?;
        let tensor = self.track_tensor(&info, &backend_name, 0, Track::Variable(name.clone()));
        if let Some(source) = source {
            self.dispose_tensor(&source);
        }

        let variable = Variable::new(tensor, name.clone(), trainable);
        self.state.borrow_mut().variables.insert(name.clone(), variable.clone());
        tracing::debug!(variable = %name, trainable, "registered variable");
        Ok(variable)
    }

    /// Points `variable` at `value`'s data.
    ///
    /// Dtype and shape are checked before anything changes. The previous data
    /// loses the variable's claim and is freed unless another handle holds it.
    pub fn assign(&self, variable: &Variable, value: &Tensor) -> Result<()> {
        if !self.state.borrow().variables.contains_key(variable.name()) {
            return Err(Error::VariableNotFound(variable.name().to_string()));
        }
        if value.dtype() != variable.dtype() {
            return Err(Error::DTypeMismatch {
                expected: variable.dtype(),
                got: value.dtype(),
                msg: format!("dtype of the new value must match variable '{}'", variable.name()),
            });
        }
        if value.shape() != variable.shape() {
            return Err(Error::DimensionMismatch {
                expected: variable.shape().to_vec(),
                got: value.shape().to_vec(),
                msg: format!("shape of the new value must match variable '{}'", variable.name()),
            });
        }

        let current = self.tensor_info(variable.tensor())?;
        let next = self.tensor_info(value)?;
        if current.data_id == next.data_id {
            return Ok(());
        }
        let (backend_name, backend) = self.data_owner(next.data_id)?;
        backend.inc_ref(next.data_id)?;
        self.retarget_tensor(variable.id(), &next, &backend_name)
    }

    pub fn dispose_variable(&self, variable: &Variable) -> Result<()> {
        if !self.state.borrow().variables.contains_key(variable.name()) {
            return Err(Error::VariableNotFound(variable.name().to_string()));
        }
        self.dispose_tensor_id(variable.id());
        Ok(())
    }

    pub fn dispose_variables(&self) {
        let variables: Vec<Variable> = self.state.borrow().variables.values().cloned().collect();
        for variable in &variables {
            self.dispose_tensor_id(variable.id());
        }
    }

    pub fn registered_variables(&self) -> Vec<Variable> {
        self.state.borrow().variables.values().cloned().collect()
    }

    pub fn variable(&self, name: &str) -> Option<Variable> {
        self.state.borrow().variables.get(name).cloned()
    }
}
