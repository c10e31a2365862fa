use crate::tensor::{Tensor, TensorId, Variable};
use std::collections::{BTreeMap, HashMap};
use tapegrad_core::{kernel::NamedMap, values::BackendValues};

/// Anything a scope can look through for tensors.
///
/// `tidy` keeps exactly the tensors its closure's result exposes through this
/// trait. Futures do not implement it, so an asynchronous value can never be
/// returned from a synchronous scope.
pub trait TensorContainer {
    fn collect_tensors<'a>(&'a self, out: &mut Vec<&'a Tensor>);

    fn tensor_ids(&self) -> Vec<TensorId> {
        let mut tensors = Vec::new();
        self.collect_tensors(&mut tensors);
        let mut ids: Vec<TensorId> = Vec::with_capacity(tensors.len());
        for tensor in tensors {
            if !ids.contains(&tensor.id()) {
                ids.push(tensor.id());
            }
        }
        ids
    }
}

impl TensorContainer for Tensor {
    fn collect_tensors<'a>(&'a self, out: &mut Vec<&'a Tensor>) {
        out.push(self);
    }
}

impl TensorContainer for Variable {
    fn collect_tensors<'a>(&'a self, out: &mut Vec<&'a Tensor>) {
        out.push(self.tensor());
    }
}

impl<T: TensorContainer + ?Sized> TensorContainer for &T {
    fn collect_tensors<'a>(&'a self, out: &mut Vec<&'a Tensor>) {
        (**self).collect_tensors(out);
    }
}

impl<T: TensorContainer> TensorContainer for Option<T> {
    fn collect_tensors<'a>(&'a self, out: &mut Vec<&'a Tensor>) {
        if let Some(inner) = self {
            inner.collect_tensors(out);
        }
    }
}

impl<T: TensorContainer> TensorContainer for [T] {
    fn collect_tensors<'a>(&'a self, out: &mut Vec<&'a Tensor>) {
        for item in self {
            item.collect_tensors(out);
        }
    }
}

impl<T: TensorContainer, const N: usize> TensorContainer for [T; N] {
    fn collect_tensors<'a>(&'a self, out: &mut Vec<&'a Tensor>) {
        self.as_slice().collect_tensors(out);
    }
}

impl<T: TensorContainer> TensorContainer for Vec<T> {
    fn collect_tensors<'a>(&'a self, out: &mut Vec<&'a Tensor>) {
        self.as_slice().collect_tensors(out);
    }
}

impl<K, T: TensorContainer> TensorContainer for HashMap<K, T> {
    fn collect_tensors<'a>(&'a self, out: &mut Vec<&'a Tensor>) {
        for value in self.values() {
            value.collect_tensors(out);
        }
    }
}

impl<K, T: TensorContainer> TensorContainer for BTreeMap<K, T> {
    fn collect_tensors<'a>(&'a self, out: &mut Vec<&'a Tensor>) {
        for value in self.values() {
            value.collect_tensors(out);
        }
    }
}

impl<T: TensorContainer> TensorContainer for NamedMap<T> {
    fn collect_tensors<'a>(&'a self, out: &mut Vec<&'a Tensor>) {
        for value in self.values() {
            value.collect_tensors(out);
        }
    }
}

macro_rules! impl_container_for_tuple {
    ($($name:ident),+) => {
        impl<$($name: TensorContainer),+> TensorContainer for ($($name,)+) {
            #[allow(non_snake_case)]
            fn collect_tensors<'a>(&'a self, out: &mut Vec<&'a Tensor>) {
                let ($($name,)+) = self;
                $($name.collect_tensors(out);)+
            }
        }
    };
}

impl_container_for_tuple!(A);
impl_container_for_tuple!(A, B);
impl_container_for_tuple!(A, B, C);
impl_container_for_tuple!(A, B, C, D);

macro_rules! impl_empty_container {
    ($($ty:ty),+) => {
        $(
            impl TensorContainer for $ty {
                fn collect_tensors<'a>(&'a self, _out: &mut Vec<&'a Tensor>) {}
            }
        )+
    };
}

impl_empty_container!((), bool, f32, f64, i32, i64, usize, String, BackendValues);
