use crate::{
    dtype::DType,
    error::{Error, Result},
};
use std::collections::BTreeMap;

/// Non-tensor kernel parameter.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Shape(Vec<usize>),
    DType(DType),
}

pub type Attrs = BTreeMap<String, AttrValue>;

macro_rules! impl_from_for_attr {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$ty> for AttrValue {
                fn from(value: $ty) -> Self {
                    AttrValue::$variant(value.into())
                }
            }
        )+
    };
}

impl_from_for_attr! {
    bool => Bool,
    i64 => Int,
    i32 => Int,
    f64 => Float,
    f32 => Float,
    String => Str,
    &str => Str,
    Vec<i64> => Ints,
    Vec<f64> => Floats,
    Vec<usize> => Shape,
    DType => DType,
}

macro_rules! attr_getter {
    ($fn_name:ident, $variant:ident, $ty:ty, $expected:literal) => {
        pub fn $fn_name(attrs: &Attrs, name: &str) -> Result<$ty> {
            match attrs.get(name) {
                Some(AttrValue::$variant(v)) => Ok(v.clone()),
                Some(other) => Err(Error::InvalidArgument(format!(
                    "attribute '{}' must be {}, got {:?}",
                    name, $expected, other
                ))),
                None => Err(Error::InvalidArgument(format!("missing attribute '{}'", name))),
            }
        }
    };
}

attr_getter!(get_bool, Bool, bool, "a bool");
attr_getter!(get_int, Int, i64, "an int");
attr_getter!(get_float, Float, f64, "a float");
attr_getter!(get_str, Str, String, "a string");
attr_getter!(get_shape, Shape, Vec<usize>, "a shape");
attr_getter!(get_dtype, DType, DType, "a dtype");

/// Builds an [`Attrs`] map from `name => value` pairs.
#[macro_export]
macro_rules! attrs {
    () => {
        $crate::attrs::Attrs::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut attrs = $crate::attrs::Attrs::new();
        $(attrs.insert($name.to_string(), $crate::attrs::AttrValue::from($value));)+
        attrs
    }};
}
