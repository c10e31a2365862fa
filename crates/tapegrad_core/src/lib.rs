pub mod attrs;
pub mod backend;
pub mod data;
pub mod dtype;
pub mod env;
pub mod error;
pub mod kernel;
pub mod kernel_names;
pub mod values;
