pub use tapegrad_internal::*;
