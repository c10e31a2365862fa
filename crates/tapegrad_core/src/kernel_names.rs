//! Kernel names shared by backends and the op layer.

pub const IDENTITY: &str = "Identity";
pub const CAST: &str = "Cast";
pub const FILL: &str = "Fill";

pub const ADD: &str = "Add";
pub const SUB: &str = "Sub";
pub const MUL: &str = "Mul";
pub const DIV: &str = "Div";

pub const NEG: &str = "Neg";
pub const SQUARE: &str = "Square";
pub const EXP: &str = "Exp";

pub const SUM: &str = "Sum";
