#![allow(non_upper_case_globals)]

pub const float32: DType = DType::F32;
pub const int32: DType = DType::I32;
pub const bool: DType = DType::BOOL;
pub const complex64: DType = DType::C64;
pub const string: DType = DType::STRING;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DType {
    F32,
    I32,
    BOOL,
    C64,
    STRING,
}

impl DType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::F32 => "float32",
            Self::I32 => "int32",
            Self::BOOL => "bool",
            Self::C64 => "complex64",
            Self::STRING => "string",
        }
    }

    /// Bytes per element. Strings are variable-length and have no fixed size.
    pub fn size_in_bytes(&self) -> Option<usize> {
        match self {
            Self::F32 => Some(4),
            Self::I32 => Some(4),
            Self::BOOL => Some(1),
            Self::C64 => Some(8),
            Self::STRING => None,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::F32)
    }

    #[allow(clippy::match_like_matches_macro)]
    pub fn is_numeric(&self) -> bool {
        match self {
            Self::F32 | Self::I32 | Self::BOOL | Self::C64 => true,
            Self::STRING => false,
        }
    }

    /// The dtype every gradient must have.
    pub const fn default_float() -> DType {
        DType::F32
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
