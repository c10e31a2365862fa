use crate::{
    dtype::DType,
    error::{Error, Result},
};

/// Host-side copy of the values behind a data id.
///
/// This is what backends accept in `write`/`move_data` and hand back from
/// `read`/`read_sync`. Complex numbers are stored as `[re, im]` pairs and
/// strings as raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendValues {
    F32(Vec<f32>),
    I32(Vec<i32>),
    BOOL(Vec<bool>),
    C64(Vec<[f32; 2]>),
    STRING(Vec<Vec<u8>>),
}

impl BackendValues {
    pub fn dtype(&self) -> DType {
        match self {
            Self::F32(_) => DType::F32,
            Self::I32(_) => DType::I32,
            Self::BOOL(_) => DType::BOOL,
            Self::C64(_) => DType::C64,
            Self::STRING(_) => DType::STRING,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::F32(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::BOOL(v) => v.len(),
            Self::C64(v) => v.len(),
            Self::STRING(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of bytes held. For strings this is the sum of the byte lengths,
    /// which only approximates what a backend really allocates.
    pub fn num_bytes(&self) -> usize {
        match self {
            Self::STRING(v) => v.iter().map(|s| s.len()).sum(),
            other => other.len() * other.dtype().size_in_bytes().unwrap_or(0),
        }
    }

    pub fn zeros(dtype: DType, len: usize) -> Self {
        Self::filled(dtype, len, 0.0)
    }

    pub fn filled(dtype: DType, len: usize, value: f32) -> Self {
        match dtype {
            DType::F32 => Self::F32(vec![value; len]),
            DType::I32 => Self::I32(vec![value as i32; len]),
            DType::BOOL => Self::BOOL(vec![value != 0.0; len]),
            DType::C64 => Self::C64(vec![[value, 0.0]; len]),
            DType::STRING => Self::STRING(vec![Vec::new(); len]),
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            Self::F32(v) => Some(v),
            _ => None,
        }
    }

    /// Converts numeric values to `f32`; complex values keep their real part.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        match self {
            Self::F32(v) => Ok(v.clone()),
            Self::I32(v) => Ok(v.iter().map(|&x| x as f32).collect()),
            Self::BOOL(v) => Ok(v.iter().map(|&x| if x { 1.0 } else { 0.0 }).collect()),
            Self::C64(v) => Ok(v.iter().map(|c| c[0]).collect()),
            Self::STRING(_) => Err(Error::DTypeMismatch {
                expected: DType::F32,
                got: DType::STRING,
                msg: "string values cannot be converted to float32".into(),
            }),
        }
    }

    /// Re-encodes numeric values as `dtype`.
    pub fn cast(&self, dtype: DType) -> Result<Self> {
        if self.dtype() == dtype {
            return Ok(self.clone());
        }
        if let Self::C64(v) = self {
            if dtype == DType::F32 {
                return Ok(Self::F32(v.iter().map(|c| c[0]).collect()));
            }
        }
        let floats = self.to_f32_vec()?;
        Ok(match dtype {
            DType::F32 => Self::F32(floats),
            DType::I32 => Self::I32(floats.iter().map(|&x| x as i32).collect()),
            DType::BOOL => Self::BOOL(floats.iter().map(|&x| x != 0.0).collect()),
            DType::C64 => Self::C64(floats.iter().map(|&x| [x, 0.0]).collect()),
            DType::STRING => {
                return Err(Error::DTypeMismatch {
                    expected: self.dtype(),
                    got: DType::STRING,
                    msg: "numeric values cannot be cast to string".into(),
                })
            },
        })
    }
}

impl From<Vec<f32>> for BackendValues {
    fn from(v: Vec<f32>) -> Self {
        Self::F32(v)
    }
}

impl From<Vec<i32>> for BackendValues {
    fn from(v: Vec<i32>) -> Self {
        Self::I32(v)
    }
}

impl From<Vec<bool>> for BackendValues {
    fn from(v: Vec<bool>) -> Self {
        Self::BOOL(v)
    }
}

impl From<Vec<[f32; 2]>> for BackendValues {
    fn from(v: Vec<[f32; 2]>) -> Self {
        Self::C64(v)
    }
}

impl From<Vec<String>> for BackendValues {
    fn from(v: Vec<String>) -> Self {
        Self::STRING(v.into_iter().map(String::into_bytes).collect())
    }
}

impl From<Vec<&str>> for BackendValues {
    fn from(v: Vec<&str>) -> Self {
        Self::STRING(v.into_iter().map(|s| s.as_bytes().to_vec()).collect())
    }
}
