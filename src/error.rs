use std::fmt;

use tch::TchError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("shape mismatch in {context}: expected {expected} input channels, got {actual}")]
    ShapeMismatch {
        context: String,
        expected: i64,
        actual: i64,
    },

    #[error(transparent)]
    ParameterLoad(#[from] ParameterLoadError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error(transparent)]
    Tch(#[from] TchError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Everything that kept a named tensor set from lining up with a module graph.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParameterLoadError {
    pub missing: Vec<String>,
    pub unexpected: Vec<String>,
    /// (name, expected shape, found shape)
    pub mismatched: Vec<(String, Vec<i64>, Vec<i64>)>,
}

impl ParameterLoadError {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty() && self.mismatched.is_empty()
    }
}

impl fmt::Display for ParameterLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parameter load failed")?;
        if !self.missing.is_empty() {
            write!(f, "; missing keys: {}", self.missing.join(", "))?;
        }
        if !self.unexpected.is_empty() {
            write!(f, "; unexpected keys: {}", self.unexpected.join(", "))?;
        }
        for (name, expected, found) in &self.mismatched {
            write!(f, "; {name}: expected shape {expected:?}, found {found:?}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ParameterLoadError {}
