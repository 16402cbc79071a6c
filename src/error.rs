use std::fmt;

use crate::data::Split;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// The network input is not a `[N, 1, 28, 28]` batch.
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    /// Training-mode batch statistics need more than one example.
    BatchTooSmall(usize),
    /// Images and labels disagree, or a label is outside 0..=9.
    InvalidData(String),
    EmptyDataset(Split),
    InvalidConfig(String),
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ShapeMismatch { expected, got } => write!(
                f,
                "shape mismatch: expected input of shape {:?}, got {:?}",
                expected, got
            ),
            Error::BatchTooSmall(n) => write!(
                f,
                "training batch of {} example(s) is too small for batch normalization",
                n
            ),
            Error::InvalidData(msg) => write!(f, "invalid data: {}", msg),
            Error::EmptyDataset(split) => write!(f, "{} split is empty", split),
            Error::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            Error::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value)
    }
}
