//! Contains all possible errors that can occur in the library.

use std::fmt::{Display, Error, Formatter};

/// Generic error enumeration for each error in this library.
#[derive(Debug)]
pub enum BinauralError {
    /// Generic input/output error.
    Io(std::io::Error),

    /// Malformed or truncated sphere file, exact reason stored in inner value.
    InvalidFileFormat(String),

    /// An attempt to finalize a database that has no samples in it.
    EmptyDatabase,

    /// An attempt to add samples to (or re-finalize) an already finalized database.
    AlreadyFinalized,

    /// An attempt to use a database that was not finalized yet.
    NotFinalized,

    /// An impulse response has a different length than the database expects.
    InvalidImpulseLength {
        /// Amount of samples per ear the database stores.
        expected: usize,
        /// Amount of samples actually supplied.
        actual: usize,
    },

    /// Triangulation of sample directions failed, exact reason stored in inner value.
    TriangulationFailed(String),
}

impl From<std::io::Error> for BinauralError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl Display for BinauralError {
    fn fmt(&self, f: &mut Formatter) -> Result<(), Error> {
        match self {
            Self::Io(io) => write!(f, "io error: {}", io),
            Self::InvalidFileFormat(reason) => {
                write!(f, "invalid sphere file format. reason: {}", reason)
            }
            Self::EmptyDatabase => write!(f, "the database contains no samples"),
            Self::AlreadyFinalized => write!(f, "the database is already finalized"),
            Self::NotFinalized => write!(f, "the database is not finalized yet"),
            Self::InvalidImpulseLength { expected, actual } => write!(
                f,
                "invalid impulse response length: expected {}, got {}",
                expected, actual
            ),
            Self::TriangulationFailed(reason) => {
                write!(f, "triangulation failed. reason: {}", reason)
            }
        }
    }
}

impl std::error::Error for BinauralError {}
