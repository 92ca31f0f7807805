//! Error types for the platform abstraction layer.
//!
//! Metrics a platform cannot provide are not errors: accessors return `None`
//! for them. `PalError` covers the remaining failure classes: an entity that
//! vanished between discovery and sampling, failures of the underlying OS
//! query, and caller bugs such as out-of-range positional access.

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PalError>;

/// Failure conditions raised by dependencies, instances and enumerations.
#[derive(Debug, thiserror::Error)]
pub enum PalError {
    /// The backing OS entity no longer exists (disk unmounted, process exited).
    #[error("{entity} not found")]
    NotFound { entity: String },

    /// An OS query failed unexpectedly.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A counter file or kernel structure could not be interpreted.
    #[error("failed to parse {what} from {input:?}")]
    Parse { what: String, input: String },

    /// Any other dependency or internal failure.
    #[error("internal error: {0}")]
    Internal(String),

    /// Positional access outside `[lower, upper)`.
    #[error("illegal index for {name}: {index} not in {bounds}")]
    IllegalIndex {
        name: String,
        index: usize,
        bounds: IndexBounds,
    },
}

/// Half-open range reported by [`PalError::IllegalIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBounds {
    pub lower: usize,
    pub upper: usize,
}

impl fmt::Display for IndexBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{})", self.lower, self.upper)
    }
}

impl PalError {
    pub fn not_found(entity: impl Into<String>) -> Self {
        PalError::NotFound {
            entity: entity.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        PalError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn parse(what: impl Into<String>, input: impl Into<String>) -> Self {
        PalError::Parse {
            what: what.into(),
            input: input.into(),
        }
    }

    /// Builds an `IllegalIndex` error for `index` against a collection of `len`.
    pub fn illegal_index(name: impl Into<String>, index: usize, len: usize) -> Self {
        PalError::IllegalIndex {
            name: name.into(),
            index,
            bounds: IndexBounds {
                lower: 0,
                upper: len,
            },
        }
    }

    /// Maps an I/O failure on `path` to `NotFound` when the file vanished,
    /// which is how `/proc` reports a process or device that just went away.
    pub fn from_io_path(path: &str, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => PalError::not_found(path),
            _ => PalError::io(format!("Failed to read {}", path), source),
        }
    }

    /// True for the "entity transiently unavailable" class.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PalError::NotFound { .. })
    }
}
