use thiserror::Error;

/// Top-level error type for the bytecode codec.
///
/// The decoder reports the first error it hits and keeps it as a sticky
/// failure; the encoder returns errors eagerly. Callers must discard any
/// partially built tree once an error has been reported.
#[derive(Debug, Error)]
pub enum BytecodeError {
    /// The stream ended before a record was complete.
    #[error("truncated stream while reading {0}")]
    Truncated(&'static str),

    /// A wire field held a value outside its enumeration.
    #[error("unknown {what} value {value}")]
    Unknown { what: &'static str, value: u32 },

    /// A variable, block, or instruction index fell outside its table.
    #[error("{what} index {index} out of range (limit {limit})")]
    IndexOutOfRange {
        what: &'static str,
        index: u32,
        limit: u32,
    },

    /// An operand count disagreed with a declared arity.
    #[error("arity mismatch for {what}: expected {expected}, found {found}")]
    ArityMismatch {
        what: &'static str,
        expected: u32,
        found: u32,
    },

    /// A structural rule of the stream or the tree was violated.
    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BytecodeError {
    /// Shorthand for [`BytecodeError::Invariant`] with a formatted detail.
    pub(crate) fn invariant(detail: impl Into<String>) -> Self {
        BytecodeError::Invariant(detail.into())
    }
}
