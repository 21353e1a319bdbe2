//! Error types for the protocol interpreter.
//!
//! Each stage of the interpreter has its own `thiserror` enum so callers can
//! tell a local, recoverable field failure apart from a refused command or an
//! invalid request. `UpsError` consolidates them for code that only needs to
//! propagate with `?`.
//!
//! ## Error Hierarchy
//!
//! - **`ProtocolError`**: a response did not match its descriptor. Local to a
//!   single field; the poll cycle logs it and carries on.
//! - **`CommandError`**: outcome of an instant command that did not succeed.
//!   Surfaced to the caller, never retried here.
//! - **`ValidationError`**: a setvar or command argument was refused before
//!   anything was sent.
//! - **`TransportError`**: reported by a [`Transport`](crate::protocol::Transport)
//!   implementation. Timeouts fail one exchange; a disconnect ends the cycle.
//! - **`TableError`**: a profile or descriptor violates the table invariants.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type UpsResult<T> = std::result::Result<T, UpsError>;

/// A response could not be decoded against its descriptor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Response was shorter than the descriptor's expected length, or longer
    /// with non-terminator trailing bytes.
    #[error("expected {expected} bytes, got {actual}")]
    LengthMismatch {
        /// Expected total response length.
        expected: usize,
        /// Length actually received.
        actual: usize,
    },

    /// First byte was not the descriptor's marker.
    #[error("expected marker {expected:?}, got {actual:?}")]
    MarkerMismatch {
        /// Marker the descriptor declares.
        expected: char,
        /// First byte received, if any.
        actual: Option<char>,
    },

    /// The extracted field could not be interpreted.
    #[error("malformed field {field:?}: {reason}")]
    Malformed {
        /// Extracted bytes, lossily decoded.
        field: String,
        /// What went wrong.
        reason: String,
    },
}

/// An instant command did not complete successfully.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Device answered with the NAK literal.
    #[error("command {command:?} rejected by device")]
    Rejected {
        /// Rendered command that was refused.
        command: String,
    },

    /// No reply, a timeout, or a reply matching neither ACK nor NAK.
    #[error("no usable reply to {command:?}: {detail}")]
    NoResponse {
        /// Rendered command that was sent.
        command: String,
        /// Description of what came back, if anything.
        detail: String,
    },
}

/// A request was refused before anything reached the device.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Requested value lies outside the declared range.
    #[error("{name}: value {value} out of range [{min}..{max}]")]
    OutOfRange {
        /// Variable or command name.
        name: String,
        /// Requested value.
        value: f64,
        /// Inclusive lower bound.
        min: f64,
        /// Inclusive upper bound.
        max: f64,
    },

    /// Arguments do not fit the command template.
    #[error("{name}: {reason}")]
    InvalidArgument {
        /// Command name.
        name: String,
        /// What did not fit.
        reason: String,
    },

    /// No settable variable or command with this name.
    #[error("unknown variable or command '{0}'")]
    UnknownVariable(String),

    /// The variable exists but is not writable.
    #[error("variable '{0}' is read-only")]
    ReadOnly(String),
}

/// Failures reported by a transport implementation.
#[derive(Error, Debug)]
pub enum TransportError {
    /// No complete reply within the exchange timeout.
    #[error("timed out waiting for reply")]
    Timeout,

    /// The link is gone; nothing further can be exchanged this cycle.
    #[error("transport disconnected")]
    Disconnected,

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A descriptor table or profile is unusable.
#[derive(Error, Debug)]
pub enum TableError {
    /// A descriptor breaks one of the table invariants.
    #[error("descriptor #{index} '{name}': {reason}")]
    InvalidDescriptor {
        /// Position in the table.
        index: usize,
        /// Descriptor name.
        name: String,
        /// Violated invariant.
        reason: String,
    },

    /// A format string or command template could not be parsed.
    #[error("invalid format {format:?}: {reason}")]
    InvalidFormat {
        /// Offending format text.
        format: String,
        /// Why it was refused.
        reason: String,
    },

    /// The profile document could not be parsed.
    #[error("failed to parse profile: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Primary error type for the crate.
#[derive(Error, Debug)]
pub enum UpsError {
    /// Response decoding failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Instant command failed.
    #[error("command error: {0}")]
    Command(#[from] CommandError),

    /// Request refused before dispatch.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Transport could not complete the exchange.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Descriptor table or profile problem.
    #[error("table error: {0}")]
    Table(#[from] TableError),

    /// Settings could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Settings loaded but failed validation.
    #[error("configuration validation error: {0}")]
    Configuration(String),
}

impl From<figment::Error> for UpsError {
    fn from(err: figment::Error) -> Self {
        UpsError::Config(Box::new(err))
    }
}
