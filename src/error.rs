//! Crate-wide error type and the wire error codes.
//!
//! Errors cross the wire as stable `i32` codes in the reply header, so the
//! client can tell "the broker said no" apart from "the request never
//! reached the broker" (`Transport`).

use thiserror::Error;

/// Result type for dsv operations.
pub type Result<T> = std::result::Result<T, DsvError>;

/// Wire codes for [`DsvError`] kinds. `0` is reserved for success.
pub mod code {
    pub const OK: i32 = 0;
    pub const INVALID: i32 = 1;
    pub const NOT_FOUND: i32 = 2;
    pub const ALREADY_EXISTS: i32 = 3;
    pub const IO: i32 = 4;
    pub const TRANSPORT: i32 = 5;
    pub const INTERNAL: i32 = 6;
}

/// Errors that can occur during dsv operations.
#[derive(Debug, Error)]
pub enum DsvError {
    /// Malformed frame, type mismatch, out-of-range index, or an
    /// unsupported type string.
    #[error("invalid: {0}")]
    Invalid(String),

    /// Name or handle lookup missed, or fuzzy iteration is exhausted.
    #[error("not found: {0}")]
    NotFound(String),

    /// Create against an existing full name.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Save/restore file error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Send/recv failed at the wire.
    #[error("transport error: {0}")]
    Transport(#[from] zmq::Error),

    /// Allocation or invariant failure on the broker side.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DsvError {
    /// The `i32` carried in a reply frame for this error.
    pub fn code(&self) -> i32 {
        match self {
            DsvError::Invalid(_) => code::INVALID,
            DsvError::NotFound(_) => code::NOT_FOUND,
            DsvError::AlreadyExists(_) => code::ALREADY_EXISTS,
            DsvError::Io(_) => code::IO,
            DsvError::Transport(_) => code::TRANSPORT,
            DsvError::Internal(_) => code::INTERNAL,
        }
    }

    /// Rebuild an error from a reply code. Unknown codes map to `Internal`
    /// so a newer broker cannot crash an older client.
    pub fn from_code(result: i32, context: &str) -> DsvError {
        match result {
            code::INVALID => DsvError::Invalid(context.to_string()),
            code::NOT_FOUND => DsvError::NotFound(context.to_string()),
            code::ALREADY_EXISTS => DsvError::AlreadyExists(context.to_string()),
            code::IO => DsvError::Io(std::io::Error::other(context.to_string())),
            code::TRANSPORT => DsvError::Transport(zmq::Error::EPROTO),
            other => DsvError::Internal(format!("{context} (code {other})")),
        }
    }

    /// Returns true if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DsvError::NotFound(_))
    }

    /// Returns true if the request never made it to (or back from) the
    /// broker, as opposed to the broker rejecting it.
    pub fn is_transport(&self) -> bool {
        matches!(self, DsvError::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        let errors = [
            DsvError::Invalid("x".into()),
            DsvError::NotFound("x".into()),
            DsvError::AlreadyExists("x".into()),
            DsvError::Internal("x".into()),
        ];
        for err in errors {
            let rebuilt = DsvError::from_code(err.code(), "x");
            assert_eq!(rebuilt.code(), err.code());
        }
    }

    #[test]
    fn unknown_code_maps_to_internal() {
        let err = DsvError::from_code(99, "mystery");
        assert_eq!(err.code(), code::INTERNAL);
    }

    #[test]
    fn transport_predicate() {
        assert!(DsvError::Transport(zmq::Error::EAGAIN).is_transport());
        assert!(!DsvError::NotFound("n".into()).is_transport());
    }
}
