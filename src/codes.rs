//! Reserved and implementation-defined JSON-RPC error codes.
//!
//! The JSON-RPC 2.0 spec reserves `-32768` to `-32000` for the protocol
//! itself. Within that range, `-32000` to `-32099` are left to the
//! implementation; this crate uses a handful of them for cancellation,
//! deadlines, and generic system failure so that a client can distinguish
//! "your call failed" from "the plumbing failed."

/// Invalid JSON was received by the server.
pub const PARSE_ERROR: i32 = -32700;

/// The JSON sent is not a valid Request object.
pub const INVALID_REQUEST: i32 = -32600;

/// The method does not exist or is not available.
pub const METHOD_NOT_FOUND: i32 = -32601;

/// Invalid method parameter(s).
pub const INVALID_PARAMS: i32 = -32602;

/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i32 = -32603;

/// Sentinel meaning "no error" -- never placed on the wire, used
/// internally to represent the absence of an error code.
pub const NO_ERROR: i32 = -32099;

/// A handler failed for a reason that isn't a protocol violation and
/// isn't otherwise classified (panics, unexpected internal state).
pub const SYSTEM_ERROR: i32 = -32098;

/// The request's context was cancelled (via `rpc.cancel` or caller-side
/// cancellation) before it produced a result.
pub const CANCELLED: i32 = -32097;

/// The request's context deadline elapsed before it produced a result.
pub const DEADLINE_EXCEEDED: i32 = -32096;

/// Lower bound (inclusive) of the reserved server-error range.
pub const SERVER_ERROR_LOWER: i32 = -32099;

/// Upper bound (inclusive) of the reserved server-error range.
pub const SERVER_ERROR_UPPER: i32 = -32000;

/// Returns `true` if `code` falls in the JSON-RPC reserved range
/// (`-32768..=-32000`), meaning application code must not reuse it for a
/// custom handler-level error.
pub fn is_reserved(code: i32) -> bool {
    (-32768..=-32000).contains(&code)
}

/// Returns a short, human-readable name for one of this crate's own
/// sentinel codes, or `None` for anything else (including the four
/// standard JSON-RPC codes, which callers format themselves).
pub fn sentinel_name(code: i32) -> Option<&'static str> {
    match code {
        NO_ERROR => Some("NoError"),
        SYSTEM_ERROR => Some("SystemError"),
        CANCELLED => Some("Cancelled"),
        DEADLINE_EXCEEDED => Some("DeadlineExceeded"),
        _ => None,
    }
}

/// An error that already knows the wire code it should be reported as,
/// rather than being folded into a generic [`SYSTEM_ERROR`].
///
/// [`crate::message::Error`] (the wire error object itself) and
/// [`crate::error::JrpcError`] (this crate's internal error type) both
/// implement this, so the dispatcher and client can classify a handler's
/// or a transport's failure into a response code with one call instead of
/// re-deriving the mapping at every call site.
pub trait CodeCarrier {
    /// The wire error code this error should be reported as.
    fn error_code(&self) -> i32;
}

impl CodeCarrier for crate::message::Error {
    fn error_code(&self) -> i32 {
        self.code
    }
}

impl CodeCarrier for crate::error::JrpcError {
    fn error_code(&self) -> i32 {
        match self {
            crate::error::JrpcError::Remote { code, .. } => *code,
            crate::error::JrpcError::Cancelled => CANCELLED,
            crate::error::JrpcError::DeadlineExceeded => DEADLINE_EXCEEDED,
            _ => SYSTEM_ERROR,
        }
    }
}

/// Classifies an optional error into a wire code: absence maps to
/// [`NO_ERROR`]; a present [`CodeCarrier`] passes its own code through
/// unchanged (this is how context cancellation and deadline errors, which
/// carry [`CANCELLED`]/[`DEADLINE_EXCEEDED`] via their `CodeCarrier` impl,
/// end up correctly classified rather than flattened to
/// [`SYSTEM_ERROR`]).
pub fn error_code<E: CodeCarrier>(err: Option<&E>) -> i32 {
    match err {
        None => NO_ERROR,
        Some(e) => e.error_code(),
    }
}

/// Returns `true` if `code` is exactly `sentinel`. A thin, named
/// predicate so call sites read as `codes::is(code, codes::CANCELLED)`
/// rather than a bare `==`.
pub fn is(code: i32, sentinel: i32) -> bool {
    code == sentinel
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_codes_are_reserved() {
        assert!(is_reserved(PARSE_ERROR));
        assert!(is_reserved(INVALID_REQUEST));
        assert!(is_reserved(METHOD_NOT_FOUND));
        assert!(is_reserved(INVALID_PARAMS));
        assert!(is_reserved(INTERNAL_ERROR));
    }

    #[test]
    fn test_sentinel_codes_are_reserved_and_in_server_range() {
        for code in [NO_ERROR, SYSTEM_ERROR, CANCELLED, DEADLINE_EXCEEDED] {
            assert!(is_reserved(code));
            assert!((SERVER_ERROR_LOWER..=SERVER_ERROR_UPPER).contains(&code));
        }
    }

    #[test]
    fn test_application_code_not_reserved() {
        assert!(!is_reserved(1));
        assert!(!is_reserved(-1));
        assert!(!is_reserved(-31999));
    }

    #[test]
    fn test_sentinel_name() {
        assert_eq!(sentinel_name(CANCELLED), Some("Cancelled"));
        assert_eq!(sentinel_name(DEADLINE_EXCEEDED), Some("DeadlineExceeded"));
        assert_eq!(sentinel_name(METHOD_NOT_FOUND), None);
    }

    #[test]
    fn test_error_code_of_none_is_no_error() {
        assert_eq!(error_code::<crate::message::Error>(None), NO_ERROR);
    }

    #[test]
    fn test_error_code_passes_through_wire_error_code() {
        let e = crate::message::Error::invalid_params("bad");
        assert_eq!(error_code(Some(&e)), INVALID_PARAMS);
    }

    #[test]
    fn test_error_code_of_jrpc_cancelled_and_deadline() {
        assert_eq!(error_code(Some(&crate::error::JrpcError::Cancelled)), CANCELLED);
        assert_eq!(
            error_code(Some(&crate::error::JrpcError::DeadlineExceeded)),
            DEADLINE_EXCEEDED
        );
    }

    #[test]
    fn test_error_code_of_jrpc_remote_passes_through() {
        let e = crate::error::JrpcError::Remote {
            code: -1,
            message: "custom".into(),
            data: None,
        };
        assert_eq!(error_code(Some(&e)), -1);
    }

    #[test]
    fn test_error_code_of_jrpc_other_is_system_error() {
        assert_eq!(error_code(Some(&crate::error::JrpcError::Closed)), SYSTEM_ERROR);
    }

    #[test]
    fn test_is_predicate() {
        assert!(is(CANCELLED, CANCELLED));
        assert!(!is(CANCELLED, DEADLINE_EXCEEDED));
    }
}
