//! Closed failure taxonomy for every call to the analysis service.
//!
//! The gateway classifies each outcome exactly once; everything downstream
//! branches on [`GatewayError`] and never looks at raw status codes.

use thiserror::Error;

/// Status code the gateway reports for requests that never got a response.
pub const TRANSPORT_STATUS_SENTINEL: u16 = 0;

/// Status code carried by every freeze rejection.
pub const FREEZE_STATUS: u16 = 503;

/// One of the four ways a request can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The service is in its protective frozen state.
    #[error("system frozen: {reason}")]
    GovernanceFreeze { reason: String, actions: String },

    /// The service answered with a non-success status.
    #[error("request rejected with status {status_code}: {message}")]
    RemoteRejected { message: String, status_code: u16 },

    /// No response was obtained (DNS, connect, timeout, reset).
    #[error("analysis service unreachable: {message}")]
    TransportUnavailable { message: String },

    /// A success response whose body did not match the expected shape.
    #[error("malformed response: {message}")]
    MalformedResponse { message: String },
}

/// Coarse kind of a [`GatewayError`], for callers that only need to branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Freeze,
    Rejected,
    Offline,
    Malformed,
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::GovernanceFreeze { .. } => ErrorKind::Freeze,
            GatewayError::RemoteRejected { .. } => ErrorKind::Rejected,
            GatewayError::TransportUnavailable { .. } => ErrorKind::Offline,
            GatewayError::MalformedResponse { .. } => ErrorKind::Malformed,
        }
    }

    /// Status code associated with the failure.
    ///
    /// Freeze is always 503 and transport failures use the `0` sentinel.
    /// Malformed bodies arrive on success responses and carry none.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            GatewayError::GovernanceFreeze { .. } => Some(FREEZE_STATUS),
            GatewayError::RemoteRejected { status_code, .. } => Some(*status_code),
            GatewayError::TransportUnavailable { .. } => Some(TRANSPORT_STATUS_SENTINEL),
            GatewayError::MalformedResponse { .. } => None,
        }
    }

    pub fn is_freeze(&self) -> bool {
        matches!(self, GatewayError::GovernanceFreeze { .. })
    }

    /// Whether retrying the same request later can plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::TransportUnavailable { .. } => true,
            GatewayError::RemoteRejected { status_code, .. } => {
                *status_code >= 500 || *status_code == 408 || *status_code == 429
            }
            GatewayError::GovernanceFreeze { .. }
            | GatewayError::MalformedResponse { .. } => false,
        }
    }

    /// User-facing message; see [`describe`].
    pub fn describe(&self) -> String {
        describe(self)
    }
}

/// Renders any failure as a non-empty, user-facing sentence.
///
/// A freeze message always contains the server's `reason` and `actions`
/// verbatim.
pub fn describe(error: &GatewayError) -> String {
    match error {
        GatewayError::GovernanceFreeze { reason, actions } => format!(
            "Scanning is paused because the analysis service is frozen. \
             Reason: {reason}. Recommended action: {actions}"
        ),
        GatewayError::RemoteRejected {
            message,
            status_code,
        } => {
            if message.trim().is_empty() {
                format!("The analysis service rejected the request (HTTP {status_code}).")
            } else {
                format!("{message} (HTTP {status_code})")
            }
        }
        GatewayError::TransportUnavailable { message } => {
            if message.trim().is_empty() {
                "The analysis service is offline.".to_string()
            } else {
                format!("The analysis service is offline: {message}")
            }
        }
        GatewayError::MalformedResponse { message } => {
            if message.trim().is_empty() {
                "The analysis service returned an unreadable response.".to_string()
            } else {
                format!("The analysis service returned an unreadable response: {message}")
            }
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freeze_message_keeps_reason_and_actions_verbatim() {
        let error = GatewayError::GovernanceFreeze {
            reason: "False positive rate exceeded 5%".into(),
            actions: "Contact administrator or use Emergency Unfreeze if authorized".into(),
        };
        let message = describe(&error);
        assert!(message.contains("False positive rate exceeded 5%"));
        assert!(message.contains("Contact administrator or use Emergency Unfreeze if authorized"));
        assert_eq!(error.status_code(), Some(503));
    }

    #[test]
    fn every_kind_has_a_non_empty_message() {
        let errors = [
            GatewayError::GovernanceFreeze {
                reason: String::new(),
                actions: String::new(),
            },
            GatewayError::RemoteRejected {
                message: String::new(),
                status_code: 404,
            },
            GatewayError::TransportUnavailable {
                message: String::new(),
            },
            GatewayError::MalformedResponse {
                message: "  ".into(),
            },
        ];
        for error in &errors {
            assert!(!describe(error).trim().is_empty(), "{error:?}");
        }
    }

    #[test]
    fn transport_uses_zero_sentinel() {
        let error = GatewayError::TransportUnavailable {
            message: "connection refused".into(),
        };
        assert_eq!(error.status_code(), Some(0));
        assert_eq!(error.kind(), ErrorKind::Offline);
        assert!(error.is_retryable());
    }

    #[test]
    fn rejected_message_includes_status() {
        let error = GatewayError::RemoteRejected {
            message: "URL is required".into(),
            status_code: 400,
        };
        assert_eq!(describe(&error), "URL is required (HTTP 400)");
        assert!(!error.is_retryable());
    }
}
