//! The result of a correlated request.

/// How a [`send_and_await`] call ended.
///
/// Only a failure to *start* the request (no connection, write error) is
/// reported as an `Err`.  Everything that can happen after the request is on
/// the wire is a normal outcome the caller is expected to match on.
///
/// [`send_and_await`]: crate::infrastructure::connection::RobotConnection::send_and_await
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The robot replied; carries the reply payload.
    Success(Vec<u8>),
    /// The robot replied with the unsupported-command sentinel.
    Unsupported,
    /// No reply arrived within the caller's timeout.
    Timeout,
    /// The connection closed or was replaced before a reply arrived.
    ConnectionLost,
}

impl RequestOutcome {
    /// Returns the reply payload, if the request succeeded.
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            RequestOutcome::Success(payload) => Some(payload),
            _ => None,
        }
    }

    /// Consumes the outcome and returns the reply payload, if any.
    pub fn into_payload(self) -> Option<Vec<u8>> {
        match self {
            RequestOutcome::Success(payload) => Some(payload),
            _ => None,
        }
    }

    /// Returns `true` for [`RequestOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, RequestOutcome::Success(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_exposes_payload() {
        let outcome = RequestOutcome::Success(vec![1, 2, 3]);
        assert!(outcome.is_success());
        assert_eq!(outcome.payload(), Some(&[1u8, 2, 3][..]));
        assert_eq!(outcome.into_payload(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_non_success_outcomes_have_no_payload() {
        for outcome in [
            RequestOutcome::Unsupported,
            RequestOutcome::Timeout,
            RequestOutcome::ConnectionLost,
        ] {
            assert!(!outcome.is_success());
            assert!(outcome.payload().is_none());
        }
    }
}
