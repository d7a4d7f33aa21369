use crate::error::{ErrorKind, GateError};

/// Retry behavior for a classified error.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RetryDirective {
    /// The failure is transient. The message bus should redeliver the event.
    Retry,
    /// The failure is permanent. Redelivering the same input fails the same way.
    NoRetry,
}

/// Policy describing how a [`GateError`] should be handled by callers.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ErrorHandlingPolicy {
    retry_directive: RetryDirective,
    solution: Option<&'static str>,
}

impl ErrorHandlingPolicy {
    const fn new(retry_directive: RetryDirective, solution: Option<&'static str>) -> Self {
        Self {
            retry_directive,
            solution,
        }
    }

    /// Returns the retry directive for this policy.
    pub fn retry_directive(&self) -> RetryDirective {
        self.retry_directive
    }

    /// Returns an optional operator-facing solution message.
    pub fn solution(&self) -> Option<&'static str> {
        self.solution
    }

    /// Returns `true` when the failed operation may be retried.
    pub fn is_retryable(&self) -> bool {
        self.retry_directive == RetryDirective::Retry
    }
}

/// Builds the [`ErrorHandlingPolicy`] of an error from its kind.
pub fn build_error_handling_policy(error: &GateError) -> ErrorHandlingPolicy {
    match error.kind() {
        // Transient failures. Completion handling is idempotent, so redelivery is always safe.
        ErrorKind::StoreConnectionFailed
        | ErrorKind::StoreQueryFailed
        | ErrorKind::ConcurrencyConflict
        | ErrorKind::DispatchFailed
        | ErrorKind::IoError
        | ErrorKind::WorkerPanic => ErrorHandlingPolicy::new(RetryDirective::Retry, None),

        ErrorKind::MalformedEvent => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Fix the producer emitting the event; the payload will never parse."),
        ),
        ErrorKind::UnknownStage => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Declare the stage in the coordinator configuration or fix the producer."),
        ),
        ErrorKind::InvalidRequest => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Fix the stage filter or date range of the validation request."),
        ),
        ErrorKind::InvalidConfig => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Correct the coordinator configuration and restart."),
        ),

        #[cfg(feature = "failpoints")]
        ErrorKind::WithRetry => ErrorHandlingPolicy::new(RetryDirective::Retry, None),
        #[cfg(feature = "failpoints")]
        ErrorKind::WithNoRetry => {
            ErrorHandlingPolicy::new(RetryDirective::NoRetry, Some("Cannot retry this error."))
        }

        _ => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Inspect the persisted completion state of the batch before redelivering."),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(kind: ErrorKind) -> GateError {
        GateError::from((kind, "test error"))
    }

    #[test]
    fn classifies_conflict_exhaustion_as_retry() {
        let policy = build_error_handling_policy(&err(ErrorKind::ConcurrencyConflict));
        assert_eq!(policy.retry_directive(), RetryDirective::Retry);
        assert_eq!(policy.solution(), None);
    }

    #[test]
    fn classifies_malformed_event_as_no_retry() {
        let policy = build_error_handling_policy(&err(ErrorKind::MalformedEvent));
        assert!(!policy.is_retryable());
        assert!(policy.solution().is_some());
    }

    #[test]
    fn classifies_unclassified_kind_as_no_retry() {
        let policy = build_error_handling_policy(&err(ErrorKind::InvalidState));
        assert_eq!(policy.retry_directive(), RetryDirective::NoRetry);
    }
}
