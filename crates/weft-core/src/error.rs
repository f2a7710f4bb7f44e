//! Unified error type for all weft operations.

/// Result type for all weft operations.
///
/// This is a convenience type alias that defaults to using [`Error`] as the error type.
/// Most functions in this workspace return this type for consistent error handling.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Classifies an [`ErrorKind`] into the broad failure group it belongs to.
///
/// Categories are used for metrics labels and propagation decisions: queue
/// and lifecycle errors surface to callers, execution errors are recorded
/// but contained at the worker boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    Lifecycle,
    FlowControl,
    Queue,
    Payload,
    Execution,
    Resource,
    Sync,
    Io,
    Unknown,
}

/// Fine-grained error kinds used across the fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Unclassified failure
    Unknown,
    /// Operation was cooperatively cancelled
    Cancelled,
    /// Operation exceeded its deadline
    Timeout,
    /// Caller supplied an invalid argument
    InvalidArgument,
    /// Requested behavior is not implemented
    NotImplemented,
    /// Queue is at capacity
    QueueFull,
    /// Queue has no items
    QueueEmpty,
    /// Queue is stopping and no longer accepts or yields work
    QueueStopped,
    /// Job is malformed or missing required state
    JobInvalid,
    /// Job body returned a failure or panicked
    JobExecutionFailed,
    /// No worker or resource is available to serve the request
    ResourceExhausted,
    /// Component is already running
    AlreadyRunning,
    /// Component has not been started
    NotRunning,
    /// Component failed to start
    StartFailure,
    /// A mutex was poisoned or could not be acquired
    MutexError,
    /// A deadlock was detected or would occur
    Deadlock,
    /// Condition-variable wait failed
    ConditionVariable,
    /// Allocation failed
    AllocationFailed,
    /// A configured limit was reached
    LimitReached,
    /// Filesystem or stream failure
    IoError,
    /// Network-level failure
    NetworkError,
    /// Encoding or decoding failed
    SerializationError,
    /// Message violates a container invariant
    InvalidMessage,
}

impl ErrorKind {
    /// Returns the broad failure group this kind belongs to.
    pub fn category(self) -> ErrorCategory {
        match self {
            Self::AlreadyRunning | Self::NotRunning | Self::StartFailure => {
                ErrorCategory::Lifecycle
            }
            Self::Cancelled | Self::Timeout => ErrorCategory::FlowControl,
            Self::QueueFull | Self::QueueEmpty | Self::QueueStopped => ErrorCategory::Queue,
            Self::SerializationError | Self::InvalidMessage | Self::InvalidArgument => {
                ErrorCategory::Payload
            }
            Self::JobInvalid | Self::JobExecutionFailed => ErrorCategory::Execution,
            Self::ResourceExhausted | Self::AllocationFailed | Self::LimitReached => {
                ErrorCategory::Resource
            }
            Self::MutexError | Self::Deadlock | Self::ConditionVariable => ErrorCategory::Sync,
            Self::IoError | Self::NetworkError => ErrorCategory::Io,
            Self::Unknown | Self::NotImplemented => ErrorCategory::Unknown,
        }
    }
}

/// Error type carried by every fallible weft operation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    /// Create an error with an explicit kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable message of this error.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The broad failure group for metrics and propagation decisions.
    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Whether this error represents cooperative cancellation.
    ///
    /// Cancellation is a normal shutdown event from the bus's perspective
    /// and is not treated as a failure by pool metrics.
    pub fn is_cancellation(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    /// Whether this error indicates a temporary condition that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Timeout | ErrorKind::QueueFull | ErrorKind::ResourceExhausted
        )
    }

    /// Create a cancellation error.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Create an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Create a queue-full error.
    pub fn queue_full(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QueueFull, message)
    }

    /// Create a queue-empty error.
    pub fn queue_empty(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QueueEmpty, message)
    }

    /// Create a queue-stopped error.
    pub fn queue_stopped(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QueueStopped, message)
    }

    /// Create a job-execution error.
    pub fn job_execution_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::JobExecutionFailed, message)
    }

    /// Create a resource-exhausted error.
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceExhausted, message)
    }

    /// Create an already-running error.
    pub fn already_running(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyRunning, message)
    }

    /// Create a not-running error.
    pub fn not_running(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotRunning, message)
    }

    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SerializationError, message)
    }

    /// Create an invalid-message error.
    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidMessage, message)
    }

    /// Create a mutex error.
    pub fn mutex(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MutexError, message)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::mutex(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::queue_stopped("queue 'io' is stopping");
        assert_eq!(err.to_string(), "queue_stopped: queue 'io' is stopping");
        assert_eq!(err.kind(), ErrorKind::QueueStopped);
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            Error::already_running("pool").category(),
            ErrorCategory::Lifecycle
        );
        assert_eq!(
            Error::cancelled("job").category(),
            ErrorCategory::FlowControl
        );
        assert_eq!(
            Error::invalid_message("missing topic").category(),
            ErrorCategory::Payload
        );
        assert_eq!(Error::mutex("poisoned").category(), ErrorCategory::Sync);
    }

    #[test]
    fn test_cancellation_is_not_retryable() {
        let err = Error::cancelled("shutting down");
        assert!(err.is_cancellation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(Error::queue_full("at capacity").is_retryable());
        assert!(Error::resource_exhausted("no workers").is_retryable());
        assert!(!Error::invalid_argument("bad pattern").is_retryable());
    }

    #[test]
    fn test_serde_json_conversion() {
        let parse_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: Error = parse_err.into();
        assert_eq!(err.kind(), ErrorKind::SerializationError);
    }
}
