//! Error types for a3s-eventstore

use thiserror::Error;

/// Error produced by a subscriber or background job
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur in the event store
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The stream's last position did not match the writer's expectation
    #[error(
        "Wrong expected version for stream '{stream}': expected last position {}, actual {}",
        describe_position(.expected),
        describe_position(.actual)
    )]
    WrongExpectedEventVersion {
        stream: String,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    /// The expected version cannot be used with this stream
    #[error("Invalid expected version: {0}")]
    InvalidExpectedVersion(String),

    /// An event id is already stored (or already linked into the stream)
    #[error("Event '{event_id}' is already present in stream '{stream}'")]
    EventDuplicatedInStream { event_id: String, stream: String },

    /// Event not found
    #[error("Event not found: {0}")]
    EventNotFound(String),

    /// Stream name missing or otherwise unusable
    #[error("Incorrect stream data: {0}")]
    IncorrectStreamData(String),

    /// Pagination cursor is malformed
    #[error("Invalid page start: {0}")]
    InvalidPageStart(String),

    /// Pagination count is not positive
    #[error("Invalid page size: {0}")]
    InvalidPageSize(usize),

    /// Subscriber rejected by the configured dispatcher
    #[error("Invalid handler: {0}")]
    InvalidHandler(String),

    /// No subscription registered under the given id
    #[error("Subscriber does not exist: {0}")]
    SubscriberNotExist(String),

    /// A subscriber failed while handling an event
    #[error("Subscriber '{subscriber}' failed on event '{event_id}': {source}")]
    Handler {
        subscriber: String,
        event_id: String,
        #[source]
        source: HandlerError,
    },

    /// Hand-off to a scheduler failed
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

fn describe_position(position: &Option<u64>) -> String {
    match position {
        Some(p) => p.to_string(),
        None => "none".to_string(),
    }
}

/// Result type alias for event store operations
pub type Result<T> = std::result::Result<T, EventStoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrong_expected_version_display() {
        let err = EventStoreError::WrongExpectedEventVersion {
            stream: "orders-1".to_string(),
            expected: None,
            actual: Some(0),
        };
        assert_eq!(
            err.to_string(),
            "Wrong expected version for stream 'orders-1': expected last position none, actual 0"
        );
    }

    #[test]
    fn test_handler_error_keeps_source() {
        let err = EventStoreError::Handler {
            subscriber: "audit".to_string(),
            event_id: "e1".to_string(),
            source: "boom".into(),
        };
        assert!(err.to_string().contains("boom"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_serialization_from_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = EventStoreError::from(json_err);
        assert!(matches!(err, EventStoreError::Serialization(_)));
    }

    const _: () = {
        #[allow(dead_code)]
        fn assert_send_sync<T: Send + Sync>() {}

        #[allow(dead_code)]
        fn check() {
            assert_send_sync::<EventStoreError>();
        }
    };
}
