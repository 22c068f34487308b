use uuid::Uuid;

// ============================================================================
// Relay Error Taxonomy
// ============================================================================
//
// - CaptureViolation:    event raised outside any capture scope (never fatal)
// - SerializationError:  event cannot be encoded/decoded (isolated per row)
// - PublishError:        bus rejected or could not take a message
// - StoreError:          outbox/ledger persistence failed
// - ConfigError:         host supplied an unusable RelayConfig
// - RelayError:          what the filters hand back to their callers
//
// Duplicate deliveries are NOT errors; see `ConsumeOutcome::Duplicate`.
//
// ============================================================================

/// A domain event was raised while no capture scope was active.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Domain event {event_type} raised outside of a capture scope")]
pub struct CaptureViolation {
    pub event_type: &'static str,
}

#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("Failed to encode event {event_type}: {source}")]
    Encode {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode event {event_type}: {source}")]
    Decode {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Event type tag exceeds {max} characters: {event_type}")]
    EventTypeTooLong { event_type: String, max: usize },

    #[error("Event type already registered: {0}")]
    AlreadyRegistered(String),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PublishError {
    #[error("Bus unavailable: {0}")]
    Unavailable(String),

    #[error("Bus rejected message {message_id}: {reason}")]
    Rejected { message_id: Uuid, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Outbox row not found: {0}")]
    NotFound(Uuid),

    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    /// Another transaction already recorded this (consumer_type, message_id).
    #[error("Consumed-message ledger conflict: {0}")]
    LedgerConflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    MustBePositive(&'static str),

    #[error("{field} must not exceed {max} seconds")]
    TooLarge { field: &'static str, max: u64 },

    #[error("Invalid relay configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Handler failed: {0}")]
    Handler(#[source] anyhow::Error),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RelayError {
    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Handler(_) => "handler",
            RelayError::Serialization(_) => "serialization",
            RelayError::Publish(_) => "publish",
            RelayError::Store(_) => "store",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let violation = CaptureViolation { event_type: "OrderPlaced" };
        assert!(violation.to_string().contains("OrderPlaced"));

        let err = SerializationError::UnknownEventType("Ghost".to_string());
        assert_eq!(err.to_string(), "Unknown event type: Ghost");

        let id = Uuid::new_v4();
        assert!(StoreError::NotFound(id).to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_relay_error_kind() {
        let err: RelayError = StoreError::Unavailable("down".to_string()).into();
        assert_eq!(err.kind(), "store");

        let err: RelayError = PublishError::Unavailable("down".to_string()).into();
        assert_eq!(err.kind(), "publish");

        let err = RelayError::Handler(anyhow::anyhow!("boom"));
        assert_eq!(err.kind(), "handler");
        assert!(err.to_string().contains("boom"));
    }
}
