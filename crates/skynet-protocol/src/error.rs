use thiserror::Error;

/// Event-codec parse failures. Every variant surfaces as a sender-only
/// `error` event; the connection is never closed because of one.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("Invalid JSON")]
    InvalidJson,
    #[error("Event must be a JSON object")]
    NotAnObject,
    #[error("Missing or invalid 'type'")]
    MissingType,
    #[error("'data' must be an object")]
    DataNotAnObject,
}
