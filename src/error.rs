//! Error taxonomy. Tagged values, never exceptions, crossing component
//! boundaries — every fallible public operation returns one of these.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("network unreachable: {0}")]
    Network(String),

    #[error("p2p group formation refused or busy: {0}")]
    P2p(String),

    #[error("missing OS permission: {0}")]
    Permission(String),

    #[error("durable storage failure: {0}")]
    Storage(String),

    #[error("packet serialization failed: {0}")]
    Serialization(String),

    #[error("structural validation failed: {reason}")]
    Validation { reason: String },

    #[error("deadline exceeded after {0:?}")]
    Timeout(std::time::Duration),

    #[error("location unavailable: {0}")]
    Location(String),

    #[error("no viable relay candidate")]
    Routing,

    #[error("packet {id} processing error: {reason}")]
    Packet { id: String, reason: String },

    #[error("cloud upload rejected: {0}")]
    Server(String),
}

impl From<crate::packet::DecodeError> for EngineError {
    fn from(e: crate::packet::DecodeError) -> Self {
        match e {
            crate::packet::DecodeError::Malformed(reason) => EngineError::Validation { reason },
            crate::packet::DecodeError::Oversized(n) => {
                EngineError::Serialization(format!("packet of {n} bytes exceeds wire limit"))
            }
        }
    }
}

impl From<sled::Error> for EngineError {
    fn from(e: sled::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
