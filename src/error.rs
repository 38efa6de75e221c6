use std::num::ParseIntError;

use thiserror::Error;

use crate::{domain::AgentAddress, negotiation::state::PhaseKind};

pub type TenderResult<T> = Result<T, TenderError>;

#[derive(Debug, Error)]
pub enum TenderError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    System(#[from] SystemError),
}

/// Errors in the startup configuration. These are the only process-fatal errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No target resource specified")]
    MissingResource,

    #[error("Invalid tick period: {0}")]
    InvalidPeriod(String),

    #[error("Invalid configuration value for '{key}': {msg}")]
    InvalidValue { key: String, msg: String },
}

/// Errors raised by the directory service. Recoverable: the scheduler skips the tick.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Directory service unavailable: {0}")]
    Unavailable(String),

    #[error("Directory lookup for '{service}' failed: {msg}")]
    Lookup { service: String, msg: String },
}

/// Errors scoped to a single negotiation round. They never leave the round task.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("Malformed price '{payload}' from {sender}")]
    MalformedPrice {
        sender: AgentAddress,
        payload: String,
        #[source]
        source: ParseIntError,
    },

    #[error("Invalid transition from {from}: {msg}")]
    InvalidTransition { from: PhaseKind, msg: String },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Unknown receiver: {0}")]
    UnknownReceiver(AgentAddress),

    #[error("Message from {0} has no receivers")]
    NoReceivers(AgentAddress),
}

/// Errors related to task supervision and serialization.
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("Task failed to join: {0}")]
    Join(String),

    #[error("Serialization failed")]
    Json(#[from] serde_json::Error),
}

impl From<tokio::task::JoinError> for TenderError {
    fn from(value: tokio::task::JoinError) -> Self {
        SystemError::Join(value.to_string()).into()
    }
}
