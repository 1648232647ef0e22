//! Events emitted by the contract.
//!
//! Event logs arrive as loosely typed records (an event name and a map of arguments). They are
//! decoded into a [`LedgerEvent`] once, at the log boundary, so that the rest of the crate only
//! ever matches on typed fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::{Address, Iteration, ProjectId};

/// Name of the event emitted when the aggregator published a new global model.
pub const GLOBAL_MODEL_UPDATED: &str = "GlobalModelUpdated";

/// Name of the event emitted when the aggregator delivers a session key to a participant.
pub const ENCRYPTED_KEY: &str = "EncryptedKey";

/// An event emitted by the contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerEvent {
    /// A new global model is available for the project.
    GlobalModelUpdated {
        manager_address: Address,
        project_id: ProjectId,
        iteration: Iteration,
    },
    /// A session key for the project, encrypted under the shared secret of the aggregator and
    /// `client_address`.
    EncryptedKey {
        client_address: Address,
        project_id: ProjectId,
        iteration: Iteration,
        encrypted_key: String,
    },
}

impl LedgerEvent {
    pub fn iteration(&self) -> Iteration {
        match self {
            LedgerEvent::GlobalModelUpdated { iteration, .. }
            | LedgerEvent::EncryptedKey { iteration, .. } => *iteration,
        }
    }

    /// Whether this event announces a global model update for `project`.
    pub fn is_global_update_for(&self, project: ProjectId) -> bool {
        matches!(self, LedgerEvent::GlobalModelUpdated { project_id, .. } if *project_id == project)
    }

    /// The encrypted session key, if this event delivers one for `project` to `client`.
    pub fn encrypted_key_for(&self, project: ProjectId, client: &Address) -> Option<&str> {
        match self {
            LedgerEvent::EncryptedKey {
                project_id,
                client_address,
                encrypted_key,
                ..
            } if *project_id == project && client_address == client => Some(encrypted_key),
            _ => None,
        }
    }

    /// Decodes a raw event log.
    ///
    /// # Errors
    /// Fails if the event is unknown, or if an argument is missing or has the wrong type.
    pub fn decode(raw: &RawEvent) -> Result<Self, EventDecodeError> {
        let args = &raw.args;
        match raw.name.as_str() {
            GLOBAL_MODEL_UPDATED => Ok(LedgerEvent::GlobalModelUpdated {
                manager_address: address_arg(args, "managerAddress")?,
                project_id: uint_arg(args, "projectId")?,
                iteration: uint_arg(args, "iteration")?,
            }),
            ENCRYPTED_KEY => Ok(LedgerEvent::EncryptedKey {
                client_address: address_arg(args, "clientAddress")?,
                project_id: uint_arg(args, "projectId")?,
                iteration: uint_arg(args, "iteration")?,
                encrypted_key: string_arg(args, "encryptedKey")?.to_string(),
            }),
            other => Err(EventDecodeError::UnknownEvent(other.to_string())),
        }
    }
}

impl std::convert::TryFrom<&RawEvent> for LedgerEvent {
    type Error = EventDecodeError;

    fn try_from(raw: &RawEvent) -> Result<Self, Self::Error> {
        Self::decode(raw)
    }
}

/// An undecoded event log, as delivered by a JSON-RPC event filter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "event")]
    pub name: String,
    pub args: Map<String, Value>,
}

#[derive(Error, Debug, PartialEq, Eq)]
/// An error related to the decoding of a raw event log.
pub enum EventDecodeError {
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    #[error("missing event argument: {0}")]
    MissingField(&'static str),
    #[error("invalid event argument: {0}")]
    InvalidField(&'static str),
}

fn arg<'a>(
    args: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a Value, EventDecodeError> {
    args.get(field).ok_or(EventDecodeError::MissingField(field))
}

fn string_arg<'a>(
    args: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, EventDecodeError> {
    arg(args, field)?
        .as_str()
        .ok_or(EventDecodeError::InvalidField(field))
}

fn address_arg(
    args: &Map<String, Value>,
    field: &'static str,
) -> Result<Address, EventDecodeError> {
    string_arg(args, field)?
        .parse()
        .map_err(|_| EventDecodeError::InvalidField(field))
}

/// Integers are accepted as JSON numbers, decimal strings or `0x` prefixed hex strings, since
/// RPC providers disagree on how to encode `uint256` values.
fn uint_arg(args: &Map<String, Value>, field: &'static str) -> Result<u64, EventDecodeError> {
    let invalid = || EventDecodeError::InvalidField(field);
    match arg(args, field)? {
        Value::Number(n) => n.as_u64().ok_or_else(invalid),
        Value::String(s) => match s.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16).map_err(|_| invalid()),
            None => s.parse().map_err(|_| invalid()),
        },
        _ => Err(invalid()),
    }
}
