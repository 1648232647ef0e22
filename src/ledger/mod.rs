//! Types exchanged with the federated learning smart contract.
//!
//! The contract itself is an external collaborator: it is only reached through a
//! [`LedgerClient`](crate::LedgerClient) implementation, and observed through an
//! [`EventLog`](crate::EventLog).

pub mod events;

use std::{fmt, str::FromStr};

use derive_more::{Display, From};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub use self::events::{EventDecodeError, LedgerEvent, RawEvent};
use crate::store::ContentHash;

/// Identifier of a federated learning project on the contract.
pub type ProjectId = u64;

/// Index of a training round within a project.
pub type Iteration = u64;

/// An amount in wei.
pub type Wei = u128;

/// Number of wei in one ether.
pub const WEI_PER_ETHER: Wei = 1_000_000_000_000_000_000;

/// Number of wei in one gwei.
pub const WEI_PER_GWEI: Wei = 1_000_000_000;

/// Length in bytes of an account address.
const ADDRESS_LENGTH: usize = 20;

#[derive(Copy, Clone, PartialEq, Eq, Hash)]
/// A 20 bytes ledger account address.
///
/// Addresses are parsed from hex, with or without the `0x` prefix, regardless of the case. Two
/// addresses are equal if their bytes are equal, so a checksummed and a lowercase
/// representation of the same account compare equal.
pub struct Address([u8; ADDRESS_LENGTH]);

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid address: {0}")]
pub struct InvalidAddress(String);

impl Address {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for Address {
    type Err = InvalidAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let mut bytes = [0_u8; ADDRESS_LENGTH];
        hex::decode_to_slice(stripped, &mut bytes).map_err(|_| InvalidAddress(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl From<[u8; ADDRESS_LENGTH]> for Address {
    fn from(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Display, From, Serialize, Deserialize)]
/// Hash of a submitted transaction.
pub struct TxHash(String);

/// A state changing call to the contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContractCall {
    /// `join(projectId, pubkeyHex)`. Payable: the first join of a participant carries a fee.
    Join {
        project_id: ProjectId,
        public_key: String,
    },
    /// `local_upload(projectId, contentHash)`. References a locally trained model.
    LocalUpload {
        project_id: ProjectId,
        content_hash: ContentHash,
    },
}

/// Parameters of a transaction to sign and submit.
///
/// The nonce is left to the [`LedgerClient`](crate::LedgerClient), which owns the signing key.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TransactionParams {
    pub chain_id: u64,
    pub gas: u64,
    /// Gas price in wei.
    pub gas_price: Wei,
    /// Value transferred with the call, in wei.
    pub value: Option<Wei>,
}

/// Receipt of a mined transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: TxHash,
    /// `false` if the transaction was reverted.
    pub status: bool,
    pub block_number: Option<u64>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
/// An error returned by a [`LedgerClient`](crate::LedgerClient) or an
/// [`EventLog`](crate::EventLog).
pub enum LedgerError {
    #[error("ledger is unreachable: {0}")]
    Connection(String),
    #[error("transaction rejected: {0}")]
    TransactionRejected(String),
    #[error("unexpected response from the ledger: {0}")]
    InvalidResponse(String),
}
