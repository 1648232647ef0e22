//! Types of the content-addressed store that carries encrypted artifacts.
//!
//! Artifacts are never sent through the ledger itself: they are written to the store, and only
//! their [`ContentHash`] is referenced by contract calls and contract getters.

#[cfg(feature = "reqwest-client")]
#[cfg_attr(docsrs, doc(cfg(feature = "reqwest-client")))]
pub mod ipfs;

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "reqwest-client")]
pub use self::ipfs::IpfsStore;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Display, From, Serialize, Deserialize)]
/// The address of a blob in the content-addressed store.
pub struct ContentHash(String);

impl ContentHash {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for ContentHash {
    fn from(hash: &str) -> Self {
        Self(hash.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
/// An error returned by a [`ContentStore`](crate::ContentStore).
pub enum StoreError {
    #[error("store is unreachable: {0}")]
    Connection(String),
    #[error("no blob stored under {0}")]
    NotFound(ContentHash),
    #[error("unexpected response from the store: {0}")]
    InvalidResponse(String),
}
