//! Model artifacts exchanged through the content-addressed store.
//!
//! Two kinds of artifacts travel between the aggregator and the participants:
//!
//! - the **architecture**: an opaque, engine specific description of the model. It is fetched once,
//!   when the participant joins a project for the first time.
//! - the **weights**: the ordered list of weight tensors of the model. The global weights are
//!   fetched every round and the locally trained weights are uploaded every round.
//!
//! Artifacts are always encrypted before they are written to the store (see [`wrap`] and
//! [`unwrap`]), since the store is public.
//!
//! # Examples
//! ```
//! # use fedledger_client::artifact::{decode_weights, encode_weights, Shape, Tensor};
//! let tensor = Tensor::new(Shape::from(vec![2, 1]), vec![0.5, 1.5]).unwrap();
//! let payload = encode_weights(&[tensor.clone()]).unwrap();
//! assert_eq!(payload, b"[[0.5,1.5]]".to_vec());
//! assert_eq!(decode_weights(&payload, &[Shape::from(vec![2, 1])]).unwrap(), vec![tensor]);
//! ```

pub(crate) mod codec;

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

pub use self::codec::{
    decode_architecture,
    decode_weights,
    encode_architecture,
    encode_weights,
    unwrap,
    wrap,
    CodecError,
};
use crate::{crypto::CipherError, store::ContentHash};

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, From, Serialize, Deserialize)]
/// The ordered dimensions of a tensor.
pub struct Shape(Vec<usize>);

impl Shape {
    pub fn dims(&self) -> &[usize] {
        self.0.as_slice()
    }

    /// The number of elements of a tensor of this shape. The empty shape describes a scalar.
    pub fn num_elements(&self) -> usize {
        self.0.iter().product()
    }
}

#[derive(Clone, Debug, PartialEq)]
/// A dense tensor of `f32` values, stored in row-major order.
pub struct Tensor {
    shape: Shape,
    values: Vec<f32>,
}

impl Tensor {
    /// Creates a tensor, or `None` if the number of values does not match the shape.
    pub fn new(shape: Shape, values: Vec<f32>) -> Option<Self> {
        if shape.num_elements() == values.len() {
            Some(Self { shape, values })
        } else {
            None
        }
    }

    /// Creates a tensor filled with zeros.
    pub fn zeros(shape: Shape) -> Self {
        let values = vec![0.0; shape.num_elements()];
        Self { shape, values }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn values(&self) -> &[f32] {
        self.values.as_slice()
    }

    pub fn values_mut(&mut self) -> &mut [f32] {
        self.values.as_mut_slice()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Display, From, Serialize, Deserialize)]
/// An engine specific description of a model, e.g. a Keras JSON model config.
pub struct Architecture(String);

impl Architecture {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
/// The kind of an [`Artifact`].
pub enum ArtifactKind {
    #[display(fmt = "architecture")]
    Architecture,
    #[display(fmt = "weights")]
    Weights,
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// An encrypted artifact, as it is written to or read from the store.
pub struct Artifact {
    pub kind: ArtifactKind,
    /// The stored bytes: the base64 encoded ciphertext.
    pub payload: Vec<u8>,
    /// The address of the artifact in the store, once it is known.
    pub content_hash: Option<ContentHash>,
}

impl Artifact {
    /// Encrypts a plaintext payload under `key`. The artifact has no content hash until it is
    /// written to the store.
    pub fn seal(kind: ArtifactKind, payload: &[u8], key: &[u8]) -> Result<Self, CipherError> {
        Ok(Self {
            kind,
            payload: wrap(payload, key)?,
            content_hash: None,
        })
    }

    /// Wraps the bytes that were read from the store under `content_hash`.
    pub fn fetched(kind: ArtifactKind, content_hash: ContentHash, payload: Vec<u8>) -> Self {
        Self {
            kind,
            payload,
            content_hash: Some(content_hash),
        }
    }

    /// Decrypts the payload under `key`.
    pub fn open(&self, key: &[u8]) -> Result<Vec<u8>, CipherError> {
        unwrap(&self.payload, key)
    }
}
