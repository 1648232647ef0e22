//! Wire encoding of model artifacts.
//!
//! See the [artifact module] documentation since this is a private module anyways.
//!
//! [artifact module]: crate::artifact

use thiserror::Error;

use super::{Architecture, Shape, Tensor};
use crate::crypto::{decrypt, encrypt, CipherError};

#[derive(Error, Debug, PartialEq, Eq)]
/// An error related to the encoding or decoding of an artifact payload.
pub enum CodecError {
    #[error("malformed weights payload: {0}")]
    Malformed(String),
    #[error("architecture is not valid UTF-8")]
    Utf8,
    #[error("expected {expected} tensors, got {actual}")]
    TensorCount { expected: usize, actual: usize },
    #[error("tensor {tensor}: expected {expected} values, got {actual}")]
    ShapeMismatch {
        tensor: usize,
        expected: usize,
        actual: usize,
    },
}

/// Encodes weight tensors as a JSON list of flat lists of floats.
///
/// Tensors are written in order and their values are flattened in row-major order. Shapes are
/// not embedded: the receiving side knows them from its own copy of the architecture.
///
/// # Errors
/// Fails if a value is not finite, since JSON has no representation for it.
pub fn encode_weights(tensors: &[Tensor]) -> Result<Vec<u8>, CodecError> {
    for (i, tensor) in tensors.iter().enumerate() {
        check_finite(i, tensor.values())?;
    }
    let lists: Vec<&[f32]> = tensors.iter().map(Tensor::values).collect();
    serde_json::to_vec(&lists).map_err(|e| CodecError::Malformed(e.to_string()))
}

/// Decodes a JSON list of flat lists of floats into tensors of the given shapes.
///
/// The payload must carry exactly one list per shape. Some peers only assign the trainable
/// weights of their model and ignore any extra or missing list; here a differing count is an
/// error.
///
/// # Errors
/// Fails if the payload is not a JSON list of lists of numbers, if a value does not fit in a
/// finite `f32`, if the number of tensors differs from the number of shapes, or if a tensor does
/// not have the number of elements its shape requires.
pub fn decode_weights(payload: &[u8], shapes: &[Shape]) -> Result<Vec<Tensor>, CodecError> {
    let lists: Vec<Vec<f32>> =
        serde_json::from_slice(payload).map_err(|e| CodecError::Malformed(e.to_string()))?;
    if lists.len() != shapes.len() {
        return Err(CodecError::TensorCount {
            expected: shapes.len(),
            actual: lists.len(),
        });
    }
    lists
        .into_iter()
        .zip(shapes)
        .enumerate()
        .map(|(tensor, (values, shape))| {
            if values.len() != shape.num_elements() {
                return Err(CodecError::ShapeMismatch {
                    tensor,
                    expected: shape.num_elements(),
                    actual: values.len(),
                });
            }
            check_finite(tensor, &values)?;
            Ok(Tensor {
                shape: shape.clone(),
                values,
            })
        })
        .collect()
}

/// JSON has no representation for non-finite values, and numbers beyond the `f32` range parse
/// as infinities.
fn check_finite(tensor: usize, values: &[f32]) -> Result<(), CodecError> {
    if values.iter().all(|value| value.is_finite()) {
        Ok(())
    } else {
        Err(CodecError::Malformed(format!(
            "tensor {} contains a non-finite value",
            tensor
        )))
    }
}

/// Encodes an architecture. The engine representation is passed through unchanged.
pub fn encode_architecture(architecture: &Architecture) -> Vec<u8> {
    architecture.as_str().as_bytes().to_vec()
}

/// Decodes an architecture.
///
/// # Errors
/// Fails if the payload is not valid UTF-8.
pub fn decode_architecture(payload: Vec<u8>) -> Result<Architecture, CodecError> {
    String::from_utf8(payload)
        .map(Architecture::from)
        .map_err(|_| CodecError::Utf8)
}

/// Encrypts a payload under `key` for storage. The stored bytes are the base64 ciphertext.
///
/// # Errors
/// Fails if the key length is invalid.
pub fn wrap(payload: &[u8], key: &[u8]) -> Result<Vec<u8>, CipherError> {
    encrypt(payload, key).map(String::into_bytes)
}

/// Decrypts a stored blob under `key`.
///
/// # Errors
/// Fails if the blob is not base64 text, if the decryption fails or if the key length is
/// invalid.
pub fn unwrap(stored: &[u8], key: &[u8]) -> Result<Vec<u8>, CipherError> {
    let text = std::str::from_utf8(stored).map_err(|_| CipherError::Decode)?;
    decrypt(text, key)
}
