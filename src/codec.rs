//! Translating [`Value`]s to and from cache bytes.
//!
//! A [`CodecRegistry`] holds an ordered list of codecs. Encoding dispatches
//! to the first codec whose `accepts` predicate passes; decoding tries the
//! default binary codec first and then the alternates in registration order.
//! Each codec also names the key namespace its payloads are stored under, so
//! opaque blobs land beside, not inside, ordinary values.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Namespace;
use crate::value::Value;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("no registered codec accepts the value")]
    Unsupported,
    #[error("error serializing value")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("error deserializing value")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("malformed {0} payload")]
    Malformed(&'static str),
}

/// A single value encoding.
///
/// `accepts` governs encode-side dispatch only; on decode every codec gets a
/// chance at the bytes and signals a mismatch by returning an error.
pub trait ValueCodec {
    fn name(&self) -> &'static str;

    /// Key namespace this codec's payloads are stored under.
    fn namespace(&self) -> Namespace;

    fn accepts(&self, value: &Value) -> bool;

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError>;
}

/// Default codec: MessagePack over the [`Value`] enum.
///
/// Handles every shape except [`Value::Opaque`].
pub struct BinaryCodec;

impl ValueCodec for BinaryCodec {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn namespace(&self) -> Namespace {
        Namespace::Obj
    }

    fn accepts(&self, value: &Value) -> bool {
        value.is_plain()
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        Ok(rmp_serde::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Framing for [`BlobCodec`] payloads. The magic keeps the default decoder
/// from ever mistaking a blob for a MessagePack value.
const BLOB_MAGIC: &[u8] = b"QCHB\x01";

/// Alternate codec for [`Value::Opaque`] payloads.
///
/// The stored form is the magic prefix, the format tag, then the raw bytes
/// untouched, under the `model:` key namespace.
pub struct BlobCodec;

#[derive(Serialize, Deserialize)]
struct BlobFrame {
    format: String,
    bytes: Vec<u8>,
}

impl ValueCodec for BlobCodec {
    fn name(&self) -> &'static str {
        "blob"
    }

    fn namespace(&self) -> Namespace {
        Namespace::Model
    }

    fn accepts(&self, value: &Value) -> bool {
        matches!(value, Value::Opaque { .. })
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        let Value::Opaque { format, bytes } = value else {
            return Err(CodecError::Unsupported);
        };
        let frame = rmp_serde::to_vec(&BlobFrame {
            format: format.clone(),
            bytes: bytes.clone(),
        })?;
        let mut out = Vec::with_capacity(BLOB_MAGIC.len() + frame.len());
        out.extend_from_slice(BLOB_MAGIC);
        out.extend_from_slice(&frame);
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        let frame = bytes
            .strip_prefix(BLOB_MAGIC)
            .ok_or(CodecError::Malformed("blob"))?;
        let frame: BlobFrame = rmp_serde::from_slice(frame)?;
        Ok(Value::Opaque {
            format: frame.format,
            bytes: frame.bytes,
        })
    }
}

/// Ordered codec collection; index 0 is the default.
pub struct CodecRegistry {
    codecs: Vec<Box<dyn ValueCodec + Send + Sync>>,
}

impl CodecRegistry {
    /// The standard registry: [`BinaryCodec`] as default, [`BlobCodec`] as
    /// the alternate.
    #[must_use]
    pub fn standard() -> Self {
        CodecRegistry {
            codecs: vec![Box::new(BinaryCodec), Box::new(BlobCodec)],
        }
    }

    pub fn register(&mut self, codec: Box<dyn ValueCodec + Send + Sync>) {
        self.codecs.push(codec);
    }

    /// Encode with the first accepting codec.
    pub fn encode(&self, value: &Value) -> Result<(Namespace, Vec<u8>), CodecError> {
        for codec in &self.codecs {
            if codec.accepts(value) {
                return Ok((codec.namespace(), codec.encode(value)?));
            }
        }
        Err(CodecError::Unsupported)
    }

    /// Decode with the default codec, falling back through the alternates.
    ///
    /// When every codec rejects the bytes, the default codec's error is the
    /// one reported.
    pub fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        let mut first_err = None;
        for codec in &self.codecs {
            match codec.decode(bytes) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        Err(first_err.unwrap_or(CodecError::Unsupported))
    }
}
