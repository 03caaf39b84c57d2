// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Envelope conversion between user messages and the wire format.
//!
//! Every message crossing a connection travels as a `google.protobuf.Any`:
//! - native protobuf messages are packed into the `Any` directly
//! - every other message is serialized by its own adapter and wrapped in a
//!   [`GenericMessage`] carrier recording the format and type name that
//!   produced the bytes
//!
//! On the receiving side the recorded identity must match what the target
//! message declares, otherwise conversion fails without touching the target.

use bytes::Bytes;
use prost::Name;
use prost_types::Any;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Uniform wire wrapper carried by every connection.
pub type Envelope = Any;

/// Reserved format name for messages packed as native protobuf.
pub const PROTOBUF_FORMAT: &str = "PROTOBUF";

/// Format name used by [`JsonMessage`].
pub const JSON_FORMAT: &str = "JSON";

/// Returned by [`format_and_name`] when an envelope cannot be introspected.
pub const UNKNOWN: &str = "UNKNOWN";

/// Prefix of every type URL this crate writes, as `google.protobuf.Any`
/// expects it.
pub const TYPE_URL_PREFIX: &str = "type.googleapis.com/";

/// Canonical type URL for a fully qualified protobuf type name.
pub fn type_url(full_name: &str) -> String {
    format!("{TYPE_URL_PREFIX}{full_name}")
}

fn pack<M: prost::Message + Name>(message: &M) -> Envelope {
    Any {
        type_url: type_url(&M::full_name()),
        value: message.encode_to_vec(),
    }
}

/// Carrier for messages that are not native protobuf.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GenericMessage {
    /// Serialization format of `serial`
    #[prost(string, tag = "1")]
    pub format: String,
    /// Type name declared by the producing message
    #[prost(string, tag = "2")]
    pub name: String,
    /// Serialized message body
    #[prost(bytes = "vec", tag = "3")]
    pub serial: Vec<u8>,
}

impl Name for GenericMessage {
    const NAME: &'static str = "GenericMessage";
    const PACKAGE: &'static str = "modkit.connection";
}

/// Errors that can occur while converting to or from an envelope
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("message has no protobuf payload")]
    MissingProtobufPayload,

    #[error("format mismatch: expected {expected}, found {found}")]
    FormatMismatch { expected: String, found: String },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("protobuf encode error: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// Capability interface shared by every message that can travel through a
/// connection.
///
/// `format` and `type_name` form the identity checked on the receiving side.
/// Adapters for native protobuf report [`PROTOBUF_FORMAT`] and override the
/// `pack_protobuf` / `unpack_protobuf` pair; everything else goes through
/// `serialize` / `deserialize`.
pub trait Message: Send + 'static {
    /// Serialization format name.
    fn format(&self) -> &str;

    /// Fully qualified type name.
    fn type_name(&self) -> String;

    /// Serialize the message body.
    fn serialize(&self) -> Result<Vec<u8>, ConversionError>;

    /// Replace the message body with the decoded bytes.
    fn deserialize(&mut self, bytes: &[u8]) -> Result<(), ConversionError>;

    /// Pack the native protobuf payload.
    fn pack_protobuf(&self) -> Result<Envelope, ConversionError> {
        Err(ConversionError::MissingProtobufPayload)
    }

    /// Unpack a native protobuf payload into this message.
    fn unpack_protobuf(&mut self, _envelope: &Envelope) -> Result<(), ConversionError> {
        Err(ConversionError::MissingProtobufPayload)
    }
}

/// Adapter carrying a prost message natively.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProtobufMessage<M>(pub M);

impl<M> ProtobufMessage<M> {
    pub fn new(message: M) -> Self {
        Self(message)
    }

    pub fn get(&self) -> &M {
        &self.0
    }

    pub fn into_inner(self) -> M {
        self.0
    }
}

impl<M> Message for ProtobufMessage<M>
where
    M: prost::Message + Name + Default + 'static,
{
    fn format(&self) -> &str {
        PROTOBUF_FORMAT
    }

    fn type_name(&self) -> String {
        M::full_name()
    }

    fn serialize(&self) -> Result<Vec<u8>, ConversionError> {
        Ok(self.0.encode_to_vec())
    }

    fn deserialize(&mut self, bytes: &[u8]) -> Result<(), ConversionError> {
        self.0 = M::decode(bytes)?;
        Ok(())
    }

    fn pack_protobuf(&self) -> Result<Envelope, ConversionError> {
        Ok(pack(&self.0))
    }

    fn unpack_protobuf(&mut self, envelope: &Envelope) -> Result<(), ConversionError> {
        self.0 = M::decode(envelope.value.as_slice())?;
        Ok(())
    }
}

/// Payload types that can travel as JSON.
pub trait JsonPayload: Serialize + DeserializeOwned + Send + 'static {
    /// Type name recorded in the carrier; must be identical on both ends.
    const TYPE_NAME: &'static str;
}

/// Adapter serializing a serde type as JSON.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonMessage<T>(pub T);

impl<T> JsonMessage<T> {
    pub fn new(payload: T) -> Self {
        Self(payload)
    }

    pub fn get(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: JsonPayload> Message for JsonMessage<T> {
    fn format(&self) -> &str {
        JSON_FORMAT
    }

    fn type_name(&self) -> String {
        T::TYPE_NAME.to_string()
    }

    fn serialize(&self) -> Result<Vec<u8>, ConversionError> {
        serde_json::to_vec(&self.0).map_err(|e| ConversionError::Serialize(e.to_string()))
    }

    fn deserialize(&mut self, bytes: &[u8]) -> Result<(), ConversionError> {
        self.0 =
            serde_json::from_slice(bytes).map_err(|e| ConversionError::Deserialize(e.to_string()))?;
        Ok(())
    }
}

/// Opaque bytes with an explicit identity.
///
/// Useful for relaying messages whose concrete type is not linked into the
/// process: set the expected identity, then parse.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawMessage {
    format: String,
    type_name: String,
    payload: Bytes,
}

impl RawMessage {
    pub fn new(format: impl Into<String>, type_name: impl Into<String>, payload: Bytes) -> Self {
        Self {
            format: format.into(),
            type_name: type_name.into(),
            payload,
        }
    }

    /// An empty message that accepts envelopes with the given identity.
    pub fn expecting(format: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::new(format, type_name, Bytes::new())
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

impl Message for RawMessage {
    fn format(&self) -> &str {
        &self.format
    }

    fn type_name(&self) -> String {
        self.type_name.clone()
    }

    fn serialize(&self) -> Result<Vec<u8>, ConversionError> {
        Ok(self.payload.to_vec())
    }

    fn deserialize(&mut self, bytes: &[u8]) -> Result<(), ConversionError> {
        self.payload = Bytes::copy_from_slice(bytes);
        Ok(())
    }

    // With the protobuf format the payload is the encoded message itself.
    fn pack_protobuf(&self) -> Result<Envelope, ConversionError> {
        Ok(Any {
            type_url: type_url(&self.type_name),
            value: self.payload.to_vec(),
        })
    }

    fn unpack_protobuf(&mut self, envelope: &Envelope) -> Result<(), ConversionError> {
        self.payload = Bytes::copy_from_slice(&envelope.value);
        Ok(())
    }
}

/// Wrap a message into an envelope.
pub fn create<M: Message + ?Sized>(message: &M) -> Result<Envelope, ConversionError> {
    if message.format() == PROTOBUF_FORMAT {
        return message.pack_protobuf();
    }

    let carrier = GenericMessage {
        format: message.format().to_string(),
        name: message.type_name(),
        serial: message.serialize()?,
    };
    Ok(pack(&carrier))
}

/// Unwrap an envelope into `target`.
///
/// The target is left untouched when the recorded identity does not match.
pub fn parse<M: Message + ?Sized>(envelope: &Envelope, target: &mut M) -> Result<(), ConversionError> {
    if is_generic(envelope) {
        let carrier = <GenericMessage as prost::Message>::decode(envelope.value.as_slice())?;
        if carrier.format != target.format() {
            return Err(ConversionError::FormatMismatch {
                expected: target.format().to_string(),
                found: carrier.format,
            });
        }
        let expected = target.type_name();
        if carrier.name != expected {
            return Err(ConversionError::TypeMismatch {
                expected,
                found: carrier.name,
            });
        }
        return target.deserialize(&carrier.serial);
    }

    if target.format() != PROTOBUF_FORMAT {
        return Err(ConversionError::FormatMismatch {
            expected: target.format().to_string(),
            found: PROTOBUF_FORMAT.to_string(),
        });
    }
    let expected = target.type_name();
    let found = type_name_of(envelope);
    if found != expected {
        return Err(ConversionError::TypeMismatch {
            expected,
            found: found.to_string(),
        });
    }
    target.unpack_protobuf(envelope)
}

/// Report the `(format, type name)` recorded in an envelope.
pub fn format_and_name(envelope: &Envelope) -> (String, String) {
    if is_generic(envelope) {
        return match <GenericMessage as prost::Message>::decode(envelope.value.as_slice()) {
            Ok(carrier) => (carrier.format, carrier.name),
            Err(_) => (UNKNOWN.to_string(), UNKNOWN.to_string()),
        };
    }
    (PROTOBUF_FORMAT.to_string(), type_name_of(envelope).to_string())
}

fn is_generic(envelope: &Envelope) -> bool {
    type_name_of(envelope) == GenericMessage::full_name()
}

fn type_name_of(envelope: &Envelope) -> &str {
    match envelope.type_url.rsplit_once('/') {
        Some((_, name)) => name,
        None => &envelope.type_url,
    }
}
