//! Request and response envelopes exchanged with a plugin program.
//!
//! Every call is one process invocation. The host passes [`PROTOCOL_VERSION`] and a
//! JSON-encoded [`PluginArgs`] as arguments, and the plugin writes a single JSON-encoded
//! [`PluginResp`] to standard output.
//!
//! ```text
//! sigstore-kms-NAME v1 '{"methodName":"signMessage","signMessage":{...},"initOptions":{...}}'
//! ```
//!
//! Byte strings are encoded as standard base64, deadlines as RFC 3339 timestamps, and
//! optional fields that are not set are omitted so that they never override a default
//! chosen by the plugin.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use thiserror::Error;

/// The only protocol version spoken by this crate. Hosts and plugins must agree on it
/// exactly; there is no negotiation.
pub const PROTOCOL_VERSION: &str = "v1";

/// Errors from decoding a structurally valid but semantically invalid envelope.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("method {0} was requested without its arguments")]
    MissingPayload(MethodName),
    #[error("method {method} was requested with {count} argument payloads")]
    PayloadCount { method: MethodName, count: usize },
    #[error("unknown hash function identifier {0}")]
    UnknownHashFunc(u8),
}

/// Hash functions, identified on the wire by their numeric identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum HashFunc {
    Unspecified,
    Md4,
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Md5Sha1,
    Ripemd160,
    Sha3_224,
    Sha3_256,
    Sha3_384,
    Sha3_512,
    Sha512_224,
    Sha512_256,
    Blake2s256,
    Blake2b256,
    Blake2b384,
    Blake2b512,
}

impl Default for HashFunc {
    fn default() -> Self {
        HashFunc::Unspecified
    }
}

impl From<HashFunc> for u8 {
    fn from(hash: HashFunc) -> u8 {
        match hash {
            HashFunc::Unspecified => 0,
            HashFunc::Md4 => 1,
            HashFunc::Md5 => 2,
            HashFunc::Sha1 => 3,
            HashFunc::Sha224 => 4,
            HashFunc::Sha256 => 5,
            HashFunc::Sha384 => 6,
            HashFunc::Sha512 => 7,
            HashFunc::Md5Sha1 => 8,
            HashFunc::Ripemd160 => 9,
            HashFunc::Sha3_224 => 10,
            HashFunc::Sha3_256 => 11,
            HashFunc::Sha3_384 => 12,
            HashFunc::Sha3_512 => 13,
            HashFunc::Sha512_224 => 14,
            HashFunc::Sha512_256 => 15,
            HashFunc::Blake2s256 => 16,
            HashFunc::Blake2b256 => 17,
            HashFunc::Blake2b384 => 18,
            HashFunc::Blake2b512 => 19,
        }
    }
}

impl TryFrom<u8> for HashFunc {
    type Error = FormatError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Ok(match id {
            0 => HashFunc::Unspecified,
            1 => HashFunc::Md4,
            2 => HashFunc::Md5,
            3 => HashFunc::Sha1,
            4 => HashFunc::Sha224,
            5 => HashFunc::Sha256,
            6 => HashFunc::Sha384,
            7 => HashFunc::Sha512,
            8 => HashFunc::Md5Sha1,
            9 => HashFunc::Ripemd160,
            10 => HashFunc::Sha3_224,
            11 => HashFunc::Sha3_256,
            12 => HashFunc::Sha3_384,
            13 => HashFunc::Sha3_512,
            14 => HashFunc::Sha512_224,
            15 => HashFunc::Sha512_256,
            16 => HashFunc::Blake2s256,
            17 => HashFunc::Blake2b256,
            18 => HashFunc::Blake2b384,
            19 => HashFunc::Blake2b512,
            _ => return Err(FormatError::UnknownHashFunc(id)),
        })
    }
}

/// Per-client settings, fixed when the client is built and sent with every request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitOptions {
    pub protocol_version: String,
    #[serde(rename = "keyResourceID")]
    pub key_resource_id: String,
    pub hash_func: HashFunc,
}

impl InitOptions {
    /// Options for the current protocol version.
    pub fn new(key_resource_id: impl Into<String>, hash_func: HashFunc) -> Self {
        InitOptions {
            protocol_version: PROTOCOL_VERSION.to_owned(),
            key_resource_id: key_resource_id.into(),
            hash_func,
        }
    }
}

/// Options shared by every remote operation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctx_deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_verification: Option<bool>,
}

/// Options describing the message being signed or verified.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageOptions {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_bytes::option"
    )]
    pub digest: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_func: Option<HashFunc>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyOptions {
    #[serde(default)]
    pub rpc_options: RpcOptions,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignOptions {
    #[serde(default)]
    pub rpc_options: RpcOptions,
    #[serde(default)]
    pub message_options: MessageOptions,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOptions {
    #[serde(default)]
    pub rpc_options: RpcOptions,
    #[serde(default)]
    pub message_options: MessageOptions,
}

/// Operations a plugin can be asked to perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MethodName {
    DefaultAlgorithm,
    SupportedAlgorithms,
    CreateKey,
    PublicKey,
    SignMessage,
    VerifySignature,
}

impl MethodName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MethodName::DefaultAlgorithm => "defaultAlgorithm",
            MethodName::SupportedAlgorithms => "supportedAlgorithms",
            MethodName::CreateKey => "createKey",
            MethodName::PublicKey => "publicKey",
            MethodName::SignMessage => "signMessage",
            MethodName::VerifySignature => "verifySignature",
        }
    }
}

impl fmt::Display for MethodName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultAlgorithmArgs {}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedAlgorithmsArgs {}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKeyArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctx_deadline: Option<DateTime<Utc>>,
    pub algorithm: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyArgs {
    pub public_key_options: PublicKeyOptions,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignMessageArgs {
    pub sign_options: SignOptions,
}

/// The message itself is sent on standard input; only the signature travels in the
/// arguments.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifySignatureArgs {
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
    pub verify_options: VerifyOptions,
}

/// The requested operation and its arguments.
///
/// Encoded as `{"methodName": NAME, NAME: ARGS}`. Decoding fails unless exactly the
/// payload named by `methodName` is present.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMethodArgs", into = "RawMethodArgs")]
pub enum MethodArgs {
    DefaultAlgorithm(DefaultAlgorithmArgs),
    SupportedAlgorithms(SupportedAlgorithmsArgs),
    CreateKey(CreateKeyArgs),
    PublicKey(PublicKeyArgs),
    SignMessage(SignMessageArgs),
    VerifySignature(VerifySignatureArgs),
}

impl MethodArgs {
    pub fn method_name(&self) -> MethodName {
        match self {
            MethodArgs::DefaultAlgorithm(_) => MethodName::DefaultAlgorithm,
            MethodArgs::SupportedAlgorithms(_) => MethodName::SupportedAlgorithms,
            MethodArgs::CreateKey(_) => MethodName::CreateKey,
            MethodArgs::PublicKey(_) => MethodName::PublicKey,
            MethodArgs::SignMessage(_) => MethodName::SignMessage,
            MethodArgs::VerifySignature(_) => MethodName::VerifySignature,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMethodArgs {
    method_name: MethodName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_algorithm: Option<DefaultAlgorithmArgs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    supported_algorithms: Option<SupportedAlgorithmsArgs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    create_key: Option<CreateKeyArgs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    public_key: Option<PublicKeyArgs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sign_message: Option<SignMessageArgs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    verify_signature: Option<VerifySignatureArgs>,
}

impl RawMethodArgs {
    fn empty(method_name: MethodName) -> Self {
        RawMethodArgs {
            method_name,
            default_algorithm: None,
            supported_algorithms: None,
            create_key: None,
            public_key: None,
            sign_message: None,
            verify_signature: None,
        }
    }

    fn payload_count(&self) -> usize {
        [
            self.default_algorithm.is_some(),
            self.supported_algorithms.is_some(),
            self.create_key.is_some(),
            self.public_key.is_some(),
            self.sign_message.is_some(),
            self.verify_signature.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }
}

impl From<MethodArgs> for RawMethodArgs {
    fn from(args: MethodArgs) -> Self {
        let mut raw = RawMethodArgs::empty(args.method_name());
        match args {
            MethodArgs::DefaultAlgorithm(a) => raw.default_algorithm = Some(a),
            MethodArgs::SupportedAlgorithms(a) => raw.supported_algorithms = Some(a),
            MethodArgs::CreateKey(a) => raw.create_key = Some(a),
            MethodArgs::PublicKey(a) => raw.public_key = Some(a),
            MethodArgs::SignMessage(a) => raw.sign_message = Some(a),
            MethodArgs::VerifySignature(a) => raw.verify_signature = Some(a),
        }
        raw
    }
}

impl TryFrom<RawMethodArgs> for MethodArgs {
    type Error = FormatError;

    fn try_from(raw: RawMethodArgs) -> Result<Self, Self::Error> {
        let method = raw.method_name;
        let count = raw.payload_count();
        if count > 1 {
            return Err(FormatError::PayloadCount { method, count });
        }

        match method {
            MethodName::DefaultAlgorithm => raw.default_algorithm.map(MethodArgs::DefaultAlgorithm),
            MethodName::SupportedAlgorithms => raw
                .supported_algorithms
                .map(MethodArgs::SupportedAlgorithms),
            MethodName::CreateKey => raw.create_key.map(MethodArgs::CreateKey),
            MethodName::PublicKey => raw.public_key.map(MethodArgs::PublicKey),
            MethodName::SignMessage => raw.sign_message.map(MethodArgs::SignMessage),
            MethodName::VerifySignature => raw.verify_signature.map(MethodArgs::VerifySignature),
        }
        .ok_or(FormatError::MissingPayload(method))
    }
}

/// The full request: per-client options plus the requested operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginArgs {
    #[serde(flatten)]
    pub method_args: MethodArgs,
    pub init_options: InitOptions,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultAlgorithmResp {
    pub default_algorithm: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedAlgorithmsResp {
    pub supported_algorithms: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateKeyResp {
    #[serde(rename = "publicKeyPEM", with = "base64_bytes")]
    pub public_key_pem: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyResp {
    #[serde(rename = "publicKeyPEM", with = "base64_bytes")]
    pub public_key_pem: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignMessageResp {
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifySignatureResp {}

/// A plugin's reply.
///
/// If `error_message` is non-empty the call failed, whatever else is set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginResp {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_algorithm: Option<DefaultAlgorithmResp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_algorithms: Option<SupportedAlgorithmsResp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_key: Option<CreateKeyResp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<PublicKeyResp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign_message: Option<SignMessageResp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_signature: Option<VerifySignatureResp>,
}

impl PluginResp {
    pub fn error(message: impl Into<String>) -> Self {
        PluginResp {
            error_message: message.into(),
            ..Default::default()
        }
    }

    /// The error reported by the plugin, if any.
    pub fn reported_error(&self) -> Option<&str> {
        if self.error_message.is_empty() {
            None
        } else {
            Some(&self.error_message)
        }
    }
}

mod base64_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        base64::decode(&encoded).map_err(de::Error::custom)
    }

    pub(super) mod option {
        use serde::{Deserialize, Deserializer, Serializer};

        pub(in super::super) fn serialize<S: Serializer>(
            bytes: &Option<Vec<u8>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match bytes {
                Some(bytes) => super::serialize(bytes, s),
                None => s.serialize_none(),
            }
        }

        pub(in super::super) fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<Vec<u8>>, D::Error> {
            match Option::<String>::deserialize(d)? {
                Some(encoded) => base64::decode(&encoded)
                    .map(Some)
                    .map_err(serde::de::Error::custom),
                None => Ok(None),
            }
        }
    }
}
