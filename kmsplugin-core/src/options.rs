//! Functional options accepted by [`SignerVerifier`](crate::SignerVerifier) methods.
//!
//! Options are applied in order, so when two options set the same thing the later one
//! wins:
//!
//! ```
//! use kmsplugin_core::options::{with_key_version, with_remote_verification, SignOption};
//!
//! let opts: Vec<SignOption> = vec![
//!     with_key_version("1"),
//!     with_remote_verification(true),
//!     with_key_version("2"), // overrides "1"
//! ];
//! # let _ = opts;
//! ```

use crate::{context::Context, format::HashFunc};

/// Options that apply to any remote operation.
#[derive(Clone, Debug)]
pub enum RpcOption {
    /// Context for the call. Its deadline is forwarded to the plugin.
    Context(Context),
    KeyVersion(String),
    RemoteVerification(bool),
}

/// Options that describe the message being signed or verified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageOption {
    /// A pre-computed digest of the message.
    Digest(Vec<u8>),
    /// The hash function used to compute the digest.
    HashFunc(HashFunc),
}

#[derive(Clone, Debug)]
pub enum PublicKeyOption {
    Rpc(RpcOption),
}

#[derive(Clone, Debug)]
pub enum SignOption {
    Rpc(RpcOption),
    Message(MessageOption),
}

#[derive(Clone, Debug)]
pub enum VerifyOption {
    Rpc(RpcOption),
    Message(MessageOption),
}

/// Access to the option families carried by a method's option type.
pub trait MethodOption {
    fn rpc(&self) -> Option<&RpcOption>;

    fn message(&self) -> Option<&MessageOption> {
        None
    }
}

impl MethodOption for RpcOption {
    fn rpc(&self) -> Option<&RpcOption> {
        Some(self)
    }
}

impl MethodOption for PublicKeyOption {
    fn rpc(&self) -> Option<&RpcOption> {
        match self {
            PublicKeyOption::Rpc(o) => Some(o),
        }
    }
}

impl MethodOption for SignOption {
    fn rpc(&self) -> Option<&RpcOption> {
        match self {
            SignOption::Rpc(o) => Some(o),
            SignOption::Message(_) => None,
        }
    }

    fn message(&self) -> Option<&MessageOption> {
        match self {
            SignOption::Rpc(_) => None,
            SignOption::Message(o) => Some(o),
        }
    }
}

impl MethodOption for VerifyOption {
    fn rpc(&self) -> Option<&RpcOption> {
        match self {
            VerifyOption::Rpc(o) => Some(o),
            VerifyOption::Message(_) => None,
        }
    }

    fn message(&self) -> Option<&MessageOption> {
        match self {
            VerifyOption::Rpc(_) => None,
            VerifyOption::Message(o) => Some(o),
        }
    }
}

impl From<RpcOption> for PublicKeyOption {
    fn from(o: RpcOption) -> Self {
        PublicKeyOption::Rpc(o)
    }
}

impl From<RpcOption> for SignOption {
    fn from(o: RpcOption) -> Self {
        SignOption::Rpc(o)
    }
}

impl From<MessageOption> for SignOption {
    fn from(o: MessageOption) -> Self {
        SignOption::Message(o)
    }
}

impl From<RpcOption> for VerifyOption {
    fn from(o: RpcOption) -> Self {
        VerifyOption::Rpc(o)
    }
}

impl From<MessageOption> for VerifyOption {
    fn from(o: MessageOption) -> Self {
        VerifyOption::Message(o)
    }
}

pub fn with_context<O: From<RpcOption>>(ctx: Context) -> O {
    RpcOption::Context(ctx).into()
}

pub fn with_key_version<O: From<RpcOption>>(key_version: impl Into<String>) -> O {
    RpcOption::KeyVersion(key_version.into()).into()
}

pub fn with_remote_verification<O: From<RpcOption>>(remote_verification: bool) -> O {
    RpcOption::RemoteVerification(remote_verification).into()
}

pub fn with_digest<O: From<MessageOption>>(digest: impl Into<Vec<u8>>) -> O {
    MessageOption::Digest(digest.into()).into()
}

/// Sets the hash function the message or digest was hashed with.
pub fn with_crypto_signer_opts<O: From<MessageOption>>(hash: HashFunc) -> O {
    MessageOption::HashFunc(hash).into()
}

/// Returns the context set by the last context option, or a background context.
pub fn context_from_options<O: MethodOption>(opts: &[O]) -> Context {
    opts.iter()
        .rev()
        .find_map(|o| match o.rpc() {
            Some(RpcOption::Context(ctx)) => Some(ctx.clone()),
            _ => None,
        })
        .unwrap_or_else(Context::background)
}
