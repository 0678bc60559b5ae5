//! Core types shared by kmsplugin hosts and plugin programs.
//!
//! A plugin program implements a [`SignerVerifier`] backend outside of the host
//! process. Hosts invoke it once per operation, passing the request as command-line
//! arguments and message bytes on standard input, and read a single response from
//! standard output. This crate defines that request/response [`format`], the
//! functional [`options`] accepted by each operation, and the [`encoding`] between
//! the two.

pub mod context;
pub mod encoding;
pub mod format;
pub mod keys;
pub mod options;
mod signer;

pub use context::{CancelFunc, Context, ContextError};
pub use format::{HashFunc, InitOptions, PluginArgs, PluginResp, PROTOCOL_VERSION};
pub use keys::{KeyError, PublicKey};
pub use signer::{CryptoSigner, ErrorCallback, SignerVerifier};
