//! Signing and verification through external plugin programs.
//!
//! A key resource ID such as `mykms://projects/p/keys/k` names both the plugin and the
//! key. [`load_signer_verifier`] locates the program `sigstore-kms-mykms` on `PATH`
//! and returns a [`PluginClient`], which implements
//! [`SignerVerifier`](kmsplugin_core::SignerVerifier) by running that program once
//! per operation.
//!
//! ```no_run
//! use kmsplugin::load_signer_verifier;
//! use kmsplugin_core::{options::SignOption, HashFunc, SignerVerifier};
//!
//! # fn main() -> Result<(), kmsplugin::Error> {
//! let client = load_signer_verifier("memory://my-key", HashFunc::Sha256)?;
//! let opts: Vec<SignOption> = vec![];
//! let signature = client.sign_message(&mut &b"hello"[..], &opts)?;
//! # Ok(())
//! # }
//! ```
//!
//! Plugin programs are built with the `kmsplugin-handler` crate.

use kmsplugin_core::{HashFunc, InitOptions};
use log::debug;

mod client;
mod error;
mod invoke;

pub use client::PluginClient;
pub use error::{CmdError, Error};

/// Prefix of every plugin program name.
pub const PLUGIN_PREFIX: &str = "sigstore-kms-";

/// Separates the plugin name from the key reference in a key resource ID.
const KEY_RESOURCE_ID_SEPARATOR: &str = "://";

/// Returns the name of the program serving `key_resource_id`.
fn plugin_executable(key_resource_id: &str) -> Result<String, Error> {
    match key_resource_id.split_once(KEY_RESOURCE_ID_SEPARATOR) {
        Some((name, _)) if !name.is_empty() => Ok(format!("{}{}", PLUGIN_PREFIX, name)),
        _ => Err(Error::InvalidKeyResourceId(key_resource_id.to_owned())),
    }
}

/// Returns a client for the plugin named in `key_resource_id`.
///
/// The plugin program must be on `PATH`. It receives the whole key resource ID, and
/// `hash_func` as the hash for [`crypto_signer`](kmsplugin_core::SignerVerifier::crypto_signer)
/// digests.
pub fn load_signer_verifier(
    key_resource_id: &str,
    hash_func: HashFunc,
) -> Result<PluginClient, Error> {
    let executable = plugin_executable(key_resource_id)?;
    let path = which::which(&executable).map_err(|source| Error::PluginNotFound {
        executable: executable.clone(),
        source,
    })?;
    debug!("using plugin {}", path.display());

    Ok(PluginClient::new(
        executable,
        InitOptions::new(key_resource_id, hash_func),
    ))
}
