//! Error types.

use kmsplugin_core::{ContextError, KeyError};
use std::io;
use thiserror::Error;

/// How running a plugin process went wrong, before its output is looked at.
#[derive(Debug, Error)]
pub enum CmdError {
    /// The process exited with this status. Termination by a signal is reported as -1.
    #[error("plugin exited with status {0}")]
    Exit(i32),
    /// The caller's context was done while the process was running.
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("{0}")]
    Io(#[from] io::Error),
}

/// Errors returned by [`PluginClient`](crate::PluginClient) operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The plugin could not be run to a trustworthy completion.
    #[error("error executing plugin program: {0}")]
    ExecutingPlugin(#[source] CmdError),
    /// The plugin's output was empty or not a valid response.
    #[error("parsing plugin response: {0}")]
    ResponseParse(#[source] serde_json::Error),
    /// The plugin ran and reported an error.
    #[error("plugin returned error: {0}")]
    PluginReturned(String),
    /// The caller's context was cancelled or its deadline passed.
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("encoding plugin arguments: {0}")]
    EncodeArgs(#[source] serde_json::Error),
    #[error("reading input: {0}")]
    ReadInput(#[source] io::Error),
    #[error("plugin returned an invalid public key: {0}")]
    InvalidPublicKey(#[from] KeyError),
    #[error("invalid key resource ID {0:?} (expected PLUGIN://KEY)")]
    InvalidKeyResourceId(String),
    #[error("plugin program {executable} not found: {source}")]
    PluginNotFound {
        executable: String,
        source: which::Error,
    },
}
