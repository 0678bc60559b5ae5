//! Library for building kmsplugin signer plugins.
//!
//! A plugin is an executable named `sigstore-kms-NAME` that exposes a
//! [`SignerVerifier`] backend to hosts that cannot link it directly. Hosts select it
//! through key resource IDs of the form `NAME://KEY_REF`.
//!
//! # Protocol
//!
//! Every operation is a separate invocation of the plugin program:
//!
//! - `argv[1]` is the protocol version ([`PROTOCOL_VERSION`]). Plugins reject any
//!   other version without parsing the rest of the request.
//! - `argv[2]` is the JSON-encoded request, holding the host's [`InitOptions`] and the
//!   requested method with its arguments.
//! - Standard input carries the message for `signMessage` and `verifySignature`, and
//!   is empty otherwise.
//! - Standard output carries exactly one JSON-encoded response. Logging goes to
//!   standard error.
//!
//! A response holds either the method's result or an `errorMessage`. Failures of the
//! backend are reported through `errorMessage` rather than the exit status; hosts
//! accept any non-signal exit as long as the response parses.
//!
//! ## Example interaction
//!
//! ```text
//! H --> P | sigstore-kms-memory v1 '{"methodName":"signMessage",
//!         |   "signMessage":{"signOptions":{"rpcOptions":{"keyVersion":"1"},
//!         |   "messageOptions":{}}},"initOptions":{"protocolVersion":"v1",
//!         |   "keyResourceID":"memory://key","hashFunc":5}}'
//!         | stdin: MESSAGE
//!         |
//! H <-- P | {"signMessage":{"signature":"Base64(SIGNATURE)"}}
//! ```
//!
//! ## Deadlines
//!
//! A host's deadline cannot cross the process boundary as a live object. It is sent as
//! data in the request, and the plugin rebuilds a [`Context`](kmsplugin_core::Context)
//! bound to the same deadline before calling the backend.
//!
//! # Usage
//!
//! ```ignore
//! fn main() -> Result<(), kmsplugin_handler::Error> {
//!     env_logger::init();
//!     kmsplugin_handler::run_plugin(|init| MyBackend::open(&init.key_resource_id))
//! }
//! ```

use kmsplugin_core::{InitOptions, SignerVerifier};
use log::error;
use std::fmt;
use std::io::{self, Read, Write};
use thiserror::Error;

mod args;
mod dispatch;

pub use args::{parse_args, ArgsError};
pub use dispatch::{dispatch, write_error_response, write_response};
pub use kmsplugin_core::{PluginArgs, PROTOCOL_VERSION};

/// Reasons a plugin invocation could not be served.
///
/// Backend errors are not included; those are reported to the host in the response.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Args(#[from] ArgsError),
    #[error("failed to initialize plugin: {0}")]
    Init(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Serves one request read from `argv` and `stdin`, writing the response to `output`.
///
/// `new_signer` builds the backend from the host's [`InitOptions`]. If the arguments
/// are invalid or the backend cannot be built, an error response is still written so
/// the host can report it.
pub fn serve<S, E, F, R, W>(
    argv: &[String],
    stdin: R,
    output: &mut W,
    new_signer: F,
) -> Result<(), Error>
where
    S: SignerVerifier,
    E: fmt::Display,
    F: FnOnce(&InitOptions) -> Result<S, E>,
    R: Read,
    W: Write,
{
    let args = match parse_args(argv) {
        Ok(args) => args,
        Err(e) => {
            error!("{}", e);
            write_error_response(output, &e)?;
            return Err(e.into());
        }
    };

    let signer = match new_signer(&args.init_options) {
        Ok(signer) => signer,
        Err(e) => {
            let e = Error::Init(e.to_string());
            error!("{}", e);
            write_error_response(output, &e)?;
            return Err(e);
        }
    };

    dispatch(output, stdin, &args, &signer)?;
    Ok(())
}

/// Runs the plugin program for the current process.
///
/// This should be called from the plugin's `main` with a constructor for its backend.
pub fn run_plugin<S, E, F>(new_signer: F) -> Result<(), Error>
where
    S: SignerVerifier,
    E: fmt::Display,
    F: FnOnce(&InitOptions) -> Result<S, E>,
{
    let argv: Vec<String> = std::env::args().collect();
    let stdin = io::stdin();
    let stdout = io::stdout();
    serve(&argv, stdin.lock(), &mut stdout.lock(), new_signer)
}
