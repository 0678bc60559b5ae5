//! Routing a request to a [`SignerVerifier`] and writing its response.

use kmsplugin_core::{
    encoding::{
        context_from_deadline, unpack_public_key_options, unpack_sign_options,
        unpack_verify_options,
    },
    format::{
        CreateKeyResp, DefaultAlgorithmResp, MethodArgs, PublicKeyResp, SignMessageResp,
        SupportedAlgorithmsResp, VerifySignatureResp,
    },
    PluginArgs, PluginResp, SignerVerifier,
};
use log::{debug, warn};
use std::fmt;
use std::io::{self, Read, Write};

/// Reported when an error renders as an empty string, which would otherwise read as
/// success on the host side.
const UNKNOWN_ERROR: &str = "unknown plugin error";

/// Writes `resp` to `output` as a single line of JSON, returning the bytes written.
pub fn write_response<W: Write>(output: &mut W, resp: &PluginResp) -> io::Result<usize> {
    let mut encoded = serde_json::to_vec(resp).map_err(|e| {
        io::Error::new(
            io::ErrorKind::Other,
            format!("failed to encode response: {}", e),
        )
    })?;
    encoded.push(b'\n');
    output.write_all(&encoded)?;
    output.flush()?;
    Ok(encoded.len())
}

pub fn write_error_response<W: Write, E: fmt::Display>(
    output: &mut W,
    e: &E,
) -> io::Result<usize> {
    let message = e.to_string();
    if message.is_empty() {
        write_response(output, &PluginResp::error(UNKNOWN_ERROR))
    } else {
        write_response(output, &PluginResp::error(message))
    }
}

/// Executes the request in `args` against `signer` and writes the response to `output`.
///
/// `stdin` supplies the message for `signMessage` and `verifySignature`. Errors from
/// `signer` are written as the response's error message; only failures to write the
/// response are returned.
pub fn dispatch<W, R, S>(
    output: &mut W,
    mut stdin: R,
    args: &PluginArgs,
    signer: &S,
) -> io::Result<usize>
where
    W: Write,
    R: Read,
    S: SignerVerifier,
{
    let method = args.method_args.method_name();
    debug!(
        "dispatching {} for {}",
        method, args.init_options.key_resource_id
    );

    let res = match &args.method_args {
        MethodArgs::DefaultAlgorithm(_) => {
            signer
                .default_algorithm()
                .map(|default_algorithm| PluginResp {
                    default_algorithm: Some(DefaultAlgorithmResp { default_algorithm }),
                    ..Default::default()
                })
        }
        MethodArgs::SupportedAlgorithms(_) => {
            signer
                .supported_algorithms()
                .map(|supported_algorithms| PluginResp {
                    supported_algorithms: Some(SupportedAlgorithmsResp {
                        supported_algorithms,
                    }),
                    ..Default::default()
                })
        }
        MethodArgs::CreateKey(a) => {
            let ctx = context_from_deadline(a.ctx_deadline);
            signer.create_key(&ctx, &a.algorithm).map(|key| PluginResp {
                create_key: Some(CreateKeyResp {
                    public_key_pem: key.to_pem().into_bytes(),
                }),
                ..Default::default()
            })
        }
        MethodArgs::PublicKey(a) => {
            let opts = unpack_public_key_options(&a.public_key_options);
            signer.public_key(&opts).map(|key| PluginResp {
                public_key: Some(PublicKeyResp {
                    public_key_pem: key.to_pem().into_bytes(),
                }),
                ..Default::default()
            })
        }
        MethodArgs::SignMessage(a) => {
            let opts = unpack_sign_options(&a.sign_options);
            signer
                .sign_message(&mut stdin, &opts)
                .map(|signature| PluginResp {
                    sign_message: Some(SignMessageResp { signature }),
                    ..Default::default()
                })
        }
        MethodArgs::VerifySignature(a) => {
            let opts = unpack_verify_options(&a.verify_options);
            let mut signature: &[u8] = &a.signature;
            signer
                .verify_signature(&mut signature, &mut stdin, &opts)
                .map(|()| PluginResp {
                    verify_signature: Some(VerifySignatureResp {}),
                    ..Default::default()
                })
        }
    };

    match res {
        Ok(resp) => write_response(output, &resp),
        Err(e) => {
            warn!("{} failed: {}", method, e);
            write_error_response(output, &e)
        }
    }
}
