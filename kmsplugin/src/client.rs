//! The host side of the plugin protocol.

use kmsplugin_core::{
    encoding::{pack_public_key_options, pack_sign_options, pack_verify_options},
    format::{
        CreateKeyArgs, DefaultAlgorithmArgs, MethodArgs, MethodName, PublicKeyArgs,
        SignMessageArgs, SupportedAlgorithmsArgs, VerifySignatureArgs,
    },
    options::{
        context_from_options, with_context, with_crypto_signer_opts, with_digest,
        PublicKeyOption, SignOption, VerifyOption,
    },
    Context, CryptoSigner, ErrorCallback, HashFunc, InitOptions, PluginResp, PublicKey,
    SignerVerifier,
};
use std::fmt;
use std::io::{self, Read};

use crate::error::Error;
use crate::invoke::{invoke, process_cmd, MakeCmd};

fn missing_result(method: MethodName) -> Error {
    Error::ResponseParse(serde::de::Error::custom(format!(
        "response has no {} result",
        method
    )))
}

fn read_input(input: &mut dyn Read) -> Result<Vec<u8>, Error> {
    let mut buf = vec![];
    input.read_to_end(&mut buf).map_err(Error::ReadInput)?;
    Ok(buf)
}

/// A [`SignerVerifier`] that forwards every operation to a plugin program.
///
/// Each call runs the program once. The client holds no mutable state and can be
/// shared between threads.
pub struct PluginClient {
    executable: String,
    init_options: InitOptions,
    make_cmd: MakeCmd,
}

impl fmt::Debug for PluginClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginClient")
            .field("executable", &self.executable)
            .field("init_options", &self.init_options)
            .finish()
    }
}

impl PluginClient {
    /// Creates a client for the plugin program `executable`, which is looked up on
    /// `PATH` when run.
    pub fn new(executable: impl Into<String>, init_options: InitOptions) -> Self {
        Self::with_make_cmd(executable, init_options, Box::new(process_cmd))
    }

    pub(crate) fn with_make_cmd(
        executable: impl Into<String>,
        init_options: InitOptions,
        make_cmd: MakeCmd,
    ) -> Self {
        PluginClient {
            executable: executable.into(),
            init_options,
            make_cmd,
        }
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    pub fn init_options(&self) -> &InitOptions {
        &self.init_options
    }

    fn invoke_plugin(
        &self,
        ctx: &Context,
        stdin: Vec<u8>,
        method_args: MethodArgs,
    ) -> Result<PluginResp, Error> {
        invoke(
            &self.make_cmd,
            &self.executable,
            ctx,
            stdin,
            &self.init_options,
            method_args,
        )
    }
}

impl SignerVerifier for PluginClient {
    type Error = Error;

    fn default_algorithm(&self) -> Result<String, Error> {
        let resp = self.invoke_plugin(
            &Context::background(),
            vec![],
            MethodArgs::DefaultAlgorithm(DefaultAlgorithmArgs {}),
        )?;
        resp.default_algorithm
            .map(|r| r.default_algorithm)
            .ok_or_else(|| missing_result(MethodName::DefaultAlgorithm))
    }

    fn supported_algorithms(&self) -> Result<Vec<String>, Error> {
        let resp = self.invoke_plugin(
            &Context::background(),
            vec![],
            MethodArgs::SupportedAlgorithms(SupportedAlgorithmsArgs {}),
        )?;
        resp.supported_algorithms
            .map(|r| r.supported_algorithms)
            .ok_or_else(|| missing_result(MethodName::SupportedAlgorithms))
    }

    fn create_key(&self, ctx: &Context, algorithm: &str) -> Result<PublicKey, Error> {
        let resp = self.invoke_plugin(
            ctx,
            vec![],
            MethodArgs::CreateKey(CreateKeyArgs {
                ctx_deadline: ctx.deadline(),
                algorithm: algorithm.to_owned(),
            }),
        )?;
        let r = resp
            .create_key
            .ok_or_else(|| missing_result(MethodName::CreateKey))?;
        Ok(PublicKey::from_pem(&r.public_key_pem)?)
    }

    fn public_key(&self, opts: &[PublicKeyOption]) -> Result<PublicKey, Error> {
        let resp = self.invoke_plugin(
            &context_from_options(opts),
            vec![],
            MethodArgs::PublicKey(PublicKeyArgs {
                public_key_options: pack_public_key_options(opts),
            }),
        )?;
        let r = resp
            .public_key
            .ok_or_else(|| missing_result(MethodName::PublicKey))?;
        Ok(PublicKey::from_pem(&r.public_key_pem)?)
    }

    fn sign_message(&self, message: &mut dyn Read, opts: &[SignOption]) -> Result<Vec<u8>, Error> {
        let message = read_input(message)?;
        let resp = self.invoke_plugin(
            &context_from_options(opts),
            message,
            MethodArgs::SignMessage(SignMessageArgs {
                sign_options: pack_sign_options(opts),
            }),
        )?;
        resp.sign_message
            .map(|r| r.signature)
            .ok_or_else(|| missing_result(MethodName::SignMessage))
    }

    fn verify_signature(
        &self,
        signature: &mut dyn Read,
        message: &mut dyn Read,
        opts: &[VerifyOption],
    ) -> Result<(), Error> {
        let signature = read_input(signature)?;
        let message = read_input(message)?;
        let resp = self.invoke_plugin(
            &context_from_options(opts),
            message,
            MethodArgs::VerifySignature(VerifySignatureArgs {
                signature,
                verify_options: pack_verify_options(opts),
            }),
        )?;
        resp.verify_signature
            .map(|_| ())
            .ok_or_else(|| missing_result(MethodName::VerifySignature))
    }

    /// Returns a signer that runs the plugin for each operation.
    ///
    /// Nothing is run until the signer is used.
    fn crypto_signer<'a>(
        &'a self,
        ctx: &Context,
        err_fn: ErrorCallback<'a, Error>,
    ) -> Result<(Box<dyn CryptoSigner<Error = Error> + 'a>, HashFunc), Error> {
        ctx.check()?;
        let signer = PluginCryptoSigner {
            client: self,
            ctx: ctx.clone(),
            err_fn,
        };
        Ok((Box::new(signer), self.init_options.hash_func))
    }
}

/// [`CryptoSigner`] adapter over a [`PluginClient`].
struct PluginCryptoSigner<'a> {
    client: &'a PluginClient,
    ctx: Context,
    err_fn: ErrorCallback<'a, Error>,
}

impl<'a> CryptoSigner for PluginCryptoSigner<'a> {
    type Error = Error;

    fn public(&self) -> Option<PublicKey> {
        let opts: [PublicKeyOption; 1] = [with_context(self.ctx.clone())];
        match self.client.public_key(&opts) {
            Ok(key) => Some(key),
            Err(e) => {
                (self.err_fn)(&e);
                None
            }
        }
    }

    fn sign(&self, digest: &[u8], hash: HashFunc) -> Result<Vec<u8>, Error> {
        let opts: Vec<SignOption> = vec![
            with_context(self.ctx.clone()),
            with_digest(digest),
            with_crypto_signer_opts(hash),
        ];
        self.client.sign_message(&mut io::empty(), &opts)
    }
}
