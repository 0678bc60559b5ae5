//! A plugin whose Ed25519 keys are derived from the key resource ID.
//!
//! Useful for exercising hosts; the keys are not secret.
//!
//! ```text
//! $ cargo build --example sigstore-kms-memory
//! $ PATH=$PATH:target/debug/examples some-host --key memory://my-key
//! ```

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use gumdrop::Options;
use kmsplugin_core::{
    encoding::{pack_rpc_options, pack_message_options},
    options::{context_from_options, MethodOption, PublicKeyOption, SignOption, VerifyOption},
    Context, ContextError, CryptoSigner, ErrorCallback, HashFunc, InitOptions, PublicKey,
    SignerVerifier,
};
use kmsplugin_handler::run_plugin;
use log::debug;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read};

const PLUGIN_NAME: &str = "memory";
const ALGORITHM: &str = "ed25519";

/// DER encoding of an Ed25519 SubjectPublicKeyInfo, up to the 32 key bytes.
const ED25519_SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

#[derive(Debug)]
enum Error {
    UnsupportedAlgorithm(String),
    UnsupportedHash(HashFunc),
    InvalidResourceId(String),
    Context(ContextError),
    Io(io::Error),
    InvalidSignature,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnsupportedAlgorithm(alg) => write!(f, "Unsupported algorithm {}", alg),
            Error::UnsupportedHash(hash) => write!(f, "Unsupported hash function {:?}", hash),
            Error::InvalidResourceId(id) => write!(f, "Invalid key resource ID {}", id),
            Error::Context(e) => write!(f, "{}", e),
            Error::Io(e) => write!(f, "Failed to read input: {}", e),
            Error::InvalidSignature => write!(f, "Invalid signature"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ContextError> for Error {
    fn from(e: ContextError) -> Self {
        Error::Context(e)
    }
}

fn encode_public_key(key: &SigningKey) -> PublicKey {
    let mut der = ED25519_SPKI_PREFIX.to_vec();
    der.extend_from_slice(&key.verifying_key().to_bytes());
    PublicKey::from_der(der)
}

/// Ed25519 signs the message itself; a digest is only signed when no message is given.
fn payload<O: MethodOption>(message: &mut dyn Read, opts: &[O]) -> Result<Vec<u8>, Error> {
    let mut buf = vec![];
    message.read_to_end(&mut buf)?;
    if buf.is_empty() {
        if let Some(digest) = pack_message_options(opts).digest {
            return Ok(digest);
        }
    }
    Ok(buf)
}

#[derive(Debug)]
struct Plugin {
    key_ref: String,
    hash_func: HashFunc,
}

impl Plugin {
    fn new(init: &InitOptions) -> Result<Self, Error> {
        let prefix = format!("{}://", PLUGIN_NAME);
        if !init.key_resource_id.starts_with(&prefix) {
            return Err(Error::InvalidResourceId(init.key_resource_id.clone()));
        }
        Ok(Plugin {
            key_ref: init.key_resource_id[prefix.len()..].to_owned(),
            hash_func: init.hash_func,
        })
    }

    fn signing_key<O: MethodOption>(&self, opts: &[O]) -> Result<SigningKey, Error> {
        context_from_options(opts).check()?;
        let rpc = pack_rpc_options(opts);
        let mut hasher = Sha256::new();
        hasher.update(self.key_ref.as_bytes());
        if let Some(version) = rpc.key_version {
            debug!("using key version {}", version);
            hasher.update(b"/");
            hasher.update(version.as_bytes());
        }
        Ok(SigningKey::from_bytes(&hasher.finalize().into()))
    }
}

impl SignerVerifier for Plugin {
    type Error = Error;

    fn default_algorithm(&self) -> Result<String, Error> {
        Ok(ALGORITHM.to_owned())
    }

    fn supported_algorithms(&self) -> Result<Vec<String>, Error> {
        Ok(vec![ALGORITHM.to_owned()])
    }

    fn create_key(&self, ctx: &Context, algorithm: &str) -> Result<PublicKey, Error> {
        if algorithm != ALGORITHM {
            return Err(Error::UnsupportedAlgorithm(algorithm.to_owned()));
        }
        // Keys are derived, so "creating" one just returns it.
        let key = self.signing_key::<PublicKeyOption>(&[])?;
        ctx.check()?;
        Ok(encode_public_key(&key))
    }

    fn public_key(&self, opts: &[PublicKeyOption]) -> Result<PublicKey, Error> {
        self.signing_key(opts).map(|key| encode_public_key(&key))
    }

    fn sign_message(&self, message: &mut dyn Read, opts: &[SignOption]) -> Result<Vec<u8>, Error> {
        let key = self.signing_key(opts)?;
        let payload = payload(message, opts)?;
        Ok(key.sign(&payload).to_bytes().to_vec())
    }

    fn verify_signature(
        &self,
        signature: &mut dyn Read,
        message: &mut dyn Read,
        opts: &[VerifyOption],
    ) -> Result<(), Error> {
        let key = self.signing_key(opts)?;
        let mut sig = vec![];
        signature.read_to_end(&mut sig)?;
        let sig = Signature::from_slice(&sig).map_err(|_| Error::InvalidSignature)?;
        let payload = payload(message, opts)?;
        key.verifying_key()
            .verify(&payload, &sig)
            .map_err(|_| Error::InvalidSignature)
    }

    fn crypto_signer<'a>(
        &'a self,
        ctx: &Context,
        _: ErrorCallback<'a, Error>,
    ) -> Result<(Box<dyn CryptoSigner<Error = Error> + 'a>, HashFunc), Error> {
        ctx.check()?;
        let key = self.signing_key::<PublicKeyOption>(&[])?;
        Ok((Box::new(MemorySigner(key)), self.hash_func))
    }
}

struct MemorySigner(SigningKey);

impl CryptoSigner for MemorySigner {
    type Error = Error;

    fn public(&self) -> Option<PublicKey> {
        Some(encode_public_key(&self.0))
    }

    fn sign(&self, digest: &[u8], hash: HashFunc) -> Result<Vec<u8>, Error> {
        if hash != HashFunc::Sha512 && hash != HashFunc::Unspecified {
            return Err(Error::UnsupportedHash(hash));
        }
        Ok(self.0.sign(digest).to_bytes().to_vec())
    }
}

#[derive(Debug, Options)]
struct PluginOptions {
    #[options(help = "print help message")]
    help: bool,

    #[options(free, help = "protocol arguments, supplied by the host")]
    args: Vec<String>,
}

fn main() -> Result<(), kmsplugin_handler::Error> {
    env_logger::builder().format_timestamp(None).init();

    let opts = PluginOptions::parse_args_default_or_exit();

    if opts.args.is_empty() {
        eprintln!(
            "sigstore-kms-{} is a signing plugin; use it with key references like {}://my-key",
            PLUGIN_NAME, PLUGIN_NAME
        );
        Ok(())
    } else {
        run_plugin(Plugin::new)
    }
}
