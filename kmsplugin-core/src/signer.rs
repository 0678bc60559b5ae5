use std::io::Read;

use crate::{
    context::Context,
    format::HashFunc,
    keys::PublicKey,
    options::{PublicKeyOption, SignOption, VerifyOption},
};

/// A signer over pre-computed digests, in the shape most signing APIs expect.
pub trait CryptoSigner {
    type Error;

    /// The signer's public key, or `None` if it could not be retrieved.
    fn public(&self) -> Option<PublicKey>;

    /// Signs `digest`, which was computed with `hash`.
    fn sign(&self, digest: &[u8], hash: HashFunc) -> Result<Vec<u8>, Self::Error>;
}

/// Callback for errors that [`CryptoSigner::public`] cannot return.
pub type ErrorCallback<'a, E> = Box<dyn Fn(&E) + Send + Sync + 'a>;

/// The operations every key-management backend provides.
///
/// Implemented by the host-side plugin client, and by the concrete backend inside a
/// plugin program.
pub trait SignerVerifier {
    type Error: std::error::Error;

    /// The algorithm used for new keys when the caller does not choose one.
    fn default_algorithm(&self) -> Result<String, Self::Error>;

    fn supported_algorithms(&self) -> Result<Vec<String>, Self::Error>;

    /// Creates a key using `algorithm`, or returns the existing key.
    fn create_key(&self, ctx: &Context, algorithm: &str) -> Result<PublicKey, Self::Error>;

    fn public_key(&self, opts: &[PublicKeyOption]) -> Result<PublicKey, Self::Error>;

    fn sign_message(
        &self,
        message: &mut dyn Read,
        opts: &[SignOption],
    ) -> Result<Vec<u8>, Self::Error>;

    /// Returns `Ok(())` only if `signature` is valid for `message`.
    fn verify_signature(
        &self,
        signature: &mut dyn Read,
        message: &mut dyn Read,
        opts: &[VerifyOption],
    ) -> Result<(), Self::Error>;

    /// Returns a [`CryptoSigner`] backed by this signer, along with the hash function
    /// it expects digests to be computed with.
    fn crypto_signer<'a>(
        &'a self,
        ctx: &Context,
        err_fn: ErrorCallback<'a, Self::Error>,
    ) -> Result<(Box<dyn CryptoSigner<Error = Self::Error> + 'a>, HashFunc), Self::Error>;
}
