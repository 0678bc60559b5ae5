//! Public keys as they cross the plugin boundary.

use std::fmt;
use thiserror::Error;

const PEM_LABEL: &str = "PUBLIC KEY";
const PEM_LINE_LENGTH: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("public key is not valid UTF-8 PEM")]
    NotUtf8,
    #[error("missing PEM boundary for {0:?}")]
    MissingBoundary(&'static str),
    #[error("invalid base64 in PEM body: {0}")]
    Base64(String),
    #[error("PEM body is empty")]
    Empty,
}

/// A public key in DER-encoded SubjectPublicKeyInfo form.
///
/// Keys are transported as PEM with the `PUBLIC KEY` label.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    pub fn from_der(der: impl Into<Vec<u8>>) -> Self {
        PublicKey(der.into())
    }

    pub fn as_der(&self) -> &[u8] {
        &self.0
    }

    /// Parses the first `PUBLIC KEY` block in `pem`.
    pub fn from_pem(pem: &[u8]) -> Result<Self, KeyError> {
        let pem = std::str::from_utf8(pem).map_err(|_| KeyError::NotUtf8)?;
        let begin = format!("-----BEGIN {}-----", PEM_LABEL);
        let end = format!("-----END {}-----", PEM_LABEL);

        let mut lines = pem.lines().map(str::trim);
        lines
            .by_ref()
            .find(|line| *line == begin)
            .ok_or(KeyError::MissingBoundary("BEGIN"))?;

        let mut body = String::new();
        loop {
            match lines.next() {
                Some(line) if line == end => break,
                Some(line) => body.push_str(line),
                None => return Err(KeyError::MissingBoundary("END")),
            }
        }

        let der = base64::decode(&body).map_err(|e| KeyError::Base64(e.to_string()))?;
        if der.is_empty() {
            return Err(KeyError::Empty);
        }
        Ok(PublicKey(der))
    }

    pub fn to_pem(&self) -> String {
        let encoded = base64::encode(&self.0);
        let mut pem = format!("-----BEGIN {}-----\n", PEM_LABEL);
        let mut rest = encoded.as_str();
        while !rest.is_empty() {
            let (line, tail) = rest.split_at(rest.len().min(PEM_LINE_LENGTH));
            pem.push_str(line);
            pem.push('\n');
            rest = tail;
        }
        pem.push_str(&format!("-----END {}-----\n", PEM_LABEL));
        pem
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", base64::encode(&self.0))
    }
}
