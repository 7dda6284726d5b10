use anyhow::Context;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::EncodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use sha2::Sha256;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Certificates and ACME accounts both use RSA-2048 keys.
pub const RSA_KEY_BITS: usize = 2048;

/// An RSA keypair. Account keys are generated fresh per acquisition and
/// discarded; certificate keys travel with their chain through the cache.
#[derive(Debug, Clone)]
pub struct RsaKeyPair {
    key: RsaPrivateKey,
}

impl RsaKeyPair {
    pub fn generate() -> anyhow::Result<Self> {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), RSA_KEY_BITS)
            .context("generating RSA keypair")?;
        Ok(Self { key })
    }

    pub fn from_pkcs1_der(der: &[u8]) -> Result<Self, rsa::pkcs1::Error> {
        Ok(Self {
            key: RsaPrivateKey::from_pkcs1_der(der)?,
        })
    }

    pub fn to_pkcs1_der(&self) -> Result<Vec<u8>, SignatureError> {
        let doc = self
            .key
            .to_pkcs1_der()
            .map_err(|_| SignatureError::EncodingFailed("PKCS#1 serialization failed"))?;
        Ok(doc.as_bytes().to_vec())
    }

    /// Re-exposes the key in a form usable for CSR and certificate signing.
    pub fn to_rcgen_keypair(&self) -> anyhow::Result<rcgen::KeyPair> {
        let pkcs8 = self
            .key
            .to_pkcs8_der()
            .map_err(|_| anyhow::anyhow!("PKCS#8 serialization failed"))?;
        rcgen::KeyPair::try_from(pkcs8.as_bytes()).context("loading RSA key for signing")
    }

    /// Signs `message` with RSASSA-PKCS1-v1_5 over SHA-256 (JWS "RS256").
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignatureError> {
        let signer = SigningKey::<Sha256>::new(self.key.clone());
        let signature = signer
            .try_sign(message)
            .map_err(|_| SignatureError::SignatureGeneration("RSA signing failed"))?;
        Ok(signature.to_vec())
    }

    /// Public modulus and exponent, big-endian without leading zeroes.
    pub fn public_components(&self) -> (Vec<u8>, Vec<u8>) {
        (self.key.n().to_bytes_be(), self.key.e().to_bytes_be())
    }
}

#[derive(Debug)]
pub enum SignatureError {
    Serialization(serde_json::Error),
    SignatureGeneration(&'static str),
    EncodingFailed(&'static str),
}

impl Error for SignatureError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SignatureError::Serialization(ser) => ser.source(),
            SignatureError::EncodingFailed(_) | SignatureError::SignatureGeneration(_) => None,
        }
    }
}

impl Display for SignatureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self {
            SignatureError::Serialization(e) => write!(f, "JSON encoding failed: {e}"),
            SignatureError::EncodingFailed(msg) | SignatureError::SignatureGeneration(msg) => {
                write!(f, "{msg}")
            }
        }
    }
}

impl From<serde_json::Error> for SignatureError {
    fn from(e: serde_json::Error) -> Self {
        SignatureError::Serialization(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn test_pkcs1_round_trip() {
        let keypair = testutil::test_keypair(0);
        let der = keypair.to_pkcs1_der().unwrap();
        let reloaded = RsaKeyPair::from_pkcs1_der(&der).unwrap();
        assert_eq!(der, reloaded.to_pkcs1_der().unwrap());
        assert_eq!(keypair.public_components(), reloaded.public_components());
    }

    #[test]
    fn test_from_pkcs1_der_rejects_garbage() {
        RsaKeyPair::from_pkcs1_der(b"not a key").unwrap_err();
    }

    #[test]
    fn test_sign_length_matches_modulus() {
        let keypair = testutil::test_keypair(0);
        let signature = keypair.sign(b"Hello, world!").unwrap();
        assert_eq!(signature.len(), RSA_KEY_BITS / 8);
    }

    #[test]
    fn test_public_exponent_is_f4() {
        let keypair = testutil::test_keypair(0);
        let (_, e) = keypair.public_components();
        assert_eq!(e, vec![0x01, 0x00, 0x01]);
    }
}
