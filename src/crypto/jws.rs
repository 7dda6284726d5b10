use crate::acme::object::{Nonce, Token};
use crate::crypto::keys::{RsaKeyPair, SignatureError};
use crate::crypto::sha256;
use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Serialize;
use url::Url;

#[derive(Debug, Serialize)]
pub struct ProtectedHeader {
    #[serde(rename = "alg")]
    algorithm: &'static str,
    #[serde(skip_serializing_if = "Nonce::is_empty")]
    pub nonce: Nonce,
    #[serde(rename = "url")]
    target_url: Url,
    #[serde(flatten)]
    key: KeyParameters,
}

impl ProtectedHeader {
    pub fn new(nonce: Nonce, target_url: Url, key: KeyParameters) -> Self {
        Self {
            algorithm: "RS256",
            nonce,
            target_url,
            key,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub enum KeyParameters {
    /// Full public key, used until the CA has assigned an account URL.
    #[serde(rename = "jwk")]
    FullKey(JsonWebKeyRsa),
    /// Key id, i.e. the account URL, used for all requests after registration.
    #[serde(rename = "kid")]
    AccountUrl(Url),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct JsonWebKeyRsa {
    #[serde(rename = "kty")]
    key_type: &'static str,
    #[serde(rename = "n")]
    modulus: String,
    #[serde(rename = "e")]
    exponent: String,
}

impl JsonWebKeyRsa {
    pub fn new(modulus: String, exponent: String) -> Self {
        Self {
            key_type: "RSA",
            modulus,
            exponent,
        }
    }
}

pub const EMPTY_PAYLOAD: Option<&()> = None;

/// A disposable ACME account key: an RSA keypair plus the JOSE parameters
/// derived from it. After registration the key carries the account URL and
/// signs with `kid` instead of the full `jwk`.
#[derive(Debug)]
pub struct AccountKey {
    keypair: RsaKeyPair,
    parameters: KeyParameters,
    thumbprint: String,
}

impl AccountKey {
    pub fn new(keypair: RsaKeyPair) -> Self {
        let (modulus, exponent) = keypair.public_components();
        let modulus = BASE64_URL_SAFE_NO_PAD.encode(modulus);
        let exponent = BASE64_URL_SAFE_NO_PAD.encode(exponent);
        let thumbprint = Self::compute_thumbprint(&modulus, &exponent);
        Self {
            keypair,
            parameters: KeyParameters::FullKey(JsonWebKeyRsa::new(modulus, exponent)),
            thumbprint,
        }
    }

    /// RFC7638 thumbprint. The digest is computed over a JSON object with
    /// lexicographically ordered members, so the serialization is done by
    /// hand rather than trusting serde_json's field order.
    fn compute_thumbprint(modulus: &str, exponent: &str) -> String {
        let fixed_serialization = format!(r#"{{"e":"{exponent}","kty":"RSA","n":"{modulus}"}}"#);
        BASE64_URL_SAFE_NO_PAD.encode(sha256(fixed_serialization.as_bytes()))
    }

    pub fn into_registered(self, account_url: Url) -> Self {
        Self {
            parameters: KeyParameters::AccountUrl(account_url),
            ..self
        }
    }

    pub fn parameters(&self) -> &KeyParameters {
        &self.parameters
    }

    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    /// Key authorization string for a challenge token, per RFC8555 §8.1.
    pub fn key_authorization(&self, token: &Token) -> String {
        let thumbprint = &self.thumbprint;
        format!("{token}.{thumbprint}")
    }

    /// The value published in the `_acme-challenge` TXT record:
    /// base64url(SHA-256(key authorization)).
    pub fn dns01_challenge_value(&self, token: &Token) -> String {
        let key_authorization = self.key_authorization(token);
        BASE64_URL_SAFE_NO_PAD.encode(sha256(key_authorization.as_bytes()))
    }

    pub fn sign<T: Serialize>(
        &self,
        header: &ProtectedHeader,
        payload: Option<&T>,
    ) -> Result<FlattenedJws, SignatureError> {
        let protected = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(header)?);
        let payload = match payload {
            Some(payload) => BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload)?),
            // POST-as-GET requests carry an empty payload
            None => String::new(),
        };
        let message = format!("{protected}.{payload}");
        let signature = self.keypair.sign(message.as_bytes())?;
        Ok(FlattenedJws {
            protected,
            payload,
            signature: BASE64_URL_SAFE_NO_PAD.encode(signature),
        })
    }
}

/// JWS in flattened JSON serialization, the shape ACME requests are POSTed in.
#[derive(Debug, Serialize)]
pub struct FlattenedJws {
    protected: String,
    payload: String,
    signature: String,
}
