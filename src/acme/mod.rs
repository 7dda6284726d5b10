pub mod client;
pub mod error;
pub mod http;
pub mod object;

/// Production Let's Encrypt directory.
pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
/// Staging Let's Encrypt directory; certificates are not publicly trusted,
/// but the rate limits are far more forgiving.
pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";
