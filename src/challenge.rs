use crate::acme::object::Authorization;
use crate::issuer::AcmeSession;
use async_trait::async_trait;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use url::Url;

/// How long the CA may take to settle an authorization after a challenge has
/// been accepted.
pub const AUTHORIZATION_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug)]
pub enum ChallengeError {
    /// The authorization offered no challenge of the supported type.
    NoDnsChallenge,
    /// The DNS provider never reported the change as synced.
    PropagationTimeout,
    /// DNS provider interaction failed.
    Dns(anyhow::Error),
    /// The CA rejected or never settled the challenge.
    Acme(anyhow::Error),
}

impl Display for ChallengeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ChallengeError::NoDnsChallenge => {
                write!(f, "dns-01 challenge type not in list of offered challenges")
            }
            ChallengeError::PropagationTimeout => {
                write!(f, "timed out waiting for DNS to sync")
            }
            ChallengeError::Dns(e) => write!(f, "unexpected response from DNS provider: {e:#}"),
            ChallengeError::Acme(e) => write!(f, "challenge validation failed: {e:#}"),
        }
    }
}

impl Error for ChallengeError {}

/// An authorization together with the URL it was fetched from; the URL is
/// what the CA is polled on while the challenge settles.
#[derive(Debug, Clone)]
pub struct FetchedAuthorization {
    pub url: Url,
    pub authorization: Authorization,
}

/// Satisfies one challenge from a pending authorization, start to finish:
/// publish the proof, notify the CA, wait for the authorization to become
/// valid, clean up. Implementations beyond DNS-01 plug in here without the
/// issuer knowing.
#[async_trait]
pub trait ChallengePerformer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn perform(
        &self,
        session: &AcmeSession<'_>,
        authorization: &FetchedAuthorization,
        hostname: &str,
    ) -> Result<(), ChallengeError>;
}

/// Performer that claims success without doing anything. Only useful against
/// CAs that accept every authorization, i.e. in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPerformer;

#[async_trait]
impl ChallengePerformer for NullPerformer {
    fn name(&self) -> &'static str {
        "null performer"
    }

    async fn perform(
        &self,
        _session: &AcmeSession<'_>,
        _authorization: &FetchedAuthorization,
        _hostname: &str,
    ) -> Result<(), ChallengeError> {
        Ok(())
    }
}
