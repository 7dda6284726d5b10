use crate::acme::client::{AcmeClient, AcmeClientBuilder};
use crate::acme::error::ProtocolResult;
use crate::acme::object::{
    Authorization, AuthorizationStatus, Challenge, Identifier, NewOrderRequest, OrderStatus, Token,
};
use crate::bundle::{decode_pem_chain, CertificateBundle};
use crate::chain::validate_chain;
use crate::challenge::{ChallengePerformer, FetchedAuthorization};
use crate::crypto::jws::AccountKey;
use crate::crypto::keys::RsaKeyPair;
use crate::time::current_time_truncated;
use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Deadline for each individual protocol operation against the CA.
const ACME_OP_TIMEOUT: Duration = Duration::from_secs(60);
/// Validity requested for new certificates.
const REQUESTED_LIFETIME: time::Duration = time::Duration::days(90);

/// Anything that can produce a certificate bundle for a hostname. The
/// manager renews through this trait; tests substitute their own issuers.
#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    async fn certificate_for_domain(&self, hostname: &str) -> anyhow::Result<CertificateBundle>;
}

/// Decides whether the CA's terms of service are acceptable.
pub type TosDecision = fn(&Url) -> bool;

/// Agrees to any terms of service, the moral equivalent of clicking through.
pub fn accept_tos(_tos_url: &Url) -> bool {
    true
}

/// The protocol client paired with the account key of the current
/// acquisition; the view of the ACME conversation a challenge performer gets.
pub struct AcmeSession<'a> {
    client: &'a AcmeClient,
    account: &'a AccountKey,
}

impl<'a> AcmeSession<'a> {
    pub fn new(client: &'a AcmeClient, account: &'a AccountKey) -> Self {
        Self { client, account }
    }

    /// The TXT value proving control over the challenge's domain.
    pub fn dns01_challenge_value(&self, token: &Token) -> String {
        self.account.dns01_challenge_value(token)
    }

    pub async fn accept_challenge(&self, challenge: &Challenge) -> ProtocolResult<()> {
        self.client
            .accept_challenge(self.account, &challenge.url)
            .await
    }

    pub async fn wait_authorization(
        &self,
        authz_url: &Url,
        deadline: Duration,
    ) -> ProtocolResult<Authorization> {
        self.client
            .wait_authorization(self.account, authz_url, deadline)
            .await
    }
}

/// One-shot ACME certificate acquisition: a disposable account is registered,
/// the authorization is satisfied through the configured challenge performer,
/// and the signed chain is validated before it is returned. No state survives
/// a call, failed or not.
pub struct AcmeIssuer {
    directory_url: Url,
    email: String,
    agree_tos: TosDecision,
    performer: Box<dyn ChallengePerformer>,
}

impl AcmeIssuer {
    pub fn new(
        directory_url: Url,
        email: impl Into<String>,
        agree_tos: TosDecision,
        performer: Box<dyn ChallengePerformer>,
    ) -> Self {
        Self {
            directory_url,
            email: email.into(),
            agree_tos,
            performer,
        }
    }

    async fn register_disposable_account(
        &self,
        client: &AcmeClient,
    ) -> anyhow::Result<AccountKey> {
        let keypair = RsaKeyPair::generate().context("generating account key")?;
        let account_key = AccountKey::new(keypair);
        let terms_of_service = client
            .get_directory()
            .meta
            .as_ref()
            .and_then(|meta| meta.terms_of_service.as_ref());
        if let Some(tos_url) = terms_of_service {
            if !(self.agree_tos)(tos_url) {
                bail!("terms of service at {tos_url} were not agreed to");
            }
        }
        let contact = Url::parse(&format!("mailto:{}", self.email))
            .with_context(|| format!("invalid contact email {}", self.email))?;
        let (account_key, _account) = with_deadline(
            "registering account at CA",
            client.register_account(account_key, vec![contact], Some(true)),
        )
        .await?;
        Ok(account_key)
    }

    async fn authorize(
        &self,
        client: &AcmeClient,
        account: &AccountKey,
        authz_urls: &[Url],
        hostname: &str,
    ) -> anyhow::Result<()> {
        for authz_url in authz_urls {
            let authorization = with_deadline(
                "fetching authorization",
                client.get_authorization(account, authz_url),
            )
            .await?;
            match authorization.status {
                AuthorizationStatus::Valid => {
                    // already proven, no challenge work needed
                    debug!("authorization for {} is already valid", authorization.identifier);
                }
                AuthorizationStatus::Pending => {
                    let id = authorization.identifier.clone();
                    info!("found pending authorization for {id}, performing challenge");
                    let fetched = FetchedAuthorization {
                        url: authz_url.clone(),
                        authorization,
                    };
                    let session = AcmeSession::new(client, account);
                    self.performer
                        .perform(&session, &fetched, hostname)
                        .await
                        .with_context(|| {
                            format!(
                                "challenge performer {} could not authorize {id}",
                                self.performer.name()
                            )
                        })?;
                }
                AuthorizationStatus::Processing => {
                    bail!("certificate authorization already in progress")
                }
                status => {
                    bail!("invalid certificate authorization status: {status}")
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CertificateIssuer for AcmeIssuer {
    async fn certificate_for_domain(&self, hostname: &str) -> anyhow::Result<CertificateBundle> {
        let client = with_deadline(
            "fetching ACME directory",
            AcmeClientBuilder::new(self.directory_url.clone()).try_build(),
        )
        .await?;

        // a disposable account per acquisition keeps key lifecycle trivial
        let account = self.register_disposable_account(&client).await?;
        debug!("registered disposable ACME account for {hostname}");

        let not_before = current_time_truncated();
        let request = NewOrderRequest {
            identifiers: vec![Identifier::from(hostname)],
            not_before: Some(not_before),
            not_after: Some(not_before + REQUESTED_LIFETIME),
        };
        let (order_url, order) = with_deadline(
            "creating order",
            client.new_order(&account, &request),
        )
        .await?;
        debug!("order for {hostname} created at {order_url}");

        match order.status {
            OrderStatus::Pending => {
                self.authorize(&client, &account, &order.authorizations, hostname)
                    .await?;
            }
            OrderStatus::Ready | OrderStatus::Processing | OrderStatus::Valid => {
                // nothing left to authorize
            }
            OrderStatus::Invalid => {
                if let Some(problem) = order.error {
                    bail!("new order is invalid: {problem}");
                }
                bail!("new order is invalid (no error reported by CA)");
            }
        }

        // fresh certificate key, distinct from the account key
        let certificate_key = RsaKeyPair::generate().context("generating certificate key")?;
        let csr = build_csr(&certificate_key, hostname)?;

        let order = with_deadline(
            "re-fetching authorized order",
            client.get_order(&account, &order_url),
        )
        .await?;
        let order = with_deadline(
            "finalizing order",
            client.finalize_order(&account, order, &order_url, &csr),
        )
        .await?;
        let certificate_url = order.certificate.ok_or(anyhow!(
            "CA did not provide a certificate URL for finalized order"
        ))?;
        let pem = with_deadline(
            "downloading certificate",
            client.download_certificate(&account, &certificate_url),
        )
        .await?;

        let chain = decode_pem_chain(&pem).context("parsing certificate chain from CA")?;
        validate_chain(hostname, &chain).context("validating certificate chain")?;
        let bundle = CertificateBundle::new(certificate_key, chain)?;
        info!(
            "issued certificate for {hostname}, valid until {}",
            bundle.leaf().not_after
        );
        Ok(bundle)
    }
}

async fn with_deadline<T>(
    what: &'static str,
    operation: impl Future<Output = ProtocolResult<T>>,
) -> anyhow::Result<T> {
    match tokio::time::timeout(ACME_OP_TIMEOUT, operation).await {
        Ok(result) => result.map_err(anyhow::Error::from).context(what),
        Err(_) => Err(anyhow!(crate::acme::error::Error::TimedOut(what))),
    }
}

fn build_csr(
    keypair: &RsaKeyPair,
    hostname: &str,
) -> anyhow::Result<rcgen::CertificateSigningRequest> {
    let signing_key = keypair.to_rcgen_keypair()?;
    let mut params = rcgen::CertificateParams::new(vec![hostname.to_string()])
        .context("CSR generation failed")?;
    let mut dn = rcgen::DistinguishedName::new();
    dn.push(rcgen::DnType::CommonName, hostname);
    params.distinguished_name = dn;
    params
        .serialize_request(&signing_key)
        .context("signing CSR failed")
}
