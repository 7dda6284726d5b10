use crate::acme::error::{Error, ProtocolResult};
use crate::acme::http::HttpClient;
use crate::acme::object::{
    Account, AccountRequest, Authorization, AuthorizationStatus, Directory, EmptyObject,
    FinalizeRequest, NewOrderRequest, Nonce, Order, OrderStatus,
};
use crate::crypto::jws::{AccountKey, ProtectedHeader, EMPTY_PAYLOAD};
use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use rcgen::CertificateSigningRequest;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::debug;
use url::Url;

/// The maximum number of retries we do, per request
const MAX_RETRIES: usize = 3;
/// The default time we wait between retries, if a retry is needed
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(3);
/// The maximum amount of time we're willing to wait in between retries
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(2 * 60);
/// Upper bound on polling an order through the server's state machine
const MAX_POLL_DURATION: Duration = Duration::from_secs(5 * 60);

pub struct AcmeClientBuilder {
    server_url: Url,
    http_client: Option<HttpClient>,
}

impl AcmeClientBuilder {
    pub fn new(acme_server_url: Url) -> AcmeClientBuilder {
        Self {
            server_url: acme_server_url,
            http_client: None,
        }
    }

    #[must_use]
    pub fn with_http_client(mut self, http_client: HttpClient) -> Self {
        self.http_client = Some(http_client);
        self
    }

    pub async fn try_build(self) -> ProtocolResult<AcmeClient> {
        let http_client = match self.http_client {
            Some(client) => client,
            None => HttpClient::try_new()?,
        };
        let directory_response = http_client.get(self.server_url).await?;
        let directory = match directory_response.status() {
            StatusCode::OK => directory_response.json().await?,
            _ => return Err(Error::get_error_from_http(directory_response).await),
        };
        Ok(AcmeClient {
            http_client,
            directory,
            nonce_pool: Mutex::new(VecDeque::new()),
        })
    }
}

/// Protocol-level ACME client: directory, nonce management, and signed
/// POST plumbing. One instance talks to one CA; account state travels in the
/// `AccountKey` passed to each call.
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub struct AcmeClient {
    http_client: HttpClient,
    directory: Directory,
    nonce_pool: Mutex<VecDeque<Nonce>>,
}

impl AcmeClient {
    pub fn get_directory(&self) -> &Directory {
        &self.directory
    }

    pub async fn get_nonce(&self) -> ProtocolResult<Nonce> {
        let mut last_error;
        let mut retry = 0;
        loop {
            let pooled_nonce = self.nonce_pool.lock().pop_front();
            if let Some(pooled_nonce) = pooled_nonce {
                return Ok(pooled_nonce);
            }

            // Ask the ACME server for a new nonce, retrying if necessary
            let response = self
                .http_client
                .head(self.directory.new_nonce.clone())
                .await?;
            if let Some(nonce) = HttpClient::extract_nonce(&response) {
                return Ok(nonce);
            }

            let retry_after = HttpClient::extract_backoff(&response);
            last_error = Error::get_error_from_http(response).await;
            retry += 1;
            if retry > MAX_RETRIES {
                break;
            }
            let backoff = backoff_from_retry_after(retry_after);
            tokio::time::sleep(backoff).await;
        }
        Err(last_error)
    }

    fn try_store_nonce(&self, maybe_nonce: Option<Nonce>) {
        if let Some(nonce) = maybe_nonce {
            self.nonce_pool.lock().push_back(nonce);
        }
    }

    async fn post_with_retry<T: Serialize>(
        &self,
        target_url: &Url,
        key: &AccountKey,
        payload: Option<&T>,
    ) -> ProtocolResult<AcmeResponse> {
        let mut last_error;
        let mut retry = 0;
        let mut header = ProtectedHeader::new(
            self.get_nonce().await?,
            target_url.clone(),
            key.parameters().clone(),
        );
        loop {
            let signed = key.sign(&header, payload)?;
            let response = self.http_client.post(target_url.clone(), &signed).await?;

            let retry_after = HttpClient::extract_backoff(&response);
            let new_nonce = HttpClient::extract_nonce(&response);
            let location = HttpClient::extract_location(&response);
            let status = response.status();

            match status {
                StatusCode::OK | StatusCode::CREATED => {
                    self.try_store_nonce(new_nonce);
                    let body = response.bytes().await?.to_vec();
                    return Ok(AcmeResponse {
                        status,
                        location,
                        retry_after,
                        body,
                    });
                }
                _ => {
                    last_error = Error::get_error_from_http(response).await;
                    if let Error::AcmeProblem(problem) = &last_error {
                        if problem.is_bad_nonce() {
                            header.nonce = new_nonce.ok_or(Error::ProtocolViolation(
                                "Server did not provide a (valid) Replay-Nonce on a badNonce error",
                            ))?;
                            retry += 1;
                            if retry > MAX_RETRIES {
                                break;
                            }
                            // Immediate retry with the fresh nonce
                            continue;
                        }
                        self.try_store_nonce(new_nonce);
                    } else {
                        self.try_store_nonce(new_nonce);
                    }
                }
            }
            retry += 1;
            // Give up if the request doesn't seem salvageable
            if status.is_client_error() || retry > MAX_RETRIES {
                break;
            }
            let backoff = backoff_from_retry_after(retry_after);
            tokio::time::sleep(backoff).await;
            header.nonce = self.get_nonce().await?;
        }
        Err(last_error)
    }

    /// Registers the account key with the CA. Returns the key upgraded to
    /// `kid` signing together with the created account.
    pub async fn register_account(
        &self,
        key: AccountKey,
        contact: Vec<Url>,
        terms_of_service_agreed: Option<bool>,
    ) -> ProtocolResult<(AccountKey, Account)> {
        let target_url = &self.directory.new_account;
        let payload = AccountRequest {
            contact,
            terms_of_service_agreed,
        };
        let response = self.post_with_retry(target_url, &key, Some(&payload)).await?;
        let account_url = response.location.clone().ok_or(Error::ProtocolViolation(
            "ACME server did not provide an account URL for created account",
        ))?;
        let account = response.json()?;
        Ok((key.into_registered(account_url), account))
    }

    pub async fn new_order(
        &self,
        key: &AccountKey,
        request: &NewOrderRequest,
    ) -> ProtocolResult<(Url, Order)> {
        let target_url = &self.directory.new_order;
        let response = self.post_with_retry(target_url, key, Some(request)).await?;
        let order_url = response.location.clone().ok_or(Error::ProtocolViolation(
            "ACME server did not provide an order URL for created order",
        ))?;
        let order = response.json()?;
        Ok((order_url, order))
    }

    pub async fn get_order(&self, key: &AccountKey, order_url: &Url) -> ProtocolResult<Order> {
        let response = self.post_with_retry(order_url, key, EMPTY_PAYLOAD).await?;
        response.json()
    }

    pub async fn get_authorization(
        &self,
        key: &AccountKey,
        authz_url: &Url,
    ) -> ProtocolResult<Authorization> {
        let response = self.post_with_retry(authz_url, key, EMPTY_PAYLOAD).await?;
        response.json()
    }

    /// Tells the CA the challenge is ready for validation. The server starts
    /// validating asynchronously; progress is observed on the authorization.
    pub async fn accept_challenge(
        &self,
        key: &AccountKey,
        challenge_url: &Url,
    ) -> ProtocolResult<()> {
        self.post_with_retry(challenge_url, key, Some(&EmptyObject {}))
            .await?;
        Ok(())
    }

    /// Polls the authorization until the CA settles it, up to `deadline`.
    pub async fn wait_authorization(
        &self,
        key: &AccountKey,
        authz_url: &Url,
        deadline: Duration,
    ) -> ProtocolResult<Authorization> {
        let give_up_at = Instant::now() + deadline;
        loop {
            let response = self.post_with_retry(authz_url, key, EMPTY_PAYLOAD).await?;
            let retry_after = response.retry_after;
            let authorization: Authorization = response.json()?;
            match authorization.status {
                AuthorizationStatus::Valid => return Ok(authorization),
                AuthorizationStatus::Pending | AuthorizationStatus::Processing => {
                    // CA has not finished validating yet
                }
                _ => {
                    let challenge_error = authorization
                        .challenges
                        .into_iter()
                        .find_map(|challenge| challenge.error);
                    return match challenge_error {
                        Some(problem) => Err(problem.into()),
                        None => Err(Error::ProtocolViolation(
                            "authorization failed, but the CA did not report why",
                        )),
                    };
                }
            }
            let backoff = backoff_from_retry_after(retry_after);
            if Instant::now() + backoff >= give_up_at {
                return Err(Error::TimedOut("waiting for authorization to finalize"));
            }
            tokio::time::sleep(backoff).await;
        }
    }

    pub async fn finalize_order(
        &self,
        key: &AccountKey,
        order: Order,
        order_url: &Url,
        csr: &CertificateSigningRequest,
    ) -> ProtocolResult<Order> {
        match order.status {
            OrderStatus::Ready => {
                let request = FinalizeRequest {
                    csr: BASE64_URL_SAFE_NO_PAD.encode(csr.der()),
                };
                let response = self
                    .post_with_retry(&order.finalize, key, Some(&request))
                    .await?;
                let order_url = response.location.clone().unwrap_or_else(|| order_url.clone());
                let backoff = backoff_from_retry_after(response.retry_after);
                let order = response.json()?;
                tokio::time::sleep(backoff).await;
                self.poll_finalized_order(key, order, &order_url).await
            }
            OrderStatus::Processing => self.poll_finalized_order(key, order, order_url).await,
            OrderStatus::Valid => Ok(order),
            _ => Err(Error::ProtocolViolation(
                "Order with status that is neither ready nor processing cannot be finalized",
            )),
        }
    }

    async fn poll_finalized_order(
        &self,
        key: &AccountKey,
        mut order: Order,
        order_url: &Url,
    ) -> ProtocolResult<Order> {
        let deadline = Instant::now() + MAX_POLL_DURATION;
        while Instant::now() < deadline {
            match order.status {
                OrderStatus::Pending | OrderStatus::Ready => {
                    return Err(Error::ProtocolViolation(
                        "CA flipped the order status unexpectedly: finalized order went backwards",
                    ));
                }
                OrderStatus::Processing => {
                    tokio::time::sleep(DEFAULT_RETRY_BACKOFF).await;
                    order = self.get_order(key, order_url).await?;
                }
                OrderStatus::Valid => {
                    return Ok(order);
                }
                OrderStatus::Invalid => {
                    return if let Some(err) = order.error {
                        Err(err.into())
                    } else {
                        Err(Error::ProtocolViolation(
                            "Order is invalid, but CA did not provide an error message why",
                        ))
                    };
                }
            }
        }
        Err(Error::TimedOut("waiting for order finalization"))
    }

    /// POST-as-GET download of the issued certificate. The response is the
    /// full PEM chain, passed through unparsed.
    pub async fn download_certificate(
        &self,
        key: &AccountKey,
        certificate_url: &Url,
    ) -> ProtocolResult<Vec<u8>> {
        debug!("downloading certificate from {certificate_url}");
        let response = self
            .post_with_retry(certificate_url, key, EMPTY_PAYLOAD)
            .await?;
        Ok(response.body)
    }
}

#[derive(Debug)]
struct AcmeResponse {
    status: StatusCode,
    location: Option<Url>,
    retry_after: Option<SystemTime>,
    body: Vec<u8>,
}

impl AcmeResponse {
    fn json<R: DeserializeOwned>(&self) -> ProtocolResult<R> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

fn backoff_from_retry_after(retry_after: Option<SystemTime>) -> Duration {
    retry_after
        .and_then(|date| date.duration_since(SystemTime::now()).ok())
        .map_or(DEFAULT_RETRY_BACKOFF, |backoff| {
            if backoff > MAX_RETRY_BACKOFF {
                MAX_RETRY_BACKOFF
            } else {
                backoff
            }
        })
}
