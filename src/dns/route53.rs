use crate::challenge::{
    ChallengeError, ChallengePerformer, FetchedAuthorization, AUTHORIZATION_TIMEOUT,
};
use crate::config::Route53Config;
use crate::dns::{ZoneApi, ZoneChangeStatus};
use crate::issuer::AcmeSession;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use aws_sdk_route53::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_route53::error::DisplayErrorContext;
use aws_sdk_route53::types::{
    Change, ChangeAction, ChangeBatch, ChangeStatus, ResourceRecord, ResourceRecordSet, RrType,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

pub const ACME_CHALLENGE_PREFIX: &str = "_acme-challenge";
const RECORD_TTL: i64 = 300;
/// How often the provider is asked whether a change has propagated.
const SYNC_POLL_INTERVAL: Duration = Duration::from_secs(30);
/// Amazon documents 30 minutes as the worst case for a change to sync.
const SYNC_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// DNS-01 challenge performer backed by a Route53 hosted zone (or any other
/// `ZoneApi`): publishes the TXT proof, optionally waits for propagation,
/// asks the CA to validate, and removes the record afterwards.
pub struct Route53Performer {
    zone: Arc<dyn ZoneApi>,
    wait_for_sync: bool,
    sync_poll_interval: Duration,
    sync_timeout: Duration,
}

impl Route53Performer {
    pub fn new(zone: Arc<dyn ZoneApi>, wait_for_sync: bool) -> Self {
        Self {
            zone,
            wait_for_sync,
            sync_poll_interval: SYNC_POLL_INTERVAL,
            sync_timeout: SYNC_TIMEOUT,
        }
    }

    pub fn from_config(config: &Route53Config) -> Self {
        Self::new(Arc::new(Route53Zone::new(config)), config.wait_for_sync)
    }

    #[cfg(test)]
    fn with_sync_timing(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.sync_poll_interval = poll_interval;
        self.sync_timeout = timeout;
        self
    }

    fn challenge_record_name(hostname: &str) -> String {
        format!("{ACME_CHALLENGE_PREFIX}.{hostname}.")
    }

    async fn publish(&self, record_name: &str, value: &str) -> Result<(), ChallengeError> {
        let quoted = quote_txt(value);
        let change_id = self
            .zone
            .upsert_txt(record_name, &quoted, RECORD_TTL)
            .await
            .map_err(ChallengeError::Dns)?;
        debug!("published TXT record {record_name} (change {change_id})");
        if self.wait_for_sync {
            self.wait_in_sync(&change_id).await?;
        }
        Ok(())
    }

    async fn remove(&self, record_name: &str, value: &str) -> Result<(), ChallengeError> {
        let quoted = quote_txt(value);
        let change_id = match self.zone.delete_txt(record_name, &quoted, RECORD_TTL).await {
            Ok(change_id) => change_id,
            Err(err) => {
                // a record that is already gone counts as deleted
                return if error_mentions_not_found(&err) {
                    Ok(())
                } else {
                    Err(ChallengeError::Dns(err))
                };
            }
        };
        debug!("deleted TXT record {record_name} (change {change_id})");
        if self.wait_for_sync {
            self.wait_in_sync(&change_id).await?;
        }
        Ok(())
    }

    async fn wait_in_sync(&self, change_id: &str) -> Result<(), ChallengeError> {
        let deadline = Instant::now() + self.sync_timeout;
        loop {
            match self
                .zone
                .change_status(change_id)
                .await
                .map_err(ChallengeError::Dns)?
            {
                ZoneChangeStatus::InSync => return Ok(()),
                ZoneChangeStatus::Pending => {}
            }
            if Instant::now() + self.sync_poll_interval > deadline {
                return Err(ChallengeError::PropagationTimeout);
            }
            tokio::time::sleep(self.sync_poll_interval).await;
        }
    }
}

#[async_trait]
impl ChallengePerformer for Route53Performer {
    fn name(&self) -> &'static str {
        "route53"
    }

    async fn perform(
        &self,
        session: &AcmeSession<'_>,
        authorization: &FetchedAuthorization,
        hostname: &str,
    ) -> Result<(), ChallengeError> {
        let (challenge, dns) = select_dns_challenge(&authorization.authorization)
            .ok_or(ChallengeError::NoDnsChallenge)?;
        let challenge_value = session.dns01_challenge_value(&dns.token);
        let record_name = Self::challenge_record_name(hostname);

        self.publish(&record_name, &challenge_value).await?;
        info!("TXT record for {hostname} is in place, asking CA to validate");

        session
            .accept_challenge(challenge)
            .await
            .map_err(|e| ChallengeError::Acme(e.into()))?;
        session
            .wait_authorization(&authorization.url, AUTHORIZATION_TIMEOUT)
            .await
            .map_err(|e| ChallengeError::Acme(e.into()))?;
        info!("CA validated the dns-01 challenge for {hostname}");

        // remove the record so we don't pollute the zone
        self.remove(&record_name, &challenge_value).await?;
        Ok(())
    }
}

fn select_dns_challenge(
    authorization: &crate::acme::object::Authorization,
) -> Option<(
    &crate::acme::object::Challenge,
    &crate::acme::object::DnsChallenge,
)> {
    authorization.challenges.iter().find_map(|challenge| {
        match &challenge.inner_challenge {
            crate::acme::object::InnerChallenge::Dns(dns) => Some((challenge, dns)),
            _ => None,
        }
    })
}

// the DNS TXT wire format (and the Route53 API) require the value quoted
fn quote_txt(value: &str) -> String {
    format!("\"{value}\"")
}

fn error_mentions_not_found(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.to_string().contains("not found"))
}

/// `ZoneApi` binding against the real Route53 API, authenticated with the
/// static credentials from the configuration file.
#[derive(Debug, Clone)]
pub struct Route53Zone {
    client: aws_sdk_route53::Client,
    hosted_zone_id: String,
}

impl Route53Zone {
    pub fn new(config: &Route53Config) -> Self {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "configuration-file",
        );
        let sdk_config = aws_sdk_route53::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .build();
        Self {
            client: aws_sdk_route53::Client::from_conf(sdk_config),
            hosted_zone_id: config.hosted_zone_id.clone(),
        }
    }

    async fn change(
        &self,
        action: ChangeAction,
        record_name: &str,
        value: &str,
        ttl: i64,
    ) -> anyhow::Result<String> {
        let record = ResourceRecord::builder()
            .value(value)
            .build()
            .context("assembling resource record")?;
        let record_set = ResourceRecordSet::builder()
            .name(record_name)
            .r#type(RrType::Txt)
            .ttl(ttl)
            .resource_records(record)
            .build()
            .context("assembling resource record set")?;
        let change = Change::builder()
            .action(action)
            .resource_record_set(record_set)
            .build()
            .context("assembling change")?;
        let batch = ChangeBatch::builder()
            .changes(change)
            .build()
            .context("assembling change batch")?;
        let output = self
            .client
            .change_resource_record_sets()
            .hosted_zone_id(&self.hosted_zone_id)
            .change_batch(batch)
            .send()
            .await
            .map_err(|e| anyhow!("{}", DisplayErrorContext(&e)))?;
        let info = output
            .change_info()
            .ok_or_else(|| anyhow!("change accepted but no change info returned"))?;
        Ok(info.id().to_string())
    }
}

#[async_trait]
impl ZoneApi for Route53Zone {
    async fn upsert_txt(
        &self,
        record_name: &str,
        value: &str,
        ttl: i64,
    ) -> anyhow::Result<String> {
        self.change(ChangeAction::Upsert, record_name, value, ttl)
            .await
    }

    async fn read_txt(&self, record_name: &str) -> anyhow::Result<String> {
        let output = self
            .client
            .list_resource_record_sets()
            .hosted_zone_id(&self.hosted_zone_id)
            .start_record_name(record_name)
            .start_record_type(RrType::Txt)
            .max_items(1)
            .send()
            .await
            .map_err(|e| anyhow!("{}", DisplayErrorContext(&e)))?;
        let record_set = output
            .resource_record_sets()
            .first()
            .ok_or_else(|| anyhow!("found 0 record sets"))?;
        let record = record_set
            .resource_records()
            .first()
            .ok_or_else(|| anyhow!("found 0 records"))?;
        Ok(record.value().trim_matches('"').to_string())
    }

    async fn delete_txt(
        &self,
        record_name: &str,
        value: &str,
        ttl: i64,
    ) -> anyhow::Result<String> {
        self.change(ChangeAction::Delete, record_name, value, ttl)
            .await
    }

    async fn change_status(&self, change_id: &str) -> anyhow::Result<ZoneChangeStatus> {
        let output = self
            .client
            .get_change()
            .id(change_id)
            .send()
            .await
            .map_err(|e| anyhow!("{}", DisplayErrorContext(&e)))?;
        let info = output
            .change_info()
            .ok_or_else(|| anyhow!("change status response without change info"))?;
        Ok(match info.status() {
            ChangeStatus::Insync => ZoneChangeStatus::InSync,
            _ => ZoneChangeStatus::Pending,
        })
    }
}
