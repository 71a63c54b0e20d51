use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::Client;

use crate::challenge::{ChallengeRequest, SolverConfig};
use crate::config::DnspodConfig;
use crate::provider::dnspod::{CreateRecordRequest, DnspodClient, DomainListItem, RecordListItem};
use crate::provider::tc3::Credential;
use crate::secrets::{self, SecretStore};

/// A DNS-01 solver as seen by the webhook server.
#[async_trait]
pub trait Solver: Send + Sync {
    /// Name the solver is referenced by on the Issuer, unique within the group.
    fn name(&self) -> &str;

    /// Creates the challenge TXT record. Must tolerate repeated calls.
    async fn present(&self, request: &ChallengeRequest) -> Result<()>;

    /// Removes the TXT record carrying `request.key`, and only that one.
    async fn cleanup(&self, request: &ChallengeRequest) -> Result<()>;
}

/// DNSPod addressing of a challenge record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordTarget {
    pub domain: String,
    pub subdomain: String,
}

pub fn un_fqdn(name: &str) -> &str {
    name.strip_suffix('.').unwrap_or(name)
}

/// Splits the resolved FQDN into DNSPod's (domain, subdomain) pair by
/// trimming the resolved zone from its end.
pub fn convert(resolved_zone: &str, resolved_fqdn: &str) -> Result<RecordTarget> {
    let domain = un_fqdn(resolved_zone);
    if domain.is_empty() {
        anyhow::bail!("resolved zone is empty");
    }

    let fqdn = un_fqdn(resolved_fqdn);
    let fqdn_lower = fqdn.to_ascii_lowercase();
    let domain_lower = domain.to_ascii_lowercase();

    let subdomain = if fqdn_lower == domain_lower {
        "@"
    } else if fqdn_lower.ends_with(&format!(".{}", domain_lower)) {
        &fqdn[..fqdn.len() - domain.len() - 1]
    } else {
        anyhow::bail!("{} is not within zone {}", resolved_fqdn, resolved_zone);
    };

    Ok(RecordTarget {
        domain: domain.to_string(),
        subdomain: subdomain.to_string(),
    })
}

fn txt_matches(value: &str, key: &str) -> bool {
    value.trim_matches('"') == key
}

pub struct DnspodSolver {
    name: String,
    settings: DnspodConfig,
    http: Client,
    secrets: Arc<dyn SecretStore>,
}

impl DnspodSolver {
    pub fn new(
        name: impl Into<String>,
        settings: DnspodConfig,
        secrets: Arc<dyn SecretStore>,
    ) -> Result<Self> {
        let http = DnspodClient::http_client(Duration::from_secs(settings.timeout_secs))?;
        Ok(Self {
            name: name.into(),
            settings,
            http,
            secrets,
        })
    }

    async fn client_for(&self, ch: &ChallengeRequest) -> Result<(DnspodClient, SolverConfig)> {
        let config = SolverConfig::load(ch.config.as_ref())?;
        debug!("Using secret {}/{}", ch.resource_namespace, config.secret_id.name);

        let secret_id =
            secrets::load_string(self.secrets.as_ref(), &config.secret_id, &ch.resource_namespace)
                .await
                .with_context(|| format!("failed to get secret id for {}", ch.resolved_zone))?;
        let secret_key =
            secrets::load_string(self.secrets.as_ref(), &config.secret_key, &ch.resource_namespace)
                .await
                .with_context(|| format!("failed to get secret key for {}", ch.resolved_zone))?;

        let client = DnspodClient::new(
            self.http.clone(),
            &self.settings.endpoint,
            &self.settings.region,
            Credential {
                secret_id,
                secret_key,
            },
        )?;
        Ok((client, config))
    }

    async fn hosted_zone(&self, client: &DnspodClient, domain: &str) -> Result<DomainListItem> {
        let domains = client
            .describe_domains()
            .await
            .context("failed to get dnspod hosted zone")?;
        if domains.is_empty() {
            anyhow::bail!("no list of domain names found");
        }

        let zone = domains
            .into_iter()
            .find(|zone| zone.name.eq_ignore_ascii_case(domain))
            .ok_or_else(|| anyhow::anyhow!("zone {} not found in dnspod", domain))?;
        debug!("Found hosted zone {} (DomainId {})", zone.name, zone.domain_id);
        Ok(zone)
    }

    /// TXT records at `subdomain`. An API-level error means "none found".
    async fn find_txt_records(
        &self,
        client: &DnspodClient,
        domain: &str,
        subdomain: &str,
    ) -> Result<Vec<RecordListItem>> {
        match client.describe_records(domain, subdomain, "TXT").await {
            Ok(records) => Ok(records),
            Err(e) if e.is_no_data() => {
                info!("No TXT record found for [{}] in [{}]", subdomain, domain);
                Ok(Vec::new())
            }
            Err(e) if e.is_api() => {
                warn!("Listing TXT records for [{}] in [{}] failed: {}", subdomain, domain, e);
                Ok(Vec::new())
            }
            Err(e) => Err(e).context("failed to find dnspod TXT records"),
        }
    }

    /// Enables or disables the CNAME records that shadow the challenge TXT
    /// record. Failures are logged only.
    async fn set_cname_status(&self, client: &DnspodClient, domain: &str, enabled: bool) {
        let wanted = if enabled { "ENABLE" } else { "DISABLE" };

        for subdomain in &self.settings.cname_subdomains {
            let records = match client.describe_records(domain, subdomain, "CNAME").await {
                Ok(records) => records,
                Err(e) if e.is_api() => {
                    debug!("No CNAME record at [{}] in [{}]", subdomain, domain);
                    continue;
                }
                Err(e) => {
                    warn!(
                        "Failed to list CNAME records at [{}] in [{}]: {:#}",
                        subdomain,
                        domain,
                        anyhow::Error::new(e)
                    );
                    continue;
                }
            };

            for record in records {
                if record.status.eq_ignore_ascii_case(wanted) {
                    continue;
                }
                info!(
                    "Setting CNAME record {} at [{}] in [{}] to {}",
                    record.record_id, subdomain, domain, wanted
                );
                if let Err(e) = client
                    .modify_record_status(domain, record.record_id, enabled)
                    .await
                {
                    warn!(
                        "Failed to set CNAME record {} to {}: {:#}",
                        record.record_id,
                        wanted,
                        anyhow::Error::new(e)
                    );
                }
            }
        }
    }
}

#[async_trait]
impl Solver for DnspodSolver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn present(&self, ch: &ChallengeRequest) -> Result<()> {
        info!(
            "Presenting challenge dnsName={} resolvedZone={} resolvedFQDN={}",
            ch.dns_name, ch.resolved_zone, ch.resolved_fqdn
        );
        let (client, config) = self.client_for(ch).await?;
        let target = convert(&ch.resolved_zone, &ch.resolved_fqdn)?;
        info!(
            "[{}] maps to domain [{}] subdomain [{}]",
            ch.resolved_fqdn, target.domain, target.subdomain
        );

        let zone = self.hosted_zone(&client, &target.domain).await?;

        let existing = self
            .find_txt_records(&client, &zone.name, &target.subdomain)
            .await?;
        if let Some(record) = existing.iter().find(|r| txt_matches(&r.value, &ch.key)) {
            info!(
                "TXT record {} for [{}] already present, nothing to create",
                record.record_id, ch.resolved_fqdn
            );
        } else {
            let record_id = client
                .create_record(&CreateRecordRequest {
                    domain: &zone.name,
                    sub_domain: &target.subdomain,
                    record_type: "TXT",
                    record_line: &self.settings.record_line,
                    value: &ch.key,
                    ttl: self.settings.ttl,
                })
                .await
                .context("failed to create dnspod TXT record")?;
            info!("Created TXT record {} for [{}]", record_id, ch.resolved_fqdn);
        }

        if config.disable_cname() {
            self.set_cname_status(&client, &zone.name, false).await;
        }
        Ok(())
    }

    async fn cleanup(&self, ch: &ChallengeRequest) -> Result<()> {
        info!(
            "Cleaning up challenge dnsName={} resolvedZone={} resolvedFQDN={}",
            ch.dns_name, ch.resolved_zone, ch.resolved_fqdn
        );
        let (client, config) = self.client_for(ch).await?;
        let target = convert(&ch.resolved_zone, &ch.resolved_fqdn)?;
        info!(
            "[{}] maps to domain [{}] subdomain [{}]",
            ch.resolved_fqdn, target.domain, target.subdomain
        );

        let zone = self.hosted_zone(&client, &target.domain).await?;

        let records = self
            .find_txt_records(&client, &zone.name, &target.subdomain)
            .await?;
        let matching: Vec<_> = records
            .into_iter()
            .filter(|r| txt_matches(&r.value, &ch.key))
            .collect();
        if matching.is_empty() {
            info!("No TXT record carrying the key for [{}]", ch.resolved_fqdn);
        }

        for record in matching {
            match client.delete_record(&zone.name, record.record_id).await {
                Ok(()) => info!("Deleted TXT record {} for [{}]", record.record_id, ch.resolved_fqdn),
                Err(e) if e.is_api() => {
                    warn!("TXT record {} not deleted, treating as gone: {}", record.record_id, e)
                }
                Err(e) => return Err(e).context("failed to delete dnspod TXT record"),
            }
        }

        if config.disable_cname() {
            self.set_cname_status(&client, &zone.name, true).await;
        }
        Ok(())
    }
}
