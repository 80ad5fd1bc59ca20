use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::network::NetworkPlan;
use crate::waiter::PollPolicy;

/// Fixed lab layout: where the VMs go and what they look like.
#[derive(Clone, Debug)]
pub struct LabSettings {
    pub project: String,
    pub region: String,
    pub zone: String,
    pub source_image: String,
    pub ssh_user: String,
    pub master_machine_type: String,
    pub worker_machine_type: String,
    pub boot_disk_size_gb: u64,
    pub network: NetworkPlan,
    pub token_ttl: Duration,
}

impl Default for LabSettings {
    fn default() -> Self {
        let region = "us-central1".to_string();
        Self {
            project: "virtual-lab-1".to_string(),
            network: NetworkPlan::dataplane(&region),
            region,
            zone: "us-central1-a".to_string(),
            source_image: "global/images/introk8s-image".to_string(),
            ssh_user: "kuberack".to_string(),
            master_machine_type: "n1-standard-2".to_string(),
            worker_machine_type: "n1-standard-1".to_string(),
            boot_disk_size_gb: 100,
            token_ttl: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Process configuration, read from the environment (after `.env` is loaded).
#[derive(Clone, Debug)]
pub struct Settings {
    pub lab: LabSettings,
    pub poll: PollPolicy,
    /// `gce` or `mock`.
    pub provider: String,
    /// `postgres` or `memory`.
    pub record_store: String,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub gce_access_token: Option<String>,
    pub listen_addr: SocketAddr,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| non_empty(lookup(key));
        let defaults = LabSettings::default();

        let region = get("GCE_REGION").unwrap_or(defaults.region);
        let lab = LabSettings {
            project: get("GCE_PROJECT").unwrap_or(defaults.project),
            network: NetworkPlan::dataplane(&region),
            region,
            zone: get("GCE_ZONE").unwrap_or(defaults.zone),
            source_image: get("GCE_SOURCE_IMAGE").unwrap_or(defaults.source_image),
            ssh_user: get("LAB_SSH_USER").unwrap_or(defaults.ssh_user),
            master_machine_type: get("LAB_MASTER_MACHINE_TYPE")
                .unwrap_or(defaults.master_machine_type),
            worker_machine_type: get("LAB_WORKER_MACHINE_TYPE")
                .unwrap_or(defaults.worker_machine_type),
            boot_disk_size_gb: parse_or("LAB_BOOT_DISK_GB", get("LAB_BOOT_DISK_GB"), 100)?,
            token_ttl: Duration::from_secs(
                parse_or("LAB_TOKEN_TTL_HOURS", get("LAB_TOKEN_TTL_HOURS"), 7 * 24)?
                    .checked_mul(3600)
                    .context("LAB_TOKEN_TTL_HOURS is too large")?,
            ),
        };

        let interval = parse_or("LAB_POLL_INTERVAL_SECS", get("LAB_POLL_INTERVAL_SECS"), 1)?;
        let timeout = parse_or(
            "LAB_OPERATION_TIMEOUT_SECS",
            get("LAB_OPERATION_TIMEOUT_SECS"),
            600,
        )?;
        let poll = PollPolicy::fixed(Duration::from_secs(interval.max(1)))
            .with_timeout((timeout > 0).then(|| Duration::from_secs(timeout)));

        // Prefer *_FILE for secrets (Docker/K8s friendly), fallback to env var.
        let gce_access_token = match get("GCE_ACCESS_TOKEN_FILE") {
            Some(path) => Some(
                fs::read_to_string(&path)
                    .with_context(|| format!("failed to read GCE_ACCESS_TOKEN_FILE {}", path))?
                    .trim()
                    .to_string(),
            ),
            None => get("GCE_ACCESS_TOKEN"),
        };

        let listen_addr = get("LISTEN_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8001".to_string())
            .parse()
            .context("LISTEN_ADDR must be a socket address")?;

        Ok(Self {
            lab,
            poll,
            provider: get("PROVIDER")
                .unwrap_or_else(|| "gce".to_string())
                .to_lowercase(),
            record_store: get("RECORD_STORE")
                .unwrap_or_else(|| "postgres".to_string())
                .to_lowercase(),
            database_url: get("DATABASE_URL"),
            redis_url: get("REDIS_URL"),
            gce_access_token,
            listen_addr,
        })
    }
}

fn parse_or(key: &str, raw: Option<String>, default: u64) -> Result<u64> {
    match raw {
        Some(v) => v
            .parse()
            .with_context(|| format!("{} must be a non-negative integer (got {:?})", key, v)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_lab_layout() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings.lab.project, "virtual-lab-1");
        assert_eq!(settings.lab.zone, "us-central1-a");
        assert_eq!(settings.lab.network.region, "us-central1");
        assert_eq!(settings.lab.master_machine_type, "n1-standard-2");
        assert_eq!(settings.lab.worker_machine_type, "n1-standard-1");
        assert_eq!(settings.poll.interval, Duration::from_secs(1));
        assert_eq!(settings.poll.timeout, Some(Duration::from_secs(600)));
        assert_eq!(settings.provider, "gce");
        assert_eq!(settings.record_store, "postgres");
        assert!(settings.redis_url.is_none());
    }

    #[test]
    fn overrides_and_unbounded_timeout() {
        let settings = Settings::from_lookup(lookup(&[
            ("GCE_REGION", "europe-west1"),
            ("PROVIDER", "MOCK"),
            ("LAB_OPERATION_TIMEOUT_SECS", "0"),
            ("LAB_POLL_INTERVAL_SECS", "3"),
            ("REDIS_URL", "  "),
        ]))
        .unwrap();
        assert_eq!(settings.lab.network.subnetwork_ref(), "regions/europe-west1/subnetworks/dataplane");
        assert_eq!(settings.provider, "mock");
        assert_eq!(settings.poll.timeout, None);
        assert_eq!(settings.poll.interval, Duration::from_secs(3));
        assert!(settings.redis_url.is_none());
    }

    #[test]
    fn oversized_token_ttl_is_rejected() {
        let huge = u64::MAX.to_string();
        let err = Settings::from_lookup(lookup(&[("LAB_TOKEN_TTL_HOURS", huge.as_str())])).unwrap_err();
        assert!(err.to_string().contains("LAB_TOKEN_TTL_HOURS"));

        let settings = Settings::from_lookup(lookup(&[("LAB_TOKEN_TTL_HOURS", "2")])).unwrap();
        assert_eq!(settings.lab.token_ttl, Duration::from_secs(7200));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = Settings::from_lookup(lookup(&[("LAB_POLL_INTERVAL_SECS", "soon")])).unwrap_err();
        assert!(err.to_string().contains("LAB_POLL_INTERVAL_SECS"));
    }
}
