//! Scope resolution - which regions and services a run covers.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use provisioner_core::{FeatureFlags, FlagPolicy, RegionId, ServiceId, Task};

use crate::registry::services;

/// Region discovery errors.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("region discovery request failed: {0}")]
    Request(String),

    #[error("region discovery returned status {0}")]
    Status(u16),

    #[error("region discovery returned an unexpected shape: {0}")]
    Malformed(String),

    #[error("region discovery did not answer within {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for DiscoveryError {
    fn from(e: reqwest::Error) -> Self {
        Self::Request(e.to_string())
    }
}

/// Source of the account's enabled regions.
#[async_trait]
pub trait RegionDiscovery: Send + Sync {
    async fn enabled_regions(&self) -> Result<Vec<RegionId>, DiscoveryError>;
}

/// A fixed region list.
pub struct StaticRegions(Vec<RegionId>);

impl StaticRegions {
    pub fn new(regions: impl IntoIterator<Item = RegionId>) -> Self {
        Self(regions.into_iter().collect())
    }
}

#[async_trait]
impl RegionDiscovery for StaticRegions {
    async fn enabled_regions(&self) -> Result<Vec<RegionId>, DiscoveryError> {
        Ok(self.0.clone())
    }
}

/// Fetches enabled regions from an account-capability endpoint.
///
/// Accepts either a plain JSON array of names or the
/// `{"Regions": [{"RegionName": ...}]}` shape of a describe-regions answer.
pub struct HttpRegionDiscovery {
    inner: reqwest::Client,
    url: String,
}

impl HttpRegionDiscovery {
    /// Create a discovery client whose requests give up after `timeout`.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, DiscoveryError> {
        let inner = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            inner,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl RegionDiscovery for HttpRegionDiscovery {
    async fn enabled_regions(&self) -> Result<Vec<RegionId>, DiscoveryError> {
        let response = self.inner.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(DiscoveryError::Status(response.status().as_u16()));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| DiscoveryError::Malformed(e.to_string()))?;
        parse_regions(&body)
    }
}

fn parse_regions(body: &Value) -> Result<Vec<RegionId>, DiscoveryError> {
    let entries = match body {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("Regions") {
            Some(Value::Array(items)) => items,
            _ => return Err(DiscoveryError::Malformed("missing 'Regions' array".to_string())),
        },
        other => return Err(DiscoveryError::Malformed(other.to_string())),
    };

    entries
        .iter()
        .map(|entry| {
            let name = match entry {
                Value::String(name) => Some(name.as_str()),
                Value::Object(map) => map.get("RegionName").and_then(Value::as_str),
                _ => None,
            };
            name.map(RegionId::from)
                .ok_or_else(|| DiscoveryError::Malformed(entry.to_string()))
        })
        .collect()
}

/// The regions and services one run covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    pub regions: BTreeSet<RegionId>,
    pub services: BTreeSet<ServiceId>,
}

impl Scope {
    pub fn new(
        regions: impl IntoIterator<Item = RegionId>,
        services: impl IntoIterator<Item = ServiceId>,
    ) -> Self {
        Self {
            regions: regions.into_iter().collect(),
            services: services.into_iter().collect(),
        }
    }

    /// Scope holding exactly one task.
    pub fn single(task: Task) -> Self {
        Self::new([task.region], [task.service])
    }

    /// `services × regions`, sorted by service then region.
    pub fn tasks(&self) -> Vec<Task> {
        Task::product(&self.services, &self.regions)
    }

    pub fn task_count(&self) -> usize {
        self.services.len() * self.regions.len()
    }
}

/// Settings that decide which services are in scope.
#[derive(Debug, Clone)]
pub struct ScopeSettings {
    pub flags: FeatureFlags,
    pub flag_policy: FlagPolicy,
    pub include_baseline: bool,
    pub excluded_regions: BTreeSet<RegionId>,

    /// Discovery taking longer than this degrades like a failure.
    pub discovery_timeout: Duration,
}

/// Determines `regions × services` for a run.
pub struct ScopeResolver {
    discovery: Arc<dyn RegionDiscovery>,
    settings: ScopeSettings,
}

impl ScopeResolver {
    pub fn new(discovery: Arc<dyn RegionDiscovery>, settings: ScopeSettings) -> Self {
        Self {
            discovery,
            settings,
        }
    }

    /// Resolve the full scope. Never fails: discovery errors and timeouts
    /// degrade the region set to `current_region`.
    pub async fn resolve(&self, current_region: &RegionId) -> Scope {
        let regions = self.resolve_regions(current_region).await;
        let services = self.resolve_services();
        Scope { regions, services }
    }

    pub async fn resolve_regions(&self, current_region: &RegionId) -> BTreeSet<RegionId> {
        let limit = self.settings.discovery_timeout;
        let discovered = tokio::time::timeout(limit, self.discovery.enabled_regions())
            .await
            .unwrap_or(Err(DiscoveryError::Timeout(limit)));

        match discovered {
            Ok(discovered) => {
                let regions: BTreeSet<RegionId> = discovered
                    .into_iter()
                    .filter(|r| !self.settings.excluded_regions.contains(r))
                    .collect();
                info!(
                    region = %current_region,
                    count = regions.len(),
                    regions = ?regions,
                    "Found enabled regions"
                );
                regions
            }
            Err(e) => {
                warn!(
                    region = %current_region,
                    error = %e,
                    "ScopeResolutionDegraded: region discovery failed, falling back to current region"
                );
                BTreeSet::from([current_region.clone()])
            }
        }
    }

    pub fn resolve_services(&self) -> BTreeSet<ServiceId> {
        let mut services: BTreeSet<ServiceId> = self
            .settings
            .flags
            .enabled(self.settings.flag_policy)
            .into_iter()
            .collect();
        if self.settings.include_baseline {
            services.insert(ServiceId::new(services::OS));
        }
        info!(
            services = ?services,
            policy = ?self.settings.flag_policy,
            "Services to configure"
        );
        services
    }
}
