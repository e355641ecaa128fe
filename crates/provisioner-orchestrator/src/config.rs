//! Orchestrator configuration.
//!
//! Values are read from the environment the functions are deployed with. Only
//! the client name and the bucket are mandatory; everything else has a default.

use std::collections::BTreeSet;
use std::time::Duration;

use thiserror::Error;

use provisioner_core::{FeatureFlags, FlagPolicy, RegionId, RunContext};
use provisioner_worker::RetryPolicy;

use crate::dispatcher::DispatchConfig;
use crate::registry::services;
use crate::scope::ScopeSettings;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Client the account is provisioned for.
    pub client_name: String,

    /// Destination bucket for collected logs.
    pub bucket: String,

    /// Role granted read access (EKS access entries).
    pub role_arn: Option<String>,

    /// Raw feature-enable values for the optional services.
    pub flags: FeatureFlags,

    /// How feature-enable values are interpreted.
    pub flag_policy: FlagPolicy,

    /// Always include the baseline `os` service.
    pub include_baseline: bool,

    /// Regions never processed.
    pub excluded_regions: BTreeSet<RegionId>,

    /// Fixed region list, used instead of discovery when `regions_url` is unset.
    pub static_regions: Vec<RegionId>,

    /// Account-capability endpoint returning the enabled regions.
    pub regions_url: Option<String>,

    /// Region processor endpoint the HTTP worker posts to.
    pub region_processor_url: String,

    /// Region used when discovery fails and the function ARN is unknown.
    pub fallback_region: RegionId,

    /// Minimum success rate for a lifecycle SUCCESS callback.
    pub success_threshold: f64,

    /// Maximum concurrent worker calls.
    pub max_concurrency: usize,

    /// Pause before each worker call.
    pub invocation_delay: Duration,

    /// Upper bound on a single worker attempt.
    pub task_timeout: Duration,

    /// Attempts per worker call (1 = no retries).
    pub worker_max_attempts: u32,

    /// Upper bound on region discovery before falling back.
    pub discovery_timeout: Duration,

    /// Upper bound on the lifecycle callback PUT.
    pub callback_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_name: String::new(),
            bucket: String::new(),
            role_arn: None,
            flags: FeatureFlags::new()
                .with(services::DNS, "false")
                .with(services::EKS, "false")
                .with(services::VFL, "false"),
            flag_policy: FlagPolicy::Permissive,
            include_baseline: true,
            excluded_regions: BTreeSet::new(),
            static_regions: Vec::new(),
            regions_url: None,
            region_processor_url: "http://127.0.0.1:9000/process".to_string(),
            fallback_region: RegionId::new("us-east-1"),
            success_threshold: 0.8,
            max_concurrency: 4,
            invocation_delay: Duration::from_millis(100),
            task_timeout: Duration::from_secs(60),
            worker_max_attempts: 1,
            discovery_timeout: Duration::from_secs(10),
            callback_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        config.client_name = get("CLIENT_NAME").ok_or(ConfigError::Missing("CLIENT_NAME"))?;
        config.bucket = get("CYNGULAR_BUCKET").ok_or(ConfigError::Missing("CYNGULAR_BUCKET"))?;
        config.role_arn = get("CYNGULAR_ROLE_ARN");

        for (key, service) in [
            ("ENABLE_DNS", services::DNS),
            ("ENABLE_EKS", services::EKS),
            ("ENABLE_VPC_FLOW_LOGS", services::VFL),
        ] {
            if let Some(value) = get(key) {
                config.flags.set(service, value);
            }
        }

        if let Some(value) = get("FLAG_POLICY") {
            config.flag_policy = value.parse().map_err(|e| ConfigError::Invalid {
                key: "FLAG_POLICY",
                value: value.clone(),
                reason: format!("{e}"),
            })?;
        }
        if let Some(value) = get("INCLUDE_BASELINE") {
            config.include_baseline = parse_bool("INCLUDE_BASELINE", &value)?;
        }

        if let Some(value) = get("EXCLUDED_REGIONS") {
            config.excluded_regions = split_list(&value).collect();
        }
        if let Some(value) = get("REGIONS") {
            config.static_regions = split_list(&value).collect();
        }
        config.regions_url = get("REGIONS_URL");
        if let Some(value) = get("REGION_PROCESSOR_URL") {
            config.region_processor_url = value;
        }
        if let Some(value) = get("AWS_REGION") {
            config.fallback_region = RegionId::new(value);
        }

        if let Some(value) = get("SUCCESS_THRESHOLD") {
            config.success_threshold = parse_num("SUCCESS_THRESHOLD", &value)?;
        }
        if let Some(value) = get("MAX_CONCURRENT_WORKERS") {
            config.max_concurrency = parse_num("MAX_CONCURRENT_WORKERS", &value)?;
        }
        if let Some(value) = get("INVOCATION_DELAY_MS") {
            config.invocation_delay = Duration::from_millis(parse_num("INVOCATION_DELAY_MS", &value)?);
        }
        if let Some(value) = get("TASK_TIMEOUT_SECS") {
            config.task_timeout = Duration::from_secs(parse_num("TASK_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = get("WORKER_MAX_ATTEMPTS") {
            config.worker_max_attempts = parse_num("WORKER_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = get("DISCOVERY_TIMEOUT_SECS") {
            config.discovery_timeout = Duration::from_secs(parse_num("DISCOVERY_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = get("CALLBACK_TIMEOUT_SECS") {
            config.callback_timeout = Duration::from_secs(parse_num("CALLBACK_TIMEOUT_SECS", &value)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.success_threshold) {
            return Err(ConfigError::Invalid {
                key: "SUCCESS_THRESHOLD",
                value: self.success_threshold.to_string(),
                reason: "must be between 0 and 1".to_string(),
            });
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_CONCURRENT_WORKERS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.task_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "TASK_TIMEOUT_SECS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.worker_max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "WORKER_MAX_ATTEMPTS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        for (key, value) in [
            ("DISCOVERY_TIMEOUT_SECS", self.discovery_timeout),
            ("CALLBACK_TIMEOUT_SECS", self.callback_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid {
                    key,
                    value: "0".to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Values every task of a run can bind parameters from.
    pub fn run_context(&self) -> RunContext {
        RunContext {
            client_name: self.client_name.clone(),
            bucket: self.bucket.clone(),
            role_arn: self.role_arn.clone(),
            flags: self.flags.clone(),
        }
    }

    /// Retry policy for worker calls; each attempt is bounded by `task_timeout`.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.worker_max_attempts,
            attempt_timeout: Some(self.task_timeout),
            ..RetryPolicy::default()
        }
    }

    /// The per-task bound covers every attempt and backoff of the retry policy.
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            max_concurrency: self.max_concurrency,
            invocation_delay: self.invocation_delay,
            task_timeout: self.retry_policy().total_budget(self.task_timeout),
        }
    }

    pub fn scope_settings(&self) -> ScopeSettings {
        ScopeSettings {
            flags: self.flags.clone(),
            flag_policy: self.flag_policy,
            include_baseline: self.include_baseline,
            excluded_regions: self.excluded_regions.clone(),
            discovery_timeout: self.discovery_timeout,
        }
    }
}

fn split_list(value: &str) -> impl Iterator<Item = RegionId> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(RegionId::from)
}

fn parse_num<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}
