//! Typed worker parameters and the per-run context they are bound from.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::{CoreError, RegionId, ServiceId};

/// A parameter a service's worker invocation needs.
///
/// Every variant maps to exactly one field of [`RunContext`] (or to the task's
/// region), so binding is a typed lookup rather than a string match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Region,
    ClientName,
    #[serde(rename = "cyngular_bucket")]
    Bucket,
    #[serde(rename = "cyngular_role_arn")]
    RoleArn,
    EnableParam,
}

impl ParamKind {
    /// Name used in worker payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Region => "region",
            Self::ClientName => "client_name",
            Self::Bucket => "cyngular_bucket",
            Self::RoleArn => "cyngular_role_arn",
            Self::EnableParam => "enable_param",
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a raw feature-enable value is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagPolicy {
    /// Only `"true"` (case-insensitive) enables the service.
    Strict,
    /// Anything but `"false"` (case-insensitive) enables the service; a custom
    /// bucket name counts as enabled.
    #[default]
    Permissive,
}

impl FlagPolicy {
    /// Whether `raw` enables a service under this policy. Blank values never do.
    pub fn is_enabled(&self, raw: &str) -> bool {
        let value = raw.trim();
        if value.is_empty() {
            return false;
        }
        match self {
            Self::Strict => value.eq_ignore_ascii_case("true"),
            Self::Permissive => !value.eq_ignore_ascii_case("false"),
        }
    }
}

impl FromStr for FlagPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "permissive" => Ok(Self::Permissive),
            other => Err(CoreError::UnknownFlagPolicy(other.to_string())),
        }
    }
}

/// Raw feature-enable values keyed by service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    values: BTreeMap<ServiceId, String>,
}

impl FeatureFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set a flag value.
    pub fn with(mut self, service: impl Into<ServiceId>, value: impl Into<String>) -> Self {
        self.set(service, value);
        self
    }

    pub fn set(&mut self, service: impl Into<ServiceId>, value: impl Into<String>) {
        self.values.insert(service.into(), value.into());
    }

    /// Raw value for `service`, if one was configured.
    pub fn get(&self, service: &ServiceId) -> Option<&str> {
        self.values.get(service).map(String::as_str)
    }

    /// Services whose flag is enabled under `policy`, in id order.
    pub fn enabled(&self, policy: FlagPolicy) -> Vec<ServiceId> {
        self.values
            .iter()
            .filter(|(_, raw)| policy.is_enabled(raw))
            .map(|(service, _)| service.clone())
            .collect()
    }
}

/// Values available to every task of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunContext {
    pub client_name: String,
    pub bucket: String,
    pub role_arn: Option<String>,
    pub flags: FeatureFlags,
}

impl RunContext {
    /// Whether `kind` has a value for `service`, independent of region.
    pub fn can_resolve(&self, kind: ParamKind, service: &ServiceId) -> bool {
        match kind {
            ParamKind::Region => true,
            ParamKind::ClientName => !self.client_name.is_empty(),
            ParamKind::Bucket => !self.bucket.is_empty(),
            ParamKind::RoleArn => self.role_arn.as_deref().is_some_and(|arn| !arn.is_empty()),
            ParamKind::EnableParam => self.flags.get(service).is_some(),
        }
    }

    /// Resolve `kind` for one task.
    pub fn resolve(
        &self,
        kind: ParamKind,
        service: &ServiceId,
        region: &RegionId,
    ) -> Result<String, CoreError> {
        if !self.can_resolve(kind, service) {
            return Err(CoreError::UnresolvedParameter {
                service: service.to_string(),
                param: kind.to_string(),
            });
        }

        let value = match kind {
            ParamKind::Region => region.to_string(),
            ParamKind::ClientName => self.client_name.clone(),
            ParamKind::Bucket => self.bucket.clone(),
            ParamKind::RoleArn => self.role_arn.clone().unwrap_or_default(),
            ParamKind::EnableParam => self.flags.get(service).unwrap_or_default().to_string(),
        };
        Ok(value)
    }
}
