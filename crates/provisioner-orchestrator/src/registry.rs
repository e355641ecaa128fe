//! Service registry - maps service ids to their worker and parameter list.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use provisioner_core::{ParamKind, RegionId, RunContext, ServiceId};
use provisioner_worker::Worker;

/// Well-known service ids.
pub mod services {
    /// Route 53 resolver query logging.
    pub const DNS: &str = "dns";
    /// VPC flow logs.
    pub const VFL: &str = "vfl";
    /// EKS audit logging and access entries.
    pub const EKS: &str = "eks";
    /// OS-level audit daemon configuration. The baseline service.
    pub const OS: &str = "os";
}

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Unknown service: {0}")]
    UnknownService(ServiceId),

    #[error("Missing parameter '{param}' for service '{service}'")]
    MissingParameter { service: ServiceId, param: ParamKind },

    #[error("Service registered twice: {0}")]
    DuplicateService(ServiceId),
}

/// How to build a worker invocation for one service.
pub struct ServiceDescriptor {
    pub id: ServiceId,

    /// Parameters the worker needs, in binding order.
    pub params: Vec<ParamKind>,

    /// Worker that performs this service's configuration.
    pub handler: Arc<dyn Worker>,
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("id", &self.id)
            .field("params", &self.params)
            .field("handler", &self.handler.name())
            .finish()
    }
}

/// Read-only mapping from service id to descriptor.
///
/// Built once at startup and shared behind an `Arc`; never mutated afterwards.
#[derive(Debug)]
pub struct ServiceRegistry {
    services: BTreeMap<ServiceId, ServiceDescriptor>,
}

impl ServiceRegistry {
    pub fn builder() -> ServiceRegistryBuilder {
        ServiceRegistryBuilder::default()
    }

    /// The four known services, all handled by `worker`.
    pub fn standard(worker: Arc<dyn Worker>) -> Self {
        let entries: [(&str, &[ParamKind]); 4] = [
            (
                services::DNS,
                &[ParamKind::Region, ParamKind::Bucket, ParamKind::EnableParam],
            ),
            (
                services::VFL,
                &[ParamKind::Region, ParamKind::Bucket, ParamKind::EnableParam],
            ),
            (
                services::EKS,
                &[
                    ParamKind::Region,
                    ParamKind::RoleArn,
                    ParamKind::EnableParam,
                    ParamKind::Bucket,
                ],
            ),
            (services::OS, &[ParamKind::Region]),
        ];

        let services = entries
            .into_iter()
            .map(|(id, params)| {
                let id = ServiceId::new(id);
                let descriptor = ServiceDescriptor {
                    id: id.clone(),
                    params: params.to_vec(),
                    handler: worker.clone(),
                };
                (id, descriptor)
            })
            .collect();

        Self { services }
    }

    /// Look up a service.
    pub fn lookup(&self, id: &ServiceId) -> Result<&ServiceDescriptor, RegistryError> {
        self.services
            .get(id)
            .ok_or_else(|| RegistryError::UnknownService(id.clone()))
    }

    pub fn contains(&self, id: &ServiceId) -> bool {
        self.services.contains_key(id)
    }

    /// Registered ids, in order.
    pub fn ids(&self) -> impl Iterator<Item = &ServiceId> {
        self.services.keys()
    }

    /// Check that every parameter of the given services resolves against `ctx`.
    ///
    /// Ids that are not registered are skipped; the dispatcher reports those
    /// as failed tasks.
    pub fn validate<'a>(
        &self,
        ctx: &RunContext,
        ids: impl IntoIterator<Item = &'a ServiceId>,
    ) -> Result<(), RegistryError> {
        for id in ids {
            let Some(descriptor) = self.services.get(id) else {
                continue;
            };
            if let Some(param) = descriptor
                .params
                .iter()
                .find(|param| !ctx.can_resolve(**param, id))
            {
                return Err(RegistryError::MissingParameter {
                    service: id.clone(),
                    param: *param,
                });
            }
        }
        Ok(())
    }

    /// Bind a descriptor's parameters for one region, in descriptor order.
    pub fn bind(
        descriptor: &ServiceDescriptor,
        region: &RegionId,
        ctx: &RunContext,
    ) -> Result<Vec<(ParamKind, String)>, RegistryError> {
        descriptor
            .params
            .iter()
            .map(|param| {
                ctx.resolve(*param, &descriptor.id, region)
                    .map(|value| (*param, value))
                    .map_err(|_| RegistryError::MissingParameter {
                        service: descriptor.id.clone(),
                        param: *param,
                    })
            })
            .collect()
    }
}

/// Builder for a [`ServiceRegistry`].
#[derive(Default)]
pub struct ServiceRegistryBuilder {
    descriptors: Vec<ServiceDescriptor>,
}

impl ServiceRegistryBuilder {
    /// Register a service.
    pub fn register(
        mut self,
        id: impl Into<ServiceId>,
        params: &[ParamKind],
        handler: Arc<dyn Worker>,
    ) -> Self {
        self.descriptors.push(ServiceDescriptor {
            id: id.into(),
            params: params.to_vec(),
            handler,
        });
        self
    }

    /// Finish the registry, rejecting duplicate ids.
    pub fn build(self) -> Result<ServiceRegistry, RegistryError> {
        let mut services = BTreeMap::new();
        for descriptor in self.descriptors {
            if services.contains_key(&descriptor.id) {
                return Err(RegistryError::DuplicateService(descriptor.id));
            }
            services.insert(descriptor.id.clone(), descriptor);
        }
        Ok(ServiceRegistry { services })
    }
}
