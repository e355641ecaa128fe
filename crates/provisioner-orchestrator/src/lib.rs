//! Provisioner Orchestrator Library
//!
//! Fans configuration work for a set of services out across the enabled
//! regions of an account, aggregates the per-task results into a report and,
//! for infrastructure lifecycle events, answers the lifecycle protocol with
//! exactly one terminal callback.

pub mod config;
pub mod dispatcher;
pub mod http;
pub mod lifecycle;
pub mod metrics;
pub mod orchestrator;
pub mod registry;
pub mod router;
pub mod scope;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{Config, ConfigError};
pub use dispatcher::{DispatchConfig, Dispatcher};
pub use lifecycle::{
    CallbackBody, CallbackSender, HttpCallbackSender, LifecycleError, LifecycleEvent,
    LifecycleResponder, Outcome, RequestType, Responded, TerminalCallback,
};
pub use metrics::Metrics;
pub use orchestrator::{InvocationContext, InvocationResponse, Orchestrator, OrchestratorError};
pub use registry::{ServiceDescriptor, ServiceRegistry, ServiceRegistryBuilder, RegistryError};
pub use router::{classify, Invocation, RouterError};
pub use scope::{
    DiscoveryError, HttpRegionDiscovery, RegionDiscovery, Scope, ScopeResolver, ScopeSettings,
    StaticRegions,
};
pub use state::AppState;
