//! Provisioner Worker
//!
//! A worker performs one unit of configuration work for one (service, region)
//! pair. The orchestrator only sees the [`Worker`] trait; this crate provides
//! the HTTP implementation that invokes the remote region processor, an opt-in
//! retry decorator, and the classifier for benign "already configured" errors.

mod classify;
mod error;
mod http;
mod retry;
mod worker;

pub use classify::{classify_error_message, ErrorClass};
pub use error::WorkerError;
pub use http::HttpWorker;
pub use retry::{RetryPolicy, RetryingWorker};
pub use worker::{WorkInvocation, Worker};
