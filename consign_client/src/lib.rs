//! Backend delivery client for the consign metrics pipeline.
//!
//! This crate is the wire boundary of the consign project: the shapes that
//! travel to the telemetry backend and the transport that carries them. The
//! aggregation engine in the `consign` crate is unaware of HTTP details, it
//! only speaks [`ApiClient`]. Supplying an alternate implementation -- a
//! recording client in tests, a forwarder in exotic deployments -- is the
//! intended seam.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![allow(clippy::multiple_crate_versions)]

use async_trait::async_trait;

pub mod http;
mod wire;

pub use http::HttpClient;
pub use wire::{
    CheckStatus, Event, EventAlertType, EventPriority, MetricClass, Series, ServiceCheck,
};

/// Errors produced by backend delivery.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The transport failed before a response was received.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The backend answered with a non-success status.
    #[error("Api responded with status {status}")]
    Api {
        /// HTTP status code returned by the backend.
        status: u16,
    },
}

/// Capability to deliver rendered telemetry to a backend.
///
/// Implementations are expected to be cheap to share behind an `Arc` and to
/// perform no retries of their own: the caller decides what a failed delivery
/// means.
#[async_trait]
pub trait ApiClient: Send + Sync + std::fmt::Debug {
    /// Deliver one batch of rendered metric series.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch could not be delivered.
    async fn send_series(&self, series: &[Series]) -> Result<(), Error>;

    /// Deliver a single service check.
    ///
    /// # Errors
    ///
    /// Returns an error if the check could not be delivered.
    async fn send_service_check(&self, check: &ServiceCheck) -> Result<(), Error>;

    /// Deliver a single event.
    ///
    /// # Errors
    ///
    /// Returns an error if the event could not be delivered.
    async fn send_event(&self, event: &Event) -> Result<(), Error>;
}
