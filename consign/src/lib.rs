//! In-process metrics aggregation and delivery.
//!
//! Application code records counters, rates and gauges through [`Stats`] at
//! arbitrary frequency; recording is a non-blocking enqueue that never waits
//! on aggregation or the network. A background pipeline -- one control task
//! fanning out to a pool of shard-owning workers -- sums, tracks and
//! last-writes those updates in memory, and on every flush interval ships a
//! consolidated batch to the telemetry backend through the
//! [`consign_client`] crate.
//!
//! Delivery is best-effort: a failed batch is recorded in a bounded error
//! ring and dropped, never retried. A saturated ingestion queue discards the
//! update and increments a counter rather than blocking the caller.

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

pub mod config;

mod accumulator;
mod gate;
mod key;
mod stats;

pub use config::Config;
pub use stats::{Error, ErrorCallback, FlushCallback, Stats};

pub use consign_client as client;
