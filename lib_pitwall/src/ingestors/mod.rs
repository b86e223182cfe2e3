//! # Data Ingestors Module
//!
//! Concrete upstream telemetry sources. Each submodule implements
//! [`TelemetrySource`](crate::core::TelemetrySource) for one provider and
//! normalizes its feeds into the record shapes the engine expects.
//!
//! ## Contained Modules:
//! - **`openf1_polling`**: REST polling client for the public OpenF1 API.

#![forbid(unsafe_code)]

/// REST polling source for the OpenF1 API.
pub mod openf1_polling;

pub use openf1_polling::{OpenF1Config, OpenF1Source};
