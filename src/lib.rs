//! Read-only cloud waste detection.
//!
//! Collectors gather inventory and utilization for one account/region,
//! the decision engine turns each resource into costed findings, and the
//! scanner drives a scan through its lifecycle and stores the result.

pub mod cli;
pub mod collect;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod pricing;
pub mod report;
pub mod scan;
pub mod series;
pub mod source;
pub mod store;
