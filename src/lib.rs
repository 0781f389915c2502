//! Folio - book metadata lookup service
//!
//! Resolves ISBNs against a rate-limited upstream catalog with:
//! - Cache-aside reads so repeat lookups never touch the network
//! - Request coalescing: one upstream call per identifier in flight
//! - A bounded queue drained by a single, paced worker
//! - Best-effort cover image storage
//! - Prometheus metrics

pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod lookup;
pub mod metrics;
pub mod services;
pub mod utils;
