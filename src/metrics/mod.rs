//! Metrics export.
//!
//! Pushes the result of every invocation to a Prometheus Push Gateway when
//! enabled in the configuration.
//!
//! # Submodules
//!
//! - `prom` - Prometheus metrics integration

pub mod prom;
