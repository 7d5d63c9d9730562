//! # WFM Geo Toolkit Common Library
//!
//! Shared code for the Geo Toolkit service and its tools:
//! - Database schema, initialization and row models
//! - Event types and the EventBus
//! - API authentication and response types
//! - Configuration loading
//! - Geofence, IP range and nested-set math

pub mod api;
pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod geo;
pub mod ip_range;
pub mod nested_set;
pub mod sse;

pub use error::{Error, Result};
pub use ip_range::IpAddressRange;
