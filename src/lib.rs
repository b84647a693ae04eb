//! Photo restoration and editing service backed by a hosted image model.
//!
//! Uploads are fingerprinted by content, served from a permanent cache when
//! the same input was seen before, and otherwise sent to Replicate. Every
//! successful operation is appended to the caller's history; anonymous
//! callers get a small per-feature quota tracked through a cookie.

pub mod config;
pub mod embedded;
pub mod error;
pub mod feature;
pub mod fingerprint;
pub mod http;
pub mod identity;
pub mod model;
pub mod pipeline;
pub mod seed;
pub mod stats;
pub mod store;
pub mod telemetry;

pub use error::AppError;
pub use feature::Feature;
