//! HTTP surface for the stream resolver.

pub mod api;
pub mod metrics;
pub mod state;
