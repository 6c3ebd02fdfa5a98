//! simplelb - A minimal round-robin Layer 7 load balancer
//!
//! This crate provides:
//! - Round-robin selection over a fixed pool of HTTP backends
//! - Per-backend liveness flags that selection skips
//! - Periodic TCP or HTTP health checks
//! - Bounded retries and fail-over when forwarding fails

pub mod backend;
pub mod config;
pub mod dispatch;
pub mod frontend;
pub mod health;
pub mod proxy;
pub mod util;

pub use backend::{Backend, ServerPool};
pub use config::Config;
pub use dispatch::Dispatcher;
