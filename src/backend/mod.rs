//! Backends and the round-robin pool that selects among them.

mod pool;
mod server;

pub use pool::ServerPool;
pub use server::Backend;
