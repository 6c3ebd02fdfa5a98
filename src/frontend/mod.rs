//! Frontend listener.
//!
//! Accepts client connections and serves HTTP/1.1 on them.

mod listener;

pub use listener::FrontendListener;
