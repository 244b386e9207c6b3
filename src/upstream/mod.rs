// src/upstream/mod.rs
mod instance;
mod registry;

pub use instance::Instance;
pub use registry::{Selection, Upstream, UpstreamRegistry};
