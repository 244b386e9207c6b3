//
// src/proxy/mod.rs
//
mod proxy;

pub use proxy::{Dispatch, Proxy, ProxyError};
