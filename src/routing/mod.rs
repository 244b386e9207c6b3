// src/routing/mod.rs
mod pattern;
mod table;

pub use pattern::PathPattern;
pub use table::{Route, RouteTable};
