//! Configuration management for the monitor: the TOML file layout and its loader.

mod loader;
mod types;

pub use loader::*;
pub use types::*;
