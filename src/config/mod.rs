//! Configuration for the parallel map engine
//!
//! - `options` - per-call options (`MapConfig`, `MapOptions`)
//! - `settings` - engine-wide settings loaded from TOML and the environment

pub mod options;
pub mod settings;

pub use options::{ErrorHandler, MapConfig, MapOptions};
pub use settings::Settings;
