/// Engine configuration loaded from the environment.
pub mod config;
/// Tracing subscriber setup.
pub mod logging;

pub use config::Config;
