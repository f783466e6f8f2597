//! Small framework utilities shared across modules.

pub mod config;
pub mod paths;
pub mod str;

pub use config::ConfigRepository;
pub use paths::Paths;
