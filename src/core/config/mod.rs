pub mod data;
pub mod io;

pub use data::{Config, ModelConfig, Settings};
pub use io::ConfigError;
