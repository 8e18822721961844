pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str, DATABASE_PATH_ENV};
pub use schema::{ClassifierConfig, Config, LoggingConfig, QueueConfig, RunnerConfig};
