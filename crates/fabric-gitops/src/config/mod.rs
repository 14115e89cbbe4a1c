pub mod loader;
pub mod schema;

pub use loader::{database_path, load_config, load_config_from_str};
pub use schema::{
    ClusterConfig, EngineConfig, GitConfig, IngestionConfig, RegistryConfig, SchedulerConfig,
    DEFAULT_RECOGNIZED_GROUP,
};
