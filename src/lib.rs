pub mod api;
pub mod cli;
pub mod config;
pub mod docs;
pub mod logging;
pub mod playground;
pub mod settings;
pub mod types;

pub use api::{ApiClient, ApiError};
pub use cli::run_cli;
pub use config::{BackendConfig, Config, PlaygroundConfig, StepRetention, StorageConfig};
pub use playground::{Conversation, Playground, WsConnector};
pub use settings::{FileStore, KeyValueStore, MemoryStore, ProviderSettings, SettingsStore};
