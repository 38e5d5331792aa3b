pub mod loader;
pub mod schema;
pub mod store;

pub use loader::{default_settings_path, load_settings, load_settings_from_str, save_settings};
pub use schema::{
    FailoverPolicy, Provider, ProviderCredential, Settings, SubtitleProviderConfig,
};
pub use store::{JsonSettingsStore, MemorySettingsStore, SettingsStore};
