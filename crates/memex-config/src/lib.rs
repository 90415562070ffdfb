pub mod loader;
pub mod schema;

pub use loader::{find_config_file, load_config, load_config_from_file, ConfigFormat};
pub use schema::{LogConfig, LogFormat, MemexConfig, ProxyConfig, StoreConfig};
