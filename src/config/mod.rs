pub mod settings;

pub use settings::{CacheConfig, ExportConfig, MonitorConfig, PersistenceConfig};
