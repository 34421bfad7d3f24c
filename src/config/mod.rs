// Re-export all items from the submodules
mod relay_config;

pub use relay_config::{load_or_default, RelayConfig, RetryConfig};
