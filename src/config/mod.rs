//! Execution context and configuration layers
//!
//! The context merges three layers, last wins:
//! 1. Built-in defaults
//! 2. User config file (~/.config/stagewright/config.toml)
//! 3. CLI `-s stage.key=value` overrides

mod context;
mod defaults;
mod merge;

pub use context::{
    parse_override, ConfigError, ConfigOrigin, ConfigProvider, ConfigSource, ExecutionContext,
};
pub use defaults::BuiltinDefaults;
pub use merge::{deep_merge, merge_layers};
