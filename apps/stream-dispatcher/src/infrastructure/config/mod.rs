//! Configuration Module
//!
//! Environment-driven settings for the dispatch engine and its binary.

mod settings;

pub use settings::{
    ConfigError, DemoSettings, DispatchSettings, EngineConfig, ReconnectSettings, ServerSettings,
};
