//! # Core Module
//!
//! Shared configuration types consumed by the application driver and the
//! Vulkan backend.

pub mod config;

pub use config::{
    AppConfig,
    EngineConfig,
    RendererConfig,
    ShaderConfig,
};
pub use crate::config::{Config, ConfigError};
