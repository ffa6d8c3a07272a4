//! # Unified Configuration System
//!
//! Configuration for the presentation backend and the application loop.
//! Everything here is plain data: serializable to TOML or RON through the
//! [`Config`] trait, with builder-style setters and a `validate` pass.

use serde::{Serialize, Deserialize};
use std::path::Path;

use crate::config::{Config, ConfigError};

/// # Shader Configuration
///
/// Locations of the SPIR-V files for the fixed presentation pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// Path to the vertex shader SPIR-V file
    pub vertex_shader_path: String,
    /// Path to the fragment shader SPIR-V file
    pub fragment_shader_path: String,
}

impl ShaderConfig {
    /// Create a new shader configuration
    pub fn new(vertex_path: impl Into<String>, fragment_path: impl Into<String>) -> Self {
        Self {
            vertex_shader_path: vertex_path.into(),
            fragment_shader_path: fragment_path.into(),
        }
    }

    /// Create shader config with automatic path resolution
    ///
    /// Tries the common output locations of the build script so the binary
    /// can be launched from the workspace root or from its crate directory.
    pub fn with_path_resolution(base_vertex: &str, base_fragment: &str) -> Self {
        let shader_dirs = [
            "target/shaders/",
            "../target/shaders/",
            "../../target/shaders/",
            "shaders/",
            "./",
        ];

        let mut vertex_path = None;
        let mut fragment_path = None;

        for dir in &shader_dirs {
            let vertex_test = format!("{dir}{base_vertex}");
            let fragment_test = format!("{dir}{base_fragment}");

            if vertex_path.is_none() && Path::new(&vertex_test).exists() {
                vertex_path = Some(vertex_test);
            }
            if fragment_path.is_none() && Path::new(&fragment_test).exists() {
                fragment_path = Some(fragment_test);
            }

            if vertex_path.is_some() && fragment_path.is_some() {
                break;
            }
        }

        Self {
            vertex_shader_path: vertex_path.unwrap_or_else(|| format!("target/shaders/{base_vertex}")),
            fragment_shader_path: fragment_path.unwrap_or_else(|| format!("target/shaders/{base_fragment}")),
        }
    }

    /// Validate that shader files exist
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !Path::new(&self.vertex_shader_path).exists() {
            return Err(ConfigError::Invalid(format!("Vertex shader not found: {}", self.vertex_shader_path)));
        }
        if !Path::new(&self.fragment_shader_path).exists() {
            return Err(ConfigError::Invalid(format!("Fragment shader not found: {}", self.fragment_shader_path)));
        }
        Ok(())
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::with_path_resolution("pixel.vert.spv", "pixel.frag.spv")
    }
}

/// # Renderer Configuration
///
/// Settings read once when the device context is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Application version (major, minor, patch)
    pub application_version: (u32, u32, u32),
    /// Whether to enable Vulkan validation layers; `None` follows the build profile
    pub enable_validation: Option<bool>,
    /// Color the render pass clears to before the quad is drawn
    pub clear_color: [f32; 4],
    /// Shader configuration
    pub shaders: ShaderConfig,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            application_version: (0, 1, 0),
            enable_validation: None,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            shaders: ShaderConfig::default(),
        }
    }

    /// Set application version
    #[must_use]
    pub fn with_version(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.application_version = (major, minor, patch);
        self
    }

    /// Set custom shader configuration
    #[must_use]
    pub fn with_shaders(mut self, shaders: ShaderConfig) -> Self {
        self.shaders = shaders;
        self
    }

    /// Enable or disable validation layers
    #[must_use]
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Set the clear color
    #[must_use]
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Resolve the validation flag
    ///
    /// An explicit setting wins; otherwise validation is on in debug builds.
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("Application name cannot be empty".to_string()));
        }
        if self.application_name.contains('\0') {
            return Err(ConfigError::Invalid("Application name cannot contain NUL bytes".to_string()));
        }
        if self.clear_color.iter().any(|c| !(0.0..=1.0).contains(c)) {
            return Err(ConfigError::Invalid("Clear color components must be within [0, 1]".to_string()));
        }

        self.shaders.validate()
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("Pixel Engine Application")
    }
}

/// # Engine Configuration
///
/// Behaviour of the application loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default log filter used when `RUST_LOG` is unset
    pub log_level: String,
    /// Target FPS for frame rate limiting
    pub target_fps: Option<u32>,
    /// Close a window when Escape is pressed
    pub close_on_escape: bool,
}

impl EngineConfig {
    /// Create a new engine configuration
    pub fn new() -> Self {
        Self {
            log_level: "info".to_string(),
            target_fps: None,
            close_on_escape: true,
        }
    }

    /// Set log level
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Set target FPS
    #[must_use]
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    /// Minimum frame duration implied by `target_fps`
    pub fn frame_budget(&self) -> Option<std::time::Duration> {
        self.target_fps
            .filter(|fps| *fps > 0)
            .map(|fps| std::time::Duration::from_secs_f64(1.0 / f64::from(fps)))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// # Complete Application Configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Loop configuration
    pub engine: EngineConfig,
    /// Presentation backend configuration
    pub renderer: RendererConfig,
}

impl AppConfig {
    /// Create a new application configuration with defaults
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            engine: EngineConfig::default(),
            renderer: RendererConfig::new(app_name),
        }
    }
}

impl Config for AppConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.renderer.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFormat;

    #[test]
    fn test_validation_follows_build_profile_when_unset() {
        let config = RendererConfig::new("test");
        assert_eq!(config.validation_enabled(), cfg!(debug_assertions));

        let forced = config.clone().with_validation(false);
        assert!(!forced.validation_enabled());
        assert!(config.with_validation(true).validation_enabled());
    }

    #[test]
    fn test_validate_rejects_bad_names_and_colors() {
        let shaders = ShaderConfig::new("Cargo.toml", "Cargo.toml");

        let empty = RendererConfig::new("").with_shaders(shaders.clone());
        assert!(matches!(empty.validate(), Err(ConfigError::Invalid(_))));

        let nul = RendererConfig::new("a\0b").with_shaders(shaders.clone());
        assert!(matches!(nul.validate(), Err(ConfigError::Invalid(_))));

        let bright = RendererConfig::new("ok")
            .with_shaders(shaders.clone())
            .with_clear_color([2.0, 0.0, 0.0, 1.0]);
        assert!(matches!(bright.validate(), Err(ConfigError::Invalid(_))));

        // Cargo.toml exists relative to the crate root where tests run
        let good = RendererConfig::new("ok").with_shaders(shaders);
        assert!(good.validate().is_ok());
    }

    #[test]
    fn test_missing_shader_is_reported() {
        let config = RendererConfig::new("ok")
            .with_shaders(ShaderConfig::new("does/not/exist.spv", "Cargo.toml"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Vertex shader not found"));
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = AppConfig::new("round trip");
        config.engine = config.engine.with_target_fps(60).with_log_level("debug");
        config.renderer = config.renderer.with_validation(true).with_version(1, 2, 3);

        let text = ConfigFormat::Toml.render(&config).unwrap();
        let parsed: AppConfig = ConfigFormat::Toml.parse(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_ron_parse() {
        let text = r#"(
            engine: (log_level: "warn", target_fps: None, close_on_escape: false),
            renderer: (
                application_name: "ron app",
                application_version: (1, 0, 0),
                shaders: (vertex_shader_path: "v.spv", fragment_shader_path: "f.spv"),
                enable_validation: Some(false),
                clear_color: (0.0, 0.0, 0.0, 1.0),
            ),
        )"#;
        let parsed: AppConfig = ConfigFormat::Ron.parse(text).unwrap();
        assert_eq!(parsed.renderer.application_name, "ron app");
        assert!(!parsed.renderer.validation_enabled());
        assert!(!parsed.engine.close_on_escape);
    }

    #[test]
    fn test_frame_budget() {
        assert_eq!(EngineConfig::new().frame_budget(), None);
        let budget = EngineConfig::new().with_target_fps(10).frame_budget().unwrap();
        assert_eq!(budget.as_millis(), 100);
        let zero = EngineConfig { target_fps: Some(0), ..EngineConfig::new() };
        assert_eq!(zero.frame_budget(), None);
    }

    #[test]
    fn test_format_follows_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("app.toml")).unwrap(), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("dir/app.RON")).unwrap(), ConfigFormat::Ron);

        // The extension is checked before the file is opened
        let err = AppConfig::load_from_file("settings.json").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
        let err = AppConfig::default().save_to_file("settings").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));

        let err = AppConfig::load_from_file("does/not/exist.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_parse_errors_name_the_format() {
        let err = ConfigFormat::Toml.parse::<AppConfig>("engine = [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { format: ConfigFormat::Toml, .. }));
        assert!(err.to_string().starts_with("TOML parse error"));
    }

    #[test]
    fn test_load_validates_and_falls_back() {
        let dir = std::env::temp_dir().join(format!("pixel_engine_config_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        // Saved as-is, but the empty name is refused on load
        let path = dir.join("bad.ron");
        let mut bad = AppConfig::new("x").with_shaders_for_test();
        bad.renderer.application_name.clear();
        bad.save_to_file(&path).unwrap();
        assert!(matches!(AppConfig::load_from_file(&path), Err(ConfigError::Invalid(_))));

        let path = dir.join("good.toml");
        let good = AppConfig::new("saved").with_shaders_for_test();
        good.save_to_file(&path).unwrap();
        assert_eq!(AppConfig::load_from_file(&path).unwrap(), good);

        let missing = AppConfig::load_or_else(dir.join("missing.toml"), || AppConfig::new("fallback")).unwrap();
        assert_eq!(missing.renderer.application_name, "fallback");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    impl AppConfig {
        // Cargo.toml exists relative to the crate root where tests run
        fn with_shaders_for_test(mut self) -> Self {
            self.renderer.shaders = ShaderConfig::new("Cargo.toml", "Cargo.toml");
            self
        }
    }
}
