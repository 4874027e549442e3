// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every key is optional. A missing file means defaults; a malformed file is
// reported and also falls back to defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub shaders: ShaderConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Triangle".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// RGBA, 0-1 range. Baked into the command buffers when they are recorded.
    pub clear_color: [f32; 4],
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Only honoured in debug builds, and only when the layer is installed.
    pub validation_layers: bool,
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
        }
    }
}

/// SPIR-V blob locations, relative to the working directory
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("./shader/vert.spv"),
            fragment: PathBuf::from("./shader/frag.spv"),
        }
    }
}

impl Config {
    /// Load configuration from config.toml, falling back to defaults.
    ///
    /// Runs before the logger exists (the log level lives in here), so a load
    /// failure is handed back for the caller to report.
    pub fn load() -> (Self, Option<anyhow::Error>) {
        Self::load_or_default("config.toml")
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, Option<anyhow::Error>) {
        match Self::load_from_path(path) {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Validation is a debug-build feature
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.graphics.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(config.shaders.vertex, PathBuf::from("./shader/vert.spv"));
        assert_eq!(config.shaders.fragment, PathBuf::from("./shader/frag.spv"));
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = Config::parse(
            r#"
            [window]
            title = "Triangle"

            [shaders]
            fragment = "assets/frag.spv"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "Triangle");
        assert_eq!(config.window.width, 800);
        assert_eq!(config.shaders.vertex, PathBuf::from("./shader/vert.spv"));
        assert_eq!(config.shaders.fragment, PathBuf::from("assets/frag.spv"));
        assert_eq!(config.debug.log_level, "info");
    }

    #[test]
    fn wrong_types_are_rejected() {
        assert!(Config::parse("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn malformed_file_falls_back_with_an_error() {
        let path = std::env::temp_dir().join(format!(
            "triangle-renderer-malformed-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[window]\nwidth = \"wide\"\n").unwrap();

        let (config, error) = Config::load_or_default(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.window.width, 800);
        let error = error.expect("malformed config must be reported");
        assert!(format!("{:#}", error).contains("triangle-renderer-malformed"));
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let config = Config::load_from_path("does/not/exist/config.toml").unwrap();
        assert_eq!(config.window.title, "Vulkan Triangle");
    }
}
