use crate::logging::LogLevel;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "WindowConfig::default_title")]
    pub title: String,
    #[serde(default = "WindowConfig::default_width")]
    pub width: u32,
    #[serde(default = "WindowConfig::default_height")]
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetConfig {
    #[serde(default = "AssetConfig::default_root")]
    pub root: PathBuf,
    #[serde(default = "AssetConfig::default_change_log_capacity")]
    pub change_log_capacity: usize,
    #[serde(default = "AssetConfig::default_watch")]
    pub watch: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewportConfig {
    #[serde(default = "ViewportConfig::default_frames_in_flight")]
    pub frames_in_flight: usize,
    #[serde(default = "ViewportConfig::default_wait_timeout_ns")]
    pub fence_timeout_ns: u64,
    #[serde(default = "ViewportConfig::default_wait_timeout_ns")]
    pub acquire_timeout_ns: u64,
    #[serde(default = "ViewportConfig::default_wait_timeout_ns")]
    pub image_wait_timeout_ns: u64,
    #[serde(default)]
    pub validation: bool,
    #[serde(default)]
    pub verbose_logging: bool,
    #[serde(default = "ViewportConfig::default_clear_color")]
    pub clear_color: [f32; 4],
    #[serde(default)]
    pub shader_dirs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub assets: AssetConfig,
    #[serde(default)]
    pub viewport: ViewportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfigOverrides {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub asset_root: Option<PathBuf>,
    pub frames_in_flight: Option<usize>,
    pub validation: Option<bool>,
    pub log_level: Option<LogLevel>,
}

impl WindowConfig {
    fn default_title() -> String {
        "Aetherion Viewport".to_string()
    }

    const fn default_width() -> u32 {
        1280
    }

    const fn default_height() -> u32 {
        720
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { title: Self::default_title(), width: Self::default_width(), height: Self::default_height() }
    }
}

impl AssetConfig {
    fn default_root() -> PathBuf {
        PathBuf::from("assets")
    }

    const fn default_change_log_capacity() -> usize {
        2048
    }

    const fn default_watch() -> bool {
        true
    }
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            root: Self::default_root(),
            change_log_capacity: Self::default_change_log_capacity(),
            watch: Self::default_watch(),
        }
    }
}

impl ViewportConfig {
    pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

    const fn default_frames_in_flight() -> usize {
        2
    }

    const fn default_wait_timeout_ns() -> u64 {
        1_000_000
    }

    const fn default_clear_color() -> [f32; 4] {
        [0.05, 0.05, 0.08, 1.0]
    }

    /// Frames in flight clamped to the supported range.
    pub fn frame_count(&self) -> usize {
        self.frames_in_flight.clamp(1, Self::MAX_FRAMES_IN_FLIGHT)
    }
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: Self::default_frames_in_flight(),
            fence_timeout_ns: Self::default_wait_timeout_ns(),
            acquire_timeout_ns: Self::default_wait_timeout_ns(),
            image_wait_timeout_ns: Self::default_wait_timeout_ns(),
            validation: false,
            verbose_logging: false,
            clear_color: Self::default_clear_color(),
            shader_dirs: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!(target: "config", "Config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &EngineConfigOverrides) {
        if let Some(width) = overrides.width {
            self.window.width = width;
        }
        if let Some(height) = overrides.height {
            self.window.height = height;
        }
        if let Some(root) = overrides.asset_root.as_ref() {
            self.assets.root = root.clone();
        }
        if let Some(frames) = overrides.frames_in_flight {
            self.viewport.frames_in_flight = frames;
        }
        if let Some(validation) = overrides.validation {
            self.viewport.validation = validation;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
    }
}

impl EngineConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.width.is_none()
            && self.height.is_none()
            && self.asset_root.is_none()
            && self.frames_in_flight.is_none()
            && self.validation.is_none()
            && self.log_level.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.width.is_some() {
            fields.push("width");
        }
        if self.height.is_some() {
            fields.push("height");
        }
        if self.asset_root.is_some() {
            fields.push("asset_root");
        }
        if self.frames_in_flight.is_some() {
            fields.push("frames_in_flight");
        }
        if self.validation.is_some() {
            fields.push("validation");
        }
        if self.log_level.is_some() {
            fields.push("log_level");
        }
        fields
    }
}
