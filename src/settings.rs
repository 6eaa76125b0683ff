use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::capture::{CaptureConstraints, OutputFormat};
use crate::error::SettingsError;

const SETTINGS_DIR_NAME: &str = "clipcam";
const SETTINGS_FILE_NAME: &str = "settings.json";

/// Environment variable overriding the settings file location.
pub const SETTINGS_PATH_ENV: &str = "CLIPCAM_SETTINGS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderSettings {
    /// Preferred capture width; the host may pick the closest it supports.
    pub preferred_width: u32,

    pub preferred_height: u32,

    pub frame_rate: u32,

    /// Request a microphone track alongside the camera.
    pub capture_audio: bool,

    /// Container the encoder should produce (combined audio/video).
    pub mime_type: String,

    /// Recordings reaching this many seconds are stopped automatically.
    /// `None` records until the user stops.
    pub max_recording_secs: Option<u64>,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        let constraints = CaptureConstraints::default();
        Self {
            preferred_width: constraints.width,
            preferred_height: constraints.height,
            frame_rate: constraints.frame_rate,
            capture_audio: constraints.audio,
            mime_type: OutputFormat::default().mime_type,
            max_recording_secs: None,
        }
    }
}

impl RecorderSettings {
    pub fn constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            width: self.preferred_width,
            height: self.preferred_height,
            frame_rate: self.frame_rate,
            audio: self.capture_audio,
        }
    }

    pub fn output_format(&self) -> OutputFormat {
        OutputFormat {
            mime_type: self.mime_type.clone(),
        }
    }

    /// A zero limit means "no limit".
    pub fn recording_limit(&self) -> Option<u64> {
        self.max_recording_secs.filter(|secs| *secs > 0)
    }
}

/// Default location: `<config_dir>/clipcam/settings.json`, unless
/// `CLIPCAM_SETTINGS` points elsewhere.
pub fn settings_path() -> Result<PathBuf, SettingsError> {
    if let Some(path) = std::env::var_os(SETTINGS_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }
    let dir = dirs::config_dir().ok_or(SettingsError::NoConfigDir)?;
    Ok(dir.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME))
}

pub fn load_settings() -> RecorderSettings {
    match settings_path() {
        Ok(path) => load_settings_from(&path),
        Err(e) => {
            log::warn!("Settings: {}", e);
            RecorderSettings::default()
        }
    }
}

/// Load settings from `path`, falling back to defaults if the file is
/// missing or unreadable.
pub fn load_settings_from(path: &Path) -> RecorderSettings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<RecorderSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                RecorderSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => RecorderSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            RecorderSettings::default()
        }
    }
}

pub fn save_settings(settings: &RecorderSettings) -> Result<(), SettingsError> {
    save_settings_to(&settings_path()?, settings)
}

pub fn save_settings_to(path: &Path, settings: &RecorderSettings) -> Result<(), SettingsError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| SettingsError::Io { path, source }
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err(parent))?;
    }

    let contents = serde_json::to_string_pretty(settings)?;

    // Write to a temp file in the same directory, then rename over the target.
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents).map_err(io_err(&tmp_path))?;

    // On Windows, rename fails if the destination exists.
    if cfg!(windows) && path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(SettingsError::Io {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        }
    }

    std::fs::rename(&tmp_path, path).map_err(io_err(path))?;
    Ok(())
}
