//! Preferences file loading.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use takeover_core::Preferences;
use tracing::{debug, info};

/// Preferences file looked up in the working directory by default.
pub const DEFAULT_CONFIG_FILE: &str = "bt-takeover.json";

/// Loaded preferences and the directory relative paths resolve against.
#[derive(Debug, Clone)]
pub struct LoadedPreferences {
    pub preferences: Preferences,
    pub base_dir: Option<PathBuf>,
}

/// Read preferences from `path`. A missing file yields the defaults.
pub fn load_preferences(path: &Path) -> Result<LoadedPreferences> {
    let base_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf);

    if !path.exists() {
        debug!("No preferences at {}, using defaults", path.display());
        return Ok(LoadedPreferences {
            preferences: Preferences::default(),
            base_dir,
        });
    }

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let preferences: Preferences = serde_json::from_str(&text)
        .with_context(|| format!("parsing {}", path.display()))?;
    info!("Loaded preferences from {}", path.display());

    Ok(LoadedPreferences {
        preferences,
        base_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use takeover_core::{AudioMode, AudioSourceKind};

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_preferences(&dir.path().join(DEFAULT_CONFIG_FILE)).unwrap();
        assert_eq!(loaded.preferences, Preferences::default());
        assert_eq!(loaded.base_dir.as_deref(), Some(dir.path()));
    }

    #[test]
    fn reads_fields_and_resolves_audio_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(
            &path,
            r#"{
                "bluetooth_id": "MySpeaker",
                "mode": "file",
                "audio_file": "alarm.mp3",
                "gain": 2.5,
                "auto_silence": true,
                "discovery_timeout_secs": 5
            }"#,
        )
        .unwrap();

        let loaded = load_preferences(&path).unwrap();
        let prefs = &loaded.preferences;
        assert_eq!(prefs.mode, AudioMode::File);
        assert!(prefs.auto_silence);

        let job = prefs.audio_job(loaded.base_dir.as_deref()).unwrap();
        assert_eq!(
            job.source,
            AudioSourceKind::FileStream(dir.path().join("alarm.mp3"))
        );
        assert_eq!(job.gain, 2.5);

        let request = prefs.to_request().unwrap();
        assert_eq!(request.discovery_timeout.as_secs(), 5);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "{ not json").unwrap();

        let err = load_preferences(&path).unwrap_err();
        assert!(err.to_string().contains("parsing"));
    }

    #[test]
    fn bare_file_name_has_no_base_dir() {
        let loaded = load_preferences(Path::new("does-not-exist.json")).unwrap();
        assert!(loaded.base_dir.is_none());
    }
}
