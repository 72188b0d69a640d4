//! User preferences supplied by the persistence layer.
//!
//! The core never reads these from disk; front ends deserialize them and hand
//! them over.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identifier::DeviceIdentifier;
use crate::job::AudioJobSpec;
use crate::request::TakeoverRequest;

/// Audio source selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioMode {
    #[default]
    Noise,
    File,
}

fn default_looping() -> bool {
    true
}

fn default_gain() -> f32 {
    1.0
}

/// Persisted preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    /// Last entered address or name fragment.
    #[serde(default)]
    pub bluetooth_id: Option<String>,
    #[serde(default)]
    pub mode: AudioMode,
    #[serde(default)]
    pub audio_file: Option<PathBuf>,
    #[serde(default = "default_looping")]
    pub looping: bool,
    #[serde(default = "default_gain")]
    pub gain: f32,
    /// Quiet presence alerts after a successful takeover.
    #[serde(default)]
    pub auto_silence: bool,
    #[serde(default)]
    pub discovery_timeout_secs: Option<u64>,
    #[serde(default)]
    pub bonding_timeout_secs: Option<u64>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            bluetooth_id: None,
            mode: AudioMode::Noise,
            audio_file: None,
            looping: default_looping(),
            gain: default_gain(),
            auto_silence: false,
            discovery_timeout_secs: None,
            bonding_timeout_secs: None,
            connect_timeout_secs: None,
        }
    }
}

impl Preferences {
    /// Build a request from the stored identifier and timeout overrides.
    pub fn to_request(&self) -> Result<TakeoverRequest> {
        let raw = self
            .bluetooth_id
            .as_deref()
            .ok_or_else(|| Error::InvalidIdentifier(String::new()))?;
        let mut request = TakeoverRequest::new(DeviceIdentifier::parse(raw)?);

        if let Some(secs) = self.discovery_timeout_secs {
            request = request.discovery_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.bonding_timeout_secs {
            request = request.bonding_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.connect_timeout_secs {
            request = request.connect_timeout(Duration::from_secs(secs));
        }
        Ok(request)
    }

    /// Build the audio job; relative file paths resolve against `base_dir`.
    pub fn audio_job(&self, base_dir: Option<&Path>) -> Result<AudioJobSpec> {
        let spec = match self.mode {
            AudioMode::Noise => AudioJobSpec::noise(),
            AudioMode::File => {
                let path = self
                    .audio_file
                    .as_ref()
                    .ok_or_else(|| Error::InvalidJob("file mode without audio_file".into()))?;
                let path = match base_dir {
                    Some(dir) if path.is_relative() => dir.join(path),
                    _ => path.clone(),
                };
                AudioJobSpec::file(path)
            }
        };

        let spec = spec.looping(self.looping).gain(self.gain);
        spec.validate()?;
        Ok(spec)
    }
}
