//! System output volume.

use std::process::Command;

use takeover_core::{Error, Result};
use tracing::{debug, info};

/// Raises the system output volume before playback.
#[cfg_attr(test, mockall::automock)]
pub trait VolumeControl: Send + Sync {
    fn set_max_volume(&self) -> Result<()>;
}

/// PulseAudio / PipeWire volume through `pactl`.
#[derive(Debug, Clone, Default)]
pub struct PactlVolume;

impl VolumeControl for PactlVolume {
    fn set_max_volume(&self) -> Result<()> {
        let output = Command::new("pactl")
            .args(["set-sink-volume", "@DEFAULT_SINK@", "100%"])
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::AudioResourceUnavailable(format!(
                "pactl failed: {}",
                stderr.trim()
            )));
        }

        info!("Output volume set to maximum");
        Ok(())
    }
}

/// Leaves the volume alone.
#[derive(Debug, Clone, Default)]
pub struct NoopVolume;

impl VolumeControl for NoopVolume {
    fn set_max_volume(&self) -> Result<()> {
        debug!("Volume control disabled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_volume_always_succeeds() {
        assert!(NoopVolume.set_max_volume().is_ok());
    }

    #[test]
    fn mock_volume_reports_failure() {
        let mut mock = MockVolumeControl::new();
        mock.expect_set_max_volume()
            .returning(|| Err(Error::AudioResourceUnavailable("no server".into())));
        assert!(mock.set_max_volume().is_err());
    }
}
