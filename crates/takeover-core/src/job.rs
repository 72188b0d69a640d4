//! Audio job description.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Where the audio comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioSourceKind {
    /// Gaussian white noise generated on the fly.
    SynthesizedNoise,
    /// Decoded audio file.
    FileStream(PathBuf),
}

/// What to play and how.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioJobSpec {
    pub source: AudioSourceKind,
    pub looping: bool,
    /// Linear gain; values above 1.0 overdrive with clipping.
    pub gain: f32,
}

impl AudioJobSpec {
    pub fn noise() -> Self {
        Self {
            source: AudioSourceKind::SynthesizedNoise,
            looping: true,
            gain: 1.0,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: AudioSourceKind::FileStream(path.into()),
            looping: true,
            gain: 1.0,
        }
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    /// Check the gain is a positive finite number.
    pub fn validate(&self) -> Result<()> {
        if !self.gain.is_finite() || self.gain <= 0.0 {
            return Err(Error::InvalidJob(format!(
                "gain must be positive, got {}",
                self.gain
            )));
        }
        Ok(())
    }
}

impl Default for AudioJobSpec {
    fn default() -> Self {
        Self::noise()
    }
}

/// A job spec bound to the token that stops it.
#[derive(Debug, Clone)]
pub struct AudioJob {
    pub spec: AudioJobSpec,
    pub cancel: CancellationToken,
}

impl AudioJob {
    pub fn new(spec: AudioJobSpec) -> Self {
        Self {
            spec,
            cancel: CancellationToken::new(),
        }
    }
}
