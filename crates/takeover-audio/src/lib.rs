//! # takeover-audio
//!
//! Continuous audio delivery through the system output.
//!
//! A single [`AudioEngine`] plays one job at a time on a dedicated thread:
//! either Gaussian white noise or a decoded file, both scaled by a linear
//! gain and clipped to 16-bit.
//!
//! Output goes through the [`SinkFactory`] seam. [`NullSinkFactory`] is
//! always available; the `cpal-output` feature adds `CpalSinkFactory` for
//! the default output device.

pub mod decoder;
pub mod engine;
pub mod gain;
pub mod noise;
pub mod sink;
pub mod volume;

#[cfg(feature = "cpal-output")]
pub mod cpal_sink;

// Re-exports for convenience
pub use decoder::FileDecoder;
pub use engine::{AudioEngine, FocusChange, PlaybackHandle, PlaybackState};
pub use gain::{apply_gain, clip_to_i16};
pub use noise::{NoiseGenerator, NOISE_STD_DEV};
pub use sink::{
    AudioSink, NullSinkFactory, PcmFormat, SinkFactory, SinkStats, FRAMES_PER_BUFFER,
    WRITE_TIMEOUT,
};
pub use volume::{NoopVolume, PactlVolume, VolumeControl};

#[cfg(feature = "cpal-output")]
pub use cpal_sink::CpalSinkFactory;
