//! Audio file decoding.
//!
//! Files are decoded packet by packet into interleaved i16 samples at their
//! native rate and channel count.

use std::fmt::Display;
use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Track};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use takeover_core::{Error, Result};
use tracing::debug;

use crate::sink::PcmFormat;

/// Streams interleaved i16 PCM out of an audio file.
pub struct FileDecoder {
    reader: Box<dyn FormatReader>,
    codec: Box<dyn Decoder>,
    track_id: u32,
    format: PcmFormat,
    exhausted: bool,
}

fn open_error(path: &Path, what: &str, cause: impl Display) -> Error {
    Error::Decode(format!("{}: {} ({})", path.display(), what, cause))
}

/// The first track carrying a codec symphonia recognises.
fn first_audio_track(reader: &dyn FormatReader) -> Option<&Track> {
    reader
        .tracks()
        .iter()
        .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
}

impl FileDecoder {
    /// Probe `path` and prepare a decoder for its first audio track.
    ///
    /// Files without a declared channel layout are treated as stereo.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| open_error(path, "cannot open", e))?;

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(extension);
        }

        let stream = MediaSourceStream::new(Box::new(file), Default::default());
        let reader = symphonia::default::get_probe()
            .format(
                &hint,
                stream,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| open_error(path, "unrecognised format", e))?
            .format;

        let track = first_audio_track(reader.as_ref())
            .ok_or_else(|| open_error(path, "no audio track", "empty container"))?;
        let params = &track.codec_params;
        let format = PcmFormat {
            sample_rate: params
                .sample_rate
                .ok_or_else(|| open_error(path, "no sample rate", "missing from header"))?,
            channels: params.channels.map_or(2, |layout| layout.count() as u16),
        };
        let track_id = track.id;
        let codec = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| open_error(path, "unsupported codec", e))?;

        debug!(
            "Decoding {} at {} Hz, {} channels",
            path.display(),
            format.sample_rate,
            format.channels
        );
        Ok(Self {
            reader,
            codec,
            track_id,
            format,
            exhausted: false,
        })
    }

    /// Layout of the samples this decoder yields.
    pub fn pcm_format(&self) -> PcmFormat {
        self.format
    }

    /// Decode the next packet. `None` at end of stream.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<i16>>> {
        while !self.exhausted {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    self.exhausted = true;
                    break;
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.codec.reset();
                    continue;
                }
                Err(e) => return Err(Error::Decode(format!("reading packet: {}", e))),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            match self.codec.decode(&packet) {
                Ok(decoded) => {
                    let mut samples =
                        SampleBuffer::<i16>::new(decoded.capacity() as u64, *decoded.spec());
                    samples.copy_interleaved_ref(decoded);
                    return Ok(Some(samples.samples().to_vec()));
                }
                Err(SymphoniaError::DecodeError(reason)) => {
                    debug!("Skipping corrupt packet: {}", reason);
                }
                Err(e) => return Err(Error::Decode(format!("decoding packet: {}", e))),
            }
        }
        Ok(None)
    }
}
