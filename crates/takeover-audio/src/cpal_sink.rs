//! Output through the default cpal device.
//!
//! The cpal stream must stay on the thread that created it, so sinks are
//! opened on the playback worker. Samples reach the stream callback through
//! a bounded channel, which provides the write backpressure.

use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use takeover_core::{Error, Result};
use tracing::{error, info};

use crate::sink::{AudioSink, PcmFormat, SinkFactory};

/// Chunks queued ahead of the device callback.
const QUEUE_CHUNKS: usize = 8;

/// Opens the host's default output device.
#[derive(Debug, Clone, Default)]
pub struct CpalSinkFactory;

impl SinkFactory for CpalSinkFactory {
    fn open(&self, format: PcmFormat) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(CpalSink::open(format)?))
    }
}

/// Pulls queued samples into the device buffer, padding with silence.
struct Feeder {
    rx: Receiver<Vec<i16>>,
    pending: Vec<i16>,
    pos: usize,
}

impl Feeder {
    fn next_sample(&mut self) -> i16 {
        if self.pos >= self.pending.len() {
            match self.rx.try_recv() {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                Err(_) => return 0,
            }
        }
        let sample = self.pending.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        sample
    }
}

struct CpalSink {
    tx: Sender<Vec<i16>>,
    _stream: cpal::Stream,
}

impl CpalSink {
    fn open(format: PcmFormat) -> Result<Self> {
        let unavailable = |what: &str, e: &dyn std::fmt::Display| {
            Error::AudioResourceUnavailable(format!("{}: {}", what, e))
        };

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::AudioResourceUnavailable("no output device".to_string()))?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".into());

        let default_config = device
            .default_output_config()
            .map_err(|e| unavailable("default config", &e))?;

        let config = cpal::StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (tx, rx) = bounded::<Vec<i16>>(QUEUE_CHUNKS);
        let mut feeder = Feeder {
            rx,
            pending: Vec::new(),
            pos: 0,
        };

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    for out in data.iter_mut() {
                        *out = feeder.next_sample();
                    }
                },
                move |err| error!("Audio output stream error: {}", err),
                None,
            ),
            cpal::SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for out in data.iter_mut() {
                        *out = feeder.next_sample() as f32 / 32768.0;
                    }
                },
                move |err| error!("Audio output stream error: {}", err),
                None,
            ),
            fmt => {
                return Err(Error::AudioResourceUnavailable(format!(
                    "unsupported sample format: {:?}",
                    fmt
                )));
            }
        }
        .map_err(|e| unavailable("build stream", &e))?;

        stream.play().map_err(|e| unavailable("play", &e))?;
        info!(
            "Audio output opened on {} ({} Hz, {} ch)",
            device_name, format.sample_rate, format.channels
        );

        Ok(Self {
            tx,
            _stream: stream,
        })
    }
}

impl AudioSink for CpalSink {
    fn write(&mut self, samples: &[i16], timeout: Duration) -> Result<usize> {
        match self.tx.send_timeout(samples.to_vec(), timeout) {
            Ok(()) => Ok(samples.len()),
            Err(SendTimeoutError::Timeout(_)) => Ok(0),
            Err(SendTimeoutError::Disconnected(_)) => Err(Error::AudioResourceUnavailable(
                "output stream closed".to_string(),
            )),
        }
    }

    fn drain(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while !self.tx.is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        Ok(())
    }
}
