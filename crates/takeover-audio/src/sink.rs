//! Output sink seam.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use takeover_core::{Error, Result};

/// Output sample rate for synthesized audio.
pub const SAMPLE_RATE: u32 = 44_100;

/// Output channel count for synthesized audio.
pub const CHANNELS: u16 = 2;

/// Frames per synthesized buffer.
pub const FRAMES_PER_BUFFER: usize = 1024;

/// Upper bound on one blocking write, so producers see cancellation promptly.
pub const WRITE_TIMEOUT: Duration = Duration::from_millis(100);

/// Interleaved 16-bit PCM layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
        }
    }
}

/// An open output stream. Lives on the thread that opened it.
pub trait AudioSink {
    /// Write interleaved samples, blocking at most `timeout` for room.
    ///
    /// Returns how many samples were accepted; 0 means the sink stayed full.
    fn write(&mut self, samples: &[i16], timeout: Duration) -> Result<usize>;

    /// Wait (at most `timeout`) for queued samples to play out.
    fn drain(&mut self, timeout: Duration) -> Result<()>;
}

/// Opens sinks. Shared across threads; each sink is opened on its worker.
#[cfg_attr(test, mockall::automock)]
pub trait SinkFactory: Send + Sync {
    fn open(&self, format: PcmFormat) -> Result<Box<dyn AudioSink>>;
}

/// Counters shared by every sink a [`NullSinkFactory`] opens.
#[derive(Debug, Clone, Default)]
pub struct SinkStats {
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    samples: Arc<AtomicUsize>,
}

impl SinkStats {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn samples(&self) -> usize {
        self.samples.load(Ordering::SeqCst)
    }

    pub fn open_sinks(&self) -> usize {
        self.opened().saturating_sub(self.closed())
    }
}

/// Sinks that discard audio.
///
/// Paced sinks take as long as real playback would; unpaced sinks accept
/// everything at once.
#[derive(Debug, Clone, Default)]
pub struct NullSinkFactory {
    stats: SinkStats,
    paced: bool,
    fail_open: bool,
}

impl NullSinkFactory {
    /// Real-time paced sinks.
    pub fn new() -> Self {
        Self {
            paced: true,
            ..Default::default()
        }
    }

    pub fn unpaced() -> Self {
        Self::default()
    }

    /// A factory whose sinks can never be opened.
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Default::default()
        }
    }

    pub fn stats(&self) -> SinkStats {
        self.stats.clone()
    }
}

impl SinkFactory for NullSinkFactory {
    fn open(&self, format: PcmFormat) -> Result<Box<dyn AudioSink>> {
        if self.fail_open {
            return Err(Error::AudioResourceUnavailable(
                "null output disabled".to_string(),
            ));
        }
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(NullSink {
            format,
            stats: self.stats.clone(),
            paced: self.paced,
        }))
    }
}

struct NullSink {
    format: PcmFormat,
    stats: SinkStats,
    paced: bool,
}

impl AudioSink for NullSink {
    fn write(&mut self, samples: &[i16], timeout: Duration) -> Result<usize> {
        let accepted = if self.paced {
            let per_second = self.format.sample_rate as usize * self.format.channels as usize;
            let budget = (per_second as f64 * timeout.as_secs_f64()).round() as usize;
            let accepted = samples.len().min(budget.max(1));
            std::thread::sleep(Duration::from_secs_f64(
                accepted as f64 / per_second.max(1) as f64,
            ));
            accepted
        } else {
            samples.len()
        };
        self.stats.samples.fetch_add(accepted, Ordering::SeqCst);
        Ok(accepted)
    }

    fn drain(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }
}

impl Drop for NullSink {
    fn drop(&mut self) {
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_format_is_cd_stereo() {
        let format = PcmFormat::default();
        assert_eq!(format.sample_rate, 44_100);
        assert_eq!(format.channels, 2);
    }

    #[test]
    fn null_sink_counts_open_close_and_samples() {
        let factory = NullSinkFactory::unpaced();
        let stats = factory.stats();

        let mut sink = factory.open(PcmFormat::default()).unwrap();
        assert_eq!(sink.write(&[0; 2048], WRITE_TIMEOUT).unwrap(), 2048);
        assert_eq!(stats.open_sinks(), 1);

        drop(sink);
        assert_eq!(stats.opened(), 1);
        assert_eq!(stats.closed(), 1);
        assert_eq!(stats.samples(), 2048);
    }

    #[test]
    fn paced_sink_accepts_at_most_timeout_worth() {
        let factory = NullSinkFactory::new();
        let mut sink = factory.open(PcmFormat::default()).unwrap();

        let accepted = sink.write(&vec![0; 44_100 * 2], Duration::from_millis(10)).unwrap();
        assert_eq!(accepted, 882);
    }

    #[test]
    fn failing_factory_reports_unavailable() {
        let result = NullSinkFactory::failing().open(PcmFormat::default());
        assert!(matches!(result, Err(Error::AudioResourceUnavailable(_))));
    }
}
