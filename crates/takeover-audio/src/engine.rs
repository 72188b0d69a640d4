//! Audio delivery engine.
//!
//! Plays one job at a time on a dedicated thread that owns the sink and the
//! decoder. The thread polls the job's cancel token between bounded writes,
//! so stopping has bounded latency.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use takeover_core::{AudioJob, AudioJobSpec, AudioSourceKind, CancellationToken, Error, Result};
use tracing::{debug, error, info, warn};

use crate::decoder::FileDecoder;
use crate::gain::apply_gain;
use crate::noise::NoiseGenerator;
use crate::sink::{AudioSink, PcmFormat, SinkFactory, FRAMES_PER_BUFFER, WRITE_TIMEOUT};
use crate::volume::VolumeControl;

/// Lifecycle of one playback job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlaybackState {
    /// Worker is acquiring the sink and source.
    Starting = 0,
    Playing = 1,
    /// Source ran out (non-looping jobs only).
    Finished = 2,
    /// Cancelled by stop, replacement or focus loss.
    Stopped = 3,
    Failed = 4,
}

impl PlaybackState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Starting,
            1 => Self::Playing,
            2 => Self::Finished,
            3 => Self::Stopped,
            _ => Self::Failed,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Playing)
    }
}

/// Audio focus notifications from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusChange {
    Gain,
    Loss,
    LossTransient,
    LossTransientCanDuck,
}

/// Observer of a started job.
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    id: u64,
    state: Arc<AtomicU8>,
    done: Receiver<()>,
}

impl PlaybackHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Block until the job ends and its resources are released.
    pub fn wait(&self) -> PlaybackState {
        // The worker never sends; the channel disconnects when it exits.
        let _ = self.done.recv();
        self.state()
    }

    /// Like [`wait`](Self::wait) but bounded. Returns false on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        !matches!(
            self.done.recv_timeout(timeout),
            Err(RecvTimeoutError::Timeout)
        )
    }
}

struct ActiveJob {
    id: u64,
    cancel: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl ActiveJob {
    fn stop(mut self) {
        self.cancel.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Playback thread panicked");
            }
        }
        debug!("Playback job {} released", self.id);
    }
}

/// Plays at most one audio job at a time.
pub struct AudioEngine {
    sinks: Arc<dyn SinkFactory>,
    volume: Arc<dyn VolumeControl>,
    active: Mutex<Option<ActiveJob>>,
    next_id: AtomicU64,
}

impl AudioEngine {
    pub fn new(sinks: Arc<dyn SinkFactory>, volume: Arc<dyn VolumeControl>) -> Self {
        Self {
            sinks,
            volume,
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveJob>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start `spec`, replacing any job already running.
    ///
    /// The previous job is stopped and its thread joined first. Returns once
    /// the new worker has its sink and source, or
    /// `AudioResourceUnavailable` if it could not get them.
    pub fn start(&self, spec: AudioJobSpec) -> Result<PlaybackHandle> {
        spec.validate()?;

        let mut active = self.active();
        if let Some(previous) = active.take() {
            info!("Replacing playback job {}", previous.id);
            previous.stop();
        }

        if let Err(e) = self.volume.set_max_volume() {
            warn!("Could not raise output volume: {}", e);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let job = AudioJob::new(spec);
        let cancel = job.cancel.clone();
        let state = Arc::new(AtomicU8::new(PlaybackState::Starting as u8));
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let (done_tx, done_rx) = bounded::<()>(0);

        let sinks = Arc::clone(&self.sinks);
        let worker_state = Arc::clone(&state);
        let thread = thread::Builder::new()
            .name(format!("audio-playback-{}", id))
            .spawn(move || {
                run_job(job, sinks.as_ref(), &worker_state, ready_tx);
                drop(done_tx);
                debug!("Playback thread {} exited", id);
            })
            .map_err(|e| {
                Error::AudioResourceUnavailable(format!("Failed to spawn playback thread: {}", e))
            })?;

        let startup = ready_rx.recv().unwrap_or_else(|_| {
            Err(Error::AudioResourceUnavailable(
                "playback thread exited during startup".to_string(),
            ))
        });
        if let Err(e) = startup {
            let _ = thread.join();
            return Err(e);
        }

        info!("Playback job {} started", id);
        *active = Some(ActiveJob {
            id,
            cancel,
            thread: Some(thread),
        });

        Ok(PlaybackHandle {
            id,
            state,
            done: done_rx,
        })
    }

    /// Stop the job behind `handle`. A no-op if it already ended or was
    /// replaced.
    pub fn stop(&self, handle: &PlaybackHandle) {
        let mut active = self.active();
        if active.as_ref().map(|job| job.id) == Some(handle.id) {
            if let Some(job) = active.take() {
                info!("Stopping playback job {}", job.id);
                job.stop();
            }
        }
    }

    /// Stop whatever is playing.
    pub fn stop_all(&self) {
        if let Some(job) = self.active().take() {
            info!("Stopping playback job {}", job.id);
            job.stop();
        }
    }

    /// Whether a job is starting or playing.
    pub fn is_playing(&self) -> bool {
        let active = self.active();
        match active.as_ref() {
            Some(job) => job.thread.as_ref().map(|t| !t.is_finished()).unwrap_or(false),
            None => false,
        }
    }

    /// React to an audio focus change.
    ///
    /// Permanent and transient loss stop playback; regaining focus does not
    /// resume it; duckable loss is ignored.
    pub fn on_focus_change(&self, change: FocusChange) {
        match change {
            FocusChange::Loss | FocusChange::LossTransient => {
                info!("Audio focus lost ({:?}), stopping playback", change);
                self.stop_all();
            }
            FocusChange::Gain => debug!("Audio focus regained"),
            FocusChange::LossTransientCanDuck => debug!("Audio focus duck request ignored"),
        }
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.stop_all();
    }
}

enum Producer {
    Noise(NoiseGenerator),
    File {
        decoder: FileDecoder,
        path: PathBuf,
    },
}

impl Producer {
    fn open(spec: &AudioJobSpec) -> Result<Self> {
        match &spec.source {
            AudioSourceKind::SynthesizedNoise => Ok(Producer::Noise(NoiseGenerator::new(spec.gain))),
            AudioSourceKind::FileStream(path) => Ok(Producer::File {
                decoder: FileDecoder::open(path)?,
                path: path.clone(),
            }),
        }
    }

    fn format(&self) -> PcmFormat {
        match self {
            Producer::Noise(_) => PcmFormat::default(),
            Producer::File { decoder, .. } => decoder.pcm_format(),
        }
    }
}

fn set_state(state: &AtomicU8, value: PlaybackState) {
    state.store(value as u8, Ordering::SeqCst);
}

/// Worker body. Sink and producer are dropped exactly once when this returns.
fn run_job(job: AudioJob, sinks: &dyn SinkFactory, state: &AtomicU8, ready: Sender<Result<()>>) {
    let opened = Producer::open(&job.spec)
        .and_then(|producer| sinks.open(producer.format()).map(|sink| (producer, sink)));

    let (producer, mut sink) = match opened {
        Ok(opened) => opened,
        Err(e) => {
            warn!("Playback resources unavailable: {}", e);
            set_state(state, PlaybackState::Failed);
            let _ = ready.send(Err(Error::AudioResourceUnavailable(e.to_string())));
            return;
        }
    };

    set_state(state, PlaybackState::Playing);
    let _ = ready.send(Ok(()));

    let result = match producer {
        Producer::Noise(noise) => stream_noise(noise, sink.as_mut(), &job),
        Producer::File { decoder, path } => stream_file(decoder, &path, sink.as_mut(), &job),
    };

    let final_state = match result {
        Ok(()) if job.cancel.is_cancelled() => PlaybackState::Stopped,
        Ok(()) => PlaybackState::Finished,
        Err(e) => {
            error!("Playback failed: {}", e);
            PlaybackState::Failed
        }
    };
    info!("Playback ended: {:?}", final_state);
    set_state(state, final_state);
}

/// Write everything unless cancelled first. Returns false on cancellation.
fn write_all(sink: &mut dyn AudioSink, mut samples: &[i16], cancel: &CancellationToken) -> Result<bool> {
    while !samples.is_empty() {
        if cancel.is_cancelled() {
            return Ok(false);
        }
        let written = sink.write(samples, WRITE_TIMEOUT)?;
        samples = &samples[written.min(samples.len())..];
    }
    Ok(!cancel.is_cancelled())
}

fn stream_noise(mut noise: NoiseGenerator, sink: &mut dyn AudioSink, job: &AudioJob) -> Result<()> {
    let mut buffer = vec![0i16; FRAMES_PER_BUFFER * PcmFormat::default().channels as usize];

    loop {
        noise.fill(&mut buffer);
        if !write_all(sink, &buffer, &job.cancel)? {
            return Ok(());
        }
        // A non-looping job is a single buffer.
        if !job.spec.looping {
            break;
        }
    }

    sink.drain(Duration::from_secs(1))
}

fn stream_file(
    mut decoder: FileDecoder,
    path: &Path,
    sink: &mut dyn AudioSink,
    job: &AudioJob,
) -> Result<()> {
    loop {
        let mut produced = 0;
        while let Some(mut chunk) = decoder.next_chunk()? {
            produced += chunk.len();
            apply_gain(&mut chunk, job.spec.gain);
            if !write_all(sink, &chunk, &job.cancel)? {
                return Ok(());
            }
        }

        if !job.spec.looping || job.cancel.is_cancelled() {
            break;
        }
        if produced == 0 {
            return Err(Error::Decode(format!(
                "{} has no audio to loop",
                path.display()
            )));
        }
        debug!("Restarting {}", path.display());
        decoder = FileDecoder::open(path)?;
    }

    sink.drain(Duration::from_secs(5))
}
