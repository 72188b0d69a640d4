//! The takeover state machine.
//!
//! A run walks `Locating -> Bonding -> Negotiating -> Delivering`, emitting a
//! stage change and a status message before each step. At most one run is in
//! flight per orchestrator. Every run ends with exactly one
//! [`TakeoverEvent::Finished`] carrying the same outcome the run resolves to.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use takeover_audio::{AudioEngine, FocusChange, PlaybackHandle};
use takeover_bluetooth::{
    BondManager, DeviceLocator, ProfileNegotiator, ProfileRegistry, SystemAdapter,
};
use takeover_core::{
    AudioJobSpec, CancellationToken, DeviceIdentifier, DiscoveredDevice, Error, ProfileKind, Result,
    TakeoverOutcome, TakeoverRequest,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{EventHandler, FallbackPicker, Stage, TakeoverEvent, TakeoverStatus};

pub(crate) struct Settings {
    pub settle_delay: Duration,
    pub routing_delay: Duration,
    pub auto_silence: bool,
}

/// Where a run begins.
enum Entry {
    Locate,
    Device(DiscoveredDevice),
}

/// Drives takeovers against one adapter and one audio engine.
///
/// Built with [`OrchestratorBuilder`](crate::OrchestratorBuilder).
pub struct TakeoverOrchestrator {
    adapter: Arc<dyn SystemAdapter>,
    locator: DeviceLocator,
    bonds: BondManager,
    registry: ProfileRegistry,
    engine: Arc<AudioEngine>,
    events: Arc<dyn EventHandler>,
    fallback: Option<Arc<dyn FallbackPicker>>,
    settings: Settings,
    audio_job: Mutex<AudioJobSpec>,
    playback: Mutex<Option<PlaybackHandle>>,
    cancel: Mutex<CancellationToken>,
    in_flight: Arc<AtomicBool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl TakeoverOrchestrator {
    pub(crate) fn new(
        adapter: Arc<dyn SystemAdapter>,
        engine: Arc<AudioEngine>,
        events: Arc<dyn EventHandler>,
        fallback: Option<Arc<dyn FallbackPicker>>,
        audio_job: AudioJobSpec,
        settings: Settings,
    ) -> Self {
        Self {
            locator: DeviceLocator::new(Arc::clone(&adapter)),
            bonds: BondManager::new(Arc::clone(&adapter)),
            registry: ProfileRegistry::new(Arc::clone(&adapter)),
            adapter,
            engine,
            events,
            fallback,
            settings,
            audio_job: Mutex::new(audio_job),
            playback: Mutex::new(None),
            cancel: Mutex::new(CancellationToken::new()),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start a takeover in the background.
    ///
    /// Returns immediately with a handle resolving to the outcome, or
    /// `Busy` if a run is already in flight.
    pub fn submit(self: &Arc<Self>, request: TakeoverRequest) -> Result<JoinHandle<TakeoverOutcome>> {
        self.spawn_run(request, Entry::Locate)
    }

    /// Start a takeover of an already chosen device, skipping the search.
    ///
    /// Uses the default timeouts.
    pub fn takeover_with_device(
        self: &Arc<Self>,
        device: DiscoveredDevice,
    ) -> Result<JoinHandle<TakeoverOutcome>> {
        let request = TakeoverRequest::new(DeviceIdentifier::HardwareAddress(device.address));
        self.spawn_run(request, Entry::Device(device))
    }

    /// Run a takeover to completion on the current task.
    pub async fn run(self: &Arc<Self>, request: TakeoverRequest) -> Result<TakeoverOutcome> {
        let guard = RunGuard::acquire(&self.in_flight)?;
        let cancel = self.fresh_cancel();
        let outcome = Arc::clone(self).supervise(request, Entry::Locate, cancel).await;
        drop(guard);
        Ok(outcome)
    }

    fn spawn_run(
        self: &Arc<Self>,
        request: TakeoverRequest,
        entry: Entry,
    ) -> Result<JoinHandle<TakeoverOutcome>> {
        let guard = RunGuard::acquire(&self.in_flight)?;
        let cancel = self.fresh_cancel();
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let _guard = guard;
            this.supervise(request, entry, cancel).await
        }))
    }

    fn fresh_cancel(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *lock(&self.cancel) = token.clone();
        token
    }

    /// Abort the current run's search or bonding wait.
    ///
    /// Negotiation is not interrupted once started.
    pub fn cancel(&self) {
        info!("Takeover cancellation requested");
        lock(&self.cancel).cancel();
    }

    /// Whether a run is in flight.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Replace the job played after the next successful takeover.
    pub fn set_audio_job(&self, spec: AudioJobSpec) -> Result<()> {
        spec.validate()?;
        *lock(&self.audio_job) = spec;
        Ok(())
    }

    pub fn audio_job(&self) -> AudioJobSpec {
        lock(&self.audio_job).clone()
    }

    pub fn engine(&self) -> &Arc<AudioEngine> {
        &self.engine
    }

    /// Handle of the job the last successful run started.
    pub fn playback(&self) -> Option<PlaybackHandle> {
        lock(&self.playback).clone()
    }

    /// Stop the audio started by a takeover.
    pub fn stop_audio(&self) {
        if let Some(handle) = lock(&self.playback).take() {
            self.engine.stop(&handle);
        }
    }

    /// Forward an audio focus change to the engine.
    pub fn on_focus_change(&self, change: FocusChange) {
        self.engine.on_focus_change(change);
    }

    /// Drop cached profile handles.
    pub async fn release_profiles(&self) {
        self.registry.release_all().await;
    }

    /// Run the state machine on its own task and turn every way it can end
    /// into an outcome.
    async fn supervise(
        self: Arc<Self>,
        request: TakeoverRequest,
        entry: Entry,
        cancel: CancellationToken,
    ) -> TakeoverOutcome {
        let (tx, rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump_events(Arc::clone(&self.events), rx));
        let reporter = Reporter { tx };

        info!("Takeover of {} started", request.identifier);
        let this = Arc::clone(&self);
        let run_reporter = reporter.clone();
        let result =
            tokio::spawn(async move { this.drive(&request, entry, &cancel, &run_reporter).await })
                .await;

        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(Error::Cancelled)) => TakeoverOutcome::Cancelled,
            Ok(Err(e)) => {
                error!("Takeover failed: {}", e);
                reporter.status(TakeoverStatus::Error(e.to_string()));
                TakeoverOutcome::Failed(e.to_string())
            }
            Err(e) => {
                error!("Takeover task aborted: {}", e);
                let reason = if e.is_panic() {
                    "internal error".to_string()
                } else {
                    e.to_string()
                };
                reporter.status(TakeoverStatus::Error(reason.clone()));
                TakeoverOutcome::Failed(reason)
            }
        };

        match &outcome {
            TakeoverOutcome::Success(_) => reporter.stage(Stage::Done),
            TakeoverOutcome::DeviceNotFound => {
                reporter.status(TakeoverStatus::NotFound);
                reporter.stage(Stage::Failed);
            }
            TakeoverOutcome::BondingFailed => {
                reporter.status(TakeoverStatus::BondFailed);
                reporter.stage(Stage::Failed);
            }
            TakeoverOutcome::NoProfileConnected => {
                reporter.status(TakeoverStatus::NoProfile);
                reporter.stage(Stage::Failed);
            }
            TakeoverOutcome::Cancelled => {
                reporter.status(TakeoverStatus::Cancelled);
                reporter.stage(Stage::Failed);
            }
            TakeoverOutcome::Failed(_) => reporter.stage(Stage::Failed),
        }
        info!("{}", outcome);
        reporter.send(TakeoverEvent::Finished(outcome.clone()));

        // Deliver everything before resolving.
        drop(reporter);
        let _ = pump.await;
        outcome
    }

    async fn drive(
        &self,
        request: &TakeoverRequest,
        entry: Entry,
        cancel: &CancellationToken,
        reporter: &Reporter,
    ) -> Result<TakeoverOutcome> {
        if !self.adapter.is_powered().await? {
            return Err(Error::AdapterPoweredOff);
        }

        let mut device = match entry {
            Entry::Device(device) => device,
            Entry::Locate => {
                reporter.enter(
                    Stage::Locating,
                    TakeoverStatus::Searching(request.identifier.clone()),
                );
                let located = self
                    .locator
                    .locate(&request.identifier, request.discovery_timeout, cancel)
                    .await?;
                match located {
                    Some(device) => device,
                    None if cancel.is_cancelled() => return Ok(TakeoverOutcome::Cancelled),
                    None => return Ok(TakeoverOutcome::DeviceNotFound),
                }
            }
        };
        reporter.status(TakeoverStatus::Found(device.clone()));
        reporter.send(TakeoverEvent::DeviceLocated(device.clone()));

        let mut fallback_used = false;
        let connected = loop {
            if !device.is_bonded() {
                reporter.enter(Stage::Bonding, TakeoverStatus::Bonding(device.clone()));
            }
            let bonded = self
                .bonds
                .ensure_bonded(&device, request.bonding_timeout, cancel)
                .await;
            if cancel.is_cancelled() {
                return Ok(TakeoverOutcome::Cancelled);
            }
            if !bonded {
                return Ok(TakeoverOutcome::BondingFailed);
            }

            reporter.stage(Stage::Negotiating);
            let connected = self.negotiate(&device, request.connect_timeout, reporter).await;
            if !connected.is_empty() {
                break connected;
            }

            if fallback_used {
                return Ok(TakeoverOutcome::NoProfileConnected);
            }
            reporter.stage(Stage::FallbackOffered);
            reporter.send(TakeoverEvent::FallbackOffered(device.clone()));
            let Some(picker) = &self.fallback else {
                return Ok(TakeoverOutcome::NoProfileConnected);
            };
            match picker.pick(&device).await {
                Some(alternate) => {
                    info!("Retrying takeover with {}", alternate);
                    reporter.status(TakeoverStatus::TryingAlternate(alternate.clone()));
                    fallback_used = true;
                    device = alternate;
                }
                None => return Ok(TakeoverOutcome::NoProfileConnected),
            }
        };

        self.deliver(reporter).await;

        if self.settings.auto_silence {
            debug!("Auto-silence enabled, requesting alert silencing");
            reporter.send(TakeoverEvent::SilenceAlerts);
        }

        Ok(TakeoverOutcome::Success(connected))
    }

    async fn negotiate(
        &self,
        device: &DiscoveredDevice,
        connect_timeout: Duration,
        reporter: &Reporter,
    ) -> BTreeSet<ProfileKind> {
        let profiles = self.registry.available(&ProfileKind::ALL).await;
        if profiles.is_empty() {
            warn!("No audio profile available on this adapter");
            return BTreeSet::new();
        }

        let negotiator = ProfileNegotiator::new(self.settings.settle_delay, connect_timeout);
        let report = negotiator
            .take_exclusive(&profiles, &device.address, |kind| {
                reporter.status(TakeoverStatus::Connecting(kind))
            })
            .await;
        for (kind, address) in &report.evicted {
            debug!("Evicted {} from {} profile", address, kind);
        }
        report.connected
    }

    /// Wait for the audio route, then start the configured job unless one
    /// is already playing. Failure is reported but does not fail the run.
    async fn deliver(&self, reporter: &Reporter) {
        reporter.status(TakeoverStatus::Routing);
        if !self.settings.routing_delay.is_zero() {
            tokio::time::sleep(self.settings.routing_delay).await;
        }

        if self.engine.is_playing() {
            reporter.status(TakeoverStatus::AlreadyPlaying);
            return;
        }

        reporter.enter(Stage::Delivering, TakeoverStatus::StartingAudio);
        let spec = self.audio_job();
        let engine = Arc::clone(&self.engine);
        let started = tokio::task::spawn_blocking(move || engine.start(spec))
            .await
            .unwrap_or_else(|e| {
                Err(Error::AudioResourceUnavailable(format!(
                    "playback start aborted: {}",
                    e
                )))
            });

        match started {
            Ok(handle) => {
                reporter.send(TakeoverEvent::PlaybackStarted(handle.id()));
                *lock(&self.playback) = Some(handle);
            }
            Err(e) => {
                warn!("Audio delivery failed: {}", e);
                reporter.status(TakeoverStatus::AudioUnavailable(e.to_string()));
                reporter.send(TakeoverEvent::PlaybackFailed(e.to_string()));
            }
        }
    }
}

/// Clears the in-flight flag when the run ends, however it ends.
struct RunGuard {
    flag: Arc<AtomicBool>,
}

impl RunGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| Error::Busy)?;
        Ok(Self {
            flag: Arc::clone(flag),
        })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Synchronous event sink for one run, drained in order by [`pump_events`].
#[derive(Clone)]
struct Reporter {
    tx: mpsc::UnboundedSender<TakeoverEvent>,
}

impl Reporter {
    fn send(&self, event: TakeoverEvent) {
        let _ = self.tx.send(event);
    }

    fn stage(&self, stage: Stage) {
        debug!("Stage: {:?}", stage);
        self.send(TakeoverEvent::StageChanged(stage));
    }

    fn status(&self, status: TakeoverStatus) {
        info!("{}", status);
        self.send(TakeoverEvent::Status(status));
    }

    fn enter(&self, stage: Stage, status: TakeoverStatus) {
        self.stage(stage);
        self.status(status);
    }
}

async fn pump_events(handler: Arc<dyn EventHandler>, mut rx: mpsc::UnboundedReceiver<TakeoverEvent>) {
    while let Some(event) = rx.recv().await {
        handler.on_event(event).await;
    }
}
