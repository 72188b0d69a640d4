//! Repeating alert raised when a watched device comes into range.
//!
//! The alarm sounds on a fixed period until it is silenced, either directly
//! or by a takeover that emits [`TakeoverEvent::SilenceAlerts`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use takeover_audio::AudioEngine;
use takeover_core::{AudioJobSpec, CancellationToken, Result};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::events::{EventHandler, TakeoverEvent};

/// Time between alert sounds.
pub const DEFAULT_ALERT_PERIOD: Duration = Duration::from_secs(1);

/// One short alert sound. May block briefly.
#[cfg_attr(test, mockall::automock)]
pub trait AlertSound: Send + Sync {
    fn sound(&self) -> Result<()>;
}

/// Plays a single noise buffer on its own engine.
///
/// Give it an engine other than the takeover's, or each beep replaces the
/// takeover's audio.
pub struct EngineBeep {
    engine: Arc<AudioEngine>,
}

impl EngineBeep {
    pub fn new(engine: Arc<AudioEngine>) -> Self {
        Self { engine }
    }
}

impl AlertSound for EngineBeep {
    fn sound(&self) -> Result<()> {
        self.engine
            .start(AudioJobSpec::noise().looping(false))
            .map(|_| ())
    }
}

/// A sounding presence alarm. Dropping it silences the alarm.
pub struct PresenceAlarm {
    silence: CancellationToken,
    task: JoinHandle<usize>,
}

impl PresenceAlarm {
    /// Sound immediately, then every `period` until silenced.
    pub fn start(sound: Arc<dyn AlertSound>, period: Duration) -> Self {
        let silence = CancellationToken::new();
        let task = {
            let silence = silence.clone();
            tokio::spawn(async move {
                let mut ticks = tokio::time::interval(period);
                ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
                let mut sounded = 0;
                loop {
                    tokio::select! {
                        biased;
                        _ = silence.cancelled() => break,
                        _ = ticks.tick() => {
                            let sound = Arc::clone(&sound);
                            match tokio::task::spawn_blocking(move || sound.sound()).await {
                                Ok(Ok(())) => sounded += 1,
                                Ok(Err(e)) => warn!("Alert sound failed: {}", e),
                                Err(e) => warn!("Alert sound task failed: {}", e),
                            }
                        }
                    }
                }
                debug!("Alarm silenced after {} sounds", sounded);
                sounded
            })
        };
        info!("Presence alarm sounding every {:?}", period);
        Self { silence, task }
    }

    /// Stop sounding. Idempotent.
    pub fn silence(&self) {
        self.silence.cancel();
    }

    pub fn is_silenced(&self) -> bool {
        self.silence.is_cancelled()
    }

    /// Wrap `inner` so a `SilenceAlerts` event silences this alarm.
    pub fn silencing<H: EventHandler>(&self, inner: H) -> SilencingHandler<H> {
        SilencingHandler {
            silence: self.silence.clone(),
            inner,
        }
    }

    /// Wait until the alarm is silenced. Returns how often it sounded.
    pub async fn finished(mut self) -> usize {
        (&mut self.task).await.unwrap_or(0)
    }
}

impl Drop for PresenceAlarm {
    fn drop(&mut self) {
        self.silence.cancel();
    }
}

/// Forwards every event and silences an alarm on `SilenceAlerts`.
pub struct SilencingHandler<H> {
    silence: CancellationToken,
    inner: H,
}

#[async_trait]
impl<H: EventHandler> EventHandler for SilencingHandler<H> {
    async fn on_event(&self, event: TakeoverEvent) {
        if matches!(event, TakeoverEvent::SilenceAlerts) {
            info!("Takeover succeeded, silencing presence alarm");
            self.silence.cancel();
        }
        self.inner.on_event(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChannelHandler;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use takeover_audio::{NoopVolume, NullSinkFactory};

    #[derive(Default)]
    struct CountingSound {
        count: AtomicUsize,
    }

    impl AlertSound for CountingSound {
        fn sound(&self) -> Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn sounds_repeatedly_until_silenced() {
        let sound = Arc::new(CountingSound::default());
        let alarm = PresenceAlarm::start(sound.clone(), Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(150)).await;
        alarm.silence();
        let sounded = alarm.finished().await;

        assert!(sounded >= 2, "sounded {} times", sounded);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(sound.count.load(Ordering::SeqCst), sounded);
    }

    #[tokio::test]
    async fn failing_sound_keeps_alarm_running() {
        let mut sound = MockAlertSound::new();
        sound
            .expect_sound()
            .times(2..)
            .returning(|| Err(takeover_core::Error::AudioResourceUnavailable("busy".into())));
        let alarm = PresenceAlarm::start(Arc::new(sound), Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(100)).await;
        alarm.silence();
        assert_eq!(alarm.finished().await, 0);
    }

    #[tokio::test]
    async fn silence_event_stops_alarm_and_is_forwarded() {
        let alarm = PresenceAlarm::start(Arc::new(CountingSound::default()), Duration::from_millis(10));
        let (inner, mut events) = ChannelHandler::new();
        let handler = alarm.silencing(inner);

        handler.on_event(TakeoverEvent::PlaybackStarted(1)).await;
        assert!(!alarm.is_silenced());

        handler.on_event(TakeoverEvent::SilenceAlerts).await;
        assert!(alarm.is_silenced());
        tokio::time::timeout(Duration::from_secs(1), alarm.finished())
            .await
            .expect("alarm task ended");

        assert!(matches!(events.recv().await, Some(TakeoverEvent::PlaybackStarted(1))));
        assert!(matches!(events.recv().await, Some(TakeoverEvent::SilenceAlerts)));
    }

    #[test]
    fn engine_beep_is_one_short_buffer() {
        let sinks = NullSinkFactory::unpaced();
        let engine = Arc::new(AudioEngine::new(Arc::new(sinks.clone()), Arc::new(NoopVolume)));

        EngineBeep::new(Arc::clone(&engine)).sound().unwrap();
        EngineBeep::new(Arc::clone(&engine)).sound().unwrap();
        engine.stop_all();

        assert_eq!(sinks.stats().opened(), 2);
        assert!(!engine.is_playing());
    }
}
