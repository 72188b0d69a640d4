//! Orchestrator builder for configuration.

use std::sync::Arc;
use std::time::Duration;

use takeover_audio::{AudioEngine, NoopVolume, NullSinkFactory};
use takeover_bluetooth::{SystemAdapter, DEFAULT_SETTLE_DELAY};
use takeover_core::{AudioJobSpec, Result};

use crate::orchestrator::{Settings, TakeoverOrchestrator};
use crate::{EventHandler, FallbackPicker, NoOpHandler};

/// Default pause between negotiation and audio delivery.
pub const DEFAULT_ROUTING_DELAY: Duration = Duration::from_millis(1200);

/// Builder for configuring a [`TakeoverOrchestrator`].
pub struct OrchestratorBuilder {
    adapter: Arc<dyn SystemAdapter>,
    engine: Option<Arc<AudioEngine>>,
    event_handler: Arc<dyn EventHandler>,
    fallback: Option<Arc<dyn FallbackPicker>>,
    audio_job: AudioJobSpec,
    settle_delay: Duration,
    /// Lets the system audio route follow the new connection.
    routing_delay: Duration,
    auto_silence: bool,
}

impl OrchestratorBuilder {
    /// Create new builder with defaults.
    pub fn new(adapter: Arc<dyn SystemAdapter>) -> Self {
        Self {
            adapter,
            engine: None,
            event_handler: Arc::new(NoOpHandler),
            fallback: None,
            audio_job: AudioJobSpec::default(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            routing_delay: DEFAULT_ROUTING_DELAY,
            auto_silence: false,
        }
    }

    /// Set the audio engine.
    ///
    /// Without one, audio goes to a paced null sink.
    pub fn engine(mut self, engine: Arc<AudioEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Set event handler.
    pub fn event_handler(mut self, handler: impl EventHandler + 'static) -> Self {
        self.event_handler = Arc::new(handler);
        self
    }

    /// Set the picker consulted when no profile connects.
    pub fn fallback(mut self, picker: impl FallbackPicker + 'static) -> Self {
        self.fallback = Some(Arc::new(picker));
        self
    }

    /// Set the job played after a successful takeover.
    pub fn audio_job(mut self, spec: AudioJobSpec) -> Self {
        self.audio_job = spec;
        self
    }

    /// Set the delay between consecutive profile connects.
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the delay between negotiation and audio delivery.
    pub fn routing_delay(mut self, delay: Duration) -> Self {
        self.routing_delay = delay;
        self
    }

    /// Emit [`SilenceAlerts`](crate::TakeoverEvent::SilenceAlerts) after a
    /// successful takeover.
    pub fn auto_silence(mut self, enabled: bool) -> Self {
        self.auto_silence = enabled;
        self
    }

    /// Build the orchestrator.
    pub fn build(self) -> Result<Arc<TakeoverOrchestrator>> {
        self.audio_job.validate()?;

        let engine = self.engine.unwrap_or_else(|| {
            Arc::new(AudioEngine::new(
                Arc::new(NullSinkFactory::new()),
                Arc::new(NoopVolume),
            ))
        });

        Ok(Arc::new(TakeoverOrchestrator::new(
            self.adapter,
            engine,
            self.event_handler,
            self.fallback,
            self.audio_job,
            Settings {
                settle_delay: self.settle_delay,
                routing_delay: self.routing_delay,
                auto_silence: self.auto_silence,
            },
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StaticPicker;
    use takeover_bluetooth::SimulatedAdapter;
    use takeover_core::Error;

    fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new(Arc::new(SimulatedAdapter::new()))
    }

    mod defaults {
        use super::*;

        #[test]
        fn new_has_expected_defaults() {
            let builder = builder();
            assert!(builder.engine.is_none());
            assert!(builder.fallback.is_none());
            assert_eq!(builder.audio_job, AudioJobSpec::noise());
            assert_eq!(builder.settle_delay, Duration::from_millis(500));
            assert_eq!(builder.routing_delay, Duration::from_millis(1200));
            assert!(!builder.auto_silence);
        }
    }

    mod setters {
        use super::*;

        #[test]
        fn delays_and_flags() {
            let builder = builder()
                .settle_delay(Duration::from_millis(10))
                .routing_delay(Duration::ZERO)
                .auto_silence(true);
            assert_eq!(builder.settle_delay, Duration::from_millis(10));
            assert_eq!(builder.routing_delay, Duration::ZERO);
            assert!(builder.auto_silence);
        }

        #[test]
        fn audio_job_and_fallback() {
            let builder = builder()
                .audio_job(AudioJobSpec::file("alarm.mp3").gain(2.0))
                .fallback(StaticPicker::declining());
            assert_eq!(builder.audio_job.gain, 2.0);
            assert!(builder.fallback.is_some());
        }
    }

    mod build {
        use super::*;

        #[tokio::test]
        async fn builds_with_defaults() {
            let orchestrator = builder().build().unwrap();
            assert!(!orchestrator.is_busy());
            assert_eq!(orchestrator.audio_job(), AudioJobSpec::noise());
        }

        #[test]
        fn rejects_invalid_audio_job() {
            let result = builder().audio_job(AudioJobSpec::noise().gain(0.0)).build();
            assert!(matches!(result, Err(Error::InvalidJob(_))));
        }
    }
}
