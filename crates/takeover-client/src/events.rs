//! Takeover events and handlers.

use std::fmt;

use async_trait::async_trait;
use takeover_core::{DeviceIdentifier, DiscoveredDevice, ProfileKind, TakeoverOutcome};
use tokio::sync::mpsc;

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Locating,
    Bonding,
    Negotiating,
    /// No profile connected; an alternate device may be tried.
    FallbackOffered,
    Delivering,
    Done,
    Failed,
}

/// Human-readable progress, one distinct message per step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TakeoverStatus {
    Searching(DeviceIdentifier),
    Found(DiscoveredDevice),
    Bonding(DiscoveredDevice),
    Connecting(ProfileKind),
    Routing,
    StartingAudio,
    AlreadyPlaying,
    AudioUnavailable(String),
    TryingAlternate(DiscoveredDevice),
    NotFound,
    BondFailed,
    NoProfile,
    Cancelled,
    Error(String),
}

impl fmt::Display for TakeoverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TakeoverStatus::Searching(id) => write!(f, "Searching for {}...", id),
            TakeoverStatus::Found(device) => write!(f, "Found {}", device),
            TakeoverStatus::Bonding(device) => write!(f, "Pairing with {}...", device),
            TakeoverStatus::Connecting(kind) => write!(f, "Connecting {} profile...", kind),
            TakeoverStatus::Routing => write!(f, "Waiting for audio route..."),
            TakeoverStatus::StartingAudio => write!(f, "Starting audio"),
            TakeoverStatus::AlreadyPlaying => write!(f, "Audio already playing"),
            TakeoverStatus::AudioUnavailable(reason) => write!(f, "Audio unavailable: {}", reason),
            TakeoverStatus::TryingAlternate(device) => write!(f, "Trying {} instead", device),
            TakeoverStatus::NotFound => write!(f, "Device not found"),
            TakeoverStatus::BondFailed => write!(f, "Pairing failed"),
            TakeoverStatus::NoProfile => write!(f, "Could not connect any audio profile"),
            TakeoverStatus::Cancelled => write!(f, "Cancelled"),
            TakeoverStatus::Error(reason) => write!(f, "Error: {}", reason),
        }
    }
}

/// Events emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum TakeoverEvent {
    /// Entered a new stage.
    StageChanged(Stage),
    /// Progress message.
    Status(TakeoverStatus),
    /// Target device located.
    DeviceLocated(DiscoveredDevice),
    /// No profile connected to this device; a picker may offer another.
    FallbackOffered(DiscoveredDevice),
    /// Playback job started.
    PlaybackStarted(u64),
    /// Playback could not start. The takeover itself still succeeded.
    PlaybackFailed(String),
    /// Presence alerts for the target may be silenced.
    SilenceAlerts,
    /// Terminal outcome, emitted exactly once per run.
    Finished(TakeoverOutcome),
}

/// Handler for takeover events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Called when an event occurs.
    async fn on_event(&self, event: TakeoverEvent);
}

/// No-op event handler.
pub struct NoOpHandler;

#[async_trait]
impl EventHandler for NoOpHandler {
    async fn on_event(&self, _event: TakeoverEvent) {}
}

/// Callback-based event handler.
pub struct CallbackHandler<F>
where
    F: Fn(TakeoverEvent) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackHandler<F>
where
    F: Fn(TakeoverEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F> EventHandler for CallbackHandler<F>
where
    F: Fn(TakeoverEvent) + Send + Sync,
{
    async fn on_event(&self, event: TakeoverEvent) {
        (self.callback)(event);
    }
}

/// Forwards events into a channel.
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<TakeoverEvent>,
}

impl ChannelHandler {
    /// Create a handler and the receiver its events arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TakeoverEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventHandler for ChannelHandler {
    async fn on_event(&self, event: TakeoverEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use takeover_core::Address;

    fn speaker() -> DiscoveredDevice {
        DiscoveredDevice::new(
            Address([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]),
            Some("MySpeaker".to_string()),
        )
    }

    mod status {
        use super::*;

        #[test]
        fn every_status_has_a_distinct_message() {
            let statuses = vec![
                TakeoverStatus::Searching(DeviceIdentifier::parse("MySpeaker").unwrap()),
                TakeoverStatus::Found(speaker()),
                TakeoverStatus::Bonding(speaker()),
                TakeoverStatus::Connecting(ProfileKind::Media),
                TakeoverStatus::Connecting(ProfileKind::Voice),
                TakeoverStatus::Routing,
                TakeoverStatus::StartingAudio,
                TakeoverStatus::AlreadyPlaying,
                TakeoverStatus::AudioUnavailable("busy".to_string()),
                TakeoverStatus::TryingAlternate(speaker()),
                TakeoverStatus::NotFound,
                TakeoverStatus::BondFailed,
                TakeoverStatus::NoProfile,
                TakeoverStatus::Cancelled,
                TakeoverStatus::Error("boom".to_string()),
            ];

            let mut messages: Vec<String> = statuses.iter().map(|s| s.to_string()).collect();
            let total = messages.len();
            messages.sort();
            messages.dedup();
            assert_eq!(messages.len(), total);
        }

        #[test]
        fn messages_name_the_subject() {
            assert!(TakeoverStatus::Found(speaker()).to_string().contains("MySpeaker"));
            assert_eq!(
                TakeoverStatus::Connecting(ProfileKind::Voice).to_string(),
                "Connecting voice profile..."
            );
        }
    }

    mod takeover_event {
        use super::*;

        #[test]
        fn events_are_clone() {
            let event = TakeoverEvent::PlaybackStarted(7);
            match event.clone() {
                TakeoverEvent::PlaybackStarted(id) => assert_eq!(id, 7),
                _ => panic!("Clone failed"),
            }
        }

        #[test]
        fn events_are_debug() {
            let event = TakeoverEvent::StageChanged(Stage::Negotiating);
            let debug_str = format!("{:?}", event);
            assert!(debug_str.contains("Negotiating"));
        }
    }

    mod no_op_handler {
        use super::*;

        #[tokio::test]
        async fn handles_all_events() {
            let handler = NoOpHandler;

            handler.on_event(TakeoverEvent::StageChanged(Stage::Locating)).await;
            handler.on_event(TakeoverEvent::DeviceLocated(speaker())).await;
            handler.on_event(TakeoverEvent::SilenceAlerts).await;
            handler
                .on_event(TakeoverEvent::Finished(TakeoverOutcome::Cancelled))
                .await;
        }
    }

    mod callback_handler {
        use super::*;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        #[tokio::test]
        async fn counts_matching_events() {
            let count = Arc::new(AtomicUsize::new(0));
            let count_clone = Arc::clone(&count);

            let handler = CallbackHandler::new(move |event| {
                if let TakeoverEvent::Status(_) = event {
                    count_clone.fetch_add(1, Ordering::SeqCst);
                }
            });

            handler.on_event(TakeoverEvent::Status(TakeoverStatus::Routing)).await;
            handler.on_event(TakeoverEvent::Status(TakeoverStatus::NotFound)).await;
            handler.on_event(TakeoverEvent::SilenceAlerts).await;

            assert_eq!(count.load(Ordering::SeqCst), 2);
        }
    }

    mod channel_handler {
        use super::*;

        #[tokio::test]
        async fn forwards_in_order() {
            let (handler, mut rx) = ChannelHandler::new();

            handler.on_event(TakeoverEvent::StageChanged(Stage::Locating)).await;
            handler.on_event(TakeoverEvent::SilenceAlerts).await;

            assert!(matches!(
                rx.recv().await,
                Some(TakeoverEvent::StageChanged(Stage::Locating))
            ));
            assert!(matches!(rx.recv().await, Some(TakeoverEvent::SilenceAlerts)));
        }

        #[tokio::test]
        async fn survives_dropped_receiver() {
            let (handler, rx) = ChannelHandler::new();
            drop(rx);
            handler.on_event(TakeoverEvent::SilenceAlerts).await;
        }
    }
}
