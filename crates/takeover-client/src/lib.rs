//! # takeover-client
//!
//! High-level takeover API.
//!
//! This crate provides:
//! - The takeover orchestrator that drives locate, bond, negotiate and deliver
//! - Progress events and handlers for UI collaborators
//! - A builder for configuring delays, audio and fallback behavior
//! - The fallback picker seam used when no profile connects
//! - A repeating presence alarm that a successful takeover silences
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use takeover_client::{DeviceIdentifier, OrchestratorBuilder, TakeoverRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = Arc::new(takeover_bluetooth::BluezAdapter::new().await?);
//!     let orchestrator = OrchestratorBuilder::new(adapter).build()?;
//!
//!     let request = TakeoverRequest::new(DeviceIdentifier::parse("MySpeaker")?);
//!     let outcome = orchestrator.submit(request)?.await?;
//!     println!("{}", outcome);
//!     Ok(())
//! }
//! ```

mod alert;
mod builder;
mod events;
mod fallback;
mod orchestrator;

pub use alert::{AlertSound, EngineBeep, PresenceAlarm, SilencingHandler, DEFAULT_ALERT_PERIOD};
pub use builder::{OrchestratorBuilder, DEFAULT_ROUTING_DELAY};
pub use events::{
    CallbackHandler, ChannelHandler, EventHandler, NoOpHandler, Stage, TakeoverEvent,
    TakeoverStatus,
};
pub use fallback::{FallbackPicker, StaticPicker};
pub use orchestrator::TakeoverOrchestrator;

// Re-export commonly used types
pub use takeover_core::{
    AudioJobSpec, DeviceIdentifier, DiscoveredDevice, Error, ProfileKind, Result,
    TakeoverOutcome, TakeoverRequest,
};
