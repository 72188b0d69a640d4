//! In-process Bluetooth simulator.
//!
//! Provides a scripted adapter whose discovery sessions, bonding and profile
//! connections are driven entirely in-process. Used for integration testing
//! without real hardware. Delays use tokio time, so paused clocks advance
//! instantly in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use takeover_core::{Address, BondState, DiscoveredDevice, Error, ProfileKind, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::adapter::{BondEvent, DiscoveryEvent, ProfileHandle, SystemAdapter};
use crate::listeners::ListenerSet;

/// How a simulated device responds to a bond request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondScript {
    /// Reports Bonding, then Bonded after the delay.
    Accept(Duration),
    /// Reports Bonding, then None after the delay.
    Reject(Duration),
    /// The stack refuses to start bonding.
    Refuse,
    /// Reports Bonding and never resolves.
    Hang,
}

/// How a simulated profile responds to a connect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    Accept,
    Reject,
    Error,
    /// Never returns.
    Hang,
}

/// A scripted audio profile.
pub struct SimulatedProfile {
    kind: ProfileKind,
    available: AtomicBool,
    behavior: Mutex<ConnectBehavior>,
    fail_disconnects: AtomicBool,
    connected: Mutex<Vec<Address>>,
    connect_calls: Mutex<Vec<Address>>,
    disconnect_calls: Mutex<Vec<Address>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Poisoning only happens if a test panicked mid-update.
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl SimulatedProfile {
    pub fn new(kind: ProfileKind) -> Self {
        Self {
            kind,
            available: AtomicBool::new(true),
            behavior: Mutex::new(ConnectBehavior::Accept),
            fail_disconnects: AtomicBool::new(false),
            connected: Mutex::new(Vec::new()),
            connect_calls: Mutex::new(Vec::new()),
            disconnect_calls: Mutex::new(Vec::new()),
        }
    }

    /// Mark `address` as already connected (an incumbent).
    pub fn add_connected(&self, address: Address) {
        let mut connected = lock(&self.connected);
        if !connected.contains(&address) {
            connected.push(address);
        }
    }

    pub fn set_behavior(&self, behavior: ConnectBehavior) {
        *lock(&self.behavior) = behavior;
    }

    pub fn set_fail_disconnects(&self, fail: bool) {
        self.fail_disconnects.store(fail, Ordering::SeqCst);
    }

    /// Simulate the profile service going away.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn connected(&self) -> Vec<Address> {
        lock(&self.connected).clone()
    }

    pub fn connect_calls(&self) -> Vec<Address> {
        lock(&self.connect_calls).clone()
    }

    pub fn disconnect_calls(&self) -> Vec<Address> {
        lock(&self.disconnect_calls).clone()
    }
}

#[async_trait]
impl ProfileHandle for SimulatedProfile {
    fn kind(&self) -> ProfileKind {
        self.kind
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn connected_devices(&self) -> Result<Vec<Address>> {
        Ok(self.connected())
    }

    async fn connect(&self, address: &Address) -> Result<bool> {
        lock(&self.connect_calls).push(*address);
        let behavior = *lock(&self.behavior);
        match behavior {
            ConnectBehavior::Accept => {
                self.add_connected(*address);
                Ok(true)
            }
            ConnectBehavior::Reject => Ok(false),
            ConnectBehavior::Error => Err(Error::Adapter(format!(
                "{} connect to {} failed",
                self.kind, address
            ))),
            ConnectBehavior::Hang => {
                std::future::pending::<()>().await;
                Ok(false)
            }
        }
    }

    async fn disconnect(&self, address: &Address) -> Result<bool> {
        lock(&self.disconnect_calls).push(*address);
        if self.fail_disconnects.load(Ordering::SeqCst) {
            return Err(Error::Adapter(format!("disconnect {} failed", address)));
        }
        let mut connected = lock(&self.connected);
        let before = connected.len();
        connected.retain(|a| a != address);
        Ok(connected.len() != before)
    }
}

struct DiscoveryScript {
    /// Devices emitted in each session, with their delay from session start.
    sightings: Vec<(Duration, DiscoveredDevice)>,
    /// Session length before the adapter reports Finished; `None` runs forever.
    session_length: Option<Duration>,
}

struct State {
    powered: bool,
    direct_lookup: bool,
    known: HashMap<Address, DiscoveredDevice>,
    bonded: Vec<Address>,
    discovery: DiscoveryScript,
    discovery_task: Option<JoinHandle<()>>,
    bond_scripts: HashMap<Address, BondScript>,
    bond_tasks: Vec<JoinHandle<()>>,
    profiles: HashMap<ProfileKind, Arc<SimulatedProfile>>,
    failing_profiles: Vec<ProfileKind>,
}

/// Scripted in-process adapter.
pub struct SimulatedAdapter {
    state: Arc<Mutex<State>>,
    discovery_listeners: ListenerSet<DiscoveryEvent>,
    bond_listeners: ListenerSet<BondEvent>,
    discovery_starts: AtomicUsize,
    discovery_cancels: AtomicUsize,
    profile_acquisitions: AtomicUsize,
}

impl Default for SimulatedAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedAdapter {
    /// Powered adapter with both profiles, nothing known and direct lookup on.
    pub fn new() -> Self {
        let profiles = ProfileKind::ALL
            .iter()
            .map(|kind| (*kind, Arc::new(SimulatedProfile::new(*kind))))
            .collect();

        Self {
            state: Arc::new(Mutex::new(State {
                powered: true,
                direct_lookup: true,
                known: HashMap::new(),
                bonded: Vec::new(),
                discovery: DiscoveryScript {
                    sightings: Vec::new(),
                    session_length: None,
                },
                discovery_task: None,
                bond_scripts: HashMap::new(),
                bond_tasks: Vec::new(),
                profiles,
                failing_profiles: Vec::new(),
            })),
            discovery_listeners: ListenerSet::new(),
            bond_listeners: ListenerSet::new(),
            discovery_starts: AtomicUsize::new(0),
            discovery_cancels: AtomicUsize::new(0),
            profile_acquisitions: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    pub fn set_powered(&self, powered: bool) {
        self.state().powered = powered;
    }

    /// Whether `remote_device` can construct records directly.
    pub fn set_direct_lookup(&self, enabled: bool) {
        self.state().direct_lookup = enabled;
    }

    /// Remember a device as bonded.
    pub fn add_bonded(&self, device: DiscoveredDevice) {
        let mut state = self.state();
        let device = device.with_bond_state(BondState::Bonded);
        if !state.bonded.contains(&device.address) {
            state.bonded.push(device.address);
        }
        state.known.insert(device.address, device);
    }

    /// Emit `device` `after` the start of every discovery session.
    pub fn add_sighting(&self, after: Duration, device: DiscoveredDevice) {
        let mut state = self.state();
        state.known.entry(device.address).or_insert_with(|| device.clone());
        state.discovery.sightings.push((after, device));
    }

    /// Report Finished this long after each session starts.
    pub fn set_session_length(&self, length: Option<Duration>) {
        self.state().discovery.session_length = length;
    }

    pub fn set_bond_script(&self, address: Address, script: BondScript) {
        self.state().bond_scripts.insert(address, script);
    }

    /// Make `acquire_profile` fail for `kind`.
    pub fn fail_profile(&self, kind: ProfileKind) {
        self.state().failing_profiles.push(kind);
    }

    /// Replace the handle served for a profile.
    pub fn replace_profile(&self, kind: ProfileKind) -> Arc<SimulatedProfile> {
        let profile = Arc::new(SimulatedProfile::new(kind));
        self.state().profiles.insert(kind, Arc::clone(&profile));
        profile
    }

    pub fn profile(&self, kind: ProfileKind) -> Option<Arc<SimulatedProfile>> {
        self.state().profiles.get(&kind).cloned()
    }

    pub fn discovery_starts(&self) -> usize {
        self.discovery_starts.load(Ordering::SeqCst)
    }

    pub fn discovery_cancels(&self) -> usize {
        self.discovery_cancels.load(Ordering::SeqCst)
    }

    pub fn is_discovering(&self) -> bool {
        self.state()
            .discovery_task
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Live discovery plus bond subscribers.
    pub fn listener_count(&self) -> usize {
        self.discovery_listeners.count() + self.bond_listeners.count()
    }

    pub fn profile_acquisitions(&self) -> usize {
        self.profile_acquisitions.load(Ordering::SeqCst)
    }

    pub fn is_bonded(&self, address: &Address) -> bool {
        self.state().bonded.contains(address)
    }

    #[cfg(test)]
    fn bond_task_count(&self) -> usize {
        self.state().bond_tasks.len()
    }

    fn stop_session(state: &mut State) {
        if let Some(task) = state.discovery_task.take() {
            task.abort();
        }
    }
}

impl Drop for SimulatedAdapter {
    fn drop(&mut self) {
        let mut state = self.state();
        Self::stop_session(&mut state);
        for task in state.bond_tasks.drain(..) {
            task.abort();
        }
    }
}

#[async_trait]
impl SystemAdapter for SimulatedAdapter {
    async fn is_powered(&self) -> Result<bool> {
        Ok(self.state().powered)
    }

    async fn remote_device(&self, address: &Address) -> Result<Option<DiscoveredDevice>> {
        let state = self.state();
        if !state.direct_lookup {
            return Ok(None);
        }
        Ok(Some(
            state
                .known
                .get(address)
                .cloned()
                .unwrap_or_else(|| DiscoveredDevice::new(*address, None)),
        ))
    }

    async fn bonded_devices(&self) -> Result<Vec<DiscoveredDevice>> {
        let state = self.state();
        Ok(state
            .bonded
            .iter()
            .filter_map(|address| state.known.get(address).cloned())
            .collect())
    }

    fn discovery_events(&self) -> mpsc::UnboundedReceiver<DiscoveryEvent> {
        self.discovery_listeners.subscribe()
    }

    async fn start_discovery(&self) -> Result<()> {
        let mut state = self.state();
        if !state.powered {
            return Err(Error::AdapterPoweredOff);
        }
        Self::stop_session(&mut state);

        let mut sightings = state.discovery.sightings.clone();
        sightings.sort_by_key(|(after, _)| *after);
        let session_length = state.discovery.session_length;
        let listeners = self.discovery_listeners.clone();

        self.discovery_starts.fetch_add(1, Ordering::SeqCst);
        debug!("Simulated discovery session started");

        state.discovery_task = Some(tokio::spawn(async move {
            let start = tokio::time::Instant::now();
            for (after, device) in sightings {
                if let Some(length) = session_length {
                    if after >= length {
                        break;
                    }
                }
                tokio::time::sleep_until(start + after).await;
                listeners.broadcast(DiscoveryEvent::Found(device));
            }
            match session_length {
                Some(length) => {
                    tokio::time::sleep_until(start + length).await;
                    listeners.broadcast(DiscoveryEvent::Finished);
                }
                None => std::future::pending::<()>().await,
            }
        }));
        Ok(())
    }

    async fn cancel_discovery(&self) -> Result<()> {
        let mut state = self.state();
        Self::stop_session(&mut state);
        self.discovery_cancels.fetch_add(1, Ordering::SeqCst);
        debug!("Simulated discovery session cancelled");
        Ok(())
    }

    fn bond_events(&self) -> mpsc::UnboundedReceiver<BondEvent> {
        self.bond_listeners.subscribe()
    }

    async fn create_bond(&self, address: &Address) -> Result<bool> {
        let mut state = self.state();
        let script = state
            .bond_scripts
            .get(address)
            .copied()
            .unwrap_or(BondScript::Accept(Duration::ZERO));

        if script == BondScript::Refuse {
            return Ok(false);
        }

        let address = *address;
        let listeners = self.bond_listeners.clone();
        let shared = Arc::clone(&self.state);
        listeners.broadcast(BondEvent {
            address,
            state: BondState::Bonding,
        });

        let task = tokio::spawn(async move {
            let outcome = match script {
                BondScript::Accept(delay) => {
                    tokio::time::sleep(delay).await;
                    BondState::Bonded
                }
                BondScript::Reject(delay) => {
                    tokio::time::sleep(delay).await;
                    BondState::None
                }
                BondScript::Refuse | BondScript::Hang => return,
            };

            if outcome == BondState::Bonded {
                let mut state = lock(&shared);
                if !state.bonded.contains(&address) {
                    state.bonded.push(address);
                }
                let entry = state
                    .known
                    .entry(address)
                    .or_insert_with(|| DiscoveredDevice::new(address, None));
                entry.bond_state = BondState::Bonded;
            }
            listeners.broadcast(BondEvent {
                address,
                state: outcome,
            });
        });
        state.bond_tasks.retain(|task| !task.is_finished());
        state.bond_tasks.push(task);
        Ok(true)
    }

    async fn acquire_profile(&self, kind: ProfileKind) -> Result<Arc<dyn ProfileHandle>> {
        let state = self.state();
        if state.failing_profiles.contains(&kind) {
            return Err(Error::Adapter(format!("{} profile unavailable", kind)));
        }
        let profile = state
            .profiles
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::Adapter(format!("{} profile unavailable", kind)))?;
        self.profile_acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: Address = Address([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

    fn speaker() -> DiscoveredDevice {
        DiscoveredDevice::new(TARGET, Some("MySpeaker".into()))
    }

    mod discovery {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn session_emits_sightings_then_finished() {
            let adapter = SimulatedAdapter::new();
            adapter.add_sighting(Duration::from_millis(300), speaker());
            adapter.set_session_length(Some(Duration::from_secs(1)));

            let mut events = adapter.discovery_events();
            adapter.start_discovery().await.unwrap();

            assert_eq!(events.recv().await, Some(DiscoveryEvent::Found(speaker())));
            assert_eq!(events.recv().await, Some(DiscoveryEvent::Finished));
            assert_eq!(adapter.discovery_starts(), 1);
        }

        #[tokio::test]
        async fn powered_off_adapter_cannot_discover() {
            let adapter = SimulatedAdapter::new();
            adapter.set_powered(false);
            assert!(matches!(
                adapter.start_discovery().await,
                Err(Error::AdapterPoweredOff)
            ));
        }

        #[tokio::test(start_paused = true)]
        async fn cancel_stops_session() {
            let adapter = SimulatedAdapter::new();
            adapter.add_sighting(Duration::from_secs(5), speaker());
            adapter.start_discovery().await.unwrap();
            assert!(adapter.is_discovering());

            adapter.cancel_discovery().await.unwrap();
            tokio::task::yield_now().await;
            assert!(!adapter.is_discovering());
            assert_eq!(adapter.discovery_cancels(), 1);
        }
    }

    mod bonding {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn accept_script_bonds_device() {
            let adapter = SimulatedAdapter::new();
            adapter.set_bond_script(TARGET, BondScript::Accept(Duration::from_millis(100)));
            let mut events = adapter.bond_events();

            assert!(adapter.create_bond(&TARGET).await.unwrap());
            assert_eq!(events.recv().await.unwrap().state, BondState::Bonding);
            assert_eq!(events.recv().await.unwrap().state, BondState::Bonded);
            assert!(adapter.is_bonded(&TARGET));
        }

        #[tokio::test(start_paused = true)]
        async fn finished_bond_tasks_are_pruned() {
            let adapter = SimulatedAdapter::new();
            for _ in 0..5 {
                assert!(adapter.create_bond(&TARGET).await.unwrap());
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert_eq!(adapter.bond_task_count(), 1);
        }

        #[tokio::test]
        async fn refuse_script_does_not_start() {
            let adapter = SimulatedAdapter::new();
            adapter.set_bond_script(TARGET, BondScript::Refuse);
            assert!(!adapter.create_bond(&TARGET).await.unwrap());
        }
    }

    mod profiles {
        use super::*;

        #[tokio::test]
        async fn disconnect_removes_incumbent() {
            let profile = SimulatedProfile::new(ProfileKind::Media);
            let other = Address([1, 2, 3, 4, 5, 6]);
            profile.add_connected(other);

            assert!(profile.disconnect(&other).await.unwrap());
            assert!(profile.connected().is_empty());
            assert_eq!(profile.disconnect_calls(), vec![other]);
        }

        #[tokio::test]
        async fn rejecting_profile_keeps_target_out() {
            let profile = SimulatedProfile::new(ProfileKind::Voice);
            profile.set_behavior(ConnectBehavior::Reject);

            assert!(!profile.connect(&TARGET).await.unwrap());
            assert!(profile.connected().is_empty());
            assert_eq!(profile.connect_calls(), vec![TARGET]);
        }

        #[tokio::test]
        async fn failing_profile_cannot_be_acquired() {
            let adapter = SimulatedAdapter::new();
            adapter.fail_profile(ProfileKind::Voice);

            assert!(adapter.acquire_profile(ProfileKind::Media).await.is_ok());
            assert!(adapter.acquire_profile(ProfileKind::Voice).await.is_err());
            assert_eq!(adapter.profile_acquisitions(), 1);
        }
    }
}
