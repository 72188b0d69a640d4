//! BlueZ binding.
//!
//! Drives the default Linux adapter over D-Bus. Requires the bluetooth
//! service to be running.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bluer::{Adapter, AdapterEvent, Device, Session};
use futures::StreamExt;
use takeover_core::{Address, BondState, DiscoveredDevice, Error, ProfileKind, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::{BondEvent, DiscoveryEvent, ProfileHandle, SystemAdapter};
use crate::listeners::ListenerSet;

fn to_bluer(address: &Address) -> bluer::Address {
    bluer::Address::new(address.0)
}

fn from_bluer(address: bluer::Address) -> Address {
    Address(address.0)
}

/// Read the properties we care about, using defaults if unavailable.
async fn describe(device: &Device) -> DiscoveredDevice {
    let name = match device.name().await.ok().flatten() {
        Some(name) => Some(name),
        None => device.alias().await.ok(),
    };
    let bond_state = if device.is_paired().await.unwrap_or(false) {
        BondState::Bonded
    } else {
        BondState::None
    };

    DiscoveredDevice {
        address: from_bluer(device.address()),
        name,
        bond_state,
    }
}

/// The default BlueZ adapter.
pub struct BluezAdapter {
    _session: Session,
    adapter: Adapter,
    discovery_listeners: ListenerSet<DiscoveryEvent>,
    bond_listeners: ListenerSet<BondEvent>,
    discovery_task: Mutex<Option<JoinHandle<()>>>,
}

impl BluezAdapter {
    /// Open a BlueZ session on the default adapter.
    pub async fn new() -> Result<Self> {
        let session = Session::new()
            .await
            .map_err(|e| Error::Adapter(format!("Failed to create BlueZ session: {}", e)))?;

        let adapter = session
            .default_adapter()
            .await
            .map_err(|e| Error::Adapter(format!("Failed to get adapter: {}", e)))?;

        info!("Using Bluetooth adapter: {}", adapter.name());

        Ok(Self {
            _session: session,
            adapter,
            discovery_listeners: ListenerSet::new(),
            bond_listeners: ListenerSet::new(),
            discovery_task: Mutex::new(None),
        })
    }

    fn device(&self, address: &Address) -> Result<Device> {
        self.adapter
            .device(to_bluer(address))
            .map_err(|e| Error::Adapter(format!("Failed to get device {}: {}", address, e)))
    }

    fn replace_discovery_task(&self, task: Option<JoinHandle<()>>) {
        let mut slot = self
            .discovery_task
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        *slot = task;
    }
}

impl Drop for BluezAdapter {
    fn drop(&mut self) {
        self.replace_discovery_task(None);
    }
}

#[async_trait]
impl SystemAdapter for BluezAdapter {
    async fn is_powered(&self) -> Result<bool> {
        self.adapter
            .is_powered()
            .await
            .map_err(|e| Error::Adapter(format!("Failed to get power state: {}", e)))
    }

    async fn remote_device(&self, address: &Address) -> Result<Option<DiscoveredDevice>> {
        let device = self.device(address)?;
        Ok(Some(describe(&device).await))
    }

    async fn bonded_devices(&self) -> Result<Vec<DiscoveredDevice>> {
        let addresses = self
            .adapter
            .device_addresses()
            .await
            .map_err(|e| Error::Adapter(format!("Failed to list devices: {}", e)))?;

        let mut bonded = Vec::new();
        for addr in addresses {
            match self.adapter.device(addr) {
                Ok(device) => {
                    let described = describe(&device).await;
                    if described.is_bonded() {
                        bonded.push(described);
                    }
                }
                Err(e) => warn!("Failed to get device {}: {}", addr, e),
            }
        }
        Ok(bonded)
    }

    fn discovery_events(&self) -> mpsc::UnboundedReceiver<DiscoveryEvent> {
        self.discovery_listeners.subscribe()
    }

    async fn start_discovery(&self) -> Result<()> {
        if !self.is_powered().await? {
            return Err(Error::AdapterPoweredOff);
        }
        self.replace_discovery_task(None);

        let events = self
            .adapter
            .discover_devices()
            .await
            .map_err(|e| Error::Adapter(format!("Failed to start discovery: {}", e)))?;

        let adapter = self.adapter.clone();
        let listeners = self.discovery_listeners.clone();
        let task = tokio::spawn(async move {
            let mut events = Box::pin(events);
            while let Some(event) = events.next().await {
                match event {
                    AdapterEvent::DeviceAdded(addr) => match adapter.device(addr) {
                        Ok(device) => {
                            debug!("Discovered device: {}", addr);
                            listeners.broadcast(DiscoveryEvent::Found(describe(&device).await));
                        }
                        Err(e) => warn!("Failed to get device {}: {}", addr, e),
                    },
                    AdapterEvent::DeviceRemoved(addr) => debug!("Device removed: {}", addr),
                    _ => {}
                }
            }
            listeners.broadcast(DiscoveryEvent::Finished);
        });

        self.replace_discovery_task(Some(task));
        debug!("Discovery started");
        Ok(())
    }

    async fn cancel_discovery(&self) -> Result<()> {
        // Dropping the event stream ends the BlueZ discovery session.
        self.replace_discovery_task(None);
        debug!("Discovery stopped");
        Ok(())
    }

    fn bond_events(&self) -> mpsc::UnboundedReceiver<BondEvent> {
        self.bond_listeners.subscribe()
    }

    async fn create_bond(&self, address: &Address) -> Result<bool> {
        let device = self.device(address)?;
        let address = *address;
        let listeners = self.bond_listeners.clone();

        listeners.broadcast(BondEvent {
            address,
            state: BondState::Bonding,
        });
        tokio::spawn(async move {
            let state = match device.pair().await {
                Ok(()) => {
                    if let Err(e) = device.set_trusted(true).await {
                        warn!("Failed to trust {}: {}", address, e);
                    }
                    BondState::Bonded
                }
                Err(e) => {
                    warn!("Pairing with {} failed: {}", address, e);
                    BondState::None
                }
            };
            listeners.broadcast(BondEvent { address, state });
        });
        Ok(true)
    }

    async fn acquire_profile(&self, kind: ProfileKind) -> Result<Arc<dyn ProfileHandle>> {
        let uuid = Uuid::parse_str(kind.uuid_str())
            .map_err(|e| Error::Adapter(format!("Bad {} profile UUID: {}", kind, e)))?;
        Ok(Arc::new(BluezProfile {
            adapter: self.adapter.clone(),
            kind,
            uuid,
        }))
    }
}

/// One audio profile, addressed by its remote service UUID.
struct BluezProfile {
    adapter: Adapter,
    kind: ProfileKind,
    uuid: Uuid,
}

impl BluezProfile {
    fn device(&self, address: &Address) -> Result<Device> {
        self.adapter
            .device(to_bluer(address))
            .map_err(|e| Error::Adapter(format!("Failed to get device {}: {}", address, e)))
    }
}

#[async_trait]
impl ProfileHandle for BluezProfile {
    fn kind(&self) -> ProfileKind {
        self.kind
    }

    /// The adapter object vanishes from D-Bus when bluetoothd restarts or
    /// the controller is unplugged.
    async fn is_available(&self) -> bool {
        match self.adapter.is_powered().await {
            Ok(_) => true,
            Err(e) => {
                debug!("{} profile lost its adapter: {}", self.kind, e);
                false
            }
        }
    }

    async fn connected_devices(&self) -> Result<Vec<Address>> {
        let addresses = self
            .adapter
            .device_addresses()
            .await
            .map_err(|e| Error::Adapter(format!("Failed to list devices: {}", e)))?;

        let mut connected = Vec::new();
        for addr in addresses {
            let Ok(device) = self.adapter.device(addr) else {
                continue;
            };
            if !device.is_connected().await.unwrap_or(false) {
                continue;
            }
            let has_profile = device
                .uuids()
                .await
                .ok()
                .flatten()
                .map(|uuids| uuids.contains(&self.uuid))
                .unwrap_or(false);
            if has_profile {
                connected.push(from_bluer(addr));
            }
        }
        Ok(connected)
    }

    async fn connect(&self, address: &Address) -> Result<bool> {
        let device = self.device(address)?;
        device
            .connect_profile(&self.uuid)
            .await
            .map_err(|e| Error::Adapter(format!("Failed to connect {}: {}", self.kind, e)))?;
        Ok(true)
    }

    async fn disconnect(&self, address: &Address) -> Result<bool> {
        let device = self.device(address)?;
        device
            .disconnect_profile(&self.uuid)
            .await
            .map_err(|e| Error::Adapter(format!("Failed to disconnect {}: {}", self.kind, e)))?;
        Ok(true)
    }
}
