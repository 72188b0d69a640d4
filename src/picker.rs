//! Terminal device picker offered when a takeover finds no profile.

use std::io::{BufRead, Write};
use std::sync::Arc;

use async_trait::async_trait;
use takeover_bluetooth::{DeviceLocator, SystemAdapter};
use takeover_client::{DiscoveredDevice, FallbackPicker};
use tracing::warn;

/// Lists the bonded devices and reads a choice from stdin.
pub struct PromptPicker {
    locator: DeviceLocator,
}

impl PromptPicker {
    pub fn new(adapter: Arc<dyn SystemAdapter>) -> Self {
        Self {
            locator: DeviceLocator::new(adapter),
        }
    }
}

/// Parse a 1-based menu choice. Empty input declines.
fn parse_choice(line: &str, count: usize) -> Option<usize> {
    let index: usize = line.trim().parse().ok()?;
    (1..=count).contains(&index).then(|| index - 1)
}

#[async_trait]
impl FallbackPicker for PromptPicker {
    async fn pick(&self, failed: &DiscoveredDevice) -> Option<DiscoveredDevice> {
        let candidates: Vec<DiscoveredDevice> = match self.locator.bonded_devices().await {
            Ok(devices) => devices
                .into_iter()
                .filter(|d| d.address != failed.address)
                .collect(),
            Err(e) => {
                warn!("Could not list bonded devices: {}", e);
                return None;
            }
        };
        if candidates.is_empty() {
            println!("No other paired devices to try.");
            return None;
        }

        println!("Could not connect to {}. Try another paired device:", failed);
        for (i, device) in candidates.iter().enumerate() {
            println!("  {}) {}", i + 1, device);
        }
        print!("Choice (empty to give up): ");
        let _ = std::io::stdout().flush();

        let line = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await
        .ok()?
        .ok()?;

        parse_choice(&line, candidates.len()).map(|i| candidates[i].clone())
    }
}
