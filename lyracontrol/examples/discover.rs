//! Dump every MediaServer and MediaRenderer found on the LAN for a while.
//!
//! ```sh
//! cargo run --example discover
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use lyracontrol::{DeviceKind, DeviceScanner, HttpDescriptionLoader, ScannerConfig, ScannerEvent};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let kinds = [DeviceKind::MediaServer, DeviceKind::MediaRenderer]
        .into_iter()
        .collect();
    let mut scanner = DeviceScanner::with_kinds(
        kinds,
        Arc::new(HttpDescriptionLoader::default()),
        ScannerConfig::default(),
    );

    let events = scanner.events();
    scanner.start()?;
    scanner.refresh()?;

    println!("Scanning for 15 seconds...");
    let deadline = std::time::Instant::now() + Duration::from_secs(15);
    loop {
        let now = std::time::Instant::now();
        if now >= deadline {
            break;
        }
        match events.recv_timeout(deadline - now) {
            Ok(ScannerEvent::DeviceDiscovered(device)) => {
                println!(
                    "+ {:?} {} ({}) at {}",
                    device.kind, device.friendly_name, device.udn, device.location
                );
                for (kind, service) in &device.services {
                    println!("    {} -> {}", kind, service.control_url);
                }
            }
            Ok(ScannerEvent::DeviceDisappeared(device)) => {
                println!("- {} ({})", device.friendly_name, device.udn);
            }
            Err(_) => break,
        }
    }

    scanner.stop();
    println!("Done.");
    Ok(())
}
