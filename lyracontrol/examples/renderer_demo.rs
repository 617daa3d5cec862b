//! Drive the first renderer found on the LAN: subscribe to its events,
//! play a URL passed on the command line, watch the transport state.
//!
//! ```sh
//! cargo run --example renderer_demo -- http://192.168.1.2:9000/track.flac
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use lyracontrol::{
    ControlPoint, DeviceKind, DeviceScanner, HttpDescriptionLoader, RendererEvent, ScannerEvent,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let url = match std::env::args().nth(1) {
        Some(url) => url,
        None => bail!("usage: renderer_demo <media-url>"),
    };

    let mut scanner = DeviceScanner::new(
        DeviceKind::MediaRenderer,
        Arc::new(HttpDescriptionLoader::default()),
    );
    let discoveries = scanner.events();
    scanner.start()?;
    scanner.refresh()?;

    println!("Waiting for a renderer...");
    let device = loop {
        match discoveries
            .recv_timeout(Duration::from_secs(30))
            .context("no renderer appeared within 30 seconds")?
        {
            ScannerEvent::DeviceDiscovered(device) => break device,
            ScannerEvent::DeviceDisappeared(_) => continue,
        }
    };
    println!("Using {} ({})", device.friendly_name, device.udn);

    let mut control_point = ControlPoint::with_eventing()?;
    control_point.set_renderer_device(&device)?;
    control_point.activate()?;

    let renderer_events = control_point.renderer().events();

    // Hand the URL straight to the transport; no server side involved.
    let resource = lyracontrol::MediaResource {
        url,
        protocol_info: lyradidl::ProtocolInfo::http_get("audio/mpeg"),
        size: None,
        duration: None,
        bitrate: None,
        sample_frequency: None,
        nr_audio_channels: None,
        bits_per_sample: None,
    };
    control_point.renderer().set_transport_item(&resource)?;
    control_point.renderer().play()?;

    println!("Playing; watching events for 30 seconds");
    let deadline = std::time::Instant::now() + Duration::from_secs(30);
    loop {
        let now = std::time::Instant::now();
        if now >= deadline {
            break;
        }
        match renderer_events.recv_timeout(deadline - now) {
            Ok(RendererEvent::PlaybackStateChanged(state)) => {
                println!("state: {}", state.as_str());
            }
            Ok(RendererEvent::CurrentTrackUriChanged(uri)) => println!("track: {}", uri),
            Ok(RendererEvent::VolumeChanged(volume)) => println!("volume: {}", volume),
            Ok(_) => {}
            Err(_) => break,
        }
    }

    control_point.stop().ok();
    control_point.deactivate();
    scanner.stop();
    Ok(())
}
