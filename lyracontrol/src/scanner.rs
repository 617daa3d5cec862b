//! SSDP presence tracking: a live `UDN -> Device` map with expirations.
//!
//! The scanner is the single writer to the device map. SSDP callbacks and
//! the expiry sweep serialise on one lock, and discovery/disappearance
//! signals are always emitted after the lock is released.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};

use lyraupnp::ssdp::{SsdpClient, SsdpEvent};

use crate::device::{Device, DeviceKind, parse_device_description};
use crate::errors::ControlError;
use crate::events::EventBus;
use crate::soap_client::{DEFAULT_DESCRIPTION_TIMEOUT, http_get};

/// How often the expiry sweep walks the device map.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Fetches device description documents. The HTTP implementation is the
/// production one; tests inject canned XML.
pub trait DescriptionLoader: Send + Sync + 'static {
    fn fetch(&self, location: &str) -> Result<String, ControlError>;
}

/// ureq-backed description loader.
pub struct HttpDescriptionLoader {
    timeout: Duration,
}

impl HttpDescriptionLoader {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HttpDescriptionLoader {
    fn default() -> Self {
        Self::new(DEFAULT_DESCRIPTION_TIMEOUT)
    }
}

impl DescriptionLoader for HttpDescriptionLoader {
    fn fetch(&self, location: &str) -> Result<String, ControlError> {
        http_get(location, self.timeout)
    }
}

/// Presence transitions; each fires exactly once per device lifecycle.
#[derive(Clone, Debug)]
pub enum ScannerEvent {
    DeviceDiscovered(Arc<Device>),
    DeviceDisappeared(Arc<Device>),
}

/// Scanner configuration.
#[derive(Clone, Debug)]
pub struct ScannerConfig {
    pub sweep_interval: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: SWEEP_INTERVAL,
        }
    }
}

struct ScannerInner {
    kinds: HashSet<DeviceKind>,
    loader: Arc<dyn DescriptionLoader>,
    devices: Mutex<HashMap<String, Arc<Device>>>,
    bus: EventBus<ScannerEvent>,
}

/// The device scanner.
pub struct DeviceScanner {
    inner: Arc<ScannerInner>,
    config: ScannerConfig,
    ssdp: Option<Arc<SsdpClient>>,
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl DeviceScanner {
    /// Scanner for one device kind.
    pub fn new(kind: DeviceKind, loader: Arc<dyn DescriptionLoader>) -> Self {
        Self::with_kinds([kind].into_iter().collect(), loader, ScannerConfig::default())
    }

    /// Scanner for several device kinds.
    pub fn with_kinds(
        kinds: HashSet<DeviceKind>,
        loader: Arc<dyn DescriptionLoader>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ScannerInner {
                kinds,
                loader,
                devices: Mutex::new(HashMap::new()),
                bus: EventBus::new(),
            }),
            config,
            ssdp: None,
            running: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
        }
    }

    /// Presence signal channel.
    pub fn events(&self) -> Receiver<ScannerEvent> {
        self.inner.bus.subscribe()
    }

    /// Begin listening for SSDP notifications and schedule the periodic
    /// timeout sweep.
    pub fn start(&mut self) -> std::io::Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        debug!(
            known_devices = self.inner.devices.lock().expect("device map poisoned").len(),
            "Starting device scanner"
        );

        let client = Arc::new(SsdpClient::new()?);
        self.ssdp = Some(Arc::clone(&client));

        let inner = Arc::clone(&self.inner);
        let ssdp_thread = thread::Builder::new()
            .name("scanner-ssdp".into())
            .spawn(move || {
                client.run_event_loop(|event| inner.handle_ssdp_event(event));
            })?;
        self.threads.push(ssdp_thread);

        let inner = Arc::clone(&self.inner);
        let running = Arc::clone(&self.running);
        let sweep_interval = self.config.sweep_interval;
        let sweep_thread = thread::Builder::new()
            .name("scanner-sweep".into())
            .spawn(move || {
                let tick = Duration::from_millis(250);
                let mut elapsed = Duration::ZERO;
                while running.load(Ordering::SeqCst) {
                    thread::sleep(tick);
                    elapsed += tick;
                    if elapsed >= sweep_interval {
                        elapsed = Duration::ZERO;
                        inner.sweep_expired();
                    }
                }
            })?;
        self.threads.push(sweep_thread);

        Ok(())
    }

    /// Stop listening and cancel the sweep. Device records are retained.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(ssdp) = self.ssdp.take() {
            ssdp.stop();
        }
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        debug!(
            known_devices = self.inner.devices.lock().expect("device map poisoned").len(),
            "Stopped device scanner"
        );
    }

    /// Emit an active M-SEARCH: one per configured kind, or `ssdp:all`
    /// when no concrete kind is configured. Idempotent.
    pub fn refresh(&self) -> std::io::Result<()> {
        let Some(ssdp) = &self.ssdp else {
            return Ok(());
        };

        let targets: Vec<&str> = if self.inner.kinds.is_empty()
            || self.inner.kinds.contains(&DeviceKind::Other)
        {
            vec!["ssdp:all"]
        } else {
            self.inner.kinds.iter().map(|k| k.search_target()).collect()
        };

        for target in targets {
            ssdp.send_msearch(target, 3)?;
        }
        Ok(())
    }

    /// Snapshot read of one device. UDN comparison is case-insensitive.
    pub fn device(&self, udn: &str) -> Option<Arc<Device>> {
        self.inner
            .devices
            .lock()
            .expect("device map poisoned")
            .get(&udn.to_ascii_lowercase())
            .cloned()
    }

    /// Snapshot read of the whole map.
    pub fn devices(&self) -> HashMap<String, Arc<Device>> {
        self.inner
            .devices
            .lock()
            .expect("device map poisoned")
            .clone()
    }

    pub fn device_count(&self) -> usize {
        self.inner
            .devices
            .lock()
            .expect("device map poisoned")
            .len()
    }

    #[cfg(test)]
    fn inner(&self) -> &Arc<ScannerInner> {
        &self.inner
    }
}

impl Drop for DeviceScanner {
    fn drop(&mut self) {
        self.stop();
    }
}

impl ScannerInner {
    fn handle_ssdp_event(&self, event: SsdpEvent) {
        match event {
            // Presence-wise an M-SEARCH reply is the same thing as an alive
            SsdpEvent::Alive(advert) | SsdpEvent::SearchResponse(advert) => {
                if let Some(udn) = extract_udn_from_usn(&advert.usn) {
                    self.handle_alive(
                        &udn,
                        &advert.notification_type,
                        &advert.location,
                        advert.max_age,
                    );
                }
            }
            SsdpEvent::ByeBye { usn, .. } => {
                if let Some(udn) = extract_udn_from_usn(&usn) {
                    self.handle_byebye(&udn);
                }
            }
        }
    }

    /// Alive / search-result handling per the discovery algorithm:
    /// known+unchanged bumps the deadline, known+moved re-fetches and swaps
    /// in place, unknown fetches, filters and announces.
    fn handle_alive(&self, udn: &str, device_type: &str, location: &str, expires: u32) {
        // Only device-type notifications for configured kinds are relevant
        let kind = DeviceKind::from_type_urn(device_type);
        if !self.kinds.contains(&kind) {
            return;
        }

        let deadline = SystemTime::now() + Duration::from_secs(u64::from(expires));

        let known_location = {
            let mut devices = self.devices.lock().expect("device map poisoned");
            match devices.get(udn) {
                Some(existing) => {
                    if existing.location == location {
                        // Same place: just extend the lease. No event.
                        let mut refreshed = (**existing).clone();
                        refreshed.deadline = deadline;
                        devices.insert(udn.to_string(), Arc::new(refreshed));
                        return;
                    }
                    Some(existing.location.clone())
                }
                None => None,
            }
        };

        if let Some(old_location) = known_location {
            // Location changed (new ip or port): refresh the record under
            // the same UDN. Identity is stable, so no event fires.
            debug!(
                udn,
                old = old_location.as_str(),
                new = location,
                "Device location changed, refreshing description"
            );
            match self.fetch_and_parse(location, deadline) {
                Ok(device) if device.udn.eq_ignore_ascii_case(udn) => {
                    let mut devices = self.devices.lock().expect("device map poisoned");
                    devices.insert(udn.to_string(), Arc::new(device));
                }
                Ok(device) => {
                    warn!(
                        udn,
                        advertised = device.udn.as_str(),
                        "Re-fetched description carries a different UDN, ignoring"
                    );
                }
                Err(err) => {
                    warn!(udn, error = %err, "Failed to refresh moved device");
                }
            }
            return;
        }

        // Unknown device: download and parse the description, then insert
        // and announce. Fetch/parse failures are logged and dropped; the
        // next re-advert retries.
        let device = match self.fetch_and_parse(location, deadline) {
            Ok(device) => device,
            Err(err) => {
                warn!(location, error = %err, "Failed to obtain device description");
                return;
            }
        };

        if !self.kinds.contains(&device.kind) {
            debug!(
                udn = device.udn.as_str(),
                "Parsed device kind is not tracked, dropping"
            );
            return;
        }

        let device = Arc::new(device);
        // The map is keyed on the lowercased UDN; USNs and description
        // documents disagree about case often enough.
        let key = device.udn.to_ascii_lowercase();
        let announced = {
            let mut devices = self.devices.lock().expect("device map poisoned");
            if devices.contains_key(&key) {
                // A concurrent advert won the race; keep the existing record
                false
            } else {
                info!(
                    name = device.friendly_name.as_str(),
                    udn = device.udn.as_str(),
                    "Device added to the list"
                );
                devices.insert(key, Arc::clone(&device));
                true
            }
        };

        if announced {
            self.bus.broadcast(ScannerEvent::DeviceDiscovered(device));
        }
    }

    fn handle_byebye(&self, udn: &str) {
        let removed = {
            let mut devices = self.devices.lock().expect("device map poisoned");
            devices.remove(udn)
        };

        if let Some(device) = removed {
            info!(
                name = device.friendly_name.as_str(),
                udn, "Device said byebye"
            );
            self.bus.broadcast(ScannerEvent::DeviceDisappeared(device));
        }
    }

    /// Walk the map and drop every device past its deadline. Relies purely
    /// on received alive/byebye traffic; it never probes.
    fn sweep_expired(&self) {
        let now = SystemTime::now();
        let expired: Vec<Arc<Device>> = {
            let mut devices = self.devices.lock().expect("device map poisoned");
            let gone: Vec<String> = devices
                .iter()
                .filter(|(_, device)| now > device.deadline)
                .map(|(udn, _)| udn.clone())
                .collect();
            gone.iter().filter_map(|udn| devices.remove(udn)).collect()
        };

        for device in expired {
            info!(
                name = device.friendly_name.as_str(),
                udn = device.udn.as_str(),
                "Device timed out, removing it from the list"
            );
            self.bus.broadcast(ScannerEvent::DeviceDisappeared(device));
        }
    }

    fn fetch_and_parse(
        &self,
        location: &str,
        deadline: SystemTime,
    ) -> Result<Device, ControlError> {
        let xml = self.loader.fetch(location)?;
        parse_device_description(&xml, location, deadline)
    }
}

/// The UDN is the `uuid:...` prefix of the USN, before any `::` suffix.
fn extract_udn_from_usn(usn: &str) -> Option<String> {
    let lower = usn.trim().to_ascii_lowercase();
    let idx = lower.find("uuid:")?;
    let sub = &lower[idx..];
    match sub.find("::") {
        Some(end) => Some(sub[..end].to_string()),
        None => Some(sub.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const RENDERER_TYPE: &str = "urn:schemas-upnp-org:device:MediaRenderer:1";
    const SERVER_TYPE: &str = "urn:schemas-upnp-org:device:MediaServer:1";
    const RENDERER_UDN: &str = "uuid:11111111-2222-3333-4444-555555555555";

    struct FakeLoader {
        xml: String,
        calls: AtomicUsize,
    }

    impl FakeLoader {
        fn renderer() -> Arc<Self> {
            Arc::new(Self {
                xml: crate::device::RENDERER_DESCRIPTION.to_string(),
                calls: AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl DescriptionLoader for FakeLoader {
        fn fetch(&self, _location: &str) -> Result<String, ControlError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.xml.clone())
        }
    }

    struct FailingLoader;

    impl DescriptionLoader for FailingLoader {
        fn fetch(&self, location: &str) -> Result<String, ControlError> {
            Err(ControlError::NetworkUnreachable(location.to_string()))
        }
    }

    fn renderer_scanner(loader: Arc<FakeLoader>) -> DeviceScanner {
        DeviceScanner::new(DeviceKind::MediaRenderer, loader)
    }

    #[test]
    fn discovery_fires_exactly_once_per_lifecycle() {
        let loader = FakeLoader::renderer();
        let scanner = renderer_scanner(Arc::clone(&loader));
        let events = scanner.events();

        let usn = format!("{RENDERER_UDN}::{RENDERER_TYPE}");
        let inner = scanner.inner();

        inner.handle_alive(RENDERER_UDN, RENDERER_TYPE, "http://10.0.0.9/d.xml", 1800);
        inner.handle_alive(RENDERER_UDN, RENDERER_TYPE, "http://10.0.0.9/d.xml", 1800);
        inner.handle_alive(RENDERER_UDN, RENDERER_TYPE, "http://10.0.0.9/d.xml", 1800);

        assert!(matches!(
            events.try_recv(),
            Ok(ScannerEvent::DeviceDiscovered(_))
        ));
        assert!(events.try_recv().is_err(), "re-adverts must not re-announce");
        assert_eq!(scanner.device_count(), 1);
        // Only the first advert fetched the description
        assert_eq!(loader.call_count(), 1);

        inner.handle_ssdp_event(SsdpEvent::ByeBye {
            usn,
            nt: RENDERER_TYPE.to_string(),
            from: "10.0.0.9:1900".parse().unwrap(),
        });

        assert!(matches!(
            events.try_recv(),
            Ok(ScannerEvent::DeviceDisappeared(_))
        ));
        assert_eq!(scanner.device_count(), 0);

        // byebye for a device we no longer know is silent
        inner.handle_byebye(RENDERER_UDN);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn readvert_extends_the_deadline() {
        let loader = FakeLoader::renderer();
        let scanner = renderer_scanner(loader);
        let inner = scanner.inner();

        inner.handle_alive(RENDERER_UDN, RENDERER_TYPE, "http://10.0.0.9/d.xml", 1);
        let first_deadline = scanner.device(RENDERER_UDN).unwrap().deadline;

        inner.handle_alive(RENDERER_UDN, RENDERER_TYPE, "http://10.0.0.9/d.xml", 1800);
        let second_deadline = scanner.device(RENDERER_UDN).unwrap().deadline;

        assert!(second_deadline > first_deadline);
    }

    #[test]
    fn location_change_refetches_without_event() {
        let loader = FakeLoader::renderer();
        let scanner = renderer_scanner(Arc::clone(&loader));
        let events = scanner.events();
        let inner = scanner.inner();

        inner.handle_alive(RENDERER_UDN, RENDERER_TYPE, "http://10.0.0.9/d.xml", 1800);
        let _ = events.try_recv();

        inner.handle_alive(RENDERER_UDN, RENDERER_TYPE, "http://10.0.0.42/d.xml", 1800);

        assert!(events.try_recv().is_err(), "identity is stable, no event");
        assert_eq!(loader.call_count(), 2);
        assert_eq!(
            scanner.device(RENDERER_UDN).unwrap().location,
            "http://10.0.0.42/d.xml"
        );
    }

    #[test]
    fn non_matching_device_type_is_filtered_before_fetch() {
        let loader = FakeLoader::renderer();
        let scanner = renderer_scanner(Arc::clone(&loader));
        let inner = scanner.inner();

        inner.handle_alive("uuid:other", SERVER_TYPE, "http://10.0.0.8/d.xml", 1800);

        assert_eq!(loader.call_count(), 0);
        assert_eq!(scanner.device_count(), 0);
    }

    #[test]
    fn fetch_failure_drops_the_advert() {
        let scanner = DeviceScanner::new(DeviceKind::MediaRenderer, Arc::new(FailingLoader));
        let events = scanner.events();
        let inner = scanner.inner();

        inner.handle_alive(RENDERER_UDN, RENDERER_TYPE, "http://10.0.0.9/d.xml", 1800);

        assert_eq!(scanner.device_count(), 0);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn sweep_removes_expired_devices_once() {
        let loader = FakeLoader::renderer();
        let scanner = renderer_scanner(loader);
        let events = scanner.events();
        let inner = scanner.inner();

        inner.handle_alive(RENDERER_UDN, RENDERER_TYPE, "http://10.0.0.9/d.xml", 0);
        let _ = events.try_recv();

        std::thread::sleep(Duration::from_millis(20));
        inner.sweep_expired();
        inner.sweep_expired();

        assert!(matches!(
            events.try_recv(),
            Ok(ScannerEvent::DeviceDisappeared(_))
        ));
        assert!(events.try_recv().is_err());
        assert_eq!(scanner.device_count(), 0);
    }

    #[test]
    fn udn_extraction_from_usn() {
        assert_eq!(
            extract_udn_from_usn(&format!("{RENDERER_UDN}::{RENDERER_TYPE}")),
            Some(RENDERER_UDN.to_string())
        );
        assert_eq!(
            extract_udn_from_usn("uuid:abc"),
            Some("uuid:abc".to_string())
        );
        assert_eq!(
            extract_udn_from_usn("UUID:ABC::upnp:rootdevice"),
            Some("uuid:abc".to_string())
        );
        assert_eq!(extract_udn_from_usn("no-uuid-here"), None);
    }
}
