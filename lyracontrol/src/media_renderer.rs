//! MediaRenderer facade: RenderingControl + ConnectionManager (+
//! AVTransport when advertised) behind one playback-control surface, with
//! the playback state derived from the AVTransport LastChange stream.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::warn;

use lyradidl::{ProtocolInfo, format_duration, parse_duration};

use crate::avtransport::{AvAction, AvTransportClient, AvVariable};
use crate::connection_manager::{CmAction, ConnectionInfo, ConnectionManagerClient, Direction};
use crate::device::{Device, DeviceKind, ServiceKind};
use crate::errors::ControlError;
use crate::events::EventBus;
use crate::gena::EventBroker;
use crate::item::{MediaEntry, MediaResource};
use crate::rendering_control::{RcVariable, RenderingControlClient};
use crate::service_client::StateVariableEvent;

/// Playback state as derived from the AVTransport TransportState variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Transitioning,
    Paused,
    Recording,
    NoMediaPresent,
    Unknown,
}

impl PlaybackState {
    /// Normalise a raw TransportState value.
    pub fn from_transport_state(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "STOPPED" => PlaybackState::Stopped,
            "PLAYING" => PlaybackState::Playing,
            "TRANSITIONING" => PlaybackState::Transitioning,
            "PAUSED_PLAYBACK" | "PAUSED_RECORDING" => PlaybackState::Paused,
            "RECORDING" => PlaybackState::Recording,
            "NO_MEDIA_PRESENT" => PlaybackState::NoMediaPresent,
            _ => PlaybackState::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlaybackState::Stopped => "STOPPED",
            PlaybackState::Playing => "PLAYING",
            PlaybackState::Transitioning => "TRANSITIONING",
            PlaybackState::Paused => "PAUSED",
            PlaybackState::Recording => "RECORDING",
            PlaybackState::NoMediaPresent => "NO_MEDIA_PRESENT",
            PlaybackState::Unknown => "UNKNOWN",
        }
    }
}

/// Transport actions a renderer can currently offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RendererAction {
    Play,
    Stop,
    Pause,
    Seek,
    Next,
    Previous,
    Record,
}

/// Parse the CurrentTransportActions list: comma-separated, trimmed,
/// unknown tokens ignored. Devices commonly abbreviate Previous as "Prev".
pub fn parse_available_actions(raw: &str) -> HashSet<RendererAction> {
    raw.split(',')
        .map(str::trim)
        .filter_map(|token| match token {
            "Play" => Some(RendererAction::Play),
            "Stop" => Some(RendererAction::Stop),
            "Pause" => Some(RendererAction::Pause),
            "Seek" => Some(RendererAction::Seek),
            "Next" => Some(RendererAction::Next),
            "Previous" | "Prev" => Some(RendererAction::Previous),
            "Record" => Some(RendererAction::Record),
            _ => None,
        })
        .collect()
}

/// Signals the renderer facade fans out from the event streams.
#[derive(Debug, Clone)]
pub enum RendererEvent {
    PlaybackStateChanged(PlaybackState),
    CurrentTrackUriChanged(String),
    CurrentTrackMetadataChanged(String),
    CurrentTrackDurationChanged(Duration),
    AvailableActionsChanged(HashSet<RendererAction>),
    VolumeChanged(u32),
    MuteChanged(bool),
}

#[derive(Debug, Default)]
struct RendererState {
    playback: Option<PlaybackState>,
    track_uri: Option<String>,
    track_metadata: Option<String>,
    track_duration: Option<Duration>,
    actions: HashSet<RendererAction>,
    volume: Option<u32>,
    mute: Option<bool>,
}

/// MediaRenderer facade.
pub struct MediaRenderer {
    device: Option<Arc<Device>>,
    rendering_control: RenderingControlClient,
    connection_manager: ConnectionManagerClient,
    avtransport: Option<AvTransportClient>,
    broker: Option<Arc<EventBroker>>,
    sink_protocols: Vec<ProtocolInfo>,
    conn_info: Mutex<ConnectionInfo>,
    state: Arc<Mutex<RendererState>>,
    bus: EventBus<RendererEvent>,
    pumps_active: Arc<AtomicBool>,
    pumps: Vec<JoinHandle<()>>,
}

impl Default for MediaRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaRenderer {
    pub fn new() -> Self {
        Self {
            device: None,
            rendering_control: RenderingControlClient::new(),
            connection_manager: ConnectionManagerClient::new(),
            avtransport: None,
            broker: None,
            sink_protocols: Vec::new(),
            conn_info: Mutex::new(ConnectionInfo::unknown()),
            state: Arc::new(Mutex::new(RendererState::default())),
            bus: EventBus::new(),
            pumps_active: Arc::new(AtomicBool::new(false)),
            pumps: Vec::new(),
        }
    }

    pub fn set_event_broker(&mut self, broker: Arc<EventBroker>) {
        self.rendering_control.set_event_broker(Arc::clone(&broker));
        self.connection_manager.set_event_broker(Arc::clone(&broker));
        if let Some(avt) = &mut self.avtransport {
            avt.set_event_broker(Arc::clone(&broker));
        }
        self.broker = Some(broker);
    }

    /// Bind to a MediaRenderer device and cache its sink protocol list.
    pub fn set_device(&mut self, device: &Arc<Device>) -> Result<(), ControlError> {
        if device.kind != DeviceKind::MediaRenderer {
            return Err(ControlError::NotAMediaRenderer(
                device.friendly_name.clone(),
            ));
        }

        self.deactivate_events();

        self.rendering_control.set_device(device)?;
        self.connection_manager.set_device(device)?;

        if device.implements(ServiceKind::AVTransport) {
            let mut avt = AvTransportClient::new();
            if let Some(broker) = &self.broker {
                avt.set_event_broker(Arc::clone(broker));
            }
            avt.set_device(device)?;
            self.avtransport = Some(avt);
        } else {
            self.avtransport = None;
        }

        self.sink_protocols = match self.connection_manager.get_protocol_info() {
            Ok(lists) => lists.sink,
            Err(err) => {
                warn!(error = %err, "GetProtocolInfo failed, playback checks will reject everything");
                Vec::new()
            }
        };

        *self.conn_info.lock().expect("connection info poisoned") = ConnectionInfo::unknown();
        *self.state.lock().expect("renderer state poisoned") = RendererState::default();
        self.device = Some(Arc::clone(device));
        Ok(())
    }

    pub fn device(&self) -> Option<&Arc<Device>> {
        self.device.as_ref()
    }

    pub fn friendly_name(&self) -> &str {
        self.device
            .as_ref()
            .map(|d| d.friendly_name.as_str())
            .unwrap_or("")
    }

    pub fn has_avtransport(&self) -> bool {
        self.avtransport.is_some()
    }

    pub fn rendering_control(&self) -> &RenderingControlClient {
        &self.rendering_control
    }

    pub fn connection_manager(&self) -> &ConnectionManagerClient {
        &self.connection_manager
    }

    pub fn avtransport(&self) -> Result<&AvTransportClient, ControlError> {
        self.avtransport
            .as_ref()
            .ok_or(ControlError::MissingService(ServiceKind::AVTransport.name()))
    }

    /// Renderer signal channel.
    pub fn events(&self) -> Receiver<RendererEvent> {
        self.bus.subscribe()
    }

    // --- eventing ---------------------------------------------------------

    /// Subscribe to AVTransport and RenderingControl eventing and derive
    /// the cached playback state from the LastChange streams.
    pub fn activate_events(&mut self) -> Result<(), ControlError> {
        if self.pumps_active.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.rendering_control.subscribe()?;
        let rc_events = self.rendering_control.events();
        self.spawn_pump("renderer-rc-pump", rc_events, handle_rendering_control_event);

        let avt_events = match &self.avtransport {
            Some(avt) => {
                avt.subscribe()?;
                Some(avt.events())
            }
            None => None,
        };
        if let Some(events) = avt_events {
            self.spawn_pump("renderer-avt-pump", events, handle_avtransport_event);
        }

        Ok(())
    }

    /// Drop the subscriptions and stop the pumps.
    pub fn deactivate_events(&mut self) {
        if !self.pumps_active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(avt) = &self.avtransport {
            let _ = avt.unsubscribe();
        }
        let _ = self.rendering_control.unsubscribe();
        for pump in self.pumps.drain(..) {
            let _ = pump.join();
        }
    }

    fn spawn_pump<V: Copy + Ord + Send + std::fmt::Debug + 'static>(
        &mut self,
        name: &str,
        events: Receiver<StateVariableEvent<V>>,
        apply: fn(&StateVariableEvent<V>, &Mutex<RendererState>, &EventBus<RendererEvent>),
    ) {
        let state = Arc::clone(&self.state);
        let bus = self.bus.clone();
        let active = Arc::clone(&self.pumps_active);

        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                while active.load(Ordering::SeqCst) {
                    match events.recv_timeout(Duration::from_millis(250)) {
                        Ok(event) => apply(&event, &*state, &bus),
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .expect("failed to spawn renderer event pump");
        self.pumps.push(handle);
    }

    /// Last playback state seen on the event stream.
    pub fn playback_state(&self) -> PlaybackState {
        self.state
            .lock()
            .expect("renderer state poisoned")
            .playback
            .unwrap_or(PlaybackState::Unknown)
    }

    pub fn current_track_uri(&self) -> Option<String> {
        self.state
            .lock()
            .expect("renderer state poisoned")
            .track_uri
            .clone()
    }

    pub fn current_track_metadata(&self) -> Option<String> {
        self.state
            .lock()
            .expect("renderer state poisoned")
            .track_metadata
            .clone()
    }

    pub fn current_track_duration(&self) -> Option<Duration> {
        self.state
            .lock()
            .expect("renderer state poisoned")
            .track_duration
    }

    pub fn available_actions(&self) -> HashSet<RendererAction> {
        self.state
            .lock()
            .expect("renderer state poisoned")
            .actions
            .clone()
    }

    pub fn is_action_available(&self, action: RendererAction) -> bool {
        self.state
            .lock()
            .expect("renderer state poisoned")
            .actions
            .contains(&action)
    }

    // --- playback capability ---------------------------------------------

    /// True when some resource of the entry is compatible with some sink
    /// protocol; the first compatible resource is returned.
    pub fn supports_playback(&self, entry: &MediaEntry) -> Option<MediaResource> {
        entry
            .resources
            .iter()
            .find(|resource| {
                self.sink_protocols
                    .iter()
                    .any(|sink| resource.protocol_info.is_compatible_with(sink))
            })
            .cloned()
    }

    pub fn sink_protocols(&self) -> &[ProtocolInfo] {
        &self.sink_protocols
    }

    // --- connection management -------------------------------------------

    /// `UDN/serviceId` naming this renderer's connection manager.
    pub fn peer_connection_manager(&self) -> String {
        let udn = self
            .device
            .as_ref()
            .map(|d| d.udn.clone())
            .unwrap_or_default();
        let service_id = self
            .device
            .as_ref()
            .and_then(|d| d.service(ServiceKind::ConnectionManager))
            .map(|s| s.id.clone())
            .unwrap_or_default();
        format!("{}/{}", udn, service_id)
    }

    pub fn supports_connection_preparation(&self) -> bool {
        self.connection_manager
            .supports_action(CmAction::PrepareForConnection)
    }

    /// Prepare the incoming connection for a resource; AVTransport and
    /// RenderingControl calls are routed via the returned instance ids.
    pub fn prepare_connection(
        &self,
        resource: &MediaResource,
        peer_connection_manager: &str,
        peer_connection_id: i32,
    ) -> Result<(), ControlError> {
        let info = self.connection_manager.prepare_for_connection(
            &resource.protocol_info,
            peer_connection_manager,
            peer_connection_id,
            Direction::Input,
        )?;
        *self.conn_info.lock().expect("connection info poisoned") = info;
        Ok(())
    }

    pub fn reset_connection(&self) {
        *self.conn_info.lock().expect("connection info poisoned") = ConnectionInfo::unknown();
    }

    pub fn use_default_connection(&self) {
        *self.conn_info.lock().expect("connection info poisoned") =
            ConnectionInfo::default_connection();
    }

    pub fn connection_id(&self) -> i32 {
        self.conn_info
            .lock()
            .expect("connection info poisoned")
            .connection_id
    }

    pub fn server_connection_id(&self) -> i32 {
        self.conn_info
            .lock()
            .expect("connection info poisoned")
            .peer_connection_id
    }

    fn transport_instance(&self) -> u32 {
        let info = self.conn_info.lock().expect("connection info poisoned");
        if info.av_transport_id > 0 {
            info.av_transport_id as u32
        } else {
            0
        }
    }

    fn rendering_instance(&self) -> u32 {
        let info = self.conn_info.lock().expect("connection info poisoned");
        if info.rcs_id > 0 { info.rcs_id as u32 } else { 0 }
    }

    // --- transport --------------------------------------------------------

    pub fn set_transport_item(&self, resource: &MediaResource) -> Result<(), ControlError> {
        let instance = self.transport_instance();
        self.avtransport()?
            .set_av_transport_uri(instance, &resource.url, "")
    }

    /// Queue the gapless follow-up item; only meaningful on renderers that
    /// advertise SetNextAVTransportURI.
    pub fn set_next_transport_item(&self, resource: &MediaResource) -> Result<(), ControlError> {
        let avt = self.avtransport()?;
        if !avt.supports_action(AvAction::SetNextAvTransportUri) {
            return Err(ControlError::unsupported("SetNextAVTransportURI"));
        }
        let instance = self.transport_instance();
        avt.set_next_av_transport_uri(instance, &resource.url, "")
    }

    pub fn supports_queue_item(&self) -> bool {
        self.avtransport
            .as_ref()
            .map(|avt| avt.supports_action(AvAction::SetNextAvTransportUri))
            .unwrap_or(false)
    }

    pub fn play(&self) -> Result<(), ControlError> {
        self.avtransport()?.play(self.transport_instance(), "1")
    }

    pub fn pause(&self) -> Result<(), ControlError> {
        self.avtransport()?.pause(self.transport_instance())
    }

    pub fn stop(&self) -> Result<(), ControlError> {
        self.avtransport()?.stop(self.transport_instance())
    }

    pub fn next(&self) -> Result<(), ControlError> {
        self.avtransport()?.next(self.transport_instance())
    }

    pub fn previous(&self) -> Result<(), ControlError> {
        self.avtransport()?.previous(self.transport_instance())
    }

    /// Seek to a position within the current track.
    pub fn seek_in_track(&self, position: Duration) -> Result<(), ControlError> {
        self.avtransport()?.seek(
            self.transport_instance(),
            "REL_TIME",
            &format_duration(position),
        )
    }

    /// Seek to a track index (1-based, per the transport spec).
    pub fn seek_to_track(&self, track: u32) -> Result<(), ControlError> {
        self.avtransport()?
            .seek(self.transport_instance(), "TRACK_NR", &track.to_string())
    }

    // --- rendering control ------------------------------------------------

    pub fn set_volume(&self, volume: u32) -> Result<(), ControlError> {
        self.rendering_control
            .set_volume(self.rendering_instance(), volume)
    }

    pub fn volume(&self) -> Result<u32, ControlError> {
        self.rendering_control.get_volume(self.rendering_instance())
    }

    pub fn set_mute(&self, mute: bool) -> Result<(), ControlError> {
        self.rendering_control
            .set_mute(self.rendering_instance(), mute)
    }

    pub fn mute(&self) -> Result<bool, ControlError> {
        self.rendering_control.get_mute(self.rendering_instance())
    }
}

impl Drop for MediaRenderer {
    fn drop(&mut self) {
        self.deactivate_events();
    }
}

/// Fold one AVTransport LastChange batch into the cached state, emitting a
/// signal for every value that actually changed.
fn handle_avtransport_event(
    event: &StateVariableEvent<AvVariable>,
    state: &Mutex<RendererState>,
    bus: &EventBus<RendererEvent>,
) {
    let mut signals = Vec::new();
    {
        let mut state = state.lock().expect("renderer state poisoned");

        for (variable, value) in &event.changes {
            match variable {
                AvVariable::TransportState => {
                    let playback = PlaybackState::from_transport_state(value);
                    if state.playback != Some(playback) {
                        state.playback = Some(playback);
                        signals.push(RendererEvent::PlaybackStateChanged(playback));
                    }
                }
                AvVariable::CurrentTrackUri => {
                    if state.track_uri.as_deref() != Some(value.as_str()) {
                        state.track_uri = Some(value.clone());
                        signals.push(RendererEvent::CurrentTrackUriChanged(value.clone()));
                    }
                }
                AvVariable::CurrentTrackMetaData => {
                    if state.track_metadata.as_deref() != Some(value.as_str()) {
                        state.track_metadata = Some(value.clone());
                        signals.push(RendererEvent::CurrentTrackMetadataChanged(value.clone()));
                    }
                }
                AvVariable::CurrentTrackDuration => {
                    if let Some(duration) = parse_duration(value) {
                        if state.track_duration != Some(duration) {
                            state.track_duration = Some(duration);
                            signals.push(RendererEvent::CurrentTrackDurationChanged(duration));
                        }
                    }
                }
                AvVariable::CurrentTransportActions => {
                    let actions = parse_available_actions(value);
                    if state.actions != actions {
                        state.actions = actions.clone();
                        signals.push(RendererEvent::AvailableActionsChanged(actions));
                    }
                }
                _ => {}
            }
        }
    }

    for signal in signals {
        bus.broadcast(signal);
    }
}

/// Fold one RenderingControl LastChange batch into the cached state.
fn handle_rendering_control_event(
    event: &StateVariableEvent<RcVariable>,
    state: &Mutex<RendererState>,
    bus: &EventBus<RendererEvent>,
) {
    let mut signals = Vec::new();
    {
        let mut state = state.lock().expect("renderer state poisoned");

        for (variable, value) in &event.changes {
            match variable {
                RcVariable::Volume => {
                    if let Ok(volume) = value.trim().parse::<u32>() {
                        if state.volume != Some(volume) {
                            state.volume = Some(volume);
                            signals.push(RendererEvent::VolumeChanged(volume));
                        }
                    }
                }
                RcVariable::Mute => {
                    let mute = matches!(value.trim(), "1" | "true");
                    if state.mute != Some(mute) {
                        state.mute = Some(mute);
                        signals.push(RendererEvent::MuteChanged(mute));
                    }
                }
                _ => {}
            }
        }
    }

    for signal in signals {
        bus.broadcast(signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avtransport::AvTransportService;
    use crate::service_client::decode_property_set;
    use std::collections::BTreeMap;

    #[test]
    fn transport_state_normalisation() {
        assert_eq!(
            PlaybackState::from_transport_state("PLAYING"),
            PlaybackState::Playing
        );
        assert_eq!(
            PlaybackState::from_transport_state("stopped"),
            PlaybackState::Stopped
        );
        assert_eq!(
            PlaybackState::from_transport_state("PAUSED_PLAYBACK"),
            PlaybackState::Paused
        );
        assert_eq!(
            PlaybackState::from_transport_state("TRANSITIONING"),
            PlaybackState::Transitioning
        );
        assert_eq!(
            PlaybackState::from_transport_state("RECORDING"),
            PlaybackState::Recording
        );
        assert_eq!(
            PlaybackState::from_transport_state("NO_MEDIA_PRESENT"),
            PlaybackState::NoMediaPresent
        );
        assert_eq!(
            PlaybackState::from_transport_state("X_CUSTOM"),
            PlaybackState::Unknown
        );
    }

    #[test]
    fn available_actions_parsing() {
        let actions = parse_available_actions("Prev,Next,Stop");
        assert_eq!(
            actions,
            [
                RendererAction::Previous,
                RendererAction::Next,
                RendererAction::Stop
            ]
            .into_iter()
            .collect()
        );

        let actions = parse_available_actions(" Play , Pause ,X_Vendor,Seek");
        assert!(actions.contains(&RendererAction::Play));
        assert!(actions.contains(&RendererAction::Pause));
        assert!(actions.contains(&RendererAction::Seek));
        assert_eq!(actions.len(), 3);

        assert!(parse_available_actions("").is_empty());
    }

    #[test]
    fn last_change_batch_drives_the_state_machine() {
        // The decoded form of the wire event from the AVTransport stream
        let escaped = r#"<Event><InstanceID val="0"><TransportState val="PLAYING"/><CurrentTrackURI val="http://trackurl.mp3"/><CurrentTransportActions val="Prev,Next,Stop"/></InstanceID></Event>"#
            .replace('<', "&lt;")
            .replace('>', "&gt;");
        let body = format!(
            r#"<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0"><e:property><LastChange>{escaped}</LastChange></e:property></e:propertyset>"#
        );

        let events = decode_property_set::<AvTransportService>(body.as_bytes()).unwrap();
        assert_eq!(events.len(), 1);

        let state = Mutex::new(RendererState::default());
        let bus: EventBus<RendererEvent> = EventBus::new();
        let rx = bus.subscribe();

        handle_avtransport_event(&events[0], &state, &bus);

        let state = state.lock().unwrap();
        assert_eq!(state.playback, Some(PlaybackState::Playing));
        assert_eq!(state.track_uri.as_deref(), Some("http://trackurl.mp3"));
        assert_eq!(
            state.actions,
            [
                RendererAction::Previous,
                RendererAction::Next,
                RendererAction::Stop
            ]
            .into_iter()
            .collect()
        );

        let signals: Vec<RendererEvent> = rx.try_iter().collect();
        assert_eq!(signals.len(), 3);
        assert!(signals
            .iter()
            .any(|s| matches!(s, RendererEvent::PlaybackStateChanged(PlaybackState::Playing))));
    }

    #[test]
    fn unchanged_values_do_not_re_signal() {
        let mut changes = BTreeMap::new();
        changes.insert(AvVariable::TransportState, "PLAYING".to_string());
        let event = StateVariableEvent {
            variable: AvVariable::LastChange,
            instance_id: 0,
            changes,
        };

        let state = Mutex::new(RendererState::default());
        let bus: EventBus<RendererEvent> = EventBus::new();
        let rx = bus.subscribe();

        handle_avtransport_event(&event, &state, &bus);
        handle_avtransport_event(&event, &state, &bus);

        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn track_duration_is_parsed_to_seconds() {
        let mut changes = BTreeMap::new();
        changes.insert(AvVariable::CurrentTrackDuration, "0:04:05".to_string());
        let event = StateVariableEvent {
            variable: AvVariable::LastChange,
            instance_id: 0,
            changes,
        };

        let state = Mutex::new(RendererState::default());
        let bus: EventBus<RendererEvent> = EventBus::new();
        handle_avtransport_event(&event, &state, &bus);

        assert_eq!(
            state.lock().unwrap().track_duration,
            Some(Duration::from_secs(245))
        );
    }

    #[test]
    fn volume_events_update_the_cache() {
        let mut changes = BTreeMap::new();
        changes.insert(RcVariable::Volume, "42".to_string());
        changes.insert(RcVariable::Mute, "1".to_string());
        let event = StateVariableEvent {
            variable: RcVariable::LastChange,
            instance_id: 0,
            changes,
        };

        let state = Mutex::new(RendererState::default());
        let bus: EventBus<RendererEvent> = EventBus::new();
        let rx = bus.subscribe();

        handle_rendering_control_event(&event, &state, &bus);

        assert_eq!(state.lock().unwrap().volume, Some(42));
        assert_eq!(state.lock().unwrap().mute, Some(true));
        assert_eq!(rx.try_iter().count(), 2);
    }

    fn resource(protocol_info: &str) -> MediaResource {
        MediaResource {
            url: "http://server/track".into(),
            protocol_info: protocol_info.parse().unwrap(),
            size: None,
            duration: None,
            bitrate: None,
            sample_frequency: None,
            nr_audio_channels: None,
            bits_per_sample: None,
        }
    }

    fn entry_with(resources: Vec<MediaResource>) -> MediaEntry {
        MediaEntry {
            id: "1".into(),
            parent_id: "0".into(),
            title: "t".into(),
            class: "object.item.audioItem".into(),
            restricted: true,
            child_count: None,
            creator: None,
            artist: None,
            album: None,
            genre: None,
            date: None,
            track_number: None,
            album_art: BTreeMap::new(),
            resources,
        }
    }

    #[test]
    fn supports_playback_picks_first_compatible_resource() {
        let mut renderer = MediaRenderer::new();
        renderer.sink_protocols = vec![
            "http-get:*:audio/mpeg:*".parse().unwrap(),
            "http-get:*:audio/flac:*".parse().unwrap(),
        ];

        let entry = entry_with(vec![
            resource("http-get:*:video/mp4:*"),
            resource("http-get:*:audio/flac:*"),
            resource("http-get:*:audio/mpeg:*"),
        ]);

        let suggested = renderer.supports_playback(&entry).unwrap();
        assert_eq!(suggested.protocol_info.content_format, "audio/flac");
    }

    #[test]
    fn supports_playback_rejects_incompatible_items() {
        let mut renderer = MediaRenderer::new();
        renderer.sink_protocols = vec!["http-get:*:audio/mpeg:*".parse().unwrap()];

        let entry = entry_with(vec![resource("http-get:*:video/mp4:*")]);
        assert!(renderer.supports_playback(&entry).is_none());

        // No sink list at all rejects everything
        renderer.sink_protocols.clear();
        let entry = entry_with(vec![resource("http-get:*:audio/mpeg:*")]);
        assert!(renderer.supports_playback(&entry).is_none());
    }

    #[test]
    fn connection_sentinels() {
        use crate::connection_manager::UNKNOWN_CONNECTION_ID;

        let renderer = MediaRenderer::new();
        assert_eq!(renderer.connection_id(), UNKNOWN_CONNECTION_ID);

        renderer.use_default_connection();
        assert_eq!(renderer.connection_id(), 0);

        renderer.reset_connection();
        assert_eq!(renderer.connection_id(), UNKNOWN_CONNECTION_ID);
    }
}
