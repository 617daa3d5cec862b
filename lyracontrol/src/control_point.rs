//! The top-level facade: drives one active renderer, sourcing items from
//! arbitrary media servers, with playlist materialisation for multi-item
//! playback.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use lyradidl::ProtocolInfo;

use crate::connection_manager::UNKNOWN_CONNECTION_ID;
use crate::device::Device;
use crate::errors::ControlError;
use crate::gena::EventBroker;
use crate::item::{MediaEntry, MediaResource};
use crate::media_renderer::{MediaRenderer, RendererAction};
use crate::media_server::MediaServer;
use crate::webserver::PlaylistHost;

/// Virtual directory generated playlists are served from.
pub const PLAYLIST_DIRECTORY: &str = "playlists";

const PLAYLIST_MIME: &str = "audio/m3u";

/// Control point around one active renderer.
pub struct ControlPoint {
    renderer: MediaRenderer,
    broker: Option<Arc<EventBroker>>,
    webserver: Option<Arc<dyn PlaylistHost>>,
    renderer_supports_prepare: bool,
}

impl Default for ControlPoint {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlPoint {
    /// Control point without eventing; [`activate`](Self::activate) will
    /// fail until a broker is attached.
    pub fn new() -> Self {
        Self {
            renderer: MediaRenderer::new(),
            broker: None,
            webserver: None,
            renderer_supports_prepare: false,
        }
    }

    /// Control point with a freshly spawned GENA event broker.
    pub fn with_eventing() -> std::io::Result<Self> {
        let mut control_point = Self::new();
        control_point.set_event_broker(EventBroker::spawn()?);
        Ok(control_point)
    }

    pub fn set_event_broker(&mut self, broker: Arc<EventBroker>) {
        self.renderer.set_event_broker(Arc::clone(&broker));
        self.broker = Some(broker);
    }

    /// Attach the web server used to host generated playlists.
    pub fn set_webserver(&mut self, webserver: Arc<dyn PlaylistHost>) {
        webserver.add_virtual_directory(PLAYLIST_DIRECTORY);
        self.webserver = Some(webserver);
    }

    /// Make a renderer the active one.
    pub fn set_renderer_device(&mut self, device: &Arc<Device>) -> Result<(), ControlError> {
        self.renderer.set_device(device)?;
        self.renderer_supports_prepare = self.renderer.supports_connection_preparation();
        self.renderer.use_default_connection();
        Ok(())
    }

    pub fn renderer(&self) -> &MediaRenderer {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut MediaRenderer {
        &mut self.renderer
    }

    /// Subscribe the active renderer's event streams.
    pub fn activate(&mut self) -> Result<(), ControlError> {
        self.renderer.activate_events()
    }

    pub fn deactivate(&mut self) {
        self.renderer.deactivate_events();
    }

    /// Play one item from a server on the active renderer.
    pub fn play_item(&self, server: &MediaServer, entry: &MediaEntry) -> Result<(), ControlError> {
        let resource = self
            .renderer
            .supports_playback(entry)
            .ok_or(ControlError::UnsupportedItem)?;

        self.stop_playback_if_necessary();
        self.prepare_connections(server, &resource)?;

        server.set_transport_item(&resource)?;
        self.renderer.set_transport_item(&resource)?;
        self.renderer.play()
    }

    /// Play several items by materialising them as an M3U playlist hosted
    /// on the attached web server. A single item plays directly; an empty
    /// list is an error.
    pub fn play_items_as_playlist(
        &self,
        server: &MediaServer,
        entries: &[MediaEntry],
    ) -> Result<(), ControlError> {
        if entries.is_empty() {
            return Err(ControlError::PlaylistEmpty);
        }
        if entries.len() == 1 {
            return self.play_item(server, &entries[0]);
        }

        let playlist_entry = self.publish_playlist(entries)?;
        self.play_item(server, &playlist_entry)
    }

    /// Queue several items as the next transport item, same materialisation
    /// as [`play_items_as_playlist`](Self::play_items_as_playlist).
    pub fn queue_items_as_playlist(
        &self,
        _server: &MediaServer,
        entries: &[MediaEntry],
    ) -> Result<(), ControlError> {
        if entries.is_empty() {
            return Err(ControlError::PlaylistEmpty);
        }

        let resource = if entries.len() == 1 {
            self.renderer
                .supports_playback(&entries[0])
                .ok_or(ControlError::UnsupportedItem)?
        } else {
            let playlist_entry = self.publish_playlist(entries)?;
            playlist_entry.resources[0].clone()
        };

        self.renderer.set_next_transport_item(&resource)
    }

    // --- guarded transport pass-throughs ---------------------------------

    /// Resume playback; silently ignored without a prepared connection.
    pub fn resume(&self) -> Result<(), ControlError> {
        if self.renderer.connection_id() == UNKNOWN_CONNECTION_ID {
            return Ok(());
        }
        self.renderer.play()
    }

    pub fn pause(&self) -> Result<(), ControlError> {
        if self.renderer.connection_id() == UNKNOWN_CONNECTION_ID {
            return Ok(());
        }
        self.renderer.pause()
    }

    pub fn stop(&self) -> Result<(), ControlError> {
        if self.renderer.connection_id() == UNKNOWN_CONNECTION_ID {
            return Ok(());
        }
        self.renderer.stop()
    }

    pub fn next(&self) -> Result<(), ControlError> {
        if self.renderer.connection_id() == UNKNOWN_CONNECTION_ID {
            return Ok(());
        }
        self.renderer.next()
    }

    pub fn previous(&self) -> Result<(), ControlError> {
        if self.renderer.connection_id() == UNKNOWN_CONNECTION_ID {
            return Ok(());
        }
        self.renderer.previous()
    }

    pub fn set_volume(&self, volume: u32) -> Result<(), ControlError> {
        if self.renderer.connection_id() == UNKNOWN_CONNECTION_ID {
            return Ok(());
        }
        self.renderer.set_volume(volume)
    }

    pub fn volume(&self) -> Result<u32, ControlError> {
        self.renderer.volume()
    }

    // --- internals --------------------------------------------------------

    /// Prepare both connection ends when supported, otherwise fall back to
    /// the default instance on both sides.
    fn prepare_connections(
        &self,
        server: &MediaServer,
        resource: &MediaResource,
    ) -> Result<(), ControlError> {
        if self.renderer_supports_prepare {
            if server.supports_connection_preparation() {
                server.prepare_connection(
                    resource,
                    &self.renderer.peer_connection_manager(),
                    UNKNOWN_CONNECTION_ID,
                )?;
            }

            self.renderer.prepare_connection(
                resource,
                &server.peer_connection_manager(),
                server.connection_id(),
            )?;
        } else {
            server.use_default_connection();
            self.renderer.use_default_connection();
        }
        Ok(())
    }

    /// Best-effort stop before switching content; errors are swallowed.
    fn stop_playback_if_necessary(&self) {
        if self.renderer.connection_id() == UNKNOWN_CONNECTION_ID {
            return;
        }
        if !self.renderer.is_action_available(RendererAction::Stop) {
            return;
        }
        if let Err(err) = self.renderer.stop() {
            debug!(error = %err, "Pre-play stop failed, continuing");
        }
    }

    /// Write the supported entries into an M3U file on the web server and
    /// wrap its URL in a synthetic playlist item.
    fn publish_playlist(&self, entries: &[MediaEntry]) -> Result<MediaEntry, ControlError> {
        let webserver = self.webserver.as_ref().ok_or(ControlError::NoWebserver)?;

        let urls: Vec<String> = entries
            .iter()
            .filter_map(|entry| match self.renderer.supports_playback(entry) {
                Some(resource) => Some(resource.url),
                None => {
                    warn!(
                        id = entry.id.as_str(),
                        title = entry.title.as_str(),
                        "Skipping entry the renderer cannot play"
                    );
                    None
                }
            })
            .collect();

        if urls.is_empty() {
            return Err(ControlError::UnsupportedItem);
        }

        let filename = generate_playlist_filename();
        let body = m3u_body(&urls);

        webserver.clear_files(PLAYLIST_DIRECTORY);
        webserver.add_file(PLAYLIST_DIRECTORY, &filename, PLAYLIST_MIME, &body)?;

        let url = format!(
            "{}{}/{}",
            webserver.web_root_url(),
            PLAYLIST_DIRECTORY,
            filename
        );
        Ok(playlist_entry(url))
    }
}

/// `playlist-<nanos>.m3u`, unique per invocation.
fn generate_playlist_filename() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("playlist-{}.m3u", nanos)
}

fn m3u_body(urls: &[String]) -> String {
    let mut body = String::new();
    for url in urls {
        body.push_str(url);
        body.push('\n');
    }
    body
}

/// The synthetic playlist item: exactly one resource with the M3U protocol
/// info and no other metadata. Renderers are known to refuse playlist
/// items carrying unexpected fields.
fn playlist_entry(url: String) -> MediaEntry {
    MediaEntry::from_resource(
        "object.item.audioItem",
        MediaResource {
            url,
            protocol_info: ProtocolInfo::http_get(PLAYLIST_MIME),
            size: None,
            duration: None,
            bitrate: None,
            sample_frequency: None,
            nr_audio_channels: None,
            bits_per_sample: None,
        },
    )
}
