//! MediaServer facade: ContentDirectory plus ConnectionManager (and
//! AVTransport when the server advertises it), with paged browsing that
//! hides the server's chunking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use lyradidl::Property;

use crate::avtransport::AvTransportClient;
use crate::connection_manager::{CmAction, ConnectionInfo, ConnectionManagerClient, Direction};
use crate::content_directory::{BrowseCategory, BrowseResult, ContentDirectoryClient};
use crate::device::{Device, DeviceKind, ServiceKind};
use crate::errors::ControlError;
use crate::gena::EventBroker;
use crate::item::{MediaEntry, MediaResource};

/// Object id of the directory root.
pub const ROOT_ID: &str = "0";

/// Default number of objects requested per Browse/Search chunk.
pub const DEFAULT_REQUEST_SIZE: u32 = 32;

/// Sort order for browse/search requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOrder {
    pub property: Property,
    pub ascending: bool,
}

impl SortOrder {
    pub fn ascending(property: Property) -> Self {
        Self {
            property,
            ascending: true,
        }
    }

    pub fn descending(property: Property) -> Self {
        Self {
            property,
            ascending: false,
        }
    }

    fn to_criteria(self) -> String {
        format!(
            "{}{}",
            if self.ascending { "+" } else { "-" },
            self.property.as_str()
        )
    }
}

/// One page as the paging loop sees it.
#[derive(Debug, Clone, Default)]
pub(crate) struct BrowsePage {
    pub returned: u32,
    pub total: u32,
    pub entries: Vec<MediaEntry>,
}

impl From<BrowseResult> for BrowsePage {
    fn from(result: BrowseResult) -> Self {
        BrowsePage {
            returned: result.number_returned,
            total: result.total_matches,
            entries: result.entries,
        }
    }
}

/// MediaServer facade.
pub struct MediaServer {
    device: Option<Arc<Device>>,
    content_directory: ContentDirectoryClient,
    connection_manager: ConnectionManagerClient,
    avtransport: Option<AvTransportClient>,
    broker: Option<Arc<EventBroker>>,
    request_size: u32,
    conn_info: Mutex<ConnectionInfo>,
}

impl Default for MediaServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaServer {
    pub fn new() -> Self {
        Self {
            device: None,
            content_directory: ContentDirectoryClient::new(),
            connection_manager: ConnectionManagerClient::new(),
            avtransport: None,
            broker: None,
            request_size: DEFAULT_REQUEST_SIZE,
            conn_info: Mutex::new(ConnectionInfo::unknown()),
        }
    }

    pub fn set_event_broker(&mut self, broker: Arc<EventBroker>) {
        self.content_directory.set_event_broker(Arc::clone(&broker));
        self.connection_manager.set_event_broker(Arc::clone(&broker));
        if let Some(avt) = &mut self.avtransport {
            avt.set_event_broker(Arc::clone(&broker));
        }
        self.broker = Some(broker);
    }

    /// Browse chunk size used by the paged operations.
    pub fn set_request_size(&mut self, request_size: u32) {
        self.request_size = request_size.max(1);
    }

    /// Bind to a MediaServer device: ContentDirectory always, the other
    /// services when advertised.
    pub fn set_device(&mut self, device: &Arc<Device>) -> Result<(), ControlError> {
        if device.kind != DeviceKind::MediaServer {
            return Err(ControlError::NotAMediaServer(device.friendly_name.clone()));
        }

        self.content_directory.set_device(device)?;

        if device.implements(ServiceKind::ConnectionManager) {
            self.connection_manager.set_device(device)?;
        }

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

        *self.conn_info.lock().expect("connection info poisoned") = ConnectionInfo::unknown();
        self.device = Some(Arc::clone(device));
        Ok(())
    }

    pub fn device(&self) -> Option<&Arc<Device>> {
        self.device.as_ref()
    }

    pub fn content_directory(&self) -> &ContentDirectoryClient {
        &self.content_directory
    }

    pub fn connection_manager(&self) -> &ConnectionManagerClient {
        &self.connection_manager
    }

    /// Cooperative cancellation of the paged operations.
    pub fn abort(&self) {
        self.content_directory.abort();
    }

    // --- capabilities -----------------------------------------------------

    pub fn search_capabilities(&self) -> &[Property] {
        self.content_directory.search_capabilities()
    }

    pub fn sort_capabilities(&self) -> &[Property] {
        self.content_directory.sort_capabilities()
    }

    pub fn can_search_on(&self, property: Property) -> bool {
        caps_allow(self.content_directory.search_capabilities(), property)
    }

    pub fn can_sort_on(&self, property: Property) -> bool {
        caps_allow(self.content_directory.sort_capabilities(), property)
    }

    // --- browsing ---------------------------------------------------------

    /// Metadata of a single object.
    pub fn entry_metadata(&self, object_id: &str) -> Result<MediaEntry, ControlError> {
        self.content_directory.browse_metadata(object_id, "*")
    }

    /// Stream every object in a container through `on_entries` in chunks.
    /// A terminal empty batch signals completion; errors and cancellation
    /// short-circuit without the sentinel.
    pub fn get_all_in_container(
        &self,
        id: &str,
        on_entries: &mut dyn FnMut(Vec<MediaEntry>),
        offset: u32,
        limit: u32,
        sort: Option<SortOrder>,
    ) -> Result<(), ControlError> {
        self.paged_browse(BrowseCategory::All, id, on_entries, offset, limit, sort)
    }

    /// Container-only variant of [`get_all_in_container`](Self::get_all_in_container).
    pub fn get_containers_in_container(
        &self,
        id: &str,
        on_entries: &mut dyn FnMut(Vec<MediaEntry>),
        offset: u32,
        limit: u32,
        sort: Option<SortOrder>,
    ) -> Result<(), ControlError> {
        self.paged_browse(
            BrowseCategory::ContainersOnly,
            id,
            on_entries,
            offset,
            limit,
            sort,
        )
    }

    /// Item-only variant of [`get_all_in_container`](Self::get_all_in_container).
    pub fn get_items_in_container(
        &self,
        id: &str,
        on_entries: &mut dyn FnMut(Vec<MediaEntry>),
        offset: u32,
        limit: u32,
        sort: Option<SortOrder>,
    ) -> Result<(), ControlError> {
        self.paged_browse(
            BrowseCategory::ItemsOnly,
            id,
            on_entries,
            offset,
            limit,
            sort,
        )
    }

    /// Collecting convenience around the paged browse.
    pub fn all_in_container(&self, id: &str) -> Result<Vec<MediaEntry>, ControlError> {
        let mut entries = Vec::new();
        self.get_all_in_container(id, &mut |batch| entries.extend(batch), 0, 0, None)?;
        Ok(entries)
    }

    pub fn items_in_container(&self, id: &str) -> Result<Vec<MediaEntry>, ControlError> {
        let mut entries = Vec::new();
        self.get_items_in_container(id, &mut |batch| entries.extend(batch), 0, 0, None)?;
        Ok(entries)
    }

    pub fn containers_in_container(&self, id: &str) -> Result<Vec<MediaEntry>, ControlError> {
        let mut entries = Vec::new();
        self.get_containers_in_container(id, &mut |batch| entries.extend(batch), 0, 0, None)?;
        Ok(entries)
    }

    /// Paged search with the same batch contract as the browse variants.
    pub fn search(
        &self,
        id: &str,
        criteria: &str,
        on_entries: &mut dyn FnMut(Vec<MediaEntry>),
    ) -> Result<(), ControlError> {
        self.content_directory.clear_abort();
        let abort = self.content_directory.abort_flag();
        let request_size = self.request_size;

        run_paged_search(
            request_size,
            &abort,
            |offset, count| {
                self.content_directory
                    .search(id, criteria, "*", offset, count, "")
                    .map(BrowsePage::from)
            },
            on_entries,
        )
    }

    pub fn search_collected(
        &self,
        id: &str,
        criteria: &str,
    ) -> Result<Vec<MediaEntry>, ControlError> {
        let mut entries = Vec::new();
        self.search(id, criteria, &mut |batch| entries.extend(batch))?;
        Ok(entries)
    }

    /// Build a criteria string from property/value pairs
    /// (`prop contains "value"` joined with `and`), validating every
    /// property against the search capabilities first.
    pub fn search_by_properties(
        &self,
        id: &str,
        criteria: &[(Property, String)],
        on_entries: &mut dyn FnMut(Vec<MediaEntry>),
    ) -> Result<(), ControlError> {
        let mut parts = Vec::with_capacity(criteria.len());
        for (property, value) in criteria {
            if !self.can_search_on(*property) {
                return Err(ControlError::unsupported("search"));
            }
            parts.push(format!("{} contains \"{}\"", property.as_str(), value));
        }
        self.search(id, &parts.join(" and "), on_entries)
    }

    fn paged_browse(
        &self,
        category: BrowseCategory,
        id: &str,
        on_entries: &mut dyn FnMut(Vec<MediaEntry>),
        offset: u32,
        limit: u32,
        sort: Option<SortOrder>,
    ) -> Result<(), ControlError> {
        // Sort validation happens before any request leaves the machine
        let sort_criteria = match sort {
            Some(order) => {
                if !self.can_sort_on(order.property) {
                    return Err(ControlError::unsupported("sort"));
                }
                order.to_criteria()
            }
            None => String::new(),
        };

        self.content_directory.clear_abort();
        let abort = self.content_directory.abort_flag();

        run_paged_browse(
            self.request_size,
            offset,
            limit,
            &abort,
            |offset, count| {
                self.content_directory
                    .browse_direct_children(category, id, "*", offset, count, &sort_criteria)
                    .map(BrowsePage::from)
            },
            on_entries,
        )
    }

    // --- connection management -------------------------------------------

    /// `UDN/serviceId` naming this server's connection manager.
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

    /// Prepare an outgoing connection for the given resource.
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
            Direction::Output,
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

    /// Point the server-side AVTransport at the resource, when the server
    /// has one; servers without AVTransport are driven by pull and this is
    /// a no-op.
    pub fn set_transport_item(&self, resource: &MediaResource) -> Result<(), ControlError> {
        let Some(avt) = &self.avtransport else {
            return Ok(());
        };
        let instance = self.transport_instance();
        avt.set_av_transport_uri(instance, &resource.url, "")
    }

    fn transport_instance(&self) -> u32 {
        let info = self.conn_info.lock().expect("connection info poisoned");
        if info.av_transport_id > 0 {
            info.av_transport_id as u32
        } else {
            0
        }
    }
}

fn caps_allow(caps: &[Property], property: Property) -> bool {
    caps.contains(&property) || caps.contains(&Property::All)
}

/// The chunking loop behind every paged browse.
///
/// Batches are handed to `on_entries` in server-response order, each before
/// the next request is issued. The terminal empty batch is the completion
/// sentinel; cancellation stops at the next chunk boundary with
/// [`ControlError::Cancelled`] and no sentinel.
pub(crate) fn run_paged_browse<F>(
    request_size: u32,
    mut offset: u32,
    limit: u32,
    abort: &AtomicBool,
    mut fetch: F,
    on_entries: &mut dyn FnMut(Vec<MediaEntry>),
) -> Result<(), ControlError>
where
    F: FnMut(u32, u32) -> Result<BrowsePage, ControlError>,
{
    let mut received: u32 = 0;
    let mut request = request_size.min(if limit == 0 { request_size } else { limit });

    loop {
        let page = fetch(offset, request)?;
        on_entries(page.entries);
        received += page.returned;

        if abort.load(Ordering::SeqCst) {
            return Err(ControlError::Cancelled);
        }

        let done = if limit > 0 {
            page.returned == 0 || received >= limit
        } else {
            page.returned < request
        };
        // A server that reports totals can end the walk early
        let exhausted = page.total > 0 && received >= page.total;

        if done || exhausted {
            on_entries(Vec::new());
            return Ok(());
        }

        offset += page.returned;
        request = request_size.min(if limit == 0 {
            request_size
        } else {
            limit - received
        });
    }
}

/// Search analogue of [`run_paged_browse`], keyed on the reported total
/// and falling back to the short-page heuristic when the server reports
/// none.
pub(crate) fn run_paged_search<F>(
    request_size: u32,
    abort: &AtomicBool,
    mut fetch: F,
    on_entries: &mut dyn FnMut(Vec<MediaEntry>),
) -> Result<(), ControlError>
where
    F: FnMut(u32, u32) -> Result<BrowsePage, ControlError>,
{
    let mut offset: u32 = 0;

    loop {
        let page = fetch(offset, request_size)?;
        let returned = page.returned;
        let total = page.total;
        on_entries(page.entries);
        offset += returned;

        if abort.load(Ordering::SeqCst) {
            return Err(ControlError::Cancelled);
        }

        let exhausted = if total > 0 {
            offset >= total
        } else {
            returned < request_size
        };

        if exhausted || returned == 0 {
            on_entries(Vec::new());
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn entry(n: u32) -> MediaEntry {
        MediaEntry {
            id: format!("id-{n}"),
            parent_id: "0".into(),
            title: format!("Track {n}"),
            class: "object.item.audioItem.musicTrack".into(),
            restricted: true,
            child_count: None,
            creator: None,
            artist: None,
            album: None,
            genre: None,
            date: None,
            track_number: None,
            album_art: BTreeMap::new(),
            resources: Vec::new(),
        }
    }

    fn page(count: u32, total: u32) -> BrowsePage {
        BrowsePage {
            returned: count,
            total,
            entries: (0..count).map(entry).collect(),
        }
    }

    /// Drives the loop against scripted pages, recording batch sizes.
    fn drive(
        pages: Vec<BrowsePage>,
        request_size: u32,
        offset: u32,
        limit: u32,
    ) -> (Result<(), ControlError>, Vec<usize>, Vec<(u32, u32)>) {
        let abort = AtomicBool::new(false);
        let mut batches = Vec::new();
        let mut requests = Vec::new();
        let mut script = pages.into_iter();

        let result = run_paged_browse(
            request_size,
            offset,
            limit,
            &abort,
            |offset, count| {
                requests.push((offset, count));
                Ok(script.next().expect("loop requested more pages than scripted"))
            },
            &mut |batch| batches.push(batch.len()),
        );
        (result, batches, requests)
    }

    #[test]
    fn unlimited_browse_stops_on_short_page() {
        // Server holds 71 objects: pages of 32, 32, 7
        let (result, batches, requests) =
            drive(vec![page(32, 0), page(32, 0), page(7, 0)], 32, 0, 0);

        result.unwrap();
        assert_eq!(batches, vec![32, 32, 7, 0]);
        assert_eq!(requests, vec![(0, 32), (32, 32), (64, 32)]);
    }

    #[test]
    fn reported_total_ends_the_walk_early() {
        // Misbehaving server keeps returning full pages but reports 64
        let (result, batches, requests) =
            drive(vec![page(32, 64), page(32, 64)], 32, 0, 0);

        result.unwrap();
        assert_eq!(batches, vec![32, 32, 0]);
        assert_eq!(requests.len(), 2);
    }

    #[test]
    fn limit_caps_the_delivered_items() {
        let (result, batches, requests) = drive(vec![page(32, 0), page(8, 0)], 32, 0, 40);

        result.unwrap();
        assert_eq!(batches, vec![32, 8, 0]);
        // Second request asks only for the remainder
        assert_eq!(requests, vec![(0, 32), (32, 8)]);

        let delivered: usize = batches.iter().sum();
        assert!(delivered <= 40);
    }

    #[test]
    fn limit_smaller_than_chunk() {
        let (result, batches, requests) = drive(vec![page(5, 0)], 32, 0, 5);
        result.unwrap();
        assert_eq!(requests, vec![(0, 5)]);
        assert_eq!(batches, vec![5, 0]);
    }

    #[test]
    fn empty_container_yields_only_the_sentinel() {
        let (result, batches, _) = drive(vec![page(0, 0)], 32, 0, 0);
        result.unwrap();
        assert_eq!(batches, vec![0]);
    }

    #[test]
    fn offset_is_honoured() {
        let (result, _, requests) = drive(vec![page(10, 0)], 32, 100, 0);
        result.unwrap();
        assert_eq!(requests, vec![(100, 32)]);
    }

    #[test]
    fn error_short_circuits_without_sentinel() {
        let abort = AtomicBool::new(false);
        let mut batches: Vec<usize> = Vec::new();
        let mut calls = 0;

        let result = run_paged_browse(
            32,
            0,
            0,
            &abort,
            |_, _| {
                calls += 1;
                if calls == 2 {
                    Err(ControlError::NoSuchObject)
                } else {
                    Ok(page(32, 0))
                }
            },
            &mut |batch| batches.push(batch.len()),
        );

        assert!(matches!(result, Err(ControlError::NoSuchObject)));
        // First page was delivered, no terminal sentinel followed
        assert_eq!(batches, vec![32]);
    }

    #[test]
    fn abort_stops_at_the_chunk_boundary() {
        let abort = AtomicBool::new(false);
        let mut batches: Vec<usize> = Vec::new();

        let result = run_paged_browse(
            32,
            0,
            0,
            &abort,
            |_, _| {
                // Cancellation raised mid-request is observed right after
                // the page is delivered
                abort.store(true, Ordering::SeqCst);
                Ok(page(32, 0))
            },
            &mut |batch| batches.push(batch.len()),
        );

        assert!(matches!(result, Err(ControlError::Cancelled)));
        assert_eq!(batches, vec![32]);
    }

    #[test]
    fn search_pages_on_total_matches() {
        let abort = AtomicBool::new(false);
        let mut batches = Vec::new();
        let mut script = vec![page(32, 40), page(8, 40)].into_iter();

        run_paged_search(
            32,
            &abort,
            |_, _| Ok(script.next().unwrap()),
            &mut |batch| batches.push(batch.len()),
        )
        .unwrap();

        assert_eq!(batches, vec![32, 8, 0]);
    }

    #[test]
    fn search_without_totals_uses_short_page_heuristic() {
        let abort = AtomicBool::new(false);
        let mut batches = Vec::new();
        let mut script = vec![page(32, 0), page(3, 0)].into_iter();

        run_paged_search(
            32,
            &abort,
            |_, _| Ok(script.next().unwrap()),
            &mut |batch| batches.push(batch.len()),
        )
        .unwrap();

        assert_eq!(batches, vec![32, 3, 0]);
    }

    #[test]
    fn caps_wildcard_allows_everything() {
        assert!(caps_allow(&[Property::All], Property::Artist));
        assert!(caps_allow(&[Property::Title], Property::Title));
        assert!(!caps_allow(&[Property::Title], Property::Artist));
        assert!(!caps_allow(&[], Property::Title));
    }

    #[test]
    fn unsupported_sort_never_contacts_the_server() {
        // Fresh facade: no device bound, caps empty. The sort check fires
        // before any ContentDirectory call, so the error is Unsupported
        // rather than the MissingService a network attempt would produce.
        let server = MediaServer::new();
        let mut called = false;

        let err = server
            .get_all_in_container(
                ROOT_ID,
                &mut |_| called = true,
                0,
                0,
                Some(SortOrder::ascending(Property::Artist)),
            )
            .unwrap_err();

        assert!(matches!(err, ControlError::Unsupported { what } if what == "sort"));
        assert!(!called);
    }

    #[test]
    fn unsupported_search_property_is_rejected_up_front() {
        let server = MediaServer::new();
        let err = server
            .search_by_properties(
                ROOT_ID,
                &[(Property::Artist, "Bowie".into())],
                &mut |_| {},
            )
            .unwrap_err();
        assert!(matches!(err, ControlError::Unsupported { what } if what == "search"));
    }

    #[test]
    fn sort_criteria_string() {
        assert_eq!(
            SortOrder::ascending(Property::Title).to_criteria(),
            "+dc:title"
        );
        assert_eq!(
            SortOrder::descending(Property::TrackNumber).to_criteria(),
            "-upnp:originalTrackNumber"
        );
    }
}
