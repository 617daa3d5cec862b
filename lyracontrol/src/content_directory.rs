//! ContentDirectory:1 client.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::Receiver;
use tracing::warn;

use lyraupnp::soap::{child_text, child_text_allow_empty};
use lyradidl::{Property, parse_didl};

use crate::device::{Device, ServiceKind};
use crate::errors::ControlError;
use crate::gena::EventBroker;
use crate::item::{MediaEntry, entries_from_didl};
use crate::service_client::{ServiceClient, ServiceTraits, StateVariableEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CdAction {
    GetSearchCapabilities,
    GetSortCapabilities,
    GetSystemUpdateId,
    Browse,
    Search,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CdVariable {
    ContainerUpdateIds,
    TransferIds,
    SystemUpdateId,
    SearchCapabilities,
    SortCapabilities,
    LastChange,
    ArgObjectId,
    ArgResult,
    ArgSearchCriteria,
    ArgBrowseFlag,
    ArgFilter,
    ArgSortCriteria,
    ArgIndex,
    ArgCount,
    ArgUpdateId,
}

/// Traits record for ContentDirectory.
pub struct ContentDirectoryService;

impl ServiceTraits for ContentDirectoryService {
    type Action = CdAction;
    type Variable = CdVariable;

    const KIND: ServiceKind = ServiceKind::ContentDirectory;

    fn action_to_str(action: CdAction) -> &'static str {
        match action {
            CdAction::GetSearchCapabilities => "GetSearchCapabilities",
            CdAction::GetSortCapabilities => "GetSortCapabilities",
            CdAction::GetSystemUpdateId => "GetSystemUpdateID",
            CdAction::Browse => "Browse",
            CdAction::Search => "Search",
        }
    }

    fn action_from_str(s: &str) -> Option<CdAction> {
        Some(match s {
            "GetSearchCapabilities" => CdAction::GetSearchCapabilities,
            "GetSortCapabilities" => CdAction::GetSortCapabilities,
            "GetSystemUpdateID" => CdAction::GetSystemUpdateId,
            "Browse" => CdAction::Browse,
            "Search" => CdAction::Search,
            _ => return None,
        })
    }

    fn variable_to_str(variable: CdVariable) -> &'static str {
        match variable {
            CdVariable::ContainerUpdateIds => "ContainerUpdateIDs",
            CdVariable::TransferIds => "TransferIDs",
            CdVariable::SystemUpdateId => "SystemUpdateID",
            CdVariable::SearchCapabilities => "SearchCapabilities",
            CdVariable::SortCapabilities => "SortCapabilities",
            CdVariable::LastChange => "LastChange",
            CdVariable::ArgObjectId => "A_ARG_TYPE_ObjectID",
            CdVariable::ArgResult => "A_ARG_TYPE_Result",
            CdVariable::ArgSearchCriteria => "A_ARG_TYPE_SearchCriteria",
            CdVariable::ArgBrowseFlag => "A_ARG_TYPE_BrowseFlag",
            CdVariable::ArgFilter => "A_ARG_TYPE_Filter",
            CdVariable::ArgSortCriteria => "A_ARG_TYPE_SortCriteria",
            CdVariable::ArgIndex => "A_ARG_TYPE_Index",
            CdVariable::ArgCount => "A_ARG_TYPE_Count",
            CdVariable::ArgUpdateId => "A_ARG_TYPE_UpdateID",
        }
    }

    fn variable_from_str(s: &str) -> Option<CdVariable> {
        Some(match s {
            "ContainerUpdateIDs" => CdVariable::ContainerUpdateIds,
            "TransferIDs" => CdVariable::TransferIds,
            "SystemUpdateID" => CdVariable::SystemUpdateId,
            "SearchCapabilities" => CdVariable::SearchCapabilities,
            "SortCapabilities" => CdVariable::SortCapabilities,
            "LastChange" => CdVariable::LastChange,
            "A_ARG_TYPE_ObjectID" => CdVariable::ArgObjectId,
            "A_ARG_TYPE_Result" => CdVariable::ArgResult,
            "A_ARG_TYPE_SearchCriteria" => CdVariable::ArgSearchCriteria,
            "A_ARG_TYPE_BrowseFlag" | "A_ARG_TYPE_Flag" => CdVariable::ArgBrowseFlag,
            "A_ARG_TYPE_Filter" => CdVariable::ArgFilter,
            "A_ARG_TYPE_SortCriteria" => CdVariable::ArgSortCriteria,
            "A_ARG_TYPE_Index" => CdVariable::ArgIndex,
            "A_ARG_TYPE_Count" => CdVariable::ArgCount,
            "A_ARG_TYPE_UpdateID" => CdVariable::ArgUpdateId,
            _ => return None,
        })
    }

    fn map_upnp_error(code: u32, description: &str) -> ControlError {
        match code {
            701 => ControlError::NoSuchObject,
            708 => ControlError::InvalidSearchCriteria,
            709 => ControlError::InvalidSortCriteria,
            710 => ControlError::NoSuchContainer,
            711 => ControlError::RestrictedObject,
            720 => ControlError::CannotProcess,
            _ => ControlError::upnp(code, description),
        }
    }
}

/// Which object classes a Browse call should yield.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowseCategory {
    ContainersOnly,
    ItemsOnly,
    All,
}

/// Outcome of a Browse or Search call.
#[derive(Debug, Clone, Default)]
pub struct BrowseResult {
    pub number_returned: u32,
    pub total_matches: u32,
    pub update_id: u32,
    pub entries: Vec<MediaEntry>,
}

/// ContentDirectory client with cached capabilities.
pub struct ContentDirectoryClient {
    client: ServiceClient<ContentDirectoryService>,
    search_caps: Vec<Property>,
    sort_caps: Vec<Property>,
    system_update_id: Option<u32>,
    abort: Arc<AtomicBool>,
}

impl Default for ContentDirectoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentDirectoryClient {
    pub fn new() -> Self {
        Self {
            client: ServiceClient::new(),
            search_caps: Vec::new(),
            sort_caps: Vec::new(),
            system_update_id: None,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_event_broker(&mut self, broker: Arc<EventBroker>) {
        self.client.set_event_broker(broker);
    }

    /// Bind to the server's ContentDirectory and refresh the capability
    /// caches. Failing capability queries leave the caps empty ("none"),
    /// they do not fail the bind.
    pub fn set_device(&mut self, device: &Arc<Device>) -> Result<(), ControlError> {
        self.client.set_device(device)?;

        self.search_caps.clear();
        self.sort_caps.clear();
        self.system_update_id = None;

        match self.query_search_capabilities() {
            Ok(caps) => self.search_caps = caps,
            Err(err) => warn!(error = %err, "Failed to obtain search capabilities"),
        }
        match self.query_sort_capabilities() {
            Ok(caps) => self.sort_caps = caps,
            Err(err) => warn!(error = %err, "Failed to obtain sort capabilities"),
        }
        match self.query_system_update_id() {
            Ok(id) => self.system_update_id = Some(id),
            Err(err) => warn!(error = %err, "Failed to obtain system update id"),
        }

        Ok(())
    }

    pub fn supports_action(&self, action: CdAction) -> bool {
        self.client.supports_action(action)
    }

    pub fn search_capabilities(&self) -> &[Property] {
        &self.search_caps
    }

    pub fn sort_capabilities(&self) -> &[Property] {
        &self.sort_caps
    }

    pub fn system_update_id(&self) -> Option<u32> {
        self.system_update_id
    }

    pub fn events(&self) -> Receiver<StateVariableEvent<CdVariable>> {
        self.client.events()
    }

    pub fn subscribe(&self) -> Result<(), ControlError> {
        self.client.subscribe()
    }

    pub fn unsubscribe(&self) -> Result<(), ControlError> {
        self.client.unsubscribe()
    }

    pub fn query_search_capabilities(&self) -> Result<Vec<Property>, ControlError> {
        let response = self
            .client
            .execute_action(CdAction::GetSearchCapabilities, &[])?;
        let raw = child_text_allow_empty(&response, "SearchCaps")
            .ok_or_else(|| ControlError::missing_value("SearchCaps"))?;
        Ok(parse_property_list(&raw))
    }

    pub fn query_sort_capabilities(&self) -> Result<Vec<Property>, ControlError> {
        let response = self
            .client
            .execute_action(CdAction::GetSortCapabilities, &[])?;
        let raw = child_text_allow_empty(&response, "SortCaps")
            .ok_or_else(|| ControlError::missing_value("SortCaps"))?;
        Ok(parse_property_list(&raw))
    }

    pub fn query_system_update_id(&self) -> Result<u32, ControlError> {
        let response = self
            .client
            .execute_action(CdAction::GetSystemUpdateId, &[])?;
        let raw = child_text(&response, "Id").ok_or_else(|| ControlError::missing_value("Id"))?;
        raw.parse()
            .map_err(|_| ControlError::invalid_value("Id", &raw))
    }

    /// BrowseMetadata: the response contains exactly one object.
    pub fn browse_metadata(
        &self,
        object_id: &str,
        filter: &str,
    ) -> Result<MediaEntry, ControlError> {
        let result = self.browse(object_id, "BrowseMetadata", filter, 0, 0, "")?;
        result.entries.into_iter().next().ok_or_else(|| {
            ControlError::parse(
                "DIDL-Lite",
                format!("object {object_id} missing from BrowseMetadata response"),
            )
        })
    }

    /// One BrowseDirectChildren call; paging across chunks lives in the
    /// MediaServer facade.
    pub fn browse_direct_children(
        &self,
        category: BrowseCategory,
        object_id: &str,
        filter: &str,
        start_index: u32,
        requested_count: u32,
        sort: &str,
    ) -> Result<BrowseResult, ControlError> {
        let mut result = self.browse(
            object_id,
            "BrowseDirectChildren",
            filter,
            start_index,
            requested_count,
            sort,
        )?;
        filter_category(&mut result.entries, category);
        Ok(result)
    }

    /// One Search call, same envelope shape as Browse.
    pub fn search(
        &self,
        container_id: &str,
        criteria: &str,
        filter: &str,
        start_index: u32,
        requested_count: u32,
        sort: &str,
    ) -> Result<BrowseResult, ControlError> {
        let args = [
            ("ContainerID", container_id.to_string()),
            ("SearchCriteria", criteria.to_string()),
            ("Filter", filter.to_string()),
            ("StartingIndex", start_index.to_string()),
            ("RequestedCount", requested_count.to_string()),
            ("SortCriteria", sort.to_string()),
        ];

        let response = self.client.execute_action(CdAction::Search, &args)?;
        parse_browse_payload(&response)
    }

    /// Cooperative cancellation; observed by the paged facade at chunk
    /// boundaries.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub(crate) fn clear_abort(&self) {
        self.abort.store(false, Ordering::SeqCst);
    }

    pub(crate) fn abort_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    fn browse(
        &self,
        object_id: &str,
        browse_flag: &str,
        filter: &str,
        start_index: u32,
        requested_count: u32,
        sort: &str,
    ) -> Result<BrowseResult, ControlError> {
        let args = [
            ("ObjectID", object_id.to_string()),
            ("BrowseFlag", browse_flag.to_string()),
            ("Filter", filter.to_string()),
            ("StartingIndex", start_index.to_string()),
            ("RequestedCount", requested_count.to_string()),
            ("SortCriteria", sort.to_string()),
        ];

        let response = self.client.execute_action(CdAction::Browse, &args)?;
        parse_browse_payload(&response)
    }
}

/// Unpack a Browse/Search response: counters plus the double-encoded
/// DIDL-Lite `Result` payload, parsed in a second pass.
pub(crate) fn parse_browse_payload(
    response: &xmltree::Element,
) -> Result<BrowseResult, ControlError> {
    let number_returned = parse_counter(response, "NumberReturned")?;
    let total_matches = parse_counter(response, "TotalMatches")?;
    let update_id = parse_counter(response, "UpdateID").unwrap_or(0);

    let raw = child_text_allow_empty(response, "Result")
        .ok_or_else(|| ControlError::missing_value("Result"))?;
    let trimmed = raw.trim();

    let entries = if trimmed.is_empty() {
        Vec::new()
    } else {
        let didl =
            parse_didl(trimmed).map_err(|e| ControlError::parse("DIDL-Lite", e))?;
        entries_from_didl(&didl)
    };

    Ok(BrowseResult {
        number_returned,
        total_matches,
        update_id,
        entries,
    })
}

fn parse_counter(response: &xmltree::Element, name: &str) -> Result<u32, ControlError> {
    let raw = child_text(response, name).ok_or_else(|| ControlError::missing_value(name))?;
    raw.parse()
        .map_err(|_| ControlError::invalid_value(name, &raw))
}

fn filter_category(entries: &mut Vec<MediaEntry>, category: BrowseCategory) {
    match category {
        BrowseCategory::All => {}
        BrowseCategory::ContainersOnly => entries.retain(|e| e.is_container()),
        BrowseCategory::ItemsOnly => entries.retain(|e| !e.is_container()),
    }
}

/// Parse a comma-separated capability list; unknown property names are
/// logged and skipped. An empty list means "none", `*` is the explicit
/// wildcard.
fn parse_property_list(raw: &str) -> Vec<Property> {
    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .filter_map(|token| match Property::from_name(token) {
            Some(prop) => Some(prop),
            None => {
                warn!(property = token, "Unknown capability property, skipping");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lyraupnp::soap::{find_child_with_suffix, parse_soap_envelope};

    fn browse_response_element(inner_didl: &str, returned: u32, total: u32) -> xmltree::Element {
        let escaped = inner_didl
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;");
        let xml = format!(
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <u:BrowseResponse xmlns:u="urn:schemas-upnp-org:service:ContentDirectory:1">
      <Result>{escaped}</Result>
      <NumberReturned>{returned}</NumberReturned>
      <TotalMatches>{total}</TotalMatches>
      <UpdateID>7</UpdateID>
    </u:BrowseResponse>
  </s:Body>
</s:Envelope>"#
        );
        let envelope = parse_soap_envelope(xml.as_bytes()).unwrap();
        find_child_with_suffix(&envelope.body.content, "BrowseResponse")
            .unwrap()
            .clone()
    }

    const DIDL: &str = r#"<DIDL-Lite xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/"><container id="c1" parentID="0" childCount="2"><dc:title>Folder</dc:title><upnp:class>object.container.storageFolder</upnp:class></container><item id="i1" parentID="0"><dc:title>Song</dc:title><upnp:class>object.item.audioItem.musicTrack</upnp:class><res protocolInfo="http-get:*:audio/mpeg:*">http://h/t.mp3</res></item></DIDL-Lite>"#;

    #[test]
    fn parse_double_encoded_result() {
        let response = browse_response_element(DIDL, 2, 10);
        let result = parse_browse_payload(&response).unwrap();

        assert_eq!(result.number_returned, 2);
        assert_eq!(result.total_matches, 10);
        assert_eq!(result.update_id, 7);
        assert_eq!(result.entries.len(), 2);
        // containers first, items second
        assert!(result.entries[0].is_container());
        assert!(!result.entries[1].is_container());
    }

    #[test]
    fn empty_result_payload_yields_no_entries() {
        let response = browse_response_element("", 0, 0);
        let result = parse_browse_payload(&response).unwrap();
        assert!(result.entries.is_empty());
        assert_eq!(result.number_returned, 0);
    }

    #[test]
    fn property_list_parsing_skips_unknown() {
        let caps = parse_property_list("dc:title, upnp:artist,x:bogus , ,upnp:album");
        assert_eq!(
            caps,
            vec![Property::Title, Property::Artist, Property::Album]
        );
        assert!(parse_property_list("").is_empty());
        assert_eq!(parse_property_list("*"), vec![Property::All]);
    }

    #[test]
    fn action_and_variable_round_trip() {
        for action in [
            CdAction::GetSearchCapabilities,
            CdAction::GetSortCapabilities,
            CdAction::GetSystemUpdateId,
            CdAction::Browse,
            CdAction::Search,
        ] {
            assert_eq!(
                ContentDirectoryService::action_from_str(ContentDirectoryService::action_to_str(
                    action
                )),
                Some(action)
            );
        }

        for variable in [
            CdVariable::ContainerUpdateIds,
            CdVariable::TransferIds,
            CdVariable::SystemUpdateId,
            CdVariable::SearchCapabilities,
            CdVariable::SortCapabilities,
            CdVariable::LastChange,
            CdVariable::ArgObjectId,
            CdVariable::ArgResult,
            CdVariable::ArgSearchCriteria,
            CdVariable::ArgBrowseFlag,
            CdVariable::ArgFilter,
            CdVariable::ArgSortCriteria,
            CdVariable::ArgIndex,
            CdVariable::ArgCount,
            CdVariable::ArgUpdateId,
        ] {
            assert_eq!(
                ContentDirectoryService::variable_from_str(
                    ContentDirectoryService::variable_to_str(variable)
                ),
                Some(variable)
            );
        }
    }

    #[test]
    fn error_mapping_table() {
        assert!(matches!(
            ContentDirectoryService::map_upnp_error(701, ""),
            ControlError::NoSuchObject
        ));
        assert!(matches!(
            ContentDirectoryService::map_upnp_error(708, ""),
            ControlError::InvalidSearchCriteria
        ));
        assert!(matches!(
            ContentDirectoryService::map_upnp_error(709, ""),
            ControlError::InvalidSortCriteria
        ));
        assert!(matches!(
            ContentDirectoryService::map_upnp_error(711, ""),
            ControlError::RestrictedObject
        ));
        assert!(matches!(
            ContentDirectoryService::map_upnp_error(720, ""),
            ControlError::CannotProcess
        ));
        assert!(matches!(
            ContentDirectoryService::map_upnp_error(999, "odd"),
            ControlError::Upnp { code: 999, .. }
        ));
    }

    #[test]
    fn category_filter() {
        let response = browse_response_element(DIDL, 2, 2);
        let mut all = parse_browse_payload(&response).unwrap().entries;
        let mut containers = all.clone();
        let mut items = all.clone();

        filter_category(&mut all, BrowseCategory::All);
        filter_category(&mut containers, BrowseCategory::ContainersOnly);
        filter_category(&mut items, BrowseCategory::ItemsOnly);

        assert_eq!(all.len(), 2);
        assert_eq!(containers.len(), 1);
        assert!(containers[0].is_container());
        assert_eq!(items.len(), 1);
        assert!(!items[0].is_container());
    }
}
