//! ConnectionManager:1 client.

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use lyraupnp::soap::{child_text, child_text_allow_empty};
use lyradidl::ProtocolInfo;

use crate::device::{Device, ServiceKind};
use crate::errors::ControlError;
use crate::gena::EventBroker;
use crate::service_client::{ServiceClient, ServiceTraits};

/// Connection id sentinel: no connection prepared yet.
pub const UNKNOWN_CONNECTION_ID: i32 = -1;

/// Connection id sentinel: the default ("only one connection") instance,
/// used when PrepareForConnection is unsupported.
pub const DEFAULT_CONNECTION_ID: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmAction {
    GetProtocolInfo,
    PrepareForConnection,
    ConnectionComplete,
    GetCurrentConnectionIds,
    GetCurrentConnectionInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CmVariable {
    SourceProtocolInfo,
    SinkProtocolInfo,
    CurrentConnectionIds,
    ArgConnectionStatus,
    ArgConnectionManager,
    ArgDirection,
    ArgProtocolInfo,
    ArgConnectionId,
    ArgAvTransportId,
    ArgRcsId,
}

/// Traits record for ConnectionManager.
pub struct ConnectionManagerService;

impl ServiceTraits for ConnectionManagerService {
    type Action = CmAction;
    type Variable = CmVariable;

    const KIND: ServiceKind = ServiceKind::ConnectionManager;

    fn action_to_str(action: CmAction) -> &'static str {
        match action {
            CmAction::GetProtocolInfo => "GetProtocolInfo",
            CmAction::PrepareForConnection => "PrepareForConnection",
            CmAction::ConnectionComplete => "ConnectionComplete",
            CmAction::GetCurrentConnectionIds => "GetCurrentConnectionIDs",
            CmAction::GetCurrentConnectionInfo => "GetCurrentConnectionInfo",
        }
    }

    fn action_from_str(s: &str) -> Option<CmAction> {
        Some(match s {
            "GetProtocolInfo" => CmAction::GetProtocolInfo,
            "PrepareForConnection" => CmAction::PrepareForConnection,
            "ConnectionComplete" => CmAction::ConnectionComplete,
            "GetCurrentConnectionIDs" => CmAction::GetCurrentConnectionIds,
            "GetCurrentConnectionInfo" => CmAction::GetCurrentConnectionInfo,
            _ => return None,
        })
    }

    fn variable_to_str(variable: CmVariable) -> &'static str {
        match variable {
            CmVariable::SourceProtocolInfo => "SourceProtocolInfo",
            CmVariable::SinkProtocolInfo => "SinkProtocolInfo",
            CmVariable::CurrentConnectionIds => "CurrentConnectionIDs",
            CmVariable::ArgConnectionStatus => "A_ARG_TYPE_ConnectionStatus",
            CmVariable::ArgConnectionManager => "A_ARG_TYPE_ConnectionManager",
            CmVariable::ArgDirection => "A_ARG_TYPE_Direction",
            CmVariable::ArgProtocolInfo => "A_ARG_TYPE_ProtocolInfo",
            CmVariable::ArgConnectionId => "A_ARG_TYPE_ConnectionID",
            CmVariable::ArgAvTransportId => "A_ARG_TYPE_AVTransportID",
            CmVariable::ArgRcsId => "A_ARG_TYPE_RcsID",
        }
    }

    fn variable_from_str(s: &str) -> Option<CmVariable> {
        Some(match s {
            "SourceProtocolInfo" => CmVariable::SourceProtocolInfo,
            "SinkProtocolInfo" => CmVariable::SinkProtocolInfo,
            "CurrentConnectionIDs" => CmVariable::CurrentConnectionIds,
            "A_ARG_TYPE_ConnectionStatus" => CmVariable::ArgConnectionStatus,
            "A_ARG_TYPE_ConnectionManager" => CmVariable::ArgConnectionManager,
            "A_ARG_TYPE_Direction" => CmVariable::ArgDirection,
            "A_ARG_TYPE_ProtocolInfo" => CmVariable::ArgProtocolInfo,
            "A_ARG_TYPE_ConnectionID" => CmVariable::ArgConnectionId,
            "A_ARG_TYPE_AVTransportID" => CmVariable::ArgAvTransportId,
            "A_ARG_TYPE_RcsID" => CmVariable::ArgRcsId,
            _ => return None,
        })
    }

    fn map_upnp_error(code: u32, description: &str) -> ControlError {
        match code {
            701 => ControlError::IncompatibleProtocolInfo,
            702 => ControlError::IncompatibleDirections,
            703 => ControlError::InsufficientResources,
            _ => ControlError::upnp(code, description),
        }
    }
}

/// Direction of the stream relative to the answering endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Input => "Input",
            Direction::Output => "Output",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of PrepareForConnection / GetCurrentConnectionInfo.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub connection_id: i32,
    pub av_transport_id: i32,
    pub rcs_id: i32,
    pub protocol_info: String,
    /// `UDN/serviceId` of the peer connection manager
    pub peer_connection_manager: String,
    pub peer_connection_id: i32,
    pub direction: String,
    pub status: String,
}

impl ConnectionInfo {
    /// No connection prepared; every id is the unknown sentinel.
    pub fn unknown() -> Self {
        Self {
            connection_id: UNKNOWN_CONNECTION_ID,
            av_transport_id: UNKNOWN_CONNECTION_ID,
            rcs_id: UNKNOWN_CONNECTION_ID,
            protocol_info: String::new(),
            peer_connection_manager: String::new(),
            peer_connection_id: UNKNOWN_CONNECTION_ID,
            direction: String::new(),
            status: String::new(),
        }
    }

    /// The default instance, for devices without PrepareForConnection.
    pub fn default_connection() -> Self {
        Self {
            connection_id: DEFAULT_CONNECTION_ID,
            av_transport_id: DEFAULT_CONNECTION_ID,
            rcs_id: DEFAULT_CONNECTION_ID,
            protocol_info: String::new(),
            peer_connection_manager: String::new(),
            peer_connection_id: UNKNOWN_CONNECTION_ID,
            direction: String::new(),
            status: String::new(),
        }
    }

    pub fn is_known(&self) -> bool {
        self.connection_id != UNKNOWN_CONNECTION_ID
    }
}

/// Source and sink protocol lists from GetProtocolInfo.
#[derive(Debug, Clone, Default)]
pub struct ProtocolInfoLists {
    pub source: Vec<ProtocolInfo>,
    pub sink: Vec<ProtocolInfo>,
}

/// ConnectionManager client.
pub struct ConnectionManagerClient {
    client: ServiceClient<ConnectionManagerService>,
}

impl Default for ConnectionManagerClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManagerClient {
    pub fn new() -> Self {
        Self {
            client: ServiceClient::new(),
        }
    }

    pub fn set_event_broker(&mut self, broker: Arc<EventBroker>) {
        self.client.set_event_broker(broker);
    }

    pub fn set_device(&mut self, device: &Arc<Device>) -> Result<(), ControlError> {
        self.client.set_device(device)
    }

    pub fn is_bound(&self) -> bool {
        self.client.is_bound()
    }

    pub fn supports_action(&self, action: CmAction) -> bool {
        self.client.supports_action(action)
    }

    /// GetProtocolInfo: comma-separated source and sink lists.
    /// Unparseable entries are logged and skipped.
    pub fn get_protocol_info(&self) -> Result<ProtocolInfoLists, ControlError> {
        let response = self.client.execute_action(CmAction::GetProtocolInfo, &[])?;

        let source = child_text_allow_empty(&response, "Source")
            .ok_or_else(|| ControlError::missing_value("Source"))?;
        let sink = child_text_allow_empty(&response, "Sink")
            .ok_or_else(|| ControlError::missing_value("Sink"))?;

        Ok(ProtocolInfoLists {
            source: parse_protocol_list(&source),
            sink: parse_protocol_list(&sink),
        })
    }

    /// PrepareForConnection. The returned record carries the instance ids
    /// later AVTransport/RenderingControl calls must use.
    pub fn prepare_for_connection(
        &self,
        protocol_info: &ProtocolInfo,
        peer_connection_manager: &str,
        peer_connection_id: i32,
        direction: Direction,
    ) -> Result<ConnectionInfo, ControlError> {
        let args = [
            ("RemoteProtocolInfo", protocol_info.to_string()),
            ("PeerConnectionManager", peer_connection_manager.to_string()),
            ("PeerConnectionID", peer_connection_id.to_string()),
            ("Direction", direction.as_str().to_string()),
        ];
        let response = self
            .client
            .execute_action(CmAction::PrepareForConnection, &args)?;

        Ok(ConnectionInfo {
            connection_id: required_i32(&response, "ConnectionID")?,
            av_transport_id: required_i32(&response, "AVTransportID")?,
            rcs_id: required_i32(&response, "RcsID")?,
            protocol_info: protocol_info.to_string(),
            peer_connection_manager: peer_connection_manager.to_string(),
            peer_connection_id,
            direction: direction.as_str().to_string(),
            status: "OK".to_string(),
        })
    }

    /// ConnectionComplete: release a prepared connection.
    pub fn connection_complete(&self, connection_id: i32) -> Result<(), ControlError> {
        let args = [("ConnectionID", connection_id.to_string())];
        self.client
            .execute_action(CmAction::ConnectionComplete, &args)
            .map(|_| ())
    }

    /// GetCurrentConnectionIDs.
    pub fn get_current_connection_ids(&self) -> Result<Vec<i32>, ControlError> {
        let response = self
            .client
            .execute_action(CmAction::GetCurrentConnectionIds, &[])?;
        let raw = child_text_allow_empty(&response, "ConnectionIDs")
            .ok_or_else(|| ControlError::missing_value("ConnectionIDs"))?;

        let mut ids = Vec::new();
        for token in raw.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let id = token
                .parse()
                .map_err(|_| ControlError::invalid_value("ConnectionIDs", token))?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// GetCurrentConnectionInfo.
    pub fn get_current_connection_info(
        &self,
        connection_id: i32,
    ) -> Result<ConnectionInfo, ControlError> {
        let args = [("ConnectionID", connection_id.to_string())];
        let response = self
            .client
            .execute_action(CmAction::GetCurrentConnectionInfo, &args)?;

        Ok(ConnectionInfo {
            connection_id,
            av_transport_id: required_i32(&response, "AVTransportID")?,
            rcs_id: required_i32(&response, "RcsID")?,
            protocol_info: child_text_allow_empty(&response, "ProtocolInfo").unwrap_or_default(),
            peer_connection_manager: child_text_allow_empty(&response, "PeerConnectionManager")
                .unwrap_or_default(),
            peer_connection_id: required_i32(&response, "PeerConnectionID")?,
            direction: child_text(&response, "Direction").unwrap_or_default(),
            status: child_text(&response, "Status").unwrap_or_default(),
        })
    }
}

fn required_i32(response: &xmltree::Element, name: &str) -> Result<i32, ControlError> {
    let raw = child_text(response, name).ok_or_else(|| ControlError::missing_value(name))?;
    raw.parse()
        .map_err(|_| ControlError::invalid_value(name, &raw))
}

fn parse_protocol_list(raw: &str) -> Vec<ProtocolInfo> {
    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .filter_map(|token| match token.parse::<ProtocolInfo>() {
            Ok(info) => Some(info),
            Err(err) => {
                warn!(entry = token, error = %err, "Skipping malformed protocolInfo entry");
                None
            }
        })
        .collect()
}
