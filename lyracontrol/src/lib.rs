//! # lyracontrol - UPnP/AV control point
//!
//! Discovers MediaServers and MediaRenderers on the local network, keeps a
//! live device inventory, and drives their AV services over SOAP and GENA.
//!
//! The layering, bottom up:
//!
//! - [`scanner`] : SSDP presence tracking with expirations
//! - [`service_client`] : the generic SOAP/SCPD/GENA runtime every service
//!   client is built on
//! - [`content_directory`], [`avtransport`], [`rendering_control`],
//!   [`connection_manager`] : the four typed AV service clients
//! - [`media_server`], [`media_renderer`] : device facades (paged browsing,
//!   event-derived playback state)
//! - [`control_point`] : the application-facing orchestrator

pub mod avtransport;
pub mod connection_manager;
pub mod content_directory;
pub mod control_point;
pub mod device;
pub mod errors;
pub mod events;
pub mod gena;
pub mod item;
pub mod media_renderer;
pub mod media_server;
pub mod rendering_control;
pub mod scanner;
pub mod scpd;
pub mod service_client;
pub mod soap_client;
pub mod webserver;

pub use avtransport::{
    AvAction, AvTransportClient, AvVariable, MediaInfo, PositionInfo, TransportInfo,
    TransportSettings,
};
pub use connection_manager::{
    CmAction, CmVariable, ConnectionInfo, ConnectionManagerClient, DEFAULT_CONNECTION_ID,
    Direction, ProtocolInfoLists, UNKNOWN_CONNECTION_ID,
};
pub use content_directory::{
    BrowseCategory, BrowseResult, CdAction, CdVariable, ContentDirectoryClient,
};
pub use control_point::{ControlPoint, PLAYLIST_DIRECTORY};
pub use device::{Device, DeviceKind, Service, ServiceKind};
pub use errors::ControlError;
pub use events::EventBus;
pub use gena::{DEFAULT_SUBSCRIPTION_TIMEOUT_SECS, EventBroker, SubscriptionEvent};
pub use item::{MediaEntry, MediaResource};
pub use media_renderer::{
    MediaRenderer, PlaybackState, RendererAction, RendererEvent, parse_available_actions,
};
pub use media_server::{DEFAULT_REQUEST_SIZE, MediaServer, ROOT_ID, SortOrder};
pub use rendering_control::{RcAction, RcVariable, RenderingControlClient};
pub use scanner::{
    DescriptionLoader, DeviceScanner, HttpDescriptionLoader, ScannerConfig, ScannerEvent,
};
pub use scpd::{ServiceDescription, StateVariable, ValueRange};
pub use service_client::{ServiceClient, ServiceTraits, StateVariableEvent};
pub use webserver::PlaylistHost;
