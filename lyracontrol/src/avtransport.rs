//! AVTransport:1 client.

use std::sync::Arc;

use crossbeam_channel::Receiver;

use lyraupnp::soap::{child_text, child_text_allow_empty};

use crate::device::{Device, ServiceKind};
use crate::errors::ControlError;
use crate::gena::EventBroker;
use crate::service_client::{ServiceClient, ServiceTraits, StateVariableEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AvAction {
    SetAvTransportUri,
    SetNextAvTransportUri,
    GetMediaInfo,
    GetTransportInfo,
    GetPositionInfo,
    GetDeviceCapabilities,
    GetTransportSettings,
    Stop,
    Play,
    Pause,
    Record,
    Seek,
    Next,
    Previous,
    SetPlayMode,
    SetRecordQualityMode,
    GetCurrentTransportActions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AvVariable {
    TransportState,
    TransportStatus,
    PlaybackStorageMedium,
    PossiblePlaybackStorageMedia,
    PossibleRecordStorageMedia,
    CurrentPlayMode,
    TransportPlaySpeed,
    RecordStorageMedium,
    RecordMediumWriteStatus,
    PossibleRecordQualityModes,
    CurrentRecordQualityMode,
    NumberOfTracks,
    CurrentTrack,
    CurrentTrackDuration,
    CurrentMediaDuration,
    CurrentTrackUri,
    CurrentTrackMetaData,
    AvTransportUri,
    AvTransportUriMetaData,
    NextAvTransportUri,
    NextAvTransportUriMetaData,
    CurrentTransportActions,
    RelativeTimePosition,
    AbsoluteTimePosition,
    RelativeCounterPosition,
    AbsoluteCounterPosition,
    ArgSeekMode,
    ArgSeekTarget,
    ArgInstanceId,
    LastChange,
}

/// Traits record for AVTransport.
pub struct AvTransportService;

impl ServiceTraits for AvTransportService {
    type Action = AvAction;
    type Variable = AvVariable;

    const KIND: ServiceKind = ServiceKind::AVTransport;

    fn action_to_str(action: AvAction) -> &'static str {
        match action {
            AvAction::SetAvTransportUri => "SetAVTransportURI",
            AvAction::SetNextAvTransportUri => "SetNextAVTransportURI",
            AvAction::GetMediaInfo => "GetMediaInfo",
            AvAction::GetTransportInfo => "GetTransportInfo",
            AvAction::GetPositionInfo => "GetPositionInfo",
            AvAction::GetDeviceCapabilities => "GetDeviceCapabilities",
            AvAction::GetTransportSettings => "GetTransportSettings",
            AvAction::Stop => "Stop",
            AvAction::Play => "Play",
            AvAction::Pause => "Pause",
            AvAction::Record => "Record",
            AvAction::Seek => "Seek",
            AvAction::Next => "Next",
            AvAction::Previous => "Previous",
            AvAction::SetPlayMode => "SetPlayMode",
            AvAction::SetRecordQualityMode => "SetRecordQualityMode",
            AvAction::GetCurrentTransportActions => "GetCurrentTransportActions",
        }
    }

    fn action_from_str(s: &str) -> Option<AvAction> {
        Some(match s {
            "SetAVTransportURI" => AvAction::SetAvTransportUri,
            "SetNextAVTransportURI" => AvAction::SetNextAvTransportUri,
            "GetMediaInfo" => AvAction::GetMediaInfo,
            "GetTransportInfo" => AvAction::GetTransportInfo,
            "GetPositionInfo" => AvAction::GetPositionInfo,
            "GetDeviceCapabilities" => AvAction::GetDeviceCapabilities,
            "GetTransportSettings" => AvAction::GetTransportSettings,
            "Stop" => AvAction::Stop,
            "Play" => AvAction::Play,
            "Pause" => AvAction::Pause,
            "Record" => AvAction::Record,
            "Seek" => AvAction::Seek,
            "Next" => AvAction::Next,
            "Previous" => AvAction::Previous,
            "SetPlayMode" => AvAction::SetPlayMode,
            "SetRecordQualityMode" => AvAction::SetRecordQualityMode,
            "GetCurrentTransportActions" => AvAction::GetCurrentTransportActions,
            _ => return None,
        })
    }

    fn variable_to_str(variable: AvVariable) -> &'static str {
        match variable {
            AvVariable::TransportState => "TransportState",
            AvVariable::TransportStatus => "TransportStatus",
            AvVariable::PlaybackStorageMedium => "PlaybackStorageMedium",
            AvVariable::PossiblePlaybackStorageMedia => "PossiblePlaybackStorageMedia",
            AvVariable::PossibleRecordStorageMedia => "PossibleRecordStorageMedia",
            AvVariable::CurrentPlayMode => "CurrentPlayMode",
            AvVariable::TransportPlaySpeed => "TransportPlaySpeed",
            AvVariable::RecordStorageMedium => "RecordStorageMedium",
            AvVariable::RecordMediumWriteStatus => "RecordMediumWriteStatus",
            AvVariable::PossibleRecordQualityModes => "PossibleRecordQualityModes",
            AvVariable::CurrentRecordQualityMode => "CurrentRecordQualityMode",
            AvVariable::NumberOfTracks => "NumberOfTracks",
            AvVariable::CurrentTrack => "CurrentTrack",
            AvVariable::CurrentTrackDuration => "CurrentTrackDuration",
            AvVariable::CurrentMediaDuration => "CurrentMediaDuration",
            AvVariable::CurrentTrackUri => "CurrentTrackURI",
            AvVariable::CurrentTrackMetaData => "CurrentTrackMetaData",
            AvVariable::AvTransportUri => "AVTransportURI",
            AvVariable::AvTransportUriMetaData => "AVTransportURIMetaData",
            AvVariable::NextAvTransportUri => "NextAVTransportURI",
            AvVariable::NextAvTransportUriMetaData => "NextAVTransportURIMetaData",
            AvVariable::CurrentTransportActions => "CurrentTransportActions",
            AvVariable::RelativeTimePosition => "RelativeTimePosition",
            AvVariable::AbsoluteTimePosition => "AbsoluteTimePosition",
            AvVariable::RelativeCounterPosition => "RelativeCounterPosition",
            AvVariable::AbsoluteCounterPosition => "AbsoluteCounterPosition",
            AvVariable::ArgSeekMode => "A_ARG_TYPE_SeekMode",
            AvVariable::ArgSeekTarget => "A_ARG_TYPE_SeekTarget",
            AvVariable::ArgInstanceId => "A_ARG_TYPE_InstanceID",
            AvVariable::LastChange => "LastChange",
        }
    }

    fn variable_from_str(s: &str) -> Option<AvVariable> {
        Some(match s {
            "TransportState" => AvVariable::TransportState,
            "TransportStatus" => AvVariable::TransportStatus,
            "PlaybackStorageMedium" => AvVariable::PlaybackStorageMedium,
            "PossiblePlaybackStorageMedia" => AvVariable::PossiblePlaybackStorageMedia,
            "PossibleRecordStorageMedia" => AvVariable::PossibleRecordStorageMedia,
            "CurrentPlayMode" => AvVariable::CurrentPlayMode,
            "TransportPlaySpeed" => AvVariable::TransportPlaySpeed,
            "RecordStorageMedium" => AvVariable::RecordStorageMedium,
            "RecordMediumWriteStatus" => AvVariable::RecordMediumWriteStatus,
            "PossibleRecordQualityModes" => AvVariable::PossibleRecordQualityModes,
            "CurrentRecordQualityMode" => AvVariable::CurrentRecordQualityMode,
            "NumberOfTracks" => AvVariable::NumberOfTracks,
            "CurrentTrack" => AvVariable::CurrentTrack,
            "CurrentTrackDuration" => AvVariable::CurrentTrackDuration,
            "CurrentMediaDuration" => AvVariable::CurrentMediaDuration,
            "CurrentTrackURI" => AvVariable::CurrentTrackUri,
            "CurrentTrackMetaData" => AvVariable::CurrentTrackMetaData,
            "AVTransportURI" => AvVariable::AvTransportUri,
            "AVTransportURIMetaData" => AvVariable::AvTransportUriMetaData,
            "NextAVTransportURI" => AvVariable::NextAvTransportUri,
            "NextAVTransportURIMetaData" => AvVariable::NextAvTransportUriMetaData,
            "CurrentTransportActions" => AvVariable::CurrentTransportActions,
            "RelativeTimePosition" => AvVariable::RelativeTimePosition,
            "AbsoluteTimePosition" => AvVariable::AbsoluteTimePosition,
            "RelativeCounterPosition" => AvVariable::RelativeCounterPosition,
            "AbsoluteCounterPosition" => AvVariable::AbsoluteCounterPosition,
            "A_ARG_TYPE_SeekMode" => AvVariable::ArgSeekMode,
            "A_ARG_TYPE_SeekTarget" => AvVariable::ArgSeekTarget,
            "A_ARG_TYPE_InstanceID" => AvVariable::ArgInstanceId,
            "LastChange" => AvVariable::LastChange,
            _ => return None,
        })
    }

    fn map_upnp_error(code: u32, description: &str) -> ControlError {
        match code {
            701 => ControlError::TransitionNotAvailable,
            702 => ControlError::NoContents,
            710 => ControlError::SeekModeUnsupported,
            711 => ControlError::IllegalSeekTarget,
            718 => ControlError::InvalidInstanceId,
            _ => ControlError::upnp(code, description),
        }
    }
}

/// GetTransportInfo payload.
#[derive(Debug, Clone)]
pub struct TransportInfo {
    pub current_transport_state: String,
    pub current_transport_status: String,
    pub current_speed: String,
}

/// GetPositionInfo payload.
#[derive(Debug, Clone)]
pub struct PositionInfo {
    pub track: u32,
    pub track_duration: Option<String>,
    pub track_metadata: Option<String>,
    pub track_uri: Option<String>,
    pub rel_time: Option<String>,
    pub abs_time: Option<String>,
}

/// GetTransportSettings payload.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub play_mode: Option<String>,
    pub rec_quality_mode: Option<String>,
}

/// GetMediaInfo payload.
#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub nr_tracks: u32,
    pub media_duration: Option<String>,
    pub current_uri: Option<String>,
    pub current_uri_metadata: Option<String>,
    pub next_uri: Option<String>,
    pub play_medium: Option<String>,
}

/// AVTransport client.
pub struct AvTransportClient {
    client: ServiceClient<AvTransportService>,
}

impl Default for AvTransportClient {
    fn default() -> Self {
        Self::new()
    }
}

impl AvTransportClient {
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

    pub fn supports_action(&self, action: AvAction) -> bool {
        self.client.supports_action(action)
    }

    pub fn events(&self) -> Receiver<StateVariableEvent<AvVariable>> {
        self.client.events()
    }

    pub fn subscribe(&self) -> Result<(), ControlError> {
        self.client.subscribe()
    }

    pub fn unsubscribe(&self) -> Result<(), ControlError> {
        self.client.unsubscribe()
    }

    /// AVTransport:1 - SetAVTransportURI
    pub fn set_av_transport_uri(
        &self,
        instance_id: u32,
        uri: &str,
        metadata: &str,
    ) -> Result<(), ControlError> {
        let args = [
            ("InstanceID", instance_id.to_string()),
            ("CurrentURI", uri.to_string()),
            ("CurrentURIMetaData", metadata.to_string()),
        ];
        self.client
            .execute_action(AvAction::SetAvTransportUri, &args)
            .map(|_| ())
    }

    /// AVTransport:1 - SetNextAVTransportURI (optional action)
    pub fn set_next_av_transport_uri(
        &self,
        instance_id: u32,
        uri: &str,
        metadata: &str,
    ) -> Result<(), ControlError> {
        let args = [
            ("InstanceID", instance_id.to_string()),
            ("NextURI", uri.to_string()),
            ("NextURIMetaData", metadata.to_string()),
        ];
        self.client
            .execute_action(AvAction::SetNextAvTransportUri, &args)
            .map(|_| ())
    }

    /// AVTransport:1 - Play
    pub fn play(&self, instance_id: u32, speed: &str) -> Result<(), ControlError> {
        let args = [
            ("InstanceID", instance_id.to_string()),
            ("Speed", speed.to_string()),
        ];
        self.client.execute_action(AvAction::Play, &args).map(|_| ())
    }

    /// AVTransport:1 - Pause
    pub fn pause(&self, instance_id: u32) -> Result<(), ControlError> {
        self.simple_action(AvAction::Pause, instance_id)
    }

    /// AVTransport:1 - Stop
    pub fn stop(&self, instance_id: u32) -> Result<(), ControlError> {
        self.simple_action(AvAction::Stop, instance_id)
    }

    /// AVTransport:1 - Next
    pub fn next(&self, instance_id: u32) -> Result<(), ControlError> {
        self.simple_action(AvAction::Next, instance_id)
    }

    /// AVTransport:1 - Previous
    pub fn previous(&self, instance_id: u32) -> Result<(), ControlError> {
        self.simple_action(AvAction::Previous, instance_id)
    }

    /// AVTransport:1 - Seek.
    ///
    /// The target format depends on the unit (track number for TRACK_NR,
    /// H:MM:SS for the time modes); it is passed through untouched and
    /// validated by the device.
    pub fn seek(&self, instance_id: u32, unit: &str, target: &str) -> Result<(), ControlError> {
        let args = [
            ("InstanceID", instance_id.to_string()),
            ("Unit", unit.to_string()),
            ("Target", target.to_string()),
        ];
        self.client.execute_action(AvAction::Seek, &args).map(|_| ())
    }

    /// AVTransport:1 - GetTransportInfo
    pub fn get_transport_info(&self, instance_id: u32) -> Result<TransportInfo, ControlError> {
        let args = [("InstanceID", instance_id.to_string())];
        let response = self
            .client
            .execute_action(AvAction::GetTransportInfo, &args)?;

        Ok(TransportInfo {
            current_transport_state: required_text(&response, "CurrentTransportState")?,
            current_transport_status: required_text(&response, "CurrentTransportStatus")?,
            current_speed: required_text(&response, "CurrentSpeed")?,
        })
    }

    /// AVTransport:1 - GetPositionInfo
    pub fn get_position_info(&self, instance_id: u32) -> Result<PositionInfo, ControlError> {
        let args = [("InstanceID", instance_id.to_string())];
        let response = self
            .client
            .execute_action(AvAction::GetPositionInfo, &args)?;

        let track = child_text(&response, "Track")
            .and_then(|t| t.parse().ok())
            .unwrap_or(0);

        Ok(PositionInfo {
            track,
            track_duration: optional_text(&response, "TrackDuration"),
            track_metadata: optional_text(&response, "TrackMetaData"),
            track_uri: optional_text(&response, "TrackURI"),
            rel_time: optional_text(&response, "RelTime"),
            abs_time: optional_text(&response, "AbsTime"),
        })
    }

    /// AVTransport:1 - GetMediaInfo
    pub fn get_media_info(&self, instance_id: u32) -> Result<MediaInfo, ControlError> {
        let args = [("InstanceID", instance_id.to_string())];
        let response = self.client.execute_action(AvAction::GetMediaInfo, &args)?;

        let nr_tracks = child_text(&response, "NrTracks")
            .and_then(|t| t.parse().ok())
            .unwrap_or(0);

        Ok(MediaInfo {
            nr_tracks,
            media_duration: optional_text(&response, "MediaDuration"),
            current_uri: optional_text(&response, "CurrentURI"),
            current_uri_metadata: optional_text(&response, "CurrentURIMetaData"),
            next_uri: optional_text(&response, "NextURI"),
            play_medium: optional_text(&response, "PlayMedium"),
        })
    }

    /// AVTransport:1 - GetTransportSettings
    pub fn get_transport_settings(
        &self,
        instance_id: u32,
    ) -> Result<TransportSettings, ControlError> {
        let args = [("InstanceID", instance_id.to_string())];
        let response = self
            .client
            .execute_action(AvAction::GetTransportSettings, &args)?;

        Ok(TransportSettings {
            play_mode: optional_text(&response, "PlayMode"),
            rec_quality_mode: optional_text(&response, "RecQualityMode"),
        })
    }

    /// AVTransport:1 - GetCurrentTransportActions. Returns the raw
    /// comma-separated list; the renderer facade maps it to actions.
    pub fn get_current_transport_actions(
        &self,
        instance_id: u32,
    ) -> Result<String, ControlError> {
        let args = [("InstanceID", instance_id.to_string())];
        let response = self
            .client
            .execute_action(AvAction::GetCurrentTransportActions, &args)?;
        child_text_allow_empty(&response, "Actions")
            .ok_or_else(|| ControlError::missing_value("Actions"))
    }

    fn simple_action(&self, action: AvAction, instance_id: u32) -> Result<(), ControlError> {
        let args = [("InstanceID", instance_id.to_string())];
        self.client.execute_action(action, &args).map(|_| ())
    }
}

fn required_text(response: &xmltree::Element, name: &str) -> Result<String, ControlError> {
    child_text(response, name).ok_or_else(|| ControlError::missing_value(name))
}

fn optional_text(response: &xmltree::Element, name: &str) -> Option<String> {
    child_text(response, name).filter(|t| t != "NOT_IMPLEMENTED")
}
