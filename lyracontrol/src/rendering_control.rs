//! RenderingControl:1 client.

use std::sync::Arc;

use crossbeam_channel::Receiver;

use lyraupnp::soap::child_text;

use crate::device::{Device, ServiceKind};
use crate::errors::ControlError;
use crate::gena::EventBroker;
use crate::service_client::{ServiceClient, ServiceTraits, StateVariableEvent};

/// The channel every control call targets. Multi-channel devices exist but
/// the AV profile drives the master channel.
pub const MASTER_CHANNEL: &str = "Master";

const DEFAULT_VOLUME_RANGE: (u32, u32) = (0, 100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RcAction {
    ListPresets,
    SelectPreset,
    GetVolume,
    SetVolume,
    GetVolumeDb,
    GetMute,
    SetMute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RcVariable {
    PresetNameList,
    Mute,
    Volume,
    VolumeDb,
    LastChange,
    ArgChannel,
    ArgInstanceId,
    ArgPresetName,
}

/// Traits record for RenderingControl.
pub struct RenderingControlService;

impl ServiceTraits for RenderingControlService {
    type Action = RcAction;
    type Variable = RcVariable;

    const KIND: ServiceKind = ServiceKind::RenderingControl;

    fn action_to_str(action: RcAction) -> &'static str {
        match action {
            RcAction::ListPresets => "ListPresets",
            RcAction::SelectPreset => "SelectPreset",
            RcAction::GetVolume => "GetVolume",
            RcAction::SetVolume => "SetVolume",
            RcAction::GetVolumeDb => "GetVolumeDB",
            RcAction::GetMute => "GetMute",
            RcAction::SetMute => "SetMute",
        }
    }

    fn action_from_str(s: &str) -> Option<RcAction> {
        Some(match s {
            "ListPresets" => RcAction::ListPresets,
            "SelectPreset" => RcAction::SelectPreset,
            "GetVolume" => RcAction::GetVolume,
            "SetVolume" => RcAction::SetVolume,
            "GetVolumeDB" => RcAction::GetVolumeDb,
            "GetMute" => RcAction::GetMute,
            "SetMute" => RcAction::SetMute,
            _ => return None,
        })
    }

    fn variable_to_str(variable: RcVariable) -> &'static str {
        match variable {
            RcVariable::PresetNameList => "PresetNameList",
            RcVariable::Mute => "Mute",
            RcVariable::Volume => "Volume",
            RcVariable::VolumeDb => "VolumeDB",
            RcVariable::LastChange => "LastChange",
            RcVariable::ArgChannel => "A_ARG_TYPE_Channel",
            RcVariable::ArgInstanceId => "A_ARG_TYPE_InstanceID",
            RcVariable::ArgPresetName => "A_ARG_TYPE_PresetName",
        }
    }

    fn variable_from_str(s: &str) -> Option<RcVariable> {
        Some(match s {
            "PresetNameList" => RcVariable::PresetNameList,
            "Mute" => RcVariable::Mute,
            "Volume" => RcVariable::Volume,
            "VolumeDB" => RcVariable::VolumeDb,
            "LastChange" => RcVariable::LastChange,
            "A_ARG_TYPE_Channel" => RcVariable::ArgChannel,
            "A_ARG_TYPE_InstanceID" => RcVariable::ArgInstanceId,
            "A_ARG_TYPE_PresetName" => RcVariable::ArgPresetName,
            _ => return None,
        })
    }

    fn map_upnp_error(code: u32, description: &str) -> ControlError {
        match code {
            702 => ControlError::InvalidInstanceId,
            _ => ControlError::upnp(code, description),
        }
    }
}

/// RenderingControl client with SCPD-derived volume clamping.
pub struct RenderingControlClient {
    client: ServiceClient<RenderingControlService>,
    volume_range: (u32, u32),
}

impl Default for RenderingControlClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderingControlClient {
    pub fn new() -> Self {
        Self {
            client: ServiceClient::new(),
            volume_range: DEFAULT_VOLUME_RANGE,
        }
    }

    pub fn set_event_broker(&mut self, broker: Arc<EventBroker>) {
        self.client.set_event_broker(broker);
    }

    /// Bind and pick up the Volume value range for clamping.
    pub fn set_device(&mut self, device: &Arc<Device>) -> Result<(), ControlError> {
        self.client.set_device(device)?;

        self.volume_range = self
            .client
            .state_variable("Volume")
            .and_then(|v| v.allowed_range)
            .map(|range| (range.min.max(0) as u32, range.max.max(0) as u32))
            .unwrap_or(DEFAULT_VOLUME_RANGE);

        Ok(())
    }

    pub fn supports_action(&self, action: RcAction) -> bool {
        self.client.supports_action(action)
    }

    /// (min, max) from the SCPD, or 0..100 when the device gives none.
    pub fn volume_range(&self) -> (u32, u32) {
        self.volume_range
    }

    pub fn events(&self) -> Receiver<StateVariableEvent<RcVariable>> {
        self.client.events()
    }

    pub fn subscribe(&self) -> Result<(), ControlError> {
        self.client.subscribe()
    }

    pub fn unsubscribe(&self) -> Result<(), ControlError> {
        self.client.unsubscribe()
    }

    /// RenderingControl:1 - GetVolume (master channel)
    pub fn get_volume(&self, instance_id: u32) -> Result<u32, ControlError> {
        let args = [
            ("InstanceID", instance_id.to_string()),
            ("Channel", MASTER_CHANNEL.to_string()),
        ];
        let response = self.client.execute_action(RcAction::GetVolume, &args)?;
        let raw = child_text(&response, "CurrentVolume")
            .ok_or_else(|| ControlError::missing_value("CurrentVolume"))?;
        raw.parse()
            .map_err(|_| ControlError::invalid_value("CurrentVolume", &raw))
    }

    /// RenderingControl:1 - SetVolume. The desired value is clamped into
    /// the device's advertised range before it goes on the wire.
    pub fn set_volume(&self, instance_id: u32, desired: u32) -> Result<(), ControlError> {
        let clamped = clamp_volume(desired, self.volume_range);
        let args = [
            ("InstanceID", instance_id.to_string()),
            ("Channel", MASTER_CHANNEL.to_string()),
            ("DesiredVolume", clamped.to_string()),
        ];
        self.client
            .execute_action(RcAction::SetVolume, &args)
            .map(|_| ())
    }

    /// RenderingControl:1 - GetMute (master channel)
    pub fn get_mute(&self, instance_id: u32) -> Result<bool, ControlError> {
        let args = [
            ("InstanceID", instance_id.to_string()),
            ("Channel", MASTER_CHANNEL.to_string()),
        ];
        let response = self.client.execute_action(RcAction::GetMute, &args)?;
        let raw = child_text(&response, "CurrentMute")
            .ok_or_else(|| ControlError::missing_value("CurrentMute"))?;
        match raw.as_str() {
            "0" => Ok(false),
            "1" => Ok(true),
            _ => Err(ControlError::invalid_value("CurrentMute", &raw)),
        }
    }

    /// RenderingControl:1 - SetMute (master channel)
    pub fn set_mute(&self, instance_id: u32, mute: bool) -> Result<(), ControlError> {
        let args = [
            ("InstanceID", instance_id.to_string()),
            ("Channel", MASTER_CHANNEL.to_string()),
            ("DesiredMute", if mute { "1" } else { "0" }.to_string()),
        ];
        self.client
            .execute_action(RcAction::SetMute, &args)
            .map(|_| ())
    }
}

pub(crate) fn clamp_volume(desired: u32, (min, max): (u32, u32)) -> u32 {
    desired.clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scpd::parse_scpd;

    #[test]
    fn volume_is_clamped_to_the_parsed_range() {
        let range = (10, 110);
        assert_eq!(clamp_volume(69, range), 69);
        assert_eq!(clamp_volume(120, range), 110);
        assert_eq!(clamp_volume(0, range), 10);
    }

    #[test]
    fn volume_range_comes_from_scpd() {
        let scpd = r#"<scpd>
  <serviceStateTable>
    <stateVariable sendEvents="no">
      <name>Volume</name>
      <dataType>ui2</dataType>
      <allowedValueRange><minimum>10</minimum><maximum>110</maximum></allowedValueRange>
    </stateVariable>
  </serviceStateTable>
</scpd>"#;

        let description = parse_scpd(scpd).unwrap();
        let range = description
            .state_variable("Volume")
            .and_then(|v| v.allowed_range)
            .map(|r| (r.min.max(0) as u32, r.max.max(0) as u32))
            .unwrap();
        assert_eq!(range, (10, 110));
        assert_eq!(clamp_volume(200, range), 110);
    }

    #[test]
    fn default_range_without_scpd_constraint() {
        let client = RenderingControlClient::new();
        assert_eq!(client.volume_range(), (0, 100));
    }

    #[test]
    fn action_and_variable_round_trip() {
        for action in [
            RcAction::ListPresets,
            RcAction::SelectPreset,
            RcAction::GetVolume,
            RcAction::SetVolume,
            RcAction::GetVolumeDb,
            RcAction::GetMute,
            RcAction::SetMute,
        ] {
            assert_eq!(
                RenderingControlService::action_from_str(RenderingControlService::action_to_str(
                    action
                )),
                Some(action)
            );
        }

        for variable in [
            RcVariable::PresetNameList,
            RcVariable::Mute,
            RcVariable::Volume,
            RcVariable::VolumeDb,
            RcVariable::LastChange,
            RcVariable::ArgChannel,
            RcVariable::ArgInstanceId,
            RcVariable::ArgPresetName,
        ] {
            assert_eq!(
                RenderingControlService::variable_from_str(
                    RenderingControlService::variable_to_str(variable)
                ),
                Some(variable)
            );
        }
    }

    #[test]
    fn error_mapping_table() {
        assert!(matches!(
            RenderingControlService::map_upnp_error(702, ""),
            ControlError::InvalidInstanceId
        ));
        assert!(matches!(
            RenderingControlService::map_upnp_error(703, "x"),
            ControlError::Upnp { code: 703, .. }
        ));
    }
}
