use thiserror::Error;

/// Every failure a control-point operation can surface.
///
/// Transport and HTTP problems keep their own variants; UPnP faults arrive
/// as the generic [`Upnp`](ControlError::Upnp) variant unless the owning
/// service maps the code to one of the service-specific variants below.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),
    #[error("connection refused: {0}")]
    ConnectRefused(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("UPnP error {code}: {message}")]
    Upnp { code: u32, message: String },

    // ContentDirectory
    #[error("no such object, the specified id is invalid")]
    NoSuchObject,
    #[error("unsupported or invalid search criteria")]
    InvalidSearchCriteria,
    #[error("unsupported or invalid sort criteria")]
    InvalidSortCriteria,
    #[error("no such container")]
    NoSuchContainer,
    #[error("this is a restricted object")]
    RestrictedObject,
    #[error("cannot process the request")]
    CannotProcess,

    // AVTransport
    #[error("transition not available")]
    TransitionNotAvailable,
    #[error("no contents to play")]
    NoContents,
    #[error("seek mode not supported")]
    SeekModeUnsupported,
    #[error("illegal seek target")]
    IllegalSeekTarget,
    #[error("invalid instance id")]
    InvalidInstanceId,

    // ConnectionManager
    #[error("incompatible protocol info")]
    IncompatibleProtocolInfo,
    #[error("incompatible directions")]
    IncompatibleDirections,
    #[error("insufficient network resources")]
    InsufficientResources,

    #[error("failed to parse {element}: {detail}")]
    Parse { element: String, detail: String },
    #[error("{what} is not supported")]
    Unsupported { what: String },
    #[error("operation was cancelled")]
    Cancelled,

    // Facade-level conditions
    #[error("{0} is not a MediaServer")]
    NotAMediaServer(String),
    #[error("{0} is not a MediaRenderer")]
    NotAMediaRenderer(String),
    #[error("device does not expose a {0} service")]
    MissingService(&'static str),
    #[error("no event broker configured for subscriptions")]
    NoEventBroker,
    #[error("missing {0} element in SOAP body")]
    MissingValue(String),
    #[error("invalid {0} value: {1}")]
    InvalidValue(String, String),
    #[error("the requested item is not supported by the renderer")]
    UnsupportedItem,
    #[error("the playlist contains no items")]
    PlaylistEmpty,
    #[error("a web server must be available to serve playlists")]
    NoWebserver,
}

impl ControlError {
    pub fn parse(element: &str, detail: impl std::fmt::Display) -> Self {
        ControlError::Parse {
            element: element.to_string(),
            detail: detail.to_string(),
        }
    }

    pub fn unsupported(what: &str) -> Self {
        ControlError::Unsupported {
            what: what.to_string(),
        }
    }

    pub fn missing_value(name: &str) -> Self {
        ControlError::MissingValue(name.to_string())
    }

    pub fn invalid_value(name: &str, value: &str) -> Self {
        ControlError::InvalidValue(name.to_string(), value.to_string())
    }

    /// Fallback mapping for UPnP fault codes no service table claims.
    /// Optional-action-not-implemented surfaces as Unsupported rather than
    /// a raw numeric fault.
    pub fn upnp(code: u32, message: &str) -> Self {
        if code == lyraupnp::soap::error_codes::OPTIONAL_ACTION_NOT_IMPLEMENTED {
            return ControlError::Unsupported {
                what: "optional action".to_string(),
            };
        }
        ControlError::Upnp {
            code,
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_action_maps_to_unsupported() {
        assert!(matches!(
            ControlError::upnp(602, "Optional Action Not Implemented"),
            ControlError::Unsupported { .. }
        ));
        assert!(matches!(
            ControlError::upnp(501, "Action Failed"),
            ControlError::Upnp { code: 501, .. }
        ));
    }
}
