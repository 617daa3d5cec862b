//! # SOAP module - Simple Object Access Protocol
//!
//! SOAP 1.1 support for UPnP control, seen from the control-point side:
//! building action requests and unwrapping action responses and faults.
//!
//! ## Features
//!
//! - Building `u:<Action>` request envelopes with ordered arguments
//! - Parsing SOAP envelopes, tolerant of namespace prefixes
//! - Extracting `UPnPError` details from SOAP Faults
//!
//! ## Architecture
//!
//! - [`SoapEnvelope`] : parsed SOAP envelope
//! - [`build_soap_request`] : action request serialisation
//! - [`UpnpFault`] : UPnP error extracted from a fault body
//!
//! ## Example
//!
//! ```
//! use lyraupnp::soap::build_soap_request;
//!
//! let xml = build_soap_request(
//!     "urn:schemas-upnp-org:service:AVTransport:1",
//!     "Play",
//!     &[("InstanceID", "0"), ("Speed", "1")],
//! )
//! .unwrap();
//! assert!(xml.contains("<u:Play"));
//! ```

mod envelope;
mod fault;
mod request;

pub use envelope::{
    SoapBody, SoapEnvelope, SoapParseError, child_text, child_text_allow_empty,
    find_child_with_suffix, parse_soap_envelope,
};
pub use fault::{UpnpFault, parse_upnp_fault};
pub use request::{build_soap_request, soap_action_header};

/// Standard UPnP SOAP error codes
pub mod error_codes {
    /// Invalid action name
    pub const INVALID_ACTION: u32 = 401;

    /// Invalid arguments
    pub const INVALID_ARGS: u32 = 402;

    /// Action failed
    pub const ACTION_FAILED: u32 = 501;

    /// Argument value invalid
    pub const ARGUMENT_VALUE_INVALID: u32 = 600;

    /// Argument value out of range
    pub const ARGUMENT_VALUE_OUT_OF_RANGE: u32 = 601;

    /// Optional action not implemented
    pub const OPTIONAL_ACTION_NOT_IMPLEMENTED: u32 = 602;

    /// Out of memory
    pub const OUT_OF_MEMORY: u32 = 603;

    /// Human intervention required
    pub const HUMAN_INTERVENTION_REQUIRED: u32 = 604;

    /// String argument too long
    pub const STRING_ARGUMENT_TOO_LONG: u32 = 605;
}
