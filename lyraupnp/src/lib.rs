//! # lyraupnp - UPnP protocol plumbing
//!
//! Low-level building blocks shared by the Lyra control point:
//!
//! - [`ssdp`] : SSDP discovery client (UDP multicast M-SEARCH + NOTIFY parsing)
//! - [`soap`] : SOAP 1.1 envelope construction and parsing for UPnP actions,
//!   including UPnPError fault extraction

pub mod soap;
pub mod ssdp;
