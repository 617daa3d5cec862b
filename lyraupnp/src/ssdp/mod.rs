//! # SSDP module - Simple Service Discovery Protocol
//!
//! Control-point side of SSDP: sending M-SEARCH queries and receiving
//! NOTIFY announcements and search responses over UDP multicast.
//!
//! ## Architecture
//!
//! - [`SsdpClient`] : multicast socket, M-SEARCH sender, receive loop
//! - [`SsdpEvent`] : parsed alive / byebye / search-response messages
//!
//! ## SSDP constants
//!
//! - **Multicast address**: 239.255.255.250:1900
//! - **Default max-age**: 1800 seconds when CACHE-CONTROL is absent

mod client;

pub use client::{Advertisement, SsdpClient, SsdpEvent};

/// SSDP multicast address
pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250";

/// SSDP port
pub const SSDP_PORT: u16 = 1900;

/// Advert validity when the device sends no CACHE-CONTROL (seconds)
pub const MAX_AGE: u32 = 1800;
