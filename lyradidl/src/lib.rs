//! # lyradidl - DIDL-Lite codec
//!
//! Parser and generator for the DIDL-Lite vocabulary used by UPnP AV to
//! describe content, plus the small wire types that travel with it:
//! [`ProtocolInfo`], the [`Property`] name vocabulary and track duration
//! strings.

mod property;
mod protocol_info;
mod time;

pub use property::Property;
pub use protocol_info::ProtocolInfo;
pub use time::{format_duration, parse_duration};

use serde::{Deserialize, Serialize};

pub const DIDL_NAMESPACE: &str = "urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/";
pub const DC_NAMESPACE: &str = "http://purl.org/dc/elements/1.1/";
pub const UPNP_NAMESPACE: &str = "urn:schemas-upnp-org:metadata-1-0/upnp/";
pub const DLNA_NAMESPACE: &str = "urn:schemas-dlna-org:metadata-1-0/";

/// Class prefix separating containers from playable items.
pub const CONTAINER_CLASS_PREFIX: &str = "object.container";

/// DIDL codec error
#[derive(Debug, thiserror::Error)]
pub enum DidlError {
    #[error("DIDL-Lite parse error: {0}")]
    Parse(#[from] quick_xml::DeError),

    #[error("DIDL-Lite write error: {0}")]
    Write(#[from] quick_xml::SeError),

    #[error("invalid ProtocolInfo: {0}")]
    ProtocolInfo(String),
}

/// Root of a DIDL-Lite document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename = "DIDL-Lite")]
pub struct DidlDocument {
    #[serde(rename = "@xmlns", default)]
    pub xmlns: String,

    #[serde(rename = "@xmlns:dc", skip_serializing_if = "Option::is_none")]
    pub xmlns_dc: Option<String>,

    #[serde(rename = "@xmlns:upnp", skip_serializing_if = "Option::is_none")]
    pub xmlns_upnp: Option<String>,

    #[serde(rename = "@xmlns:dlna", skip_serializing_if = "Option::is_none")]
    pub xmlns_dlna: Option<String>,

    #[serde(rename = "container", default)]
    pub containers: Vec<Container>,

    #[serde(rename = "item", default)]
    pub items: Vec<Item>,
}

impl DidlDocument {
    /// Empty document carrying the standard namespace set.
    pub fn new() -> Self {
        Self {
            xmlns: DIDL_NAMESPACE.to_string(),
            xmlns_dc: Some(DC_NAMESPACE.to_string()),
            xmlns_upnp: Some(UPNP_NAMESPACE.to_string()),
            xmlns_dlna: Some(DLNA_NAMESPACE.to_string()),
            containers: Vec::new(),
            items: Vec::new(),
        }
    }
}

impl Default for DidlDocument {
    fn default() -> Self {
        Self::new()
    }
}

/// A container object (album, folder, playlist, ...)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    #[serde(rename = "@id")]
    pub id: String,

    #[serde(rename = "@parentID")]
    pub parent_id: String,

    #[serde(rename = "@restricted", skip_serializing_if = "Option::is_none")]
    pub restricted: Option<String>,

    #[serde(rename = "@childCount", skip_serializing_if = "Option::is_none")]
    pub child_count: Option<String>,

    #[serde(rename = "@searchable", skip_serializing_if = "Option::is_none")]
    pub searchable: Option<String>,

    // dc:title is mandatory per the spec, but one bad entry must not make
    // the whole Browse payload unparseable; the mapping layer skips it.
    #[serde(
        rename = "dc:title",
        alias = "title",
        skip_serializing_if = "Option::is_none"
    )]
    pub title: Option<String>,

    #[serde(rename = "upnp:class", alias = "class")]
    pub class: String,

    #[serde(
        rename = "dc:creator",
        alias = "creator",
        skip_serializing_if = "Option::is_none"
    )]
    pub creator: Option<String>,

    #[serde(
        rename = "upnp:artist",
        alias = "artist",
        skip_serializing_if = "Option::is_none"
    )]
    pub artist: Option<String>,

    #[serde(
        rename = "upnp:genre",
        alias = "genre",
        skip_serializing_if = "Option::is_none"
    )]
    pub genre: Option<String>,

    #[serde(rename = "upnp:albumArtURI", alias = "albumArtURI", default)]
    pub album_art: Vec<AlbumArt>,
}

/// A leaf object with playable resources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "@id")]
    pub id: String,

    #[serde(rename = "@parentID")]
    pub parent_id: String,

    #[serde(rename = "@restricted", skip_serializing_if = "Option::is_none")]
    pub restricted: Option<String>,

    #[serde(
        rename = "dc:title",
        alias = "title",
        skip_serializing_if = "Option::is_none"
    )]
    pub title: Option<String>,

    #[serde(rename = "upnp:class", alias = "class")]
    pub class: String,

    #[serde(
        rename = "dc:creator",
        alias = "creator",
        skip_serializing_if = "Option::is_none"
    )]
    pub creator: Option<String>,

    #[serde(
        rename = "upnp:artist",
        alias = "artist",
        skip_serializing_if = "Option::is_none"
    )]
    pub artist: Option<String>,

    #[serde(
        rename = "upnp:album",
        alias = "album",
        skip_serializing_if = "Option::is_none"
    )]
    pub album: Option<String>,

    #[serde(
        rename = "upnp:genre",
        alias = "genre",
        skip_serializing_if = "Option::is_none"
    )]
    pub genre: Option<String>,

    #[serde(rename = "upnp:albumArtURI", alias = "albumArtURI", default)]
    pub album_art: Vec<AlbumArt>,

    #[serde(
        rename = "dc:date",
        alias = "date",
        skip_serializing_if = "Option::is_none"
    )]
    pub date: Option<String>,

    #[serde(
        rename = "upnp:originalTrackNumber",
        alias = "originalTrackNumber",
        skip_serializing_if = "Option::is_none"
    )]
    pub original_track_number: Option<String>,

    #[serde(rename = "res", default)]
    pub resources: Vec<Resource>,
}

/// Album art URI with its optional DLNA profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumArt {
    #[serde(rename = "@dlna:profileID", skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,

    #[serde(rename = "$text", default)]
    pub uri: String,
}

/// A playable binding of an item to a URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "@protocolInfo")]
    pub protocol_info: String,

    #[serde(rename = "@size", skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,

    #[serde(rename = "@duration", skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,

    #[serde(rename = "@bitrate", skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<String>,

    #[serde(rename = "@sampleFrequency", skip_serializing_if = "Option::is_none")]
    pub sample_frequency: Option<String>,

    #[serde(rename = "@nrAudioChannels", skip_serializing_if = "Option::is_none")]
    pub nr_audio_channels: Option<String>,

    #[serde(rename = "@bitsPerSample", skip_serializing_if = "Option::is_none")]
    pub bits_per_sample: Option<String>,

    #[serde(rename = "$text", default)]
    pub url: String,
}

/// Parse a DIDL-Lite document.
pub fn parse_didl(input: &str) -> Result<DidlDocument, DidlError> {
    Ok(quick_xml::de::from_str(input)?)
}

/// Serialise a DIDL-Lite document.
pub fn write_didl(doc: &DidlDocument) -> Result<String, DidlError> {
    Ok(quick_xml::se::to_string(doc)?)
}
