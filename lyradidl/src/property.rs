//! ContentDirectory property vocabulary
//!
//! Property names as they appear in DIDL-Lite documents, search/sort
//! capability lists and filter strings.

use std::fmt;

/// A recognised UPnP AV object property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    Id,
    ParentId,
    Title,
    Creator,
    Date,
    Res,
    Class,
    Restricted,
    WriteStatus,
    RefId,
    ChildCount,
    CreateClass,
    SearchClass,
    Searchable,
    Artist,
    Album,
    AlbumArtist,
    AlbumArt,
    Genre,
    TrackNumber,
    Actor,
    StorageUsed,
    /// The `*` wildcard: every property
    All,
}

impl Property {
    pub fn as_str(self) -> &'static str {
        match self {
            Property::Id => "id",
            Property::ParentId => "parentID",
            Property::Title => "dc:title",
            Property::Creator => "dc:creator",
            Property::Date => "dc:date",
            Property::Res => "res",
            Property::Class => "upnp:class",
            Property::Restricted => "restricted",
            Property::WriteStatus => "writeStatus",
            Property::RefId => "refID",
            Property::ChildCount => "childCount",
            Property::CreateClass => "upnp:createClass",
            Property::SearchClass => "upnp:searchClass",
            Property::Searchable => "searchable",
            Property::Artist => "upnp:artist",
            Property::Album => "upnp:album",
            Property::AlbumArtist => "upnp:albumArtist",
            Property::AlbumArt => "upnp:albumArtURI",
            Property::Genre => "upnp:genre",
            Property::TrackNumber => "upnp:originalTrackNumber",
            Property::Actor => "upnp:actor",
            Property::StorageUsed => "upnp:storageUsed",
            Property::All => "*",
        }
    }

    /// Inverse of [`as_str`](Self::as_str). `@id`-style attribute spellings
    /// are accepted; unknown names yield `None` (callers log and skip).
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        let name = name.strip_prefix('@').unwrap_or(name);
        Some(match name {
            "id" => Property::Id,
            "parentID" => Property::ParentId,
            "dc:title" => Property::Title,
            "dc:creator" => Property::Creator,
            "dc:date" => Property::Date,
            "res" => Property::Res,
            "upnp:class" => Property::Class,
            "restricted" => Property::Restricted,
            "writeStatus" => Property::WriteStatus,
            "refID" => Property::RefId,
            "childCount" => Property::ChildCount,
            "upnp:createClass" => Property::CreateClass,
            "upnp:searchClass" => Property::SearchClass,
            "searchable" => Property::Searchable,
            "upnp:artist" => Property::Artist,
            "upnp:album" => Property::Album,
            "upnp:albumArtist" => Property::AlbumArtist,
            "upnp:albumArtURI" => Property::AlbumArt,
            "upnp:genre" => Property::Genre,
            "upnp:originalTrackNumber" => Property::TrackNumber,
            "upnp:actor" => Property::Actor,
            "upnp:storageUsed" => Property::StorageUsed,
            "*" => Property::All,
            _ => return None,
        })
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[Property] = &[
        Property::Id,
        Property::ParentId,
        Property::Title,
        Property::Creator,
        Property::Date,
        Property::Res,
        Property::Class,
        Property::Restricted,
        Property::WriteStatus,
        Property::RefId,
        Property::ChildCount,
        Property::CreateClass,
        Property::SearchClass,
        Property::Searchable,
        Property::Artist,
        Property::Album,
        Property::AlbumArtist,
        Property::AlbumArt,
        Property::Genre,
        Property::TrackNumber,
        Property::Actor,
        Property::StorageUsed,
        Property::All,
    ];

    #[test]
    fn name_round_trip() {
        for prop in ALL {
            assert_eq!(Property::from_name(prop.as_str()), Some(*prop));
        }
    }

    #[test]
    fn attribute_spelling_is_accepted() {
        assert_eq!(Property::from_name("@id"), Some(Property::Id));
        assert_eq!(Property::from_name("@parentID"), Some(Property::ParentId));
    }

    #[test]
    fn unknown_name_is_none() {
        assert_eq!(Property::from_name("upnp:somethingElse"), None);
        assert_eq!(Property::from_name(""), None);
    }
}
