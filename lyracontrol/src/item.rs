//! Typed view over DIDL-Lite entries.
//!
//! Browse and Search responses are mapped into [`MediaEntry`] values with
//! parsed protocol info, durations and numeric resource attributes. One
//! malformed entry is skipped with a warning; it never fails the whole
//! response.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, warn};

use lyradidl::{
    AlbumArt, CONTAINER_CLASS_PREFIX, Container, DidlDocument, Item, ProtocolInfo, Resource,
    format_duration, parse_duration,
};

/// A playable binding of an entry to a URL.
#[derive(Debug, Clone)]
pub struct MediaResource {
    pub url: String,
    pub protocol_info: ProtocolInfo,
    pub size: Option<u64>,
    pub duration: Option<Duration>,
    pub bitrate: Option<u32>,
    pub sample_frequency: Option<u32>,
    pub nr_audio_channels: Option<u32>,
    pub bits_per_sample: Option<u32>,
}

/// A ContentDirectory object, container or leaf.
#[derive(Debug, Clone)]
pub struct MediaEntry {
    pub id: String,
    pub parent_id: String,
    pub title: String,
    /// upnp:class token, e.g. `object.item.audioItem.musicTrack`
    pub class: String,
    pub restricted: bool,
    /// Only containers expose a child count
    pub child_count: Option<u32>,
    pub creator: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub date: Option<String>,
    pub track_number: Option<u32>,
    /// DLNA profile id -> album art URL; entries without a profile use ""
    pub album_art: BTreeMap<String, String>,
    pub resources: Vec<MediaResource>,
}

impl MediaEntry {
    pub fn is_container(&self) -> bool {
        self.class.starts_with(CONTAINER_CLASS_PREFIX)
    }

    /// Bare playable entry around a single resource; used for synthetic
    /// playlist items.
    pub fn from_resource(class: &str, resource: MediaResource) -> Self {
        MediaEntry {
            id: String::new(),
            parent_id: String::new(),
            title: String::new(),
            class: class.to_string(),
            restricted: true,
            child_count: None,
            creator: None,
            artist: None,
            album: None,
            genre: None,
            date: None,
            track_number: None,
            album_art: BTreeMap::new(),
            resources: vec![resource],
        }
    }
}

/// Map a DIDL document into entries, containers first, items second.
pub fn entries_from_didl(didl: &DidlDocument) -> Vec<MediaEntry> {
    let mut entries = Vec::new();

    for container in &didl.containers {
        match entry_from_container(container) {
            Some(entry) => entries.push(entry),
            None => warn!(
                id = container.id.as_str(),
                "Skipping container without dc:title"
            ),
        }
    }

    for item in &didl.items {
        match entry_from_item(item) {
            Some(entry) => entries.push(entry),
            None => warn!(id = item.id.as_str(), "Skipping item without dc:title"),
        }
    }

    entries
}

fn entry_from_container(container: &Container) -> Option<MediaEntry> {
    let title = container.title.clone()?;
    Some(MediaEntry {
        id: container.id.clone(),
        parent_id: container.parent_id.clone(),
        title,
        class: container.class.clone(),
        restricted: parse_flag(container.restricted.as_deref()),
        child_count: container
            .child_count
            .as_deref()
            .and_then(|c| c.trim().parse().ok()),
        creator: container.creator.clone(),
        artist: container.artist.clone(),
        album: None,
        genre: container.genre.clone(),
        date: None,
        track_number: None,
        album_art: album_art_map(&container.album_art),
        resources: Vec::new(),
    })
}

fn entry_from_item(item: &Item) -> Option<MediaEntry> {
    let title = item.title.clone()?;
    let resources = item
        .resources
        .iter()
        .filter_map(resource_from_didl)
        .collect();

    Some(MediaEntry {
        id: item.id.clone(),
        parent_id: item.parent_id.clone(),
        title,
        class: item.class.clone(),
        restricted: parse_flag(item.restricted.as_deref()),
        child_count: None,
        creator: item.creator.clone(),
        artist: item.artist.clone(),
        album: item.album.clone(),
        genre: item.genre.clone(),
        date: item.date.clone(),
        track_number: item
            .original_track_number
            .as_deref()
            .and_then(|t| t.trim().parse().ok()),
        album_art: album_art_map(&item.album_art),
        resources,
    })
}

fn resource_from_didl(res: &Resource) -> Option<MediaResource> {
    if res.url.trim().is_empty() {
        return None;
    }
    let protocol_info = match res.protocol_info.parse::<ProtocolInfo>() {
        Ok(info) => info,
        Err(err) => {
            debug!(
                url = res.url.as_str(),
                error = %err,
                "Skipping resource with malformed protocolInfo"
            );
            return None;
        }
    };

    Some(MediaResource {
        url: res.url.clone(),
        protocol_info,
        size: parse_num(res.size.as_deref()),
        duration: res.duration.as_deref().and_then(parse_duration),
        bitrate: parse_num(res.bitrate.as_deref()),
        sample_frequency: parse_num(res.sample_frequency.as_deref()),
        nr_audio_channels: parse_num(res.nr_audio_channels.as_deref()),
        bits_per_sample: parse_num(res.bits_per_sample.as_deref()),
    })
}

fn album_art_map(art: &[AlbumArt]) -> BTreeMap<String, String> {
    art.iter()
        .map(|a| (a.profile_id.clone().unwrap_or_default(), a.uri.clone()))
        .collect()
}

fn parse_flag(raw: Option<&str>) -> bool {
    matches!(raw, Some("1") | Some("true") | None)
}

fn parse_num<N: std::str::FromStr>(raw: Option<&str>) -> Option<N> {
    raw.and_then(|v| v.trim().parse().ok())
}

/// Generate DIDL for entries. Containers and items are told apart by the
/// class prefix; `restricted="1"` is the default.
pub fn didl_from_entries(entries: &[MediaEntry]) -> DidlDocument {
    let mut doc = DidlDocument::new();

    for entry in entries {
        if entry.is_container() {
            doc.containers.push(Container {
                id: entry.id.clone(),
                parent_id: entry.parent_id.clone(),
                restricted: Some(flag_string(entry.restricted)),
                child_count: entry.child_count.map(|c| c.to_string()),
                searchable: None,
                title: Some(entry.title.clone()),
                class: entry.class.clone(),
                creator: entry.creator.clone(),
                artist: entry.artist.clone(),
                genre: entry.genre.clone(),
                album_art: album_art_list(&entry.album_art),
            });
        } else {
            doc.items.push(Item {
                id: entry.id.clone(),
                parent_id: entry.parent_id.clone(),
                restricted: Some(flag_string(entry.restricted)),
                title: Some(entry.title.clone()),
                class: entry.class.clone(),
                creator: entry.creator.clone(),
                artist: entry.artist.clone(),
                album: entry.album.clone(),
                genre: entry.genre.clone(),
                album_art: album_art_list(&entry.album_art),
                date: entry.date.clone(),
                original_track_number: entry.track_number.map(|t| t.to_string()),
                resources: entry.resources.iter().map(resource_to_didl).collect(),
            });
        }
    }

    doc
}

fn resource_to_didl(res: &MediaResource) -> Resource {
    Resource {
        protocol_info: res.protocol_info.to_string(),
        size: res.size.map(|s| s.to_string()),
        duration: res.duration.map(format_duration),
        bitrate: res.bitrate.map(|b| b.to_string()),
        sample_frequency: res.sample_frequency.map(|s| s.to_string()),
        nr_audio_channels: res.nr_audio_channels.map(|n| n.to_string()),
        bits_per_sample: res.bits_per_sample.map(|b| b.to_string()),
        url: res.url.clone(),
    }
}

fn album_art_list(art: &BTreeMap<String, String>) -> Vec<AlbumArt> {
    art.iter()
        .map(|(profile, uri)| AlbumArt {
            profile_id: if profile.is_empty() {
                None
            } else {
                Some(profile.clone())
            },
            uri: uri.clone(),
        })
        .collect()
}

fn flag_string(flag: bool) -> String {
    if flag { "1" } else { "0" }.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lyradidl::{parse_didl, write_didl};

    const BROWSE_PAYLOAD: &str = r#"<DIDL-Lite xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/" xmlns:dlna="urn:schemas-dlna-org:metadata-1-0/">
  <container id="2" parentID="0" restricted="1" childCount="3">
    <dc:title>Albums</dc:title>
    <upnp:class>object.container.album.musicAlbum</upnp:class>
  </container>
  <item id="2$1" parentID="2" restricted="1">
    <dc:title>Opening Track</dc:title>
    <upnp:class>object.item.audioItem.musicTrack</upnp:class>
    <upnp:artist>Band</upnp:artist>
    <upnp:album>Record</upnp:album>
    <upnp:albumArtURI dlna:profileID="JPEG_TN">http://server/art-tn.jpg</upnp:albumArtURI>
    <upnp:albumArtURI>http://server/art.jpg</upnp:albumArtURI>
    <upnp:originalTrackNumber>1</upnp:originalTrackNumber>
    <res protocolInfo="http-get:*:audio/flac:*" size="1000" duration="0:03:20" sampleFrequency="44100" nrAudioChannels="2">http://server/track.flac</res>
    <res protocolInfo="not-protocol-info">http://server/broken</res>
    <res protocolInfo="http-get:*:audio/mpeg:*"></res>
  </item>
  <item id="2$2" parentID="2" restricted="1">
    <upnp:class>object.item.audioItem.musicTrack</upnp:class>
  </item>
</DIDL-Lite>"#;

    #[test]
    fn containers_come_first_then_items() {
        let didl = parse_didl(BROWSE_PAYLOAD).unwrap();
        let entries = entries_from_didl(&didl);

        // The titleless item is skipped, the rest keep order
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_container());
        assert_eq!(entries[0].child_count, Some(3));
        assert!(!entries[1].is_container());
        assert_eq!(entries[1].title, "Opening Track");
        assert_eq!(entries[1].track_number, Some(1));
    }

    #[test]
    fn container_class_decides_child_count() {
        let didl = parse_didl(BROWSE_PAYLOAD).unwrap();
        let entries = entries_from_didl(&didl);
        assert!(entries[0].class.starts_with("object.container"));
        assert!(entries[0].child_count.is_some());
        assert!(entries[1].child_count.is_none());
    }

    #[test]
    fn bad_resources_are_dropped_good_ones_kept() {
        let didl = parse_didl(BROWSE_PAYLOAD).unwrap();
        let entries = entries_from_didl(&didl);
        let item = &entries[1];

        // malformed protocolInfo and empty URL are both skipped
        assert_eq!(item.resources.len(), 1);
        let res = &item.resources[0];
        assert_eq!(res.url, "http://server/track.flac");
        assert_eq!(res.protocol_info.content_format, "audio/flac");
        assert_eq!(res.size, Some(1000));
        assert_eq!(res.duration, Some(Duration::from_secs(200)));
        assert_eq!(res.sample_frequency, Some(44100));
        assert_eq!(res.nr_audio_channels, Some(2));
    }

    #[test]
    fn album_art_keyed_by_dlna_profile() {
        let didl = parse_didl(BROWSE_PAYLOAD).unwrap();
        let entries = entries_from_didl(&didl);
        let art = &entries[1].album_art;

        assert_eq!(art.get("JPEG_TN").map(String::as_str), Some("http://server/art-tn.jpg"));
        assert_eq!(art.get("").map(String::as_str), Some("http://server/art.jpg"));
    }

    #[test]
    fn didl_generation_round_trip() {
        let didl = parse_didl(BROWSE_PAYLOAD).unwrap();
        let entries = entries_from_didl(&didl);

        let generated = didl_from_entries(&entries);
        let xml = write_didl(&generated).unwrap();

        let reparsed_entries = entries_from_didl(&parse_didl(&xml).unwrap());
        assert_eq!(reparsed_entries.len(), entries.len());
        for (a, b) in entries.iter().zip(&reparsed_entries) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.title, b.title);
            assert_eq!(a.class, b.class);
            assert_eq!(a.child_count, b.child_count);
            assert_eq!(a.album_art, b.album_art);
            assert_eq!(a.resources.len(), b.resources.len());
        }

        // Second generation is byte-stable
        let xml_again = write_didl(&didl_from_entries(&reparsed_entries)).unwrap();
        assert_eq!(xml, xml_again);
    }

    #[test]
    fn generation_marks_restricted_by_default() {
        let entry = MediaEntry::from_resource(
            "object.item.audioItem",
            MediaResource {
                url: "http://host/p.m3u".into(),
                protocol_info: ProtocolInfo::http_get("audio/m3u"),
                size: None,
                duration: None,
                bitrate: None,
                sample_frequency: None,
                nr_audio_channels: None,
                bits_per_sample: None,
            },
        );
        let xml = write_didl(&didl_from_entries(&[entry])).unwrap();
        assert!(xml.contains(r#"restricted="1""#));
        assert!(xml.contains("http-get:*:audio/m3u:*"));
    }
}
