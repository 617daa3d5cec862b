use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

use quick_xml::{Error as XmlError, Reader, events::Event};
use tracing::debug;

use crate::errors::ControlError;

/// Kind of remote UPnP node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    MediaServer,
    MediaRenderer,
    Other,
}

impl DeviceKind {
    /// Classify an advertised device-type URN. Versions beyond `:1` are
    /// accepted; anything else is `Other`.
    pub fn from_type_urn(urn: &str) -> DeviceKind {
        let lower = urn.to_ascii_lowercase();
        if lower.contains("urn:schemas-upnp-org:device:mediaserver:") {
            DeviceKind::MediaServer
        } else if lower.contains("urn:schemas-upnp-org:device:mediarenderer:") {
            DeviceKind::MediaRenderer
        } else {
            DeviceKind::Other
        }
    }

    /// SSDP search target for this kind.
    pub fn search_target(self) -> &'static str {
        match self {
            DeviceKind::MediaServer => "urn:schemas-upnp-org:device:MediaServer:1",
            DeviceKind::MediaRenderer => "urn:schemas-upnp-org:device:MediaRenderer:1",
            DeviceKind::Other => "ssdp:all",
        }
    }
}

/// The four AV services a control point drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    ContentDirectory,
    ConnectionManager,
    AVTransport,
    RenderingControl,
}

impl ServiceKind {
    pub fn from_type_urn(urn: &str) -> Option<ServiceKind> {
        let lower = urn.to_ascii_lowercase();
        if lower.contains("urn:schemas-upnp-org:service:contentdirectory:") {
            Some(ServiceKind::ContentDirectory)
        } else if lower.contains("urn:schemas-upnp-org:service:connectionmanager:") {
            Some(ServiceKind::ConnectionManager)
        } else if lower.contains("urn:schemas-upnp-org:service:avtransport:") {
            Some(ServiceKind::AVTransport)
        } else if lower.contains("urn:schemas-upnp-org:service:renderingcontrol:") {
            Some(ServiceKind::RenderingControl)
        } else {
            None
        }
    }

    pub fn urn(self) -> &'static str {
        match self {
            ServiceKind::ContentDirectory => "urn:schemas-upnp-org:service:ContentDirectory:1",
            ServiceKind::ConnectionManager => "urn:schemas-upnp-org:service:ConnectionManager:1",
            ServiceKind::AVTransport => "urn:schemas-upnp-org:service:AVTransport:1",
            ServiceKind::RenderingControl => "urn:schemas-upnp-org:service:RenderingControl:1",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ServiceKind::ContentDirectory => "ContentDirectory",
            ServiceKind::ConnectionManager => "ConnectionManager",
            ServiceKind::AVTransport => "AVTransport",
            ServiceKind::RenderingControl => "RenderingControl",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One service entry from a device description. Immutable after parse.
#[derive(Debug, Clone)]
pub struct Service {
    pub kind: ServiceKind,
    /// serviceId string, e.g. "urn:upnp-org:serviceId:ContentDirectory"
    pub id: String,
    /// Advertised service-type URN including its version
    pub service_type: String,
    /// Where SOAP envelopes are POSTed
    pub control_url: String,
    /// Where GENA SUBSCRIBE is sent
    pub event_sub_url: String,
    /// SCPD document location
    pub scpd_url: String,
}

/// One remote UPnP node, owned by the scanner; clients hold shared
/// read-only handles.
#[derive(Debug, Clone)]
pub struct Device {
    pub udn: String,
    pub kind: DeviceKind,
    pub friendly_name: String,
    /// Description URL the device advertised over SSDP
    pub location: String,
    /// Base for relative URL resolution (URLBase, or the location)
    pub base_url: String,
    pub presentation_url: Option<String>,
    /// Wall-clock time after which the device is considered gone
    pub deadline: SystemTime,
    pub services: HashMap<ServiceKind, Service>,
}

impl Device {
    pub fn service(&self, kind: ServiceKind) -> Option<&Service> {
        self.services.get(&kind)
    }

    pub fn implements(&self, kind: ServiceKind) -> bool {
        self.services.contains_key(&kind)
    }
}

#[derive(Debug, Default)]
struct RawService {
    service_type: Option<String>,
    id: Option<String>,
    control_url: Option<String>,
    event_sub_url: Option<String>,
    scpd_url: Option<String>,
}

/// Parse a device description document.
///
/// Required services are enforced per device kind: a MediaServer without
/// ContentDirectory, or a MediaRenderer without RenderingControl and
/// ConnectionManager, is rejected. An empty UDN is always fatal.
pub fn parse_device_description(
    xml: &str,
    location: &str,
    deadline: SystemTime,
) -> Result<Device, ControlError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut udn: Option<String> = None;
    let mut device_type: Option<String> = None;
    let mut friendly_name: Option<String> = None;
    let mut url_base: Option<String> = None;
    let mut presentation_url: Option<String> = None;
    let mut services: Vec<RawService> = Vec::new();

    let mut in_device = false;
    let mut in_service = false;
    let mut current_tag: Option<String> = None;
    let mut current_service = RawService::default();

    loop {
        match reader
            .read_event()
            .map_err(|e| ControlError::parse("device description", e))?
        {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match name.as_str() {
                    "device" => {
                        in_device = true;
                        current_tag = None;
                    }
                    "service" => {
                        if in_device {
                            in_service = true;
                            current_tag = None;
                            current_service = RawService::default();
                        }
                    }
                    _ => {
                        // URLBase lives outside <device>, everything else
                        // we care about lives inside it
                        current_tag = Some(name);
                    }
                }
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match name.as_str() {
                    "device" => in_device = false,
                    "service" => {
                        if in_service {
                            services.push(std::mem::take(&mut current_service));
                            in_service = false;
                        }
                    }
                    _ => {}
                }
                current_tag = None;
            }
            Event::Text(e) => {
                if let Some(tag) = &current_tag {
                    let text = e
                        .decode()
                        .map_err(|e| {
                            ControlError::parse("device description", XmlError::Encoding(e))
                        })?
                        .into_owned();
                    match tag.as_str() {
                        // URLBase is a child of <root>, not of <device>
                        "URLBase" => url_base = Some(text),
                        "UDN" if in_device => udn = Some(text),
                        "deviceType" if in_device => {
                            // Embedded devices carry their own deviceType;
                            // keep the first (root) one.
                            if device_type.is_none() {
                                device_type = Some(text);
                            }
                        }
                        "friendlyName" if in_device => {
                            if friendly_name.is_none() {
                                friendly_name = Some(text);
                            }
                        }
                        "presentationURL" if in_device => presentation_url = Some(text),
                        "serviceType" if in_service => {
                            current_service.service_type = Some(text);
                        }
                        "serviceId" if in_service => current_service.id = Some(text),
                        "controlURL" if in_service => {
                            current_service.control_url = Some(text);
                        }
                        "eventSubURL" if in_service => {
                            current_service.event_sub_url = Some(text);
                        }
                        "SCPDURL" if in_service => current_service.scpd_url = Some(text),
                        _ => {}
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let udn = udn
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ControlError::parse("device description", "missing UDN"))?;
    let device_type = device_type
        .ok_or_else(|| ControlError::parse("device description", "missing deviceType"))?;
    let kind = DeviceKind::from_type_urn(&device_type);

    let base_url = url_base
        .clone()
        .filter(|b| !b.trim().is_empty())
        .unwrap_or_else(|| location.to_string());

    let mut resolved = HashMap::new();
    for raw in services {
        let Some(service_type) = raw.service_type else {
            continue;
        };
        let Some(service_kind) = ServiceKind::from_type_urn(&service_type) else {
            debug!("Ignoring unrecognised service type {}", service_type);
            continue;
        };
        // Keep the first service of each kind
        if resolved.contains_key(&service_kind) {
            continue;
        }
        let (Some(control), Some(event_sub), Some(scpd)) =
            (raw.control_url, raw.event_sub_url, raw.scpd_url)
        else {
            debug!(
                "Service {} is missing one of its URLs, skipping",
                service_type
            );
            continue;
        };

        resolved.insert(
            service_kind,
            Service {
                kind: service_kind,
                id: raw.id.unwrap_or_default(),
                service_type,
                control_url: resolve_url(&base_url, &control),
                event_sub_url: resolve_url(&base_url, &event_sub),
                scpd_url: resolve_url(&base_url, &scpd),
            },
        );
    }

    let required: &[ServiceKind] = match kind {
        DeviceKind::MediaServer => &[ServiceKind::ContentDirectory],
        DeviceKind::MediaRenderer => {
            &[ServiceKind::RenderingControl, ServiceKind::ConnectionManager]
        }
        DeviceKind::Other => &[],
    };
    for kind in required {
        if !resolved.contains_key(kind) {
            return Err(ControlError::parse(
                "device description",
                format!("required service {} not present", kind.name()),
            ));
        }
    }

    Ok(Device {
        udn,
        kind,
        friendly_name: friendly_name.unwrap_or_default(),
        location: location.to_string(),
        base_url,
        presentation_url,
        deadline,
        services: resolved,
    })
}

/// Resolve a possibly relative URL against the device base URL.
///
/// - Absolute URLs (http:// or https://) are returned as-is.
/// - Otherwise the URL is resolved against scheme://host:port of the base.
pub fn resolve_url(base_url: &str, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }

    if let Some((scheme, rest)) = base_url.split_once("://") {
        let authority = match rest.find('/') {
            Some(pos) => &rest[..pos],
            None => rest,
        };
        let base = format!("{}://{}", scheme, authority);

        if url.starts_with('/') {
            return format!("{}{}", base, url);
        }
        return format!("{}/{}", base, url);
    }

    // Cannot make sense of the base; hand back the raw URL
    url.to_string()
}

#[cfg(test)]
pub(crate) use tests::RENDERER_DESCRIPTION;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    pub(crate) const RENDERER_DESCRIPTION: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
    <friendlyName>Living Room Speaker</friendlyName>
    <manufacturer>Example Audio</manufacturer>
    <modelName>EA-200</modelName>
    <UDN>uuid:11111111-2222-3333-4444-555555555555</UDN>
    <presentationURL>/web</presentationURL>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:RenderingControl:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:RenderingControl</serviceId>
        <controlURL>/rc/control</controlURL>
        <eventSubURL>/rc/event</eventSubURL>
        <SCPDURL>/rc/scpd.xml</SCPDURL>
      </service>
      <service>
        <serviceType>urn:schemas-upnp-org:service:ConnectionManager:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:ConnectionManager</serviceId>
        <controlURL>/cm/control</controlURL>
        <eventSubURL>/cm/event</eventSubURL>
        <SCPDURL>/cm/scpd.xml</SCPDURL>
      </service>
      <service>
        <serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:AVTransport</serviceId>
        <controlURL>/avt/control</controlURL>
        <eventSubURL>/avt/event</eventSubURL>
        <SCPDURL>/avt/scpd.xml</SCPDURL>
      </service>
    </serviceList>
  </device>
</root>"#;

    pub(crate) const SERVER_DESCRIPTION: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaServer:1</deviceType>
    <friendlyName>NAS Library</friendlyName>
    <UDN>uuid:aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:ContentDirectory:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:ContentDirectory</serviceId>
        <controlURL>/cd/control</controlURL>
        <eventSubURL>/cd/event</eventSubURL>
        <SCPDURL>/cd/scpd.xml</SCPDURL>
      </service>
      <service>
        <serviceType>urn:schemas-upnp-org:service:ConnectionManager:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:ConnectionManager</serviceId>
        <controlURL>/cm/control</controlURL>
        <eventSubURL>/cm/event</eventSubURL>
        <SCPDURL>/cm/scpd.xml</SCPDURL>
      </service>
    </serviceList>
  </device>
</root>"#;

    fn deadline() -> SystemTime {
        SystemTime::now() + Duration::from_secs(1800)
    }

    #[test]
    fn parse_renderer_description() {
        let device = parse_device_description(
            RENDERER_DESCRIPTION,
            "http://192.168.1.9:8080/desc.xml",
            deadline(),
        )
        .unwrap();

        assert_eq!(device.kind, DeviceKind::MediaRenderer);
        assert_eq!(device.udn, "uuid:11111111-2222-3333-4444-555555555555");
        assert_eq!(device.friendly_name, "Living Room Speaker");
        assert!(device.implements(ServiceKind::RenderingControl));
        assert!(device.implements(ServiceKind::ConnectionManager));
        assert!(device.implements(ServiceKind::AVTransport));

        let rc = device.service(ServiceKind::RenderingControl).unwrap();
        assert_eq!(rc.control_url, "http://192.168.1.9:8080/rc/control");
        assert_eq!(rc.event_sub_url, "http://192.168.1.9:8080/rc/event");
        assert_eq!(rc.scpd_url, "http://192.168.1.9:8080/rc/scpd.xml");
        assert_eq!(rc.id, "urn:upnp-org:serviceId:RenderingControl");
    }

    #[test]
    fn parse_server_description() {
        let device = parse_device_description(
            SERVER_DESCRIPTION,
            "http://192.168.1.2:9000/desc.xml",
            deadline(),
        )
        .unwrap();

        assert_eq!(device.kind, DeviceKind::MediaServer);
        assert!(device.implements(ServiceKind::ContentDirectory));
        assert!(device.implements(ServiceKind::ConnectionManager));
        assert!(!device.implements(ServiceKind::AVTransport));
    }

    #[test]
    fn renderer_without_connection_manager_is_rejected() {
        let xml = RENDERER_DESCRIPTION.replace(
            "urn:schemas-upnp-org:service:ConnectionManager:1",
            "urn:schemas-upnp-org:service:SomethingElse:1",
        );
        let err =
            parse_device_description(&xml, "http://192.168.1.9:8080/desc.xml", deadline())
                .unwrap_err();
        assert!(matches!(err, ControlError::Parse { .. }));
    }

    #[test]
    fn server_without_content_directory_is_rejected() {
        let xml = SERVER_DESCRIPTION.replace(
            "urn:schemas-upnp-org:service:ContentDirectory:1",
            "urn:schemas-upnp-org:service:SomethingElse:1",
        );
        assert!(
            parse_device_description(&xml, "http://192.168.1.2:9000/desc.xml", deadline())
                .is_err()
        );
    }

    #[test]
    fn missing_udn_is_rejected() {
        let xml = SERVER_DESCRIPTION
            .replace("<UDN>uuid:aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee</UDN>", "");
        assert!(
            parse_device_description(&xml, "http://192.168.1.2:9000/desc.xml", deadline())
                .is_err()
        );
    }

    #[test]
    fn url_base_takes_precedence_over_location() {
        let xml = SERVER_DESCRIPTION.replace(
            "<device>",
            "<URLBase>http://192.168.1.2:1400/</URLBase><device>",
        );
        let device =
            parse_device_description(&xml, "http://192.168.1.2:9000/desc.xml", deadline())
                .unwrap();
        let cd = device.service(ServiceKind::ContentDirectory).unwrap();
        assert_eq!(cd.control_url, "http://192.168.1.2:1400/cd/control");
    }

    #[test]
    fn resolve_url_variants() {
        assert_eq!(
            resolve_url("http://10.0.0.5:49152/desc.xml", "/ctl"),
            "http://10.0.0.5:49152/ctl"
        );
        assert_eq!(
            resolve_url("http://10.0.0.5:49152/desc.xml", "ctl"),
            "http://10.0.0.5:49152/ctl"
        );
        assert_eq!(
            resolve_url("http://10.0.0.5:49152/desc.xml", "http://10.0.0.6/ctl"),
            "http://10.0.0.6/ctl"
        );
        assert_eq!(resolve_url("garbage", "ctl"), "ctl");
    }

    #[test]
    fn kind_urn_classification() {
        assert_eq!(
            DeviceKind::from_type_urn("urn:schemas-upnp-org:device:MediaServer:2"),
            DeviceKind::MediaServer
        );
        assert_eq!(
            DeviceKind::from_type_urn("urn:schemas-upnp-org:device:InternetGatewayDevice:1"),
            DeviceKind::Other
        );
        assert_eq!(
            ServiceKind::from_type_urn("urn:schemas-upnp-org:service:AVTransport:2"),
            Some(ServiceKind::AVTransport)
        );
        assert_eq!(
            ServiceKind::from_type_urn("urn:schemas-upnp-org:service:Unknown:1"),
            None
        );
    }
}
