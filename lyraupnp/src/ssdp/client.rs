//! SSDP discovery client.
//!
//! UDP port 1900 belongs to *devices*: they listen there for M-SEARCH and
//! answer from it. A control point that binds 1900 alongside a device ends
//! up sharing the port, and the kernel then hands each incoming datagram to
//! only one of the sockets, so NOTIFYs go missing at random. This client
//! therefore binds an ephemeral port for sending M-SEARCH and receiving the
//! unicast replies, and joins the multicast group from there to observe
//! NOTIFY traffic.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, trace, warn};

use super::{MAX_AGE, SSDP_MULTICAST_ADDR, SSDP_PORT};

/// How often the receive loop wakes up to check the stop flag.
const RECV_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// One device advert, carried by a NOTIFY or an M-SEARCH reply.
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub usn: String,
    /// NT of a NOTIFY, ST of a search reply
    pub notification_type: String,
    /// Description document URL
    pub location: String,
    /// SERVER header, "Unknown" when the device sends none
    pub server: String,
    /// Advert validity in seconds
    pub max_age: u32,
    pub from: SocketAddr,
}

/// Discovery traffic a control point reacts to.
#[derive(Debug, Clone)]
pub enum SsdpEvent {
    Alive(Advertisement),
    ByeBye {
        usn: String,
        nt: String,
        from: SocketAddr,
    },
    SearchResponse(Advertisement),
}

/// SSDP client: sends M-SEARCH queries and listens for announcements.
pub struct SsdpClient {
    socket: UdpSocket,
    stopped: Arc<AtomicBool>,
}

impl SsdpClient {
    pub fn new() -> io::Result<Self> {
        let socket = open_discovery_socket()?;
        info!(
            "SSDP discovery socket ready (group {}:{})",
            SSDP_MULTICAST_ADDR, SSDP_PORT
        );
        Ok(Self {
            socket,
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Send an M-SEARCH for the given search target. MX is clamped to the
    /// minimum of 1 the protocol requires.
    pub fn send_msearch(&self, st: &str, mx: u32) -> io::Result<()> {
        let mx = mx.max(1);
        let request = build_msearch(st, mx);
        self.socket
            .send_to(request.as_bytes(), multicast_group())?;
        debug!("M-SEARCH for {} sent (MX {})", st, mx);
        Ok(())
    }

    /// Blocking receive loop; returns once [`stop`](Self::stop) is called.
    pub fn run_event_loop<F>(&self, mut on_event: F)
    where
        F: FnMut(SsdpEvent),
    {
        let mut buf = [0u8; 8192];
        while !self.stopped.load(Ordering::SeqCst) {
            let (len, from) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    // Poll timeout; check the stop flag and wait again
                    continue;
                }
                Err(e) => {
                    warn!("SSDP receive failed: {}", e);
                    continue;
                }
            };

            let datagram = String::from_utf8_lossy(&buf[..len]);
            match decode_datagram(&datagram, from) {
                Some(event) => {
                    trace!("SSDP event from {}: {:?}", from, event);
                    on_event(event);
                }
                None => trace!("Dropped SSDP datagram from {}", from),
            }
        }
        debug!("SSDP receive loop finished");
    }

    /// Make the receive loop return. Idempotent.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

fn multicast_group() -> SocketAddr {
    let group: Ipv4Addr = SSDP_MULTICAST_ADDR
        .parse()
        .expect("multicast constant parses");
    SocketAddr::from((group, SSDP_PORT))
}

/// Ephemeral-port socket with multicast membership on every usable IPv4
/// interface.
fn open_discovery_socket() -> io::Result<UdpSocket> {
    let raw = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    raw.set_reuse_address(true)?;
    raw.bind(&SocketAddr::from(([0, 0, 0, 0], 0)).into())?;

    let socket: UdpSocket = raw.into();
    socket.set_read_timeout(Some(RECV_POLL_INTERVAL))?;
    socket.set_multicast_loop_v4(true)?;

    let group: Ipv4Addr = SSDP_MULTICAST_ADDR
        .parse()
        .expect("multicast constant parses");
    let mut joined = 0usize;
    for iface in get_if_addrs::get_if_addrs()? {
        let std::net::IpAddr::V4(addr) = iface.ip() else {
            continue;
        };
        if addr.is_loopback() {
            continue;
        }
        match socket.join_multicast_v4(&group, &addr) {
            Ok(()) => joined += 1,
            Err(e) => warn!("Could not join {} on {}: {}", group, addr, e),
        }
    }
    debug!("SSDP multicast membership on {} interface(s)", joined);

    Ok(socket)
}

fn build_msearch(st: &str, mx: u32) -> String {
    let lines = [
        "M-SEARCH * HTTP/1.1".to_string(),
        format!("HOST: {}:{}", SSDP_MULTICAST_ADDR, SSDP_PORT),
        r#"MAN: "ssdp:discover""#.to_string(),
        format!("MX: {}", mx),
        format!("ST: {}", st),
        "USER-AGENT: Lyra/0.1 UPnP/1.0".to_string(),
    ];
    let mut request = lines.join("\r\n");
    request.push_str("\r\n\r\n");
    request
}

/// Minimal view over one SSDP datagram: the start line plus its header
/// block. Header names compare case-insensitively; values keep their case.
struct Message<'a> {
    start_line: &'a str,
    headers: Vec<(&'a str, &'a str)>,
}

impl<'a> Message<'a> {
    fn parse(datagram: &'a str) -> Option<Message<'a>> {
        let mut lines = datagram.lines();
        let start_line = lines.next()?.trim();
        if start_line.is_empty() {
            return None;
        }

        let mut headers = Vec::new();
        for line in lines {
            let line = line.trim();
            // Blank line ends the header block; SSDP has no body
            if line.is_empty() {
                break;
            }
            match line.split_once(':') {
                Some((name, value)) if !name.trim().is_empty() => {
                    headers.push((name.trim(), value.trim()));
                }
                _ => trace!("Skipping malformed SSDP header line: '{}'", line),
            }
        }

        Some(Message {
            start_line,
            headers,
        })
    }

    /// First token of the start line, uppercased: the method of a request,
    /// `HTTP/1.1` for a reply.
    fn method(&self) -> Option<String> {
        self.start_line
            .split_whitespace()
            .next()
            .map(str::to_ascii_uppercase)
    }

    fn is_ok_reply(&self) -> bool {
        self.start_line.split_whitespace().nth(1) == Some("200")
    }

    fn header(&self, name: &str) -> Option<&'a str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
            .filter(|v| !v.is_empty())
    }

    /// The max-age directive of CACHE-CONTROL; the default when the header
    /// is absent or carries no usable directive.
    fn max_age(&self) -> u32 {
        let Some(cache_control) = self.header("cache-control") else {
            return MAX_AGE;
        };
        for directive in cache_control.split(',') {
            let Some((key, value)) = directive.split_once('=') else {
                continue;
            };
            if key.trim().eq_ignore_ascii_case("max-age") {
                if let Ok(age) = value.trim().parse() {
                    return age;
                }
            }
        }
        trace!(
            "No usable max-age in CACHE-CONTROL '{}', assuming {}",
            cache_control, MAX_AGE
        );
        MAX_AGE
    }

    /// Assemble an advert. USN, the type header (NT or ST) and LOCATION
    /// are all mandatory; a message missing any of them is dropped.
    fn advertisement(&self, type_header: &str, from: SocketAddr) -> Option<Advertisement> {
        Some(Advertisement {
            usn: self.header("usn")?.to_string(),
            notification_type: self.header(type_header)?.to_string(),
            location: self.header("location")?.to_string(),
            server: self.header("server").unwrap_or("Unknown").to_string(),
            max_age: self.max_age(),
            from,
        })
    }
}

fn decode_datagram(datagram: &str, from: SocketAddr) -> Option<SsdpEvent> {
    let message = Message::parse(datagram)?;

    match message.method()?.as_str() {
        "NOTIFY" => match message.header("nts").map(str::to_ascii_lowercase).as_deref() {
            Some("ssdp:alive") => message.advertisement("nt", from).map(SsdpEvent::Alive),
            Some("ssdp:byebye") => Some(SsdpEvent::ByeBye {
                usn: message.header("usn")?.to_string(),
                nt: message.header("nt")?.to_string(),
                from,
            }),
            other => {
                trace!("NOTIFY from {} with NTS {:?}, ignoring", from, other);
                None
            }
        },
        // Unicast M-SEARCH reply; anything but 200 is noise
        method if method.starts_with("HTTP/") && message.is_ok_reply() => message
            .advertisement("st", from)
            .map(SsdpEvent::SearchResponse),
        // Another control point probing the network; we are not a device
        "M-SEARCH" => None,
        _ => {
            trace!(
                "Unrecognised SSDP datagram from {}: {}",
                from, message.start_line
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> SocketAddr {
        "192.168.1.20:1900".parse().unwrap()
    }

    fn decode(datagram: &str) -> Option<SsdpEvent> {
        decode_datagram(datagram, sender())
    }

    #[test]
    fn alive_notify_becomes_an_advert() {
        let datagram = "NOTIFY * HTTP/1.1\r\n\
            HOST: 239.255.255.250:1900\r\n\
            CACHE-CONTROL: max-age=1800\r\n\
            LOCATION: http://192.168.1.20:8080/description.xml\r\n\
            NT: urn:schemas-upnp-org:device:MediaServer:1\r\n\
            NTS: ssdp:alive\r\n\
            SERVER: Linux UPnP/1.0 Lyra/0.1\r\n\
            USN: uuid:12345678::urn:schemas-upnp-org:device:MediaServer:1\r\n\r\n";

        let Some(SsdpEvent::Alive(advert)) = decode(datagram) else {
            panic!("expected Alive");
        };
        assert_eq!(
            advert.notification_type,
            "urn:schemas-upnp-org:device:MediaServer:1"
        );
        assert_eq!(advert.location, "http://192.168.1.20:8080/description.xml");
        assert_eq!(advert.max_age, 1800);
        assert_eq!(advert.from, sender());
    }

    #[test]
    fn byebye_needs_no_location() {
        let datagram = "NOTIFY * HTTP/1.1\r\n\
            NT: urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
            NTS: ssdp:byebye\r\n\
            USN: uuid:deadbeef::urn:schemas-upnp-org:device:MediaRenderer:1\r\n\r\n";

        assert!(matches!(decode(datagram), Some(SsdpEvent::ByeBye { .. })));
    }

    #[test]
    fn search_reply_carries_the_st() {
        let datagram = "HTTP/1.1 200 OK\r\n\
            CACHE-CONTROL: public, max-age = 100\r\n\
            EXT:\r\n\
            LOCATION: http://192.168.1.9/desc.xml\r\n\
            ST: urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
            USN: uuid:feedface::urn:schemas-upnp-org:device:MediaRenderer:1\r\n\r\n";

        let Some(SsdpEvent::SearchResponse(advert)) = decode(datagram) else {
            panic!("expected SearchResponse");
        };
        assert_eq!(
            advert.notification_type,
            "urn:schemas-upnp-org:device:MediaRenderer:1"
        );
        // max-age picked out of a multi-directive header with spaces
        assert_eq!(advert.max_age, 100);
        assert_eq!(advert.server, "Unknown");
    }

    #[test]
    fn non_200_reply_is_noise() {
        let datagram = "HTTP/1.1 503 Unavailable\r\n\
            ST: ssdp:all\r\n\
            USN: uuid:x\r\n\
            LOCATION: http://192.168.1.9/desc.xml\r\n\r\n";

        assert!(decode(datagram).is_none());
    }

    #[test]
    fn alive_without_location_is_dropped() {
        let datagram = "NOTIFY * HTTP/1.1\r\n\
            NT: urn:schemas-upnp-org:device:MediaServer:1\r\n\
            NTS: ssdp:alive\r\n\
            USN: uuid:12345678\r\n\r\n";

        assert!(decode(datagram).is_none());
    }

    #[test]
    fn foreign_msearch_is_ignored() {
        let datagram = "M-SEARCH * HTTP/1.1\r\n\
            HOST: 239.255.255.250:1900\r\n\
            MAN: \"ssdp:discover\"\r\n\
            ST: ssdp:all\r\n\r\n";

        assert!(decode(datagram).is_none());
    }

    #[test]
    fn missing_or_garbled_cache_control_uses_the_default() {
        let no_header = Message::parse("NOTIFY * HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(no_header.max_age(), MAX_AGE);

        let garbled =
            Message::parse("NOTIFY * HTTP/1.1\r\nCACHE-CONTROL: no-cache\r\n\r\n").unwrap();
        assert_eq!(garbled.max_age(), MAX_AGE);

        let spaced =
            Message::parse("NOTIFY * HTTP/1.1\r\nCache-Control: max-age = 42\r\n\r\n").unwrap();
        assert_eq!(spaced.max_age(), 42);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let message = Message::parse("NOTIFY * HTTP/1.1\r\nLocation: http://x/d.xml\r\n\r\n")
            .unwrap();
        assert_eq!(message.header("LOCATION"), Some("http://x/d.xml"));
        assert_eq!(message.header("location"), Some("http://x/d.xml"));
        assert_eq!(message.header("host"), None);
    }

    #[test]
    fn msearch_request_shape() {
        let request = build_msearch("urn:schemas-upnp-org:device:MediaServer:1", 3);
        assert!(request.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(request.contains("HOST: 239.255.255.250:1900\r\n"));
        assert!(request.contains("MAN: \"ssdp:discover\"\r\n"));
        assert!(request.contains("MX: 3\r\n"));
        assert!(request.contains("ST: urn:schemas-upnp-org:device:MediaServer:1\r\n"));
        assert!(request.ends_with("\r\n\r\n"));
    }
}
