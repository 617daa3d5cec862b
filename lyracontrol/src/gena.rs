//! GENA subscription plumbing: the NOTIFY endpoint and the SUBSCRIBE /
//! UNSUBSCRIBE request side.
//!
//! One [`EventBroker`] per process owns a TCP listener for NOTIFY callbacks
//! and routes each request by its callback path to the channel registered
//! for that subscription. There is exactly one channel per subscription and
//! no global subscriber registry.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{IpAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, warn};
use ureq::http;

use crate::device::ServiceKind;
use crate::errors::ControlError;
use crate::soap_client::{build_agent, map_transport_error};

/// Subscription timeout the client asks for, in seconds. The device's
/// answer is authoritative.
pub const DEFAULT_SUBSCRIPTION_TIMEOUT_SECS: u32 = 1801;

/// How long before expiry a renewal is attempted.
pub const RENEWAL_MARGIN: Duration = Duration::from_secs(30);

/// Delay before retrying a failed resubscription.
pub const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(15);

const HTTP_READ_TIMEOUT: Duration = Duration::from_secs(5);
const GENA_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A GENA NOTIFY delivered to a subscription channel.
#[derive(Debug, Clone)]
pub struct SubscriptionEvent {
    /// SID header, if the publisher sent one
    pub sid: Option<String>,
    /// SEQ header; 0 is the initial event
    pub seq: Option<u32>,
    /// Raw propertyset body
    pub body: Vec<u8>,
}

/// Process-wide NOTIFY endpoint.
pub struct EventBroker {
    port: u16,
    routes: Mutex<HashMap<String, Sender<SubscriptionEvent>>>,
}

impl EventBroker {
    /// Bind the notify listener on an ephemeral port and start serving.
    pub fn spawn() -> io::Result<Arc<Self>> {
        let listener = TcpListener::bind("0.0.0.0:0")?;
        let port = listener.local_addr()?.port();

        let broker = Arc::new(Self {
            port,
            routes: Mutex::new(HashMap::new()),
        });

        debug!("GENA notify listener bound on port {}", port);

        let worker = Arc::clone(&broker);
        thread::Builder::new()
            .name("gena-notify".into())
            .spawn(move || worker.run(listener))?;

        Ok(broker)
    }

    fn run(&self, listener: TcpListener) {
        for stream in listener.incoming() {
            match stream {
                Ok(mut stream) => {
                    if let Err(err) = stream.set_read_timeout(Some(HTTP_READ_TIMEOUT)) {
                        warn!("Failed to set read timeout on notify connection: {}", err);
                    }
                    self.handle_connection(&mut stream);
                }
                Err(err) => {
                    warn!("Incoming notify connection failed: {}", err);
                }
            }
        }
    }

    fn handle_connection(&self, stream: &mut TcpStream) {
        let reader = match stream.try_clone() {
            Ok(clone) => clone,
            Err(err) => {
                warn!("Failed to clone notify stream: {}", err);
                return;
            }
        };

        match read_http_request(reader) {
            Ok(request) => {
                if request.method != "NOTIFY" {
                    let _ = write_http_response(stream, 405, "Method Not Allowed");
                    return;
                }

                let event = SubscriptionEvent {
                    sid: request.headers.get("sid").cloned(),
                    seq: request
                        .headers
                        .get("seq")
                        .and_then(|s| s.trim().parse().ok()),
                    body: request.body,
                };

                let delivered = {
                    let routes = self.routes.lock().expect("broker route lock poisoned");
                    match routes.get(&request.path) {
                        Some(tx) => tx.send(event).is_ok(),
                        None => false,
                    }
                };

                if delivered {
                    let _ = write_http_response(stream, 200, "OK");
                } else {
                    debug!("Dropping notify for unknown path {}", request.path);
                    let _ = write_http_response(stream, 412, "Precondition Failed");
                }
            }
            Err(err) => {
                warn!("Failed to parse incoming notify request: {}", err);
                let _ = write_http_response(stream, 400, "Bad Request");
            }
        }
    }

    /// Register a callback path, obtaining the subscription's channel.
    pub fn register(&self, path: &str) -> Receiver<SubscriptionEvent> {
        let (tx, rx) = unbounded();
        self.routes
            .lock()
            .expect("broker route lock poisoned")
            .insert(path.to_string(), tx);
        rx
    }

    /// Drop a callback path; later NOTIFYs for it are rejected.
    pub fn unregister(&self, path: &str) {
        self.routes
            .lock()
            .expect("broker route lock poisoned")
            .remove(path);
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Absolute callback URL for a path, as seen from the publisher.
    pub fn callback_url(&self, event_url: &str, path: &str) -> Result<String, ControlError> {
        let (remote_host, remote_port) = parse_host_port(event_url).ok_or_else(|| {
            ControlError::parse("event URL", format!("cannot extract host from {event_url}"))
        })?;
        let local_ip = determine_local_ip(&remote_host, remote_port)
            .map_err(|e| ControlError::NetworkUnreachable(e.to_string()))?;
        Ok(format!("http://{}:{}{}", format_ip(&local_ip), self.port, path))
    }
}

pub(crate) struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

pub(crate) fn read_http_request<R: Read>(stream: R) -> io::Result<HttpRequest> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "missing request line",
        ));
    }

    let request_line = request_line.trim_end_matches(&['\r', '\n'][..]);
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing method"))?
        .to_ascii_uppercase();
    let path = parts
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing path"))?
        .to_string();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        let len = reader.read_line(&mut line)?;
        if len == 0 {
            break;
        }
        let trimmed = line.trim_end_matches(&['\r', '\n'][..]);
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body)?;

    Ok(HttpRequest {
        method,
        path,
        headers,
        body,
    })
}

fn write_http_response(stream: &mut TcpStream, status: u16, message: &str) -> io::Result<()> {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        status, message
    );
    stream.write_all(response.as_bytes())
}

/// Send a GENA SUBSCRIBE; returns the SID and the granted timeout.
pub fn subscribe(
    event_url: &str,
    callback_url: &str,
    timeout_secs: u32,
) -> Result<(String, Duration), ControlError> {
    let (host_header, timeout_header) = subscribe_headers(event_url, timeout_secs)?;

    let request = http::Request::builder()
        .method("SUBSCRIBE")
        .uri(event_url)
        .header("HOST", host_header)
        .header("CALLBACK", format!("<{}>", callback_url))
        .header("NT", "upnp:event")
        .header("TIMEOUT", timeout_header)
        .body(())
        .map_err(|e| ControlError::parse("SUBSCRIBE request", e))?;

    let response = build_agent(GENA_REQUEST_TIMEOUT)
        .run(request)
        .map_err(|e| map_transport_error(event_url, e))?;
    if !response.status().is_success() {
        return Err(ControlError::HttpStatus(response.status().as_u16()));
    }

    let sid = response
        .headers()
        .get("SID")
        .and_then(|value| value.to_str().ok())
        .map(|s| s.to_string())
        .ok_or_else(|| ControlError::parse("SUBSCRIBE response", "missing SID header"))?;

    let granted = parse_timeout(
        response
            .headers()
            .get("TIMEOUT")
            .and_then(|value| value.to_str().ok()),
        timeout_secs,
    );

    Ok((sid, granted))
}

/// Renew an existing subscription; returns the newly granted timeout.
pub fn renew(event_url: &str, sid: &str, timeout_secs: u32) -> Result<Duration, ControlError> {
    let (host_header, timeout_header) = subscribe_headers(event_url, timeout_secs)?;

    let request = http::Request::builder()
        .method("SUBSCRIBE")
        .uri(event_url)
        .header("HOST", host_header)
        .header("SID", sid)
        .header("TIMEOUT", timeout_header)
        .body(())
        .map_err(|e| ControlError::parse("SUBSCRIBE renewal", e))?;

    let response = build_agent(GENA_REQUEST_TIMEOUT)
        .run(request)
        .map_err(|e| map_transport_error(event_url, e))?;
    if !response.status().is_success() {
        return Err(ControlError::HttpStatus(response.status().as_u16()));
    }

    Ok(parse_timeout(
        response
            .headers()
            .get("TIMEOUT")
            .and_then(|value| value.to_str().ok()),
        timeout_secs,
    ))
}

/// Send a GENA UNSUBSCRIBE for the given SID.
pub fn unsubscribe(event_url: &str, sid: &str) -> Result<(), ControlError> {
    let (remote_host, remote_port) = parse_host_port(event_url).ok_or_else(|| {
        ControlError::parse("event URL", format!("cannot extract host from {event_url}"))
    })?;

    let request = http::Request::builder()
        .method("UNSUBSCRIBE")
        .uri(event_url)
        .header("HOST", format!("{}:{}", remote_host, remote_port))
        .header("SID", sid)
        .body(())
        .map_err(|e| ControlError::parse("UNSUBSCRIBE request", e))?;

    let response = build_agent(GENA_REQUEST_TIMEOUT)
        .run(request)
        .map_err(|e| map_transport_error(event_url, e))?;
    if !response.status().is_success() {
        return Err(ControlError::HttpStatus(response.status().as_u16()));
    }
    Ok(())
}

fn subscribe_headers(
    event_url: &str,
    timeout_secs: u32,
) -> Result<(String, String), ControlError> {
    let (remote_host, remote_port) = parse_host_port(event_url).ok_or_else(|| {
        ControlError::parse("event URL", format!("cannot extract host from {event_url}"))
    })?;
    Ok((
        format!("{}:{}", remote_host, remote_port),
        format!("Second-{}", timeout_secs),
    ))
}

/// Stable callback path for one (device, service) subscription.
pub fn callback_path(udn: &str, kind: ServiceKind) -> String {
    let mut sanitized = String::new();
    for ch in udn.chars() {
        if ch.is_ascii_alphanumeric() {
            sanitized.push(ch);
        } else {
            sanitized.push('_');
        }
    }

    let mut hasher = DefaultHasher::new();
    udn.hash(&mut hasher);
    kind.name().hash(&mut hasher);
    let suffix = hasher.finish();

    format!("/events/{}-{}-{:x}", sanitized, kind.name(), suffix)
}

/// Parse a `TIMEOUT: Second-N` header value. `Second-infinite` and missing
/// or malformed values fall back to the requested timeout.
pub(crate) fn parse_timeout(raw: Option<&str>, requested_secs: u32) -> Duration {
    let fallback = Duration::from_secs(u64::from(requested_secs));
    let Some(value) = raw else {
        return fallback;
    };
    let lower = value.trim().to_ascii_lowercase();
    if lower == "second-infinite" {
        return fallback;
    }
    if let Some(idx) = lower.find("second-") {
        let number = &lower[idx + 7..];
        if let Ok(seconds) = number.parse::<u64>() {
            return Duration::from_secs(seconds);
        }
    }
    fallback
}

pub(crate) fn parse_host_port(url: &str) -> Option<(String, u16)> {
    let default_port = if url.to_ascii_lowercase().starts_with("https://") {
        443
    } else {
        80
    };
    let (_, rest) = url.split_once("://")?;
    let mut parts = rest.splitn(2, '/');
    let authority = parts.next()?.trim();
    if authority.starts_with('[') {
        let end = authority.find(']')?;
        let host = &authority[1..end];
        let remainder = authority.get(end + 1..).unwrap_or("");
        let port = if let Some(stripped) = remainder.strip_prefix(':') {
            stripped.parse().unwrap_or(default_port)
        } else {
            default_port
        };
        Some((host.to_string(), port))
    } else if let Some((host, port)) = authority.split_once(':') {
        Some((host.to_string(), port.parse().ok()?))
    } else {
        Some((authority.to_string(), default_port))
    }
}

fn determine_local_ip(remote_host: &str, remote_port: u16) -> io::Result<IpAddr> {
    let is_ipv6 = remote_host.contains(':') && !remote_host.contains('.');
    let target = if is_ipv6 {
        format!(
            "[{}]:{}",
            remote_host.trim_matches(|c| c == '[' || c == ']'),
            remote_port
        )
    } else {
        format!("{}:{}", remote_host, remote_port)
    };
    let bind_addr = if is_ipv6 { "[::]:0" } else { "0.0.0.0:0" };
    let socket = UdpSocket::bind(bind_addr)?;
    socket.connect(&target)?;
    Ok(socket.local_addr()?.ip())
}

fn format_ip(ip: &IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{}]", v6),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parse_timeout_header() {
        assert_eq!(
            parse_timeout(Some("Second-300"), 1801),
            Duration::from_secs(300)
        );
        assert_eq!(
            parse_timeout(Some("second-1801"), 1801),
            Duration::from_secs(1801)
        );
        assert_eq!(
            parse_timeout(Some("Second-infinite"), 1801),
            Duration::from_secs(1801)
        );
        assert_eq!(parse_timeout(Some("garbage"), 42), Duration::from_secs(42));
        assert_eq!(parse_timeout(None, 42), Duration::from_secs(42));
    }

    #[test]
    fn parse_host_port_variants() {
        assert_eq!(
            parse_host_port("http://192.168.1.5:8089/event"),
            Some(("192.168.1.5".to_string(), 8089))
        );
        assert_eq!(
            parse_host_port("http://192.168.1.5/event"),
            Some(("192.168.1.5".to_string(), 80))
        );
        assert_eq!(
            parse_host_port("https://example.com/event"),
            Some(("example.com".to_string(), 443))
        );
        assert_eq!(
            parse_host_port("http://[fe80::1]:1400/event"),
            Some(("fe80::1".to_string(), 1400))
        );
        assert_eq!(parse_host_port("not a url"), None);
    }

    #[test]
    fn callback_path_is_sanitised_and_stable() {
        let a = callback_path("uuid:1234-abcd", ServiceKind::AVTransport);
        let b = callback_path("uuid:1234-abcd", ServiceKind::AVTransport);
        let c = callback_path("uuid:1234-abcd", ServiceKind::RenderingControl);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("/events/uuid_1234_abcd-AVTransport-"));
        assert!(!a.contains(':'));
    }

    #[test]
    fn read_notify_request() {
        let body = r#"<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0"/>"#;
        let raw = format!(
            "NOTIFY /events/x HTTP/1.1\r\nHOST: 10.0.0.2:8089\r\nCONTENT-TYPE: text/xml\r\nNT: upnp:event\r\nNTS: upnp:propchange\r\nSID: uuid:sub-1\r\nSEQ: 3\r\nCONTENT-LENGTH: {}\r\n\r\n{}",
            body.len(),
            body
        );

        let request = read_http_request(Cursor::new(raw.into_bytes())).unwrap();
        assert_eq!(request.method, "NOTIFY");
        assert_eq!(request.path, "/events/x");
        assert_eq!(request.headers.get("sid").map(String::as_str), Some("uuid:sub-1"));
        assert_eq!(request.headers.get("seq").map(String::as_str), Some("3"));
        assert_eq!(request.body, body.as_bytes());
    }

    #[test]
    fn read_request_rejects_empty_stream() {
        assert!(read_http_request(Cursor::new(Vec::new())).is_err());
    }
}
