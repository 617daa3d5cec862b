//! ProtocolInfo wire type
//!
//! `protocol:network:contentFormat:additionalInfo`, each field possibly the
//! `*` wildcard. This is the string that decides whether a renderer can play
//! a resource at all.

use std::fmt;
use std::str::FromStr;

use crate::DidlError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolInfo {
    pub protocol: String,
    pub network: String,
    pub content_format: String,
    pub additional_info: String,
}

impl ProtocolInfo {
    pub fn new(
        protocol: impl Into<String>,
        network: impl Into<String>,
        content_format: impl Into<String>,
        additional_info: impl Into<String>,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            network: network.into(),
            content_format: content_format.into(),
            additional_info: additional_info.into(),
        }
    }

    /// `http-get:*:<mime>:*`, the common case for plain HTTP streaming.
    pub fn http_get(content_format: impl Into<String>) -> Self {
        Self::new("http-get", "*", content_format, "*")
    }

    /// Compatibility as defined for connection setup: protocol and content
    /// format must match, where `*` on either side matches anything. The
    /// network and additional-info fields do not participate.
    pub fn is_compatible_with(&self, other: &ProtocolInfo) -> bool {
        field_matches(&self.protocol, &other.protocol)
            && field_matches(&self.content_format, &other.content_format)
    }
}

fn field_matches(a: &str, b: &str) -> bool {
    a == "*" || b == "*" || a.eq_ignore_ascii_case(b)
}

impl FromStr for ProtocolInfo {
    type Err = DidlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.trim().splitn(4, ':');
        let protocol = fields.next();
        let network = fields.next();
        let content_format = fields.next();
        let additional_info = fields.next();

        match (protocol, network, content_format, additional_info) {
            (Some(p), Some(n), Some(c), Some(a)) => Ok(ProtocolInfo::new(p, n, c, a)),
            _ => Err(DidlError::ProtocolInfo(s.to_string())),
        }
    }
}

impl fmt::Display for ProtocolInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.protocol, self.network, self.content_format, self.additional_info
        )
    }
}
