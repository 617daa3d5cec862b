//! SOAP envelope structures and parsing
//!
//! The control point only ever *parses* envelopes (requests are serialised
//! directly by [`build_soap_request`](crate::soap::build_soap_request)), and
//! UPnP devices put nothing of interest in the SOAP header, so an envelope
//! here is just its body.

use std::io::BufReader;

use xmltree::{Element, XMLNode};

/// Parsed SOAP envelope.
#[derive(Debug, Clone)]
pub struct SoapEnvelope {
    /// SOAP body holding the action response or fault
    pub body: SoapBody,
}

/// SOAP body
#[derive(Debug, Clone)]
pub struct SoapBody {
    /// Raw body XML
    pub content: Element,
}

/// SOAP parse error
#[derive(Debug, thiserror::Error)]
pub enum SoapParseError {
    #[error("XML parse error: {0}")]
    XmlError(#[from] xmltree::ParseError),

    #[error("Missing SOAP Envelope")]
    MissingEnvelope,

    #[error("Missing SOAP Body")]
    MissingBody,
}

/// Parse a SOAP envelope.
///
/// Element names are matched by suffix so that any namespace prefix
/// (`s:`, `SOAP-ENV:`, none at all) is accepted.
pub fn parse_soap_envelope(xml: &[u8]) -> Result<SoapEnvelope, SoapParseError> {
    let reader = BufReader::new(xml);
    let root = Element::parse(reader)?;

    if !root.name.ends_with("Envelope") {
        return Err(SoapParseError::MissingEnvelope);
    }

    let body_elem = root
        .children
        .iter()
        .find_map(|n| n.as_element().filter(|e| e.name.ends_with("Body")))
        .ok_or(SoapParseError::MissingBody)?;

    Ok(SoapEnvelope {
        body: SoapBody {
            content: body_elem.clone(),
        },
    })
}

/// Find the first child element whose name ends with `suffix`.
///
/// UPnP devices are wildly inconsistent about namespace prefixes, so every
/// response lookup in the control point goes through this.
pub fn find_child_with_suffix<'a>(parent: &'a Element, suffix: &str) -> Option<&'a Element> {
    parent.children.iter().find_map(|node| match node {
        XMLNode::Element(elem) if elem.name.ends_with(suffix) => Some(elem),
        _ => None,
    })
}

/// Extract the trimmed text of the child named `suffix`.
///
/// Returns `None` when the child is absent or has no non-empty text.
pub fn child_text(parent: &Element, suffix: &str) -> Option<String> {
    find_child_with_suffix(parent, suffix)
        .and_then(|child| child.get_text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Like [`child_text`] but an empty element yields `Some("")`.
///
/// UPnP responses legitimately carry empty values (empty caps lists, empty
/// `Result` payloads), which must be distinguishable from a missing element.
pub fn child_text_allow_empty(parent: &Element, suffix: &str) -> Option<String> {
    find_child_with_suffix(parent, suffix).map(|child| {
        child
            .get_text()
            .map(|t| t.trim().to_string())
            .unwrap_or_default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_action_response_envelope() {
        let xml = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <u:GetVolumeResponse xmlns:u="urn:schemas-upnp-org:service:RenderingControl:1">
      <CurrentVolume>42</CurrentVolume>
    </u:GetVolumeResponse>
  </s:Body>
</s:Envelope>"#;

        let envelope = parse_soap_envelope(xml.as_bytes()).unwrap();
        let response =
            find_child_with_suffix(&envelope.body.content, "GetVolumeResponse").unwrap();
        assert_eq!(child_text(response, "CurrentVolume").as_deref(), Some("42"));
    }

    #[test]
    fn envelope_header_is_skipped() {
        let xml = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Header><Irrelevant/></s:Header>
  <s:Body>
    <u:StopResponse xmlns:u="urn:schemas-upnp-org:service:AVTransport:1"/>
  </s:Body>
</s:Envelope>"#;

        let envelope = parse_soap_envelope(xml.as_bytes()).unwrap();
        assert!(find_child_with_suffix(&envelope.body.content, "StopResponse").is_some());
    }

    #[test]
    fn parse_rejects_non_envelope_root() {
        let xml = r#"<root><child/></root>"#;
        assert!(matches!(
            parse_soap_envelope(xml.as_bytes()),
            Err(SoapParseError::MissingEnvelope)
        ));
    }

    #[test]
    fn parse_rejects_missing_body() {
        let xml = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"/>"#;
        assert!(matches!(
            parse_soap_envelope(xml.as_bytes()),
            Err(SoapParseError::MissingBody)
        ));
    }

    #[test]
    fn child_text_distinguishes_empty_from_missing() {
        let xml = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <u:GetSearchCapabilitiesResponse xmlns:u="urn:schemas-upnp-org:service:ContentDirectory:1">
      <SearchCaps></SearchCaps>
    </u:GetSearchCapabilitiesResponse>
  </s:Body>
</s:Envelope>"#;

        let envelope = parse_soap_envelope(xml.as_bytes()).unwrap();
        let response =
            find_child_with_suffix(&envelope.body.content, "GetSearchCapabilitiesResponse")
                .unwrap();
        assert_eq!(child_text(response, "SearchCaps"), None);
        assert_eq!(
            child_text_allow_empty(response, "SearchCaps").as_deref(),
            Some("")
        );
        assert_eq!(child_text_allow_empty(response, "SortCaps"), None);
    }
}
