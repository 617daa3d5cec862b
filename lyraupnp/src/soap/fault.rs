//! SOAP fault handling for UPnP errors

use super::envelope::{SoapEnvelope, find_child_with_suffix};

/// UPnP error extracted from a SOAP Fault.
///
/// Typical shape (SOAP 1.1):
///
/// ```xml
/// <s:Body>
///   <s:Fault>
///     <faultcode>s:Client</faultcode>
///     <faultstring>UPnPError</faultstring>
///     <detail>
///       <UPnPError xmlns="urn:schemas-upnp-org:control-1-0">
///         <errorCode>401</errorCode>
///         <errorDescription>Invalid Action</errorDescription>
///       </UPnPError>
///     </detail>
///   </s:Fault>
/// </s:Body>
/// ```
#[derive(Debug, Clone)]
pub struct UpnpFault {
    /// Numeric UPnP error code (401, 501, 701, ...)
    pub error_code: u32,

    /// Human-readable description; may be empty
    pub error_description: String,
}

/// Extract a UPnP error from a SOAP fault body, if any.
pub fn parse_upnp_fault(envelope: &SoapEnvelope) -> Option<UpnpFault> {
    let fault = find_child_with_suffix(&envelope.body.content, "Fault")?;
    let detail = find_child_with_suffix(fault, "detail")?;
    let upnp_error = find_child_with_suffix(detail, "UPnPError")?;

    // errorCode is mandatory in the spec
    let error_code_elem = find_child_with_suffix(upnp_error, "errorCode")?;
    let binding = error_code_elem.get_text()?;
    let error_code = binding.trim().parse::<u32>().ok()?;

    // errorDescription is optional but useful
    let error_description = find_child_with_suffix(upnp_error, "errorDescription")
        .and_then(|elem| elem.get_text().map(|t| t.trim().to_string()))
        .unwrap_or_default();

    Some(UpnpFault {
        error_code,
        error_description,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soap::parse_soap_envelope;

    #[test]
    fn parse_fault_extracts_code_and_description() {
        let xml = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <s:Fault>
      <faultcode>s:Client</faultcode>
      <faultstring>UPnPError</faultstring>
      <detail>
        <UPnPError xmlns="urn:schemas-upnp-org:control-1-0">
          <errorCode>701</errorCode>
          <errorDescription>No such object</errorDescription>
        </UPnPError>
      </detail>
    </s:Fault>
  </s:Body>
</s:Envelope>"#;

        let envelope = parse_soap_envelope(xml.as_bytes()).unwrap();
        let fault = parse_upnp_fault(&envelope).expect("expected UPnPError");
        assert_eq!(fault.error_code, 701);
        assert_eq!(fault.error_description, "No such object");
    }

    #[test]
    fn fault_without_description() {
        let xml = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <s:Fault>
      <detail>
        <UPnPError>
          <errorCode>501</errorCode>
        </UPnPError>
      </detail>
    </s:Fault>
  </s:Body>
</s:Envelope>"#;

        let envelope = parse_soap_envelope(xml.as_bytes()).unwrap();
        let fault = parse_upnp_fault(&envelope).unwrap();
        assert_eq!(fault.error_code, 501);
        assert_eq!(fault.error_description, "");
    }

    #[test]
    fn regular_response_is_not_a_fault() {
        let xml = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <u:StopResponse xmlns:u="urn:schemas-upnp-org:service:AVTransport:1"/>
  </s:Body>
</s:Envelope>"#;

        let envelope = parse_soap_envelope(xml.as_bytes()).unwrap();
        assert!(parse_upnp_fault(&envelope).is_none());
    }
}
