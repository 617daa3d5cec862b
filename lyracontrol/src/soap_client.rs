use std::time::Duration;

use lyraupnp::soap::{SoapEnvelope, build_soap_request, parse_soap_envelope, soap_action_header};
use tracing::debug;
use ureq::Agent;

use crate::errors::ControlError;

/// Default timeout for SOAP action invocations.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for device/service description fetches.
pub const DEFAULT_DESCRIPTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of a SOAP call:
/// - HTTP status code
/// - raw XML body (always)
/// - parsed SOAP envelope if parsing succeeded
pub struct SoapCallResult {
    pub status: ureq::http::StatusCode,
    pub raw_body: String,
    pub envelope: Option<SoapEnvelope>,
}

/// Invoke a UPnP SOAP action on a control URL with the default timeout.
pub fn invoke_upnp_action(
    control_url: &str,
    service_type: &str,
    action: &str,
    args: &[(&str, &str)],
) -> Result<SoapCallResult, ControlError> {
    invoke_upnp_action_with_timeout(control_url, service_type, action, args, None)
}

/// Invoke a UPnP SOAP action on a control URL.
///
/// - `control_url`: full HTTP URL of the service control endpoint
/// - `service_type`: service URN
/// - `action`: action name
/// - `args`: (name, value) pairs, sent in the given order
pub fn invoke_upnp_action_with_timeout(
    control_url: &str,
    service_type: &str,
    action: &str,
    args: &[(&str, &str)],
    timeout: Option<Duration>,
) -> Result<SoapCallResult, ControlError> {
    let body_xml = build_soap_request(service_type, action, args)
        .map_err(|e| ControlError::parse("SOAP request", e))?;

    let agent = build_agent(timeout.unwrap_or(DEFAULT_ACTION_TIMEOUT));

    debug!(action, control_url, "Invoking UPnP action");

    let mut response = agent
        .post(control_url)
        .header("Content-Type", r#"text/xml; charset="utf-8""#)
        .header("SOAPAction", &soap_action_header(service_type, action))
        .send(body_xml)
        .map_err(|e| map_transport_error(control_url, e))?;

    let status = response.status();

    let raw_body = response
        .body_mut()
        .read_to_string()
        .map_err(|e| map_transport_error(control_url, e))?;

    // Envelope parse failures are non-fatal here; the caller decides what a
    // missing envelope means for its action.
    let envelope = parse_soap_envelope(raw_body.as_bytes()).ok();

    Ok(SoapCallResult {
        status,
        raw_body,
        envelope,
    })
}

/// Plain HTTP GET, used for device descriptions and SCPD documents.
pub fn http_get(url: &str, timeout: Duration) -> Result<String, ControlError> {
    let agent = build_agent(timeout);

    let mut response = agent
        .get(url)
        .call()
        .map_err(|e| map_transport_error(url, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ControlError::HttpStatus(status.as_u16()));
    }

    response
        .body_mut()
        .read_to_string()
        .map_err(|e| map_transport_error(url, e))
}

/// Agent that does not treat 4xx/5xx as transport errors; SOAP faults ride
/// on HTTP 500 and must reach the parser.
pub(crate) fn build_agent(timeout: Duration) -> Agent {
    Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .allow_non_standard_methods(true)
        .build()
        .into()
}

/// Translate a ureq transport failure into the control-point taxonomy by
/// walking the source chain for the underlying io error.
pub(crate) fn map_transport_error(url: &str, err: ureq::Error) -> ControlError {
    use std::error::Error as _;

    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&err);
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            return classify_io_error(url, io);
        }
        source = e.source();
    }

    let text = err.to_string();
    if text.to_ascii_lowercase().contains("timeout") {
        ControlError::Timeout(format!("{url}: {text}"))
    } else {
        ControlError::NetworkUnreachable(format!("{url}: {text}"))
    }
}

fn classify_io_error(url: &str, io: &std::io::Error) -> ControlError {
    use std::io::ErrorKind;

    match io.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => {
            ControlError::Timeout(format!("{url}: {io}"))
        }
        ErrorKind::ConnectionRefused => ControlError::ConnectRefused(format!("{url}: {io}")),
        _ => ControlError::NetworkUnreachable(format!("{url}: {io}")),
    }
}
