//! SCPD (Service Control Protocol Description) parsing.
//!
//! One SCPD document per service lists the supported actions and the state
//! variables with their data types, eventing flags and allowed ranges.

use std::io::BufReader;

use tracing::debug;
use xmltree::{Element, XMLNode};

use crate::errors::ControlError;

/// Numeric range constraint from `<allowedValueRange>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueRange {
    pub min: i64,
    pub max: i64,
    pub step: Option<i64>,
}

/// One `<stateVariable>` descriptor.
#[derive(Debug, Clone)]
pub struct StateVariable {
    pub name: String,
    pub data_type: String,
    pub sends_events: bool,
    pub allowed_range: Option<ValueRange>,
}

/// Parsed SCPD document.
#[derive(Debug, Clone, Default)]
pub struct ServiceDescription {
    /// Action names as advertised (unfiltered)
    pub actions: Vec<String>,
    pub state_variables: Vec<StateVariable>,
}

impl ServiceDescription {
    pub fn state_variable(&self, name: &str) -> Option<&StateVariable> {
        self.state_variables.iter().find(|v| v.name == name)
    }
}

/// Parse an SCPD document.
pub fn parse_scpd(xml: &str) -> Result<ServiceDescription, ControlError> {
    let root = Element::parse(BufReader::new(xml.as_bytes()))
        .map_err(|e| ControlError::parse("SCPD", e))?;

    let mut description = ServiceDescription::default();

    if let Some(action_list) = root.get_child("actionList") {
        for action in element_children(action_list).filter(|e| e.name == "action") {
            if let Some(name) = child_text(action, "name") {
                description.actions.push(name);
            }
        }
    }

    if let Some(table) = root.get_child("serviceStateTable") {
        for var in element_children(table).filter(|e| e.name == "stateVariable") {
            let Some(name) = child_text(var, "name") else {
                debug!("Skipping stateVariable without a name");
                continue;
            };
            let data_type = child_text(var, "dataType").unwrap_or_default();
            // sendEvents defaults to yes per the UPnP architecture
            let sends_events = var
                .attributes
                .get("sendEvents")
                .map(|v| !v.eq_ignore_ascii_case("no"))
                .unwrap_or(true);

            let allowed_range = var.get_child("allowedValueRange").and_then(parse_range);

            description.state_variables.push(StateVariable {
                name,
                data_type,
                sends_events,
                allowed_range,
            });
        }
    }

    Ok(description)
}

fn parse_range(range: &Element) -> Option<ValueRange> {
    let min = child_text(range, "minimum")?.trim().parse().ok()?;
    let max = child_text(range, "maximum")?.trim().parse().ok()?;
    let step = child_text(range, "step").and_then(|s| s.trim().parse().ok());
    Some(ValueRange { min, max, step })
}

fn element_children(element: &Element) -> impl Iterator<Item = &Element> {
    element.children.iter().filter_map(|node| match node {
        XMLNode::Element(elem) => Some(elem),
        _ => None,
    })
}

fn child_text(element: &Element, name: &str) -> Option<String> {
    element
        .get_child(name)
        .and_then(|child| child.get_text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}
