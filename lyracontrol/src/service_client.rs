//! Generic service-client runtime.
//!
//! Every AV service client is a thin typed wrapper around
//! [`ServiceClient<T>`]: binding to a device service, learning the
//! supported actions from SCPD, invoking SOAP actions, and running the GENA
//! subscription lifecycle with LastChange fan-out.

use std::collections::{BTreeMap, HashSet};
use std::io::BufReader;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, warn};
use xmltree::{Element, XMLNode};

use lyraupnp::soap::{find_child_with_suffix, parse_upnp_fault};

use crate::device::{Device, Service, ServiceKind};
use crate::errors::ControlError;
use crate::events::EventBus;
use crate::gena::{
    self, DEFAULT_SUBSCRIPTION_TIMEOUT_SECS, EventBroker, RENEWAL_MARGIN, RESUBSCRIBE_DELAY,
    SubscriptionEvent,
};
use crate::scpd::{ServiceDescription, StateVariable, parse_scpd};
use crate::soap_client::{
    DEFAULT_ACTION_TIMEOUT, DEFAULT_DESCRIPTION_TIMEOUT, http_get, invoke_upnp_action_with_timeout,
};

/// Static description of one service type: its kind, the action and
/// variable name tables, and the service-specific error mapping.
///
/// Conversions are plain match tables so the hot string paths carry no
/// dynamic dispatch.
pub trait ServiceTraits: Send + Sync + 'static {
    type Action: Copy + Eq + std::hash::Hash + std::fmt::Debug + Send + Sync + 'static;
    type Variable: Copy + Eq + Ord + std::fmt::Debug + Send + Sync + 'static;

    const KIND: ServiceKind;
    const SUBSCRIPTION_TIMEOUT_SECS: u32 = DEFAULT_SUBSCRIPTION_TIMEOUT_SECS;

    fn action_to_str(action: Self::Action) -> &'static str;
    fn action_from_str(s: &str) -> Option<Self::Action>;
    fn variable_to_str(variable: Self::Variable) -> &'static str;
    fn variable_from_str(s: &str) -> Option<Self::Variable>;

    /// Translate a UPnP fault into the service's domain error. Codes the
    /// service does not claim fall back to [`ControlError::upnp`].
    fn map_upnp_error(code: u32, description: &str) -> ControlError;
}

/// One decoded state-variable event.
#[derive(Debug, Clone)]
pub struct StateVariableEvent<V: Copy + Ord> {
    /// The variable that carried the event (LastChange for AV services)
    pub variable: V,
    /// AVTransport/RenderingControl instance the change applies to
    pub instance_id: u32,
    /// Every changed variable with its new value
    pub changes: BTreeMap<V, String>,
}

type EventHook<V> = Box<dyn Fn(&StateVariableEvent<V>) + Send + Sync>;

struct SubscriptionHandle {
    path: String,
    sid: Arc<Mutex<Option<String>>>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    event_url: String,
}

/// Generic client for one service on one device.
pub struct ServiceClient<T: ServiceTraits> {
    broker: Option<Arc<EventBroker>>,
    device: Option<Arc<Device>>,
    service: Option<Service>,
    supported_actions: HashSet<T::Action>,
    state_variables: Vec<StateVariable>,
    action_timeout: Duration,
    bus: EventBus<StateVariableEvent<T::Variable>>,
    hook: Arc<Mutex<Option<EventHook<T::Variable>>>>,
    subscription: Arc<Mutex<Option<SubscriptionHandle>>>,
}

impl<T: ServiceTraits> Default for ServiceClient<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ServiceTraits> ServiceClient<T> {
    pub fn new() -> Self {
        Self {
            broker: None,
            device: None,
            service: None,
            supported_actions: HashSet::new(),
            state_variables: Vec::new(),
            action_timeout: DEFAULT_ACTION_TIMEOUT,
            bus: EventBus::new(),
            hook: Arc::new(Mutex::new(None)),
            subscription: Arc::new(Mutex::new(None)),
        }
    }

    /// Wire the NOTIFY endpoint used by [`subscribe`](Self::subscribe).
    pub fn set_event_broker(&mut self, broker: Arc<EventBroker>) {
        self.broker = Some(broker);
    }

    pub fn set_action_timeout(&mut self, timeout: Duration) {
        self.action_timeout = timeout;
    }

    /// Bind to the device's service of our kind and learn its SCPD.
    pub fn set_device(&mut self, device: &Arc<Device>) -> Result<(), ControlError> {
        let service = device
            .service(T::KIND)
            .cloned()
            .ok_or(ControlError::MissingService(T::KIND.name()))?;

        let scpd_xml = http_get(&service.scpd_url, DEFAULT_DESCRIPTION_TIMEOUT)?;
        let description = parse_scpd(&scpd_xml)?;

        self.supported_actions = Self::supported_actions_from(&description);
        self.state_variables = description.state_variables;
        self.device = Some(Arc::clone(device));
        self.service = Some(service);
        Ok(())
    }

    pub(crate) fn supported_actions_from(description: &ServiceDescription) -> HashSet<T::Action> {
        description
            .actions
            .iter()
            .filter_map(|name| match T::action_from_str(name) {
                Some(action) => Some(action),
                None => {
                    debug!(
                        service = T::KIND.name(),
                        action = name.as_str(),
                        "Unknown action in SCPD, skipping"
                    );
                    None
                }
            })
            .collect()
    }

    pub fn supports_action(&self, action: T::Action) -> bool {
        self.supported_actions.contains(&action)
    }

    pub fn state_variable(&self, name: &str) -> Option<&StateVariable> {
        self.state_variables.iter().find(|v| v.name == name)
    }

    pub fn state_variables(&self) -> &[StateVariable] {
        &self.state_variables
    }

    pub fn device(&self) -> Option<&Arc<Device>> {
        self.device.as_ref()
    }

    pub fn service(&self) -> Result<&Service, ControlError> {
        self.service
            .as_ref()
            .ok_or(ControlError::MissingService(T::KIND.name()))
    }

    pub fn is_bound(&self) -> bool {
        self.service.is_some()
    }

    /// Channel of decoded state-variable events, in arrival order.
    pub fn events(&self) -> Receiver<StateVariableEvent<T::Variable>> {
        self.bus.subscribe()
    }

    /// Install the hook run before each event is broadcast. Facades use
    /// this to refresh their caches ahead of their own listeners.
    pub fn set_event_hook<F>(&self, hook: F)
    where
        F: Fn(&StateVariableEvent<T::Variable>) + Send + Sync + 'static,
    {
        *self.hook.lock().expect("hook lock poisoned") = Some(Box::new(hook));
    }

    /// Invoke a SOAP action and return the `<u:...Response>` element.
    pub fn execute_action(
        &self,
        action: T::Action,
        args: &[(&str, String)],
    ) -> Result<Element, ControlError> {
        let service = self.service()?;
        let name = T::action_to_str(action);

        let borrowed: Vec<(&str, &str)> = args.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let result = invoke_upnp_action_with_timeout(
            &service.control_url,
            &service.service_type,
            name,
            &borrowed,
            Some(self.action_timeout),
        )?;

        if let Some(envelope) = &result.envelope {
            if let Some(fault) = parse_upnp_fault(envelope) {
                return Err(T::map_upnp_error(fault.error_code, &fault.error_description));
            }
        }

        if !result.status.is_success() {
            return Err(ControlError::HttpStatus(result.status.as_u16()));
        }

        let envelope = result
            .envelope
            .ok_or_else(|| ControlError::parse("SOAP envelope", "missing or malformed envelope"))?;

        let response_name = format!("{name}Response");
        find_child_with_suffix(&envelope.body.content, &response_name)
            .cloned()
            .ok_or_else(|| ControlError::missing_value(&response_name))
    }

    /// Subscribe to the service's eventing. An existing subscription is
    /// torn down first; concurrent calls are serialised on the
    /// subscription lock.
    pub fn subscribe(&self) -> Result<(), ControlError> {
        let service = self.service()?.clone();
        let device = self
            .device
            .clone()
            .ok_or(ControlError::MissingService(T::KIND.name()))?;
        let broker = self.broker.clone().ok_or(ControlError::NoEventBroker)?;

        let mut guard = self.subscription.lock().expect("subscription lock poisoned");
        if let Some(existing) = guard.take() {
            Self::teardown(existing, &broker);
        }

        let path = gena::callback_path(&device.udn, T::KIND);
        let rx = broker.register(&path);
        let callback_url = match broker.callback_url(&service.event_sub_url, &path) {
            Ok(url) => url,
            Err(err) => {
                broker.unregister(&path);
                return Err(err);
            }
        };

        match gena::subscribe(
            &service.event_sub_url,
            &callback_url,
            T::SUBSCRIPTION_TIMEOUT_SECS,
        ) {
            Ok((sid, granted)) => {
                debug!(
                    service = T::KIND.name(),
                    sid = sid.as_str(),
                    granted_secs = granted.as_secs(),
                    "Subscribed to service events"
                );

                let sid_slot = Arc::new(Mutex::new(Some(sid)));
                let stop = Arc::new(AtomicBool::new(false));
                let worker = spawn_subscription_worker::<T>(
                    rx,
                    Arc::clone(&sid_slot),
                    Arc::clone(&stop),
                    service.event_sub_url.clone(),
                    callback_url,
                    granted,
                    self.bus.clone(),
                    Arc::clone(&self.hook),
                );

                *guard = Some(SubscriptionHandle {
                    path,
                    sid: sid_slot,
                    stop,
                    worker: Some(worker),
                    event_url: service.event_sub_url,
                });
                Ok(())
            }
            Err(err) => {
                broker.unregister(&path);
                Err(err)
            }
        }
    }

    /// Drop the subscription, sending exactly one UNSUBSCRIBE with the
    /// recorded SID. Succeeds silently when there is none.
    pub fn unsubscribe(&self) -> Result<(), ControlError> {
        let Some(broker) = self.broker.clone() else {
            return Ok(());
        };
        let mut guard = self.subscription.lock().expect("subscription lock poisoned");
        if let Some(handle) = guard.take() {
            Self::teardown(handle, &broker);
        }
        Ok(())
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription
            .lock()
            .expect("subscription lock poisoned")
            .is_some()
    }

    fn teardown(mut handle: SubscriptionHandle, broker: &EventBroker) {
        handle.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = handle.worker.take() {
            let _ = worker.join();
        }
        broker.unregister(&handle.path);

        let sid = handle.sid.lock().expect("sid lock poisoned").take();
        if let Some(sid) = sid {
            if let Err(err) = gena::unsubscribe(&handle.event_url, &sid) {
                warn!(
                    service = T::KIND.name(),
                    error = %err,
                    "UNSUBSCRIBE failed"
                );
            }
        }
    }
}

impl<T: ServiceTraits> Drop for ServiceClient<T> {
    fn drop(&mut self) {
        let _ = self.unsubscribe();
    }
}

/// The renewal/dispatch worker: pumps NOTIFYs into the bus and keeps the
/// subscription alive, renewing at `granted - 30 s`. A failed renewal falls
/// back to a fresh SUBSCRIBE, retried until the subscription is dropped.
#[allow(clippy::too_many_arguments)]
fn spawn_subscription_worker<T: ServiceTraits>(
    rx: Receiver<SubscriptionEvent>,
    sid_slot: Arc<Mutex<Option<String>>>,
    stop: Arc<AtomicBool>,
    event_url: String,
    callback_url: String,
    granted: Duration,
    bus: EventBus<StateVariableEvent<T::Variable>>,
    hook: Arc<Mutex<Option<EventHook<T::Variable>>>>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name(format!("{}-events", T::KIND.name().to_ascii_lowercase()))
        .spawn(move || {
            let mut renew_at = Instant::now() + granted.saturating_sub(RENEWAL_MARGIN);
            let mut last_seq: Option<u32> = None;

            loop {
                if stop.load(Ordering::SeqCst) {
                    break;
                }

                let now = Instant::now();
                if now >= renew_at {
                    renew_at = renew_or_resubscribe::<T>(&event_url, &callback_url, &sid_slot);
                    continue;
                }

                // Cap the wait so the stop flag is observed promptly
                let wait = (renew_at - now).min(Duration::from_millis(500));
                match rx.recv_timeout(wait) {
                    Ok(event) => {
                        let expected = sid_slot.lock().expect("sid lock poisoned").clone();
                        if !sid_matches(&event.sid, &expected) {
                            debug!(
                                service = T::KIND.name(),
                                received = event.sid.as_deref().unwrap_or("none"),
                                "Ignoring notify with mismatched SID"
                            );
                            continue;
                        }
                        if let (Some(seq), Some(last)) = (event.seq, last_seq) {
                            // UPnP defines no replay; log and process anyway
                            if seq <= last && seq != 0 {
                                warn!(
                                    service = T::KIND.name(),
                                    seq, last, "Out-of-order event sequence"
                                );
                            }
                        }
                        last_seq = event.seq;
                        dispatch_event::<T>(&event.body, &bus, &hook);
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })
        .expect("failed to spawn subscription worker")
}

/// Returns the next renewal instant.
fn renew_or_resubscribe<T: ServiceTraits>(
    event_url: &str,
    callback_url: &str,
    sid_slot: &Arc<Mutex<Option<String>>>,
) -> Instant {
    let current_sid = sid_slot.lock().expect("sid lock poisoned").clone();

    if let Some(sid) = current_sid {
        match gena::renew(event_url, &sid, T::SUBSCRIPTION_TIMEOUT_SECS) {
            Ok(granted) => {
                debug!(service = T::KIND.name(), "Renewed subscription");
                return Instant::now() + granted.saturating_sub(RENEWAL_MARGIN);
            }
            Err(err) => {
                warn!(
                    service = T::KIND.name(),
                    error = %err,
                    "Subscription renewal failed, attempting fresh subscribe"
                );
                *sid_slot.lock().expect("sid lock poisoned") = None;
            }
        }
    }

    match gena::subscribe(event_url, callback_url, T::SUBSCRIPTION_TIMEOUT_SECS) {
        Ok((sid, granted)) => {
            debug!(
                service = T::KIND.name(),
                sid = sid.as_str(),
                "Re-subscribed after renewal failure"
            );
            *sid_slot.lock().expect("sid lock poisoned") = Some(sid);
            Instant::now() + granted.saturating_sub(RENEWAL_MARGIN)
        }
        Err(err) => {
            warn!(
                service = T::KIND.name(),
                error = %err,
                "Re-subscribe failed, retrying later"
            );
            Instant::now() + RESUBSCRIBE_DELAY
        }
    }
}

fn sid_matches(received: &Option<String>, expected: &Option<String>) -> bool {
    match (received, expected) {
        (Some(received), Some(expected)) => expected.eq_ignore_ascii_case(received),
        _ => false,
    }
}

fn dispatch_event<T: ServiceTraits>(
    body: &[u8],
    bus: &EventBus<StateVariableEvent<T::Variable>>,
    hook: &Arc<Mutex<Option<EventHook<T::Variable>>>>,
) {
    let events = match decode_property_set::<T>(body) {
        Ok(events) => events,
        Err(err) => {
            warn!(service = T::KIND.name(), error = %err, "Dropping undecodable event");
            return;
        }
    };

    for event in events {
        if let Some(hook) = hook.lock().expect("hook lock poisoned").as_ref() {
            hook(&event);
        }
        bus.broadcast(event);
    }
}

/// Decode a GENA propertyset body into state-variable events.
///
/// The body is `e:propertyset/e:property/<Variable>`; for AV services the
/// variable is `LastChange` whose *text* is a second XML document
/// (`Event/InstanceID val=".."/<Var val=".."/>`). Both passes are explicit.
/// Unknown variables are logged and skipped, never fatal.
pub(crate) fn decode_property_set<T: ServiceTraits>(
    body: &[u8],
) -> Result<Vec<StateVariableEvent<T::Variable>>, ControlError> {
    let root = Element::parse(BufReader::new(body))
        .map_err(|e| ControlError::parse("propertyset", e))?;

    if !root.name.ends_with("propertyset") {
        return Err(ControlError::parse(
            "propertyset",
            format!("unexpected root element {}", root.name),
        ));
    }

    let mut events = Vec::new();

    for property in element_children(&root) {
        for var_elem in element_children(property) {
            let Some(variable) = T::variable_from_str(&var_elem.name) else {
                debug!(
                    service = T::KIND.name(),
                    variable = var_elem.name.as_str(),
                    "Unknown event variable ignored"
                );
                continue;
            };

            let raw_value = var_elem
                .get_text()
                .map(|t| t.to_string())
                .unwrap_or_default();

            match decode_nested_change::<T>(&raw_value) {
                Some((instance_id, changes)) => {
                    // All-unknown nested content decodes to nothing; drop it
                    if !changes.is_empty() {
                        events.push(StateVariableEvent {
                            variable,
                            instance_id,
                            changes,
                        });
                    }
                }
                None => {
                    // Plain-valued variable (SystemUpdateID and friends)
                    let mut changes = BTreeMap::new();
                    changes.insert(variable, raw_value.trim().to_string());
                    events.push(StateVariableEvent {
                        variable,
                        instance_id: 0,
                        changes,
                    });
                }
            }
        }
    }

    Ok(events)
}

/// Second parsing pass over a LastChange value: the nested `Event`
/// document with one `InstanceID val="n"` per active instance.
fn decode_nested_change<T: ServiceTraits>(
    raw: &str,
) -> Option<(u32, BTreeMap<T::Variable, String>)> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.starts_with('<') {
        return None;
    }

    let event = Element::parse(BufReader::new(trimmed.as_bytes())).ok()?;
    if !event.name.ends_with("Event") {
        return None;
    }

    let instance = find_child_with_suffix(&event, "InstanceID")?;
    let instance_id = instance
        .attributes
        .get("val")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);

    let mut changes = BTreeMap::new();
    for elem in element_children(instance) {
        let Some(variable) = T::variable_from_str(&elem.name) else {
            debug!(
                service = T::KIND.name(),
                variable = elem.name.as_str(),
                "Unknown LastChange variable ignored"
            );
            continue;
        };
        let Some(value) = elem.attributes.get("val") else {
            continue;
        };
        changes.insert(variable, value.clone());
    }

    Some((instance_id, changes))
}

fn element_children(element: &Element) -> impl Iterator<Item = &Element> {
    element.children.iter().filter_map(|node| match node {
        XMLNode::Element(elem) => Some(elem),
        _ => None,
    })
}
