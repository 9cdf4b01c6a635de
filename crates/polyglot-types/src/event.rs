//! Kernel events

use crate::command::CommandRef;
use crate::error::Result;
use crate::events::{CommandFailed, CommandSucceeded};
use crate::identity::KernelUri;
use crate::registry::{EventKind, EventPayload};
use crate::routing::RoutingSlip;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// A published, shared event
pub type EventRef = Arc<KernelEvent>;

/// A result produced while handling a command.
///
/// Always correlated to the command that produced it. The routing slip
/// records the hops the event travelled back through.
#[derive(Debug)]
pub struct KernelEvent {
    payload: Box<dyn EventPayload>,
    command: CommandRef,
    routing_slip: Mutex<RoutingSlip>,
    timestamp: DateTime<Utc>,
}

impl KernelEvent {
    pub fn new(payload: impl EventKind, command: CommandRef) -> Self {
        Self::from_payload(Box::new(payload), command)
    }

    pub fn from_payload(payload: Box<dyn EventPayload>, command: CommandRef) -> Self {
        Self {
            payload,
            command,
            routing_slip: Mutex::new(RoutingSlip::new()),
            timestamp: Utc::now(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        self.payload.kind_name()
    }

    pub fn payload(&self) -> &dyn EventPayload {
        self.payload.as_ref()
    }

    pub fn downcast<T: EventKind>(&self) -> Option<&T> {
        self.payload.as_any().downcast_ref::<T>()
    }

    pub fn is<T: EventKind>(&self) -> bool {
        self.payload.kind_name() == T::NAME
    }

    /// The command this event is correlated to
    pub fn command(&self) -> &CommandRef {
        &self.command
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// `CommandSucceeded` or `CommandFailed`
    pub fn is_terminal(&self) -> bool {
        self.is::<CommandSucceeded>() || self.is::<CommandFailed>()
    }

    pub fn is_failure(&self) -> bool {
        self.is::<CommandFailed>()
    }

    pub fn routing_slip(&self) -> RoutingSlip {
        self.routing_slip.lock().clone()
    }

    pub fn stamp_routing_slip(&self, uri: &KernelUri) -> Result<()> {
        self.routing_slip.lock().stamp(uri)
    }

    /// Stamp `uri` unless it is already present
    pub fn stamp_if_absent(&self, uri: &KernelUri) -> bool {
        let mut slip = self.routing_slip.lock();
        if slip.contains(uri) {
            return false;
        }
        slip.stamp(uri).is_ok()
    }

    pub fn routing_slip_contains(&self, uri: &KernelUri) -> bool {
        self.routing_slip.lock().contains(uri)
    }

    pub fn set_routing_slip(&mut self, slip: RoutingSlip) {
        *self.routing_slip.get_mut() = slip;
    }

    pub fn into_ref(self) -> EventRef {
        Arc::new(self)
    }

    /// Take the event apart, e.g. to correlate its payload to another command
    pub fn into_parts(self) -> (Box<dyn EventPayload>, CommandRef, RoutingSlip) {
        (self.payload, self.command, self.routing_slip.into_inner())
    }
}

impl fmt::Display for KernelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} for {}", self.kind_name(), self.command)
    }
}
