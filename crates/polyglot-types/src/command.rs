//! Kernel commands
//!
//! A [`KernelCommand`] is built and configured as an owned value, then
//! frozen into a [`CommandRef`] when it is sent. From that point only its
//! routing slip (append-only) and its property bag can change; the target
//! kernel and scheduling scope are fixed.

use crate::error::Result;
use crate::identity::{CommandId, CommandToken, KernelUri};
use crate::registry::{CommandKind, CommandPayload};
use crate::routing::{RoutingSlip, SchedulingScope};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A scheduled, shared command
pub type CommandRef = Arc<KernelCommand>;

/// String-keyed, case-insensitive property bag
#[derive(Debug, Clone, Default)]
pub struct Properties {
    entries: HashMap<String, (String, Value)>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        let key = key.into();
        self.entries
            .insert(key.to_lowercase(), (key, value))
            .map(|(_, v)| v)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(&key.to_lowercase()).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(&key.to_lowercase()).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_lowercase())
    }

    /// Entries with their original key spelling
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.values().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An instruction to a kernel
#[derive(Debug)]
pub struct KernelCommand {
    id: CommandId,
    token: CommandToken,
    parent_token: Option<CommandToken>,
    payload: Box<dyn CommandPayload>,
    target_kernel_name: Option<String>,
    kernel_selector: Option<String>,
    origin_uri: Option<KernelUri>,
    destination_uri: Option<KernelUri>,
    scheduling_scope: Option<SchedulingScope>,
    publish_completion: bool,
    properties: Mutex<Properties>,
    routing_slip: Mutex<RoutingSlip>,
    next_child: AtomicU64,
}

impl KernelCommand {
    /// Create a top-level command with a fresh token
    pub fn new(payload: impl CommandKind) -> Self {
        Self::from_payload(Box::new(payload))
    }

    /// Create a top-level command from an already erased payload
    pub fn from_payload(payload: Box<dyn CommandPayload>) -> Self {
        Self {
            id: CommandId::new(),
            token: CommandToken::new(),
            parent_token: None,
            payload,
            target_kernel_name: None,
            kernel_selector: None,
            origin_uri: None,
            destination_uri: None,
            scheduling_scope: None,
            publish_completion: true,
            properties: Mutex::new(Properties::new()),
            routing_slip: Mutex::new(RoutingSlip::new()),
            next_child: AtomicU64::new(1),
        }
    }

    /// Builder: address the command to a kernel by name or alias
    pub fn with_target(mut self, kernel_name: impl Into<String>) -> Self {
        self.target_kernel_name = Some(kernel_name.into());
        self
    }

    // ------------------------------------------------------------------
    // Payload
    // ------------------------------------------------------------------

    /// Stable wire name of the payload kind
    pub fn kind_name(&self) -> &'static str {
        self.payload.kind_name()
    }

    pub fn payload(&self) -> &dyn CommandPayload {
        self.payload.as_ref()
    }

    /// Downcast the payload to a concrete kind
    pub fn downcast<T: CommandKind>(&self) -> Option<&T> {
        self.payload.as_any().downcast_ref::<T>()
    }

    pub fn is<T: CommandKind>(&self) -> bool {
        self.payload.kind_name() == T::NAME
    }

    // ------------------------------------------------------------------
    // Identity and parentage
    // ------------------------------------------------------------------

    pub fn id(&self) -> CommandId {
        self.id
    }

    pub fn token(&self) -> &CommandToken {
        &self.token
    }

    pub fn parent_token(&self) -> Option<&CommandToken> {
        self.parent_token.as_ref()
    }

    pub fn is_top_level(&self) -> bool {
        self.parent_token.is_none()
    }

    /// Make this command a child of `parent`, deriving its token
    pub fn set_parent(&mut self, parent: &KernelCommand) {
        self.token = parent.next_child_token();
        self.parent_token = Some(parent.token.clone());
    }

    /// Restore identity received from a peer
    pub fn set_identity(&mut self, id: CommandId, token: CommandToken) {
        self.id = id;
        self.parent_token = token.parent();
        self.token = token;
    }

    /// Reserve the token of the next child of this command
    pub fn next_child_token(&self) -> CommandToken {
        let n = self.next_child.fetch_add(1, Ordering::Relaxed);
        self.token.child(n)
    }

    pub fn is_self_or_descendant_of(&self, other: &KernelCommand) -> bool {
        self.token.is_self_or_descendant_of(&other.token)
    }

    pub fn has_same_root_as(&self, other: &KernelCommand) -> bool {
        self.token.has_same_root_as(&other.token)
    }

    // ------------------------------------------------------------------
    // Routing metadata
    // ------------------------------------------------------------------

    pub fn target_kernel_name(&self) -> Option<&str> {
        self.target_kernel_name.as_deref()
    }

    pub fn set_target_kernel_name(&mut self, name: Option<String>) {
        self.target_kernel_name = name;
    }

    /// Kernel chosen by a kernel-selector directive, if any
    pub fn kernel_selector(&self) -> Option<&str> {
        self.kernel_selector.as_deref()
    }

    pub fn set_kernel_selector(&mut self, name: Option<String>) {
        self.kernel_selector = name;
    }

    pub fn origin_uri(&self) -> Option<&KernelUri> {
        self.origin_uri.as_ref()
    }

    pub fn set_origin_uri(&mut self, uri: Option<KernelUri>) {
        self.origin_uri = uri;
    }

    pub fn destination_uri(&self) -> Option<&KernelUri> {
        self.destination_uri.as_ref()
    }

    pub fn set_destination_uri(&mut self, uri: Option<KernelUri>) {
        self.destination_uri = uri;
    }

    pub fn scheduling_scope(&self) -> Option<&SchedulingScope> {
        self.scheduling_scope.as_ref()
    }

    pub fn set_scheduling_scope(&mut self, scope: SchedulingScope) {
        self.scheduling_scope = Some(scope);
    }

    /// Whether a successful completion of this command is reported
    pub fn publish_completion(&self) -> bool {
        self.publish_completion
    }

    pub fn set_publish_completion(&mut self, publish: bool) {
        self.publish_completion = publish;
    }

    // ------------------------------------------------------------------
    // Shared mutable state
    // ------------------------------------------------------------------

    pub fn property(&self, key: &str) -> Option<Value> {
        self.properties.lock().get(key).cloned()
    }

    pub fn set_property(&self, key: impl Into<String>, value: Value) {
        self.properties.lock().insert(key, value);
    }

    pub fn properties(&self) -> Properties {
        self.properties.lock().clone()
    }

    /// Snapshot of the routing slip
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

    /// Append the hops of `other` that follow the shared prefix
    pub fn continue_routing_slip(&self, other: &RoutingSlip) -> Result<()> {
        self.routing_slip.lock().continue_with(other)
    }

    pub fn set_routing_slip(&mut self, slip: RoutingSlip) {
        *self.routing_slip.get_mut() = slip;
    }

    pub fn into_ref(self) -> CommandRef {
        Arc::new(self)
    }
}

impl fmt::Display for KernelCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind_name(), self.token)?;
        if let Some(target) = &self.target_kernel_name {
            write!(f, " -> {}", target)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::SubmitCode;

    #[test]
    fn test_properties_are_case_insensitive() {
        let mut props = Properties::new();
        props.insert("Publish-Internal-Events", Value::Bool(true));

        assert_eq!(props.get("publish-internal-events"), Some(&Value::Bool(true)));
        assert!(props.contains_key("PUBLISH-INTERNAL-EVENTS"));
        assert_eq!(props.iter().next().map(|(k, _)| k), Some("Publish-Internal-Events"));
    }

    #[test]
    fn test_children_get_derived_tokens() {
        let parent = KernelCommand::new(SubmitCode::new("#!csharp\n1"));
        let mut first = KernelCommand::new(SubmitCode::new("1"));
        let mut second = KernelCommand::new(SubmitCode::new("2"));
        first.set_parent(&parent);
        second.set_parent(&parent);

        assert_eq!(first.token(), &parent.token().child(1));
        assert_eq!(second.token(), &parent.token().child(2));
        assert_eq!(first.parent_token(), Some(parent.token()));
        assert!(first.is_self_or_descendant_of(&parent));
        assert!(!parent.is_self_or_descendant_of(&first));
        assert!(first.has_same_root_as(&second));
    }

    #[test]
    fn test_downcast_by_kind() {
        let command = KernelCommand::new(SubmitCode::new("x")).with_target("csharp");
        assert!(command.is::<SubmitCode>());
        assert_eq!(command.downcast::<SubmitCode>().map(|c| c.code.as_str()), Some("x"));
        assert_eq!(command.target_kernel_name(), Some("csharp"));
        assert_eq!(command.kind_name(), "SubmitCode");
    }

    #[test]
    fn test_stamp_if_absent_does_not_fail_on_revisit() {
        let command = KernelCommand::new(SubmitCode::new("x")).into_ref();
        let uri = KernelUri::local("h", "csharp");
        assert!(command.stamp_if_absent(&uri));
        assert!(!command.stamp_if_absent(&uri));
        assert!(command.stamp_routing_slip(&uri).is_err());
        assert_eq!(command.routing_slip().len(), 1);
    }
}
