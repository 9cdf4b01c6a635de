//! Wire envelopes
//!
//! Commands and events cross process boundaries as camelCase JSON documents:
//!
//! ```text
//! { "commandType": "SubmitCode", "command": { "code": "1+1", "targetKernelName": "csharp" },
//!   "token": "4f0c...", "id": "cmd_...", "routingSlip": ["kernel://host/"] }
//! { "eventType": "ValueProduced", "event": { ... }, "command": { ...command envelope... },
//!   "routingSlip": [...] }
//! ```
//!
//! Decoding resolves the kind through a [`KindRegistry`].

use crate::command::KernelCommand;
use crate::error::{ModelError, Result};
use crate::event::KernelEvent;
use crate::identity::{CommandId, CommandToken, KernelUri};
use crate::registry::KindRegistry;
use crate::routing::RoutingSlip;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const TARGET_KERNEL_NAME: &str = "targetKernelName";
const ORIGIN_URI: &str = "originUri";
const DESTINATION_URI: &str = "destinationUri";

/// Serialized form of a [`KernelCommand`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    pub command_type: String,
    pub command: Value,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub routing_slip: RoutingSlip,
}

impl CommandEnvelope {
    pub fn from_command(command: &KernelCommand) -> Result<Self> {
        let mut body = match command.payload().to_json()? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        if let Some(target) = command.target_kernel_name() {
            body.insert(TARGET_KERNEL_NAME.to_string(), Value::String(target.to_string()));
        }
        if let Some(origin) = command.origin_uri() {
            body.insert(ORIGIN_URI.to_string(), Value::String(origin.to_string()));
        }
        if let Some(destination) = command.destination_uri() {
            body.insert(DESTINATION_URI.to_string(), Value::String(destination.to_string()));
        }

        Ok(Self {
            command_type: command.kind_name().to_string(),
            command: Value::Object(body),
            token: command.token().to_string(),
            id: Some(command.id().to_string()),
            routing_slip: command.routing_slip(),
        })
    }

    /// Address the serialized command to `kernel_name` on the receiving side
    pub fn set_target_kernel_name(&mut self, kernel_name: &str) {
        self.set_field(TARGET_KERNEL_NAME, Value::String(kernel_name.to_string()));
    }

    pub fn set_origin_uri(&mut self, uri: &KernelUri) {
        self.set_field(ORIGIN_URI, Value::String(uri.to_string()));
    }

    pub fn set_destination_uri(&mut self, uri: &KernelUri) {
        self.set_field(DESTINATION_URI, Value::String(uri.to_string()));
    }

    fn set_field(&mut self, key: &str, value: Value) {
        if let Value::Object(body) = &mut self.command {
            body.insert(key.to_string(), value);
        }
    }

    /// Rebuild the command, resolving its kind through `registry`
    pub fn into_command(self, registry: &KindRegistry) -> Result<KernelCommand> {
        let target = string_field(&self.command, TARGET_KERNEL_NAME);
        let origin = uri_field(&self.command, ORIGIN_URI)?;
        let destination = uri_field(&self.command, DESTINATION_URI)?;

        let payload = registry.decode_command(&self.command_type, self.command)?;
        let mut command = KernelCommand::from_payload(payload);

        let id = self
            .id
            .as_deref()
            .and_then(|id| CommandId::parse(id).ok())
            .unwrap_or_default();
        if self.token.is_empty() {
            return Err(ModelError::InvalidEnvelope("command token is empty".to_string()));
        }
        command.set_identity(id, CommandToken::from(self.token));
        command.set_target_kernel_name(target);
        command.set_origin_uri(origin);
        command.set_destination_uri(destination);
        command.set_routing_slip(self.routing_slip);
        Ok(command)
    }
}

/// Serialized form of a [`KernelEvent`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_type: String,
    pub event: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandEnvelope>,
    #[serde(default)]
    pub routing_slip: RoutingSlip,
}

impl EventEnvelope {
    pub fn from_event(event: &KernelEvent) -> Result<Self> {
        Ok(Self {
            event_type: event.kind_name().to_string(),
            event: event.payload().to_json()?,
            command: Some(CommandEnvelope::from_command(event.command())?),
            routing_slip: event.routing_slip(),
        })
    }

    /// Rebuild the event together with its correlated command
    pub fn into_event(self, registry: &KindRegistry) -> Result<KernelEvent> {
        let command = self
            .command
            .ok_or_else(|| ModelError::InvalidEnvelope(format!("{} has no command", self.event_type)))?
            .into_command(registry)?;
        let payload = registry.decode_event(&self.event_type, self.event)?;
        let mut event = KernelEvent::from_payload(payload, command.into_ref());
        event.set_routing_slip(self.routing_slip);
        Ok(event)
    }
}

/// Either kind of envelope, as read from a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    Command(CommandEnvelope),
    Event(EventEnvelope),
}

impl Envelope {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ModelError::serialization("envelope", e))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ModelError::InvalidEnvelope(e.to_string()))
    }
}

impl From<CommandEnvelope> for Envelope {
    fn from(envelope: CommandEnvelope) -> Self {
        Envelope::Command(envelope)
    }
}

impl From<EventEnvelope> for Envelope {
    fn from(envelope: EventEnvelope) -> Self {
        Envelope::Event(envelope)
    }
}

fn string_field(body: &Value, key: &str) -> Option<String> {
    body.get(key).and_then(Value::as_str).map(str::to_string)
}

fn uri_field(body: &Value, key: &str) -> Result<Option<KernelUri>> {
    string_field(body, key)
        .map(|s| KernelUri::parse(&s))
        .transpose()
}
