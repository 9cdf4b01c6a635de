//! Kind registry
//!
//! Command and event kinds are open sets. A concrete kind is any serde type
//! implementing [`CommandKind`] or [`EventKind`]; it becomes known to the
//! wire layer once it is registered on a [`KindRegistry`] under its stable
//! name. Handlers and middleware dispatch on that name, never on Rust types.
//!
//! Registering a kind twice is a no-op. Registering a different type under
//! an existing name fails immediately, so conflicts surface at startup.

use crate::error::{ModelError, Result};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

/// A concrete command kind
pub trait CommandKind: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    /// Stable wire name, e.g. `SubmitCode`
    const NAME: &'static str;
}

/// A concrete event kind
pub trait EventKind: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    /// Stable wire name, e.g. `ValueProduced`
    const NAME: &'static str;
}

/// Type-erased command payload
pub trait CommandPayload: fmt::Debug + Send + Sync + 'static {
    fn kind_name(&self) -> &'static str;
    fn to_json(&self) -> Result<Value>;
    fn as_any(&self) -> &dyn Any;
}

impl<T: CommandKind> CommandPayload for T {
    fn kind_name(&self) -> &'static str {
        T::NAME
    }

    fn to_json(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| ModelError::serialization(T::NAME, e))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Type-erased event payload
pub trait EventPayload: fmt::Debug + Send + Sync + 'static {
    fn kind_name(&self) -> &'static str;
    fn to_json(&self) -> Result<Value>;
    fn as_any(&self) -> &dyn Any;
}

impl<T: EventKind> EventPayload for T {
    fn kind_name(&self) -> &'static str {
        T::NAME
    }

    fn to_json(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| ModelError::serialization(T::NAME, e))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

type CommandDecoder = fn(Value) -> serde_json::Result<Box<dyn CommandPayload>>;
type EventDecoder = fn(Value) -> serde_json::Result<Box<dyn EventPayload>>;

fn decode_command<T: CommandKind>(value: Value) -> serde_json::Result<Box<dyn CommandPayload>> {
    Ok(Box::new(serde_json::from_value::<T>(value)?))
}

fn decode_event<T: EventKind>(value: Value) -> serde_json::Result<Box<dyn EventPayload>> {
    Ok(Box::new(serde_json::from_value::<T>(value)?))
}

pub(crate) struct Registration<D> {
    type_id: TypeId,
    type_name: &'static str,
    decode: D,
}

impl<D> Registration<D> {
    fn new<T: 'static>(decode: D) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            decode,
        }
    }
}

/// Typed handle returned by registration.
///
/// Carries the wire name and downcasts payloads back to `T`.
pub struct KindHandle<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> KindHandle<T> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T: CommandKind> KindHandle<T> {
    /// Downcast a command payload of this kind
    pub fn command<'a>(&self, payload: &'a dyn CommandPayload) -> Option<&'a T> {
        payload.as_any().downcast_ref::<T>()
    }
}

impl<T: EventKind> KindHandle<T> {
    /// Downcast an event payload of this kind
    pub fn event<'a>(&self, payload: &'a dyn EventPayload) -> Option<&'a T> {
        payload.as_any().downcast_ref::<T>()
    }
}

impl<T> Clone for KindHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for KindHandle<T> {}

impl<T> fmt::Debug for KindHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KindHandle").field(&self.name).finish()
    }
}

/// Registry of command and event kinds keyed by stable name
pub struct KindRegistry {
    commands: RwLock<CommandTable>,
    events: RwLock<EventTable>,
}

impl KindRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            commands: RwLock::new(HashMap::new()),
            events: RwLock::new(HashMap::new()),
        }
    }

    /// A registry holding every built-in command and event kind
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        crate::commands::register_builtin(&mut registry.commands.write());
        crate::events::register_builtin(&mut registry.events.write());
        registry
    }

    /// Register a command kind
    pub fn register_command<T: CommandKind>(&self) -> Result<KindHandle<T>> {
        let mut commands = self.commands.write();
        check_or_insert::<T, CommandDecoder>(&mut commands, T::NAME, decode_command::<T>)?;
        Ok(KindHandle::new(T::NAME))
    }

    /// Register an event kind
    pub fn register_event<T: EventKind>(&self) -> Result<KindHandle<T>> {
        let mut events = self.events.write();
        check_or_insert::<T, EventDecoder>(&mut events, T::NAME, decode_event::<T>)?;
        Ok(KindHandle::new(T::NAME))
    }

    /// Decode a command payload by wire name
    pub fn decode_command(&self, name: &str, value: Value) -> Result<Box<dyn CommandPayload>> {
        let decode = self
            .commands
            .read()
            .get(name)
            .map(|r| r.decode)
            .ok_or_else(|| ModelError::UnknownCommandType(name.to_string()))?;
        decode(value).map_err(|e| ModelError::serialization(name, e))
    }

    /// Decode an event payload by wire name
    pub fn decode_event(&self, name: &str, value: Value) -> Result<Box<dyn EventPayload>> {
        let decode = self
            .events
            .read()
            .get(name)
            .map(|r| r.decode)
            .ok_or_else(|| ModelError::UnknownEventType(name.to_string()))?;
        decode(value).map_err(|e| ModelError::serialization(name, e))
    }

    pub fn contains_command(&self, name: &str) -> bool {
        self.commands.read().contains_key(name)
    }

    pub fn contains_event(&self, name: &str) -> bool {
        self.events.read().contains_key(name)
    }

    /// Registered command names, sorted
    pub fn command_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.commands.read().keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Registered event names, sorted
    pub fn event_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.events.read().keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for KindRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KindRegistry")
            .field("commands", &self.command_names())
            .field("events", &self.event_names())
            .finish()
    }
}

fn check_or_insert<T: 'static, D>(
    map: &mut HashMap<&'static str, Registration<D>>,
    name: &'static str,
    decode: D,
) -> Result<()> {
    match map.get(name) {
        Some(existing) if existing.type_id == TypeId::of::<T>() => Ok(()),
        Some(existing) => Err(ModelError::DuplicateKind {
            name: name.to_string(),
            existing: existing.type_name,
            attempted: std::any::type_name::<T>(),
        }),
        None => {
            map.insert(name, Registration::new::<T>(decode));
            Ok(())
        }
    }
}

pub(crate) fn insert_command<T: CommandKind>(map: &mut CommandTable) {
    map.insert(T::NAME, Registration::new::<T>(decode_command::<T>));
}

pub(crate) fn insert_event<T: EventKind>(map: &mut EventTable) {
    map.insert(T::NAME, Registration::new::<T>(decode_event::<T>));
}

pub(crate) type CommandTable = HashMap<&'static str, Registration<CommandDecoder>>;
pub(crate) type EventTable = HashMap<&'static str, Registration<EventDecoder>>;
