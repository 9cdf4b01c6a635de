//! Routing slips and scheduling scopes
//!
//! A [`RoutingSlip`] records every endpoint a command or event passed
//! through. Entries are unique: stamping a visited endpoint again is a
//! routing loop and fails.
//!
//! A [`SchedulingScope`] is the serialization domain of a command. Scopes
//! are hierarchical (`root/csharp/session`), and a scope *contains* another
//! when the other is one of its prefixes.

use crate::error::{ModelError, Result};
use crate::identity::KernelUri;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Append-only ordered set of visited endpoints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<KernelUri>", into = "Vec<KernelUri>")]
pub struct RoutingSlip {
    entries: Vec<KernelUri>,
}

impl RoutingSlip {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `uri`, failing with [`ModelError::RoutingLoopDetected`] if it
    /// is already present.
    pub fn stamp(&mut self, uri: &KernelUri) -> Result<()> {
        if self.contains(uri) {
            return Err(ModelError::RoutingLoopDetected {
                uri: uri.normalized().to_string(),
                slip: self.entries.iter().map(|e| e.to_string()).collect(),
            });
        }
        self.entries.push(uri.clone());
        Ok(())
    }

    /// Whether `uri` was already visited, ignoring query strings
    pub fn contains(&self, uri: &KernelUri) -> bool {
        self.entries.iter().any(|e| e.same_endpoint(uri))
    }

    /// Snapshot of the entries in stamp order
    pub fn to_array(&self) -> Vec<KernelUri> {
        self.entries.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KernelUri> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `other` is a prefix of this slip
    pub fn starts_with(&self, other: &RoutingSlip) -> bool {
        other.len() <= self.len()
            && self
                .entries
                .iter()
                .zip(other.entries.iter())
                .all(|(a, b)| a.same_endpoint(b))
    }

    /// Extend this slip with the hops of `other` that follow the shared
    /// prefix. Used when a remote peer hands back a slip that started as
    /// a copy of this one.
    pub fn continue_with(&mut self, other: &RoutingSlip) -> Result<()> {
        let skip = if other.starts_with(self) { self.len() } else { 0 };
        for uri in other.entries.iter().skip(skip) {
            self.stamp(uri)?;
        }
        Ok(())
    }
}

impl TryFrom<Vec<KernelUri>> for RoutingSlip {
    type Error = ModelError;

    fn try_from(entries: Vec<KernelUri>) -> Result<Self> {
        let mut slip = RoutingSlip::new();
        for uri in &entries {
            slip.stamp(uri)?;
        }
        Ok(slip)
    }
}

impl From<RoutingSlip> for Vec<KernelUri> {
    fn from(slip: RoutingSlip) -> Self {
        slip.entries
    }
}

impl fmt::Display for RoutingSlip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = self.entries.iter().map(|e| e.as_str()).collect();
        write!(f, "[{}]", parts.join(" -> "))
    }
}

/// Hierarchical key identifying a serialization domain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchedulingScope {
    parts: Vec<String>,
}

impl SchedulingScope {
    const SEPARATOR: char = '/';

    /// Parse a `/` or `.` separated scope string
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<String> = s
            .split(|c| c == Self::SEPARATOR || c == '.')
            .map(str::trim)
            .map(str::to_string)
            .collect();
        if parts.iter().any(String::is_empty) {
            return Err(ModelError::InvalidScope(s.to_string()));
        }
        Ok(Self { parts })
    }

    /// A single-segment scope
    pub fn root(name: &str) -> Self {
        Self {
            parts: vec![name.to_string()],
        }
    }

    /// A child scope one level below this one
    pub fn append(&self, part: &str) -> Self {
        let mut parts = self.parts.clone();
        parts.push(part.to_string());
        Self { parts }
    }

    /// True if `other` is this scope or one of its ancestors
    pub fn contains(&self, other: &SchedulingScope) -> bool {
        other.parts.len() <= self.parts.len()
            && self.parts.iter().zip(other.parts.iter()).all(|(a, b)| a == b)
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn depth(&self) -> usize {
        self.parts.len()
    }
}

impl fmt::Display for SchedulingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.parts.join("/"))
    }
}

impl TryFrom<String> for SchedulingScope {
    type Error = ModelError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<SchedulingScope> for String {
    fn from(scope: SchedulingScope) -> Self {
        scope.to_string()
    }
}
