//! Identity types for commands and kernels
//!
//! - [`CommandId`]: a random UUID per command instance
//! - [`CommandToken`]: the causal token; children extend their parent's token
//! - [`KernelUri`]: the endpoint identifier stamped onto routing slips

use crate::error::{ModelError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to generate ID types with common implementations
macro_rules! define_id_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random ID
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse from a string (with or without prefix)
            pub fn parse(s: &str) -> std::result::Result<Self, uuid::Error> {
                let s = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(s)?))
            }

            /// Get the inner UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_id_type!(CommandId, "cmd", "Unique identifier for a command instance");
define_id_type!(DisplayId, "display", "Identifier for an updatable displayed value");

/// Causal token of a command.
///
/// A top-level command gets a random base token. Commands issued while
/// handling it get `{parent}.{n}`, so ancestry is a prefix check on tokens
/// and never needs a live parent pointer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandToken(String);

impl CommandToken {
    /// Fresh random base token
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Token for a command deferred on a kernel
    pub fn deferred() -> Self {
        Self(format!("deferredCommand::{}", Uuid::new_v4().simple()))
    }

    /// Token of the `n`th child of this token
    pub fn child(&self, n: u64) -> Self {
        Self(format!("{}.{}", self.0, n))
    }

    /// The base token, i.e. the token of the top-level ancestor
    pub fn root(&self) -> CommandToken {
        match self.0.split_once('.') {
            Some((root, _)) => Self(root.to_string()),
            None => self.clone(),
        }
    }

    /// Token of the direct parent, if this is a child token
    pub fn parent(&self) -> Option<CommandToken> {
        self.0
            .rsplit_once('.')
            .map(|(parent, _)| Self(parent.to_string()))
    }

    /// True if `self` equals `other` or was derived from it
    pub fn is_self_or_descendant_of(&self, other: &CommandToken) -> bool {
        self.0 == other.0
            || (self.0.len() > other.0.len()
                && self.0.starts_with(other.0.as_str())
                && self.0.as_bytes()[other.0.len()] == b'.')
    }

    /// True if both tokens share a top-level ancestor
    pub fn has_same_root_as(&self, other: &CommandToken) -> bool {
        self.root() == other.root()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CommandToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CommandToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommandToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CommandToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Endpoint identifier of a kernel: `kernel://{host}/{name}`.
///
/// Comparison through [`KernelUri::same_endpoint`] ignores any query string
/// and trailing slash, which is how routing slips compare entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KernelUri(String);

impl KernelUri {
    pub const SCHEME: &'static str = "kernel://";

    /// URI of a kernel hosted in this process
    pub fn local(host: &str, name: &str) -> Self {
        Self(format!("{}{}/{}", Self::SCHEME, host, name))
    }

    /// Parse a URI, requiring the `kernel://` scheme and a host
    pub fn parse(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix(Self::SCHEME)
            .ok_or_else(|| ModelError::InvalidUri(s.to_string()))?;
        if rest.is_empty() || rest.starts_with('/') {
            return Err(ModelError::InvalidUri(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// Append a path segment
    pub fn join(&self, segment: &str) -> Self {
        Self(format!("{}/{}", self.normalized().trim_end_matches('/'), segment))
    }

    /// The URI without query string or trailing slash
    pub fn normalized(&self) -> &str {
        let s = match self.0.split_once('?') {
            Some((base, _)) => base,
            None => self.0.as_str(),
        };
        s.trim_end_matches('/')
    }

    /// The host segment
    pub fn host(&self) -> &str {
        let rest = self.normalized().trim_start_matches(Self::SCHEME);
        rest.split('/').next().unwrap_or(rest)
    }

    /// The last path segment, normally the kernel name
    pub fn kernel_name(&self) -> Option<&str> {
        let rest = self.normalized().trim_start_matches(Self::SCHEME);
        rest.split_once('/')
            .and_then(|(_, path)| path.rsplit('/').next())
            .filter(|name| !name.is_empty())
    }

    /// Compare two URIs ignoring query strings
    pub fn same_endpoint(&self, other: &KernelUri) -> bool {
        self.normalized() == other.normalized()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KernelUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
