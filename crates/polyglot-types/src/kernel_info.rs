//! Kernel descriptions exchanged with front ends and remote hosts

use crate::identity::KernelUri;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelCommandInfo {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelDirectiveInfo {
    pub name: String,
}

/// Description of a kernel: names, language, endpoint and capabilities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelInfo {
    pub local_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_version: Option<String>,
    pub uri: KernelUri,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_uri: Option<KernelUri>,
    #[serde(default)]
    pub supported_commands: Vec<KernelCommandInfo>,
    #[serde(default)]
    pub supported_directives: Vec<KernelDirectiveInfo>,
}

impl KernelInfo {
    pub fn new(local_name: impl Into<String>, uri: KernelUri) -> Self {
        Self {
            local_name: local_name.into(),
            aliases: Vec::new(),
            language_name: None,
            language_version: None,
            uri,
            remote_uri: None,
            supported_commands: Vec::new(),
            supported_directives: Vec::new(),
        }
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_language(mut self, name: impl Into<String>, version: Option<String>) -> Self {
        self.language_name = Some(name.into());
        self.language_version = version;
        self
    }

    /// The local name followed by every alias
    pub fn name_and_aliases(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.local_name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    /// Whether `name` is the local name or one of the aliases
    pub fn answers_to(&self, name: &str) -> bool {
        self.name_and_aliases().any(|n| n == name)
    }

    pub fn supports_command(&self, name: &str) -> bool {
        self.supported_commands.iter().any(|c| c.name == name)
    }

    pub fn is_proxy(&self) -> bool {
        self.remote_uri.is_some()
    }
}
