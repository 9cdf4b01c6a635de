//! Host Configuration
//!
//! Loaded from built-in defaults, `config/default.*`, `config/local.*`, an
//! explicit `--config` file and `POLYGLOT__SECTION__KEY` environment
//! variables, in increasing precedence.

use anyhow::bail;
use serde::{Deserialize, Serialize};

/// Kernels the host knows how to build
pub const KNOWN_KERNELS: &[&str] = &["shell", "value"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub host: HostSettings,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub shell: ShellConfig,
}

/// Kernel composition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSettings {
    /// Host name used in kernel URIs (`kernel://{name}/...`)
    #[serde(default = "default_host_name")]
    pub name: String,

    /// Kernel that receives submissions without a selector
    #[serde(default = "default_kernel")]
    pub default_kernel: String,

    /// Kernels added to the composite, in order
    #[serde(default = "default_kernels")]
    pub kernels: Vec<String>,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            name: default_host_name(),
            default_kernel: default_kernel(),
            kernels: default_kernels(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Program the `shell` kernel runs submissions through. The submitted code
/// is passed as the last argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    #[serde(default = "default_shell_program")]
    pub program: String,

    #[serde(default = "default_shell_args")]
    pub args: Vec<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: default_shell_program(),
            args: default_shell_args(),
        }
    }
}

// =============================================================================
// Default Functions
// =============================================================================

fn default_host_name() -> String {
    "local".to_string()
}

fn default_kernel() -> String {
    "shell".to_string()
}

fn default_kernels() -> Vec<String> {
    KNOWN_KERNELS.iter().map(|k| k.to_string()).collect()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_shell_program() -> String {
    if cfg!(windows) { "cmd" } else { "sh" }.to_string()
}

fn default_shell_args() -> Vec<String> {
    vec![if cfg!(windows) { "/C" } else { "-c" }.to_string()]
}

// =============================================================================
// Configuration Loading
// =============================================================================

impl HostConfig {
    /// Load configuration from files and environment
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false));

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("POLYGLOT")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("host.kernels")
                .try_parsing(true),
        );

        Self::from_builder(builder)
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> anyhow::Result<Self> {
        let config: HostConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.name.is_empty() {
            bail!("host.name must not be empty");
        }
        if let Some(unknown) = self
            .host
            .kernels
            .iter()
            .find(|k| !KNOWN_KERNELS.contains(&k.as_str()))
        {
            bail!(
                "unknown kernel '{unknown}' in host.kernels (known: {})",
                KNOWN_KERNELS.join(", ")
            );
        }
        if !self.host.kernels.contains(&self.host.default_kernel) {
            bail!(
                "default kernel '{}' is not enabled in host.kernels",
                self.host.default_kernel
            );
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            bail!("logging.format must be 'pretty' or 'json', got '{}'", self.logging.format);
        }
        if self.shell.program.is_empty() {
            bail!("shell.program must not be empty");
        }
        Ok(())
    }
}
