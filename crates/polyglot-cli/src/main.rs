//! Polyglot CLI - host polyglot notebook kernels
//!
//! # Quick Start
//!
//! ```bash
//! # Serve the kernels over stdin/stdout (one JSON envelope per line)
//! polyglot stdio
//!
//! # Run one submission and print its output
//! polyglot submit 'echo hello'
//! polyglot submit $'#!value --name greeting\nhello'
//!
//! # List the configured kernels
//! polyglot kernels
//! ```

use clap::{Parser, Subcommand};
use polyglot_kernel::{CompositeKernel, KernelHost};
use polyglot_types::commands::SubmitCode;
use polyglot_types::events::{
    DiagnosticsProduced, DisplayedValueProduced, ErrorProduced, ReturnValueProduced,
    StandardErrorValueProduced, StandardOutputValueProduced, ValueProduced,
};
use polyglot_types::{EventEnvelope, EventRef, KernelCommand, KindRegistry};
use std::sync::Arc;

mod config;
mod kernels;
mod logging;
mod shell;
mod stdio;

use crate::config::HostConfig;

/// Polyglot - a notebook kernel host
#[derive(Parser, Debug)]
#[command(name = "polyglot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (TOML, JSON, or YAML)
    #[arg(short, long, global = true, env = "POLYGLOT_CONFIG")]
    config: Option<String>,

    /// Kernel that receives submissions without a kernel selector
    #[arg(long, global = true)]
    default_kernel: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "POLYGLOT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (json, pretty)
    #[arg(long, global = true, env = "POLYGLOT_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the kernels over stdin/stdout
    Stdio,

    /// Submit code once and print the resulting events
    Submit {
        /// Code to submit; may start with a kernel selector such as `#!value`
        code: String,

        /// Print event envelopes as JSON lines instead of text
        #[arg(long)]
        json: bool,
    },

    /// List the kernels and what they support
    Kernels,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut host_config = HostConfig::load(cli.config.as_deref())?;
    if let Some(default_kernel) = cli.default_kernel {
        host_config.host.default_kernel = default_kernel;
    }
    if let Some(level) = cli.log_level {
        host_config.logging.level = level;
    }
    if let Some(format) = cli.log_format {
        host_config.logging.format = format;
    }
    host_config.validate()?;

    logging::init_logging(&host_config.logging)?;
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), command = ?cli.command, "starting polyglot");

    let composite = kernels::build_composite(&host_config)?;
    match cli.command {
        Commands::Stdio => serve_stdio(composite).await,
        Commands::Submit { code, json } => submit(&composite, code, json).await,
        Commands::Kernels => list_kernels(&composite),
    }
}

async fn serve_stdio(composite: CompositeKernel) -> anyhow::Result<()> {
    let registry = Arc::new(KindRegistry::with_defaults());
    let host = KernelHost::connect(composite.into_kernel(), stdio::stdio_connection(), registry).await?;

    tokio::select! {
        _ = host.stopped() => tracing::info!("peer disconnected"),
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
    }
    host.shutdown().await;
    Ok(())
}

async fn submit(composite: &CompositeKernel, code: String, json: bool) -> anyhow::Result<()> {
    let result = composite.send(KernelCommand::new(SubmitCode::new(code))).await;

    for event in result.events() {
        if json {
            println!("{}", serde_json::to_string(&EventEnvelope::from_event(event)?)?);
        } else {
            print_event(event);
        }
    }

    match result.failure() {
        Some(failure) => anyhow::bail!("{} ({})", failure.message, failure.kind),
        None => Ok(()),
    }
}

fn print_event(event: &EventRef) {
    if let Some(out) = event.downcast::<StandardOutputValueProduced>() {
        out.formatted_values.iter().for_each(|v| print!("{}", v.value));
    } else if let Some(err) = event.downcast::<StandardErrorValueProduced>() {
        err.formatted_values.iter().for_each(|v| eprint!("{}", v.value));
    } else if let Some(ret) = event.downcast::<ReturnValueProduced>() {
        ret.formatted_values.iter().for_each(|v| println!("{}", v.value));
    } else if let Some(display) = event.downcast::<DisplayedValueProduced>() {
        display.formatted_values.iter().for_each(|v| println!("{}", v.value));
    } else if let Some(value) = event.downcast::<ValueProduced>() {
        println!("{} = {}", value.name, value.formatted_value.value);
    } else if let Some(error) = event.downcast::<ErrorProduced>() {
        eprintln!("error: {}", error.message);
    } else if let Some(diagnostics) = event.downcast::<DiagnosticsProduced>() {
        for d in &diagnostics.diagnostics {
            eprintln!("{:?} {}: {}", d.severity, d.code, d.message);
        }
    }
}

fn list_kernels(composite: &CompositeKernel) -> anyhow::Result<()> {
    for info in composite.kernel_infos() {
        let language = match (&info.language_name, &info.language_version) {
            (Some(name), Some(version)) => format!("{name} {version}"),
            (Some(name), None) => name.clone(),
            _ => "-".to_string(),
        };
        println!("{:<12} {:<10} {}", info.local_name, language, info.uri);
        if !info.aliases.is_empty() {
            println!("{:<12} aliases: {}", "", info.aliases.join(", "));
        }
        let commands: Vec<_> = info.supported_commands.iter().map(|c| c.name.as_str()).collect();
        println!("{:<12} commands: {}", "", commands.join(", "));
    }
    Ok(())
}
