//! Builds the composite kernel described by the host configuration

use crate::config::HostConfig;
use crate::shell::{shell_kernel, SHELL_KERNEL_NAME};
use anyhow::bail;
use polyglot_kernel::{CompositeKernel, ValueKernel, VALUE_KERNEL_NAME};
use tracing::info;

pub const ROOT_KERNEL_NAME: &str = ".NET";

pub fn build_composite(config: &HostConfig) -> anyhow::Result<CompositeKernel> {
    let composite = CompositeKernel::with_host(ROOT_KERNEL_NAME, &config.host.name);

    for name in &config.host.kernels {
        let kernel = match name.as_str() {
            SHELL_KERNEL_NAME => shell_kernel(&config.shell),
            VALUE_KERNEL_NAME => ValueKernel::create(),
            other => bail!("unknown kernel '{other}'"),
        };
        composite.add(kernel)?;
    }
    composite.set_default_kernel_name(&config.host.default_kernel)?;

    info!(
        host = %config.host.name,
        kernels = ?config.host.kernels,
        default_kernel = %config.host.default_kernel,
        "composite kernel ready"
    );
    Ok(composite)
}
