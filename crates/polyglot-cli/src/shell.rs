//! Shell kernel
//!
//! Runs each submission through the configured shell program and streams
//! its stdout and stderr lines as events. Cancelling the command kills the
//! process.

use crate::config::ShellConfig;
use anyhow::{bail, Context};
use polyglot_kernel::{Kernel, KernelInvocationContext, TypedCommand};
use polyglot_types::commands::SubmitCode;
use polyglot_types::events::{StandardErrorValueProduced, StandardOutputValueProduced};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::debug;

pub const SHELL_KERNEL_NAME: &str = "shell";

pub fn shell_kernel(config: &ShellConfig) -> Kernel {
    let kernel = Kernel::new(SHELL_KERNEL_NAME)
        .with_aliases(["sh"])
        .with_language("Shell", None);

    let shell = config.clone();
    kernel.register_command_handler(move |command: TypedCommand<SubmitCode>, context| {
        let shell = shell.clone();
        async move { run(&shell, &command.code, &context).await }
    });
    kernel
}

async fn run(shell: &ShellConfig, code: &str, context: &KernelInvocationContext) -> anyhow::Result<()> {
    let mut child = Command::new(&shell.program)
        .args(&shell.args)
        .arg(code)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to start '{}'", shell.program))?;
    debug!(program = %shell.program, pid = ?child.id(), "shell process started");

    let mut stdout = BufReader::new(child.stdout.take().context("stdout not captured")?).lines();
    let mut stderr = BufReader::new(child.stderr.take().context("stderr not captured")?).lines();
    let cancellation = context.cancellation_token();
    let (mut stdout_open, mut stderr_open) = (true, true);

    while stdout_open || stderr_open {
        tokio::select! {
            _ = cancellation.cancelled() => return kill(&mut child).await,
            line = stdout.next_line(), if stdout_open => match line? {
                Some(line) => context.publish(StandardOutputValueProduced::plain(format!("{line}\n"))),
                None => stdout_open = false,
            },
            line = stderr.next_line(), if stderr_open => match line? {
                Some(line) => context.publish(StandardErrorValueProduced::plain(format!("{line}\n"))),
                None => stderr_open = false,
            },
        }
    }

    let status = tokio::select! {
        _ = cancellation.cancelled() => return kill(&mut child).await,
        status = child.wait() => status?,
    };
    if !status.success() {
        bail!("'{}' exited with {}", shell.program, status);
    }
    Ok(())
}

/// The kernel reports the cancellation itself
async fn kill(child: &mut Child) -> anyhow::Result<()> {
    debug!(pid = ?child.id(), "killing cancelled shell process");
    child.kill().await.context("failed to kill shell process")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use polyglot_kernel::CompositeKernel;
    use polyglot_types::commands::Cancel;
    use polyglot_types::{ErrorKind, KernelCommand};
    use std::time::Duration;
    use tokio::time::timeout;

    fn composite() -> CompositeKernel {
        let composite = CompositeKernel::new("root");
        composite.add(shell_kernel(&ShellConfig::default())).unwrap();
        composite
    }

    #[tokio::test]
    async fn test_streams_stdout_and_stderr() {
        let result = composite()
            .send(KernelCommand::new(SubmitCode::new("echo out; echo err >&2")))
            .await;

        assert!(result.is_success(), "{:?}", result.failure());
        let out = result.first::<StandardOutputValueProduced>().unwrap();
        assert_eq!(out.formatted_values[0].value, "out\n");
        let err = result.first::<StandardErrorValueProduced>().unwrap();
        assert_eq!(err.formatted_values[0].value, "err\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails_the_command() {
        let result = composite()
            .send(KernelCommand::new(SubmitCode::new("exit 3")))
            .await;

        let failure = result.failure().unwrap();
        assert_eq!(failure.kind, ErrorKind::HandlerFault);
        assert!(failure.message.contains("exited"), "{}", failure.message);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_kills_the_process() {
        let composite = composite();
        let mut events = composite.subscribe();
        let running = {
            let composite = composite.clone();
            tokio::spawn(async move {
                composite
                    .send(KernelCommand::new(SubmitCode::new("echo started; exec sleep 30")))
                    .await
            })
        };

        loop {
            let event = events.recv().await.unwrap();
            if event.is::<StandardOutputValueProduced>() {
                break;
            }
        }
        let cancel = composite
            .send(KernelCommand::new(Cancel {}).with_target(SHELL_KERNEL_NAME))
            .await;
        assert!(cancel.is_success());

        let result = timeout(Duration::from_secs(5), running)
            .await
            .expect("cancelled shell command did not finish")
            .unwrap();
        assert_eq!(result.failure().unwrap().kind, ErrorKind::Cancelled);
    }
}
