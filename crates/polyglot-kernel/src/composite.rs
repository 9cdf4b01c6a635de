//! Composite kernel
//!
//! A composite owns child kernels and routes each command to one of them:
//!
//! 1. the kernel named by the command's target (name or alias)
//! 2. the kernel chosen by a kernel-selector directive
//! 3. a handler registered on the composite itself
//! 4. the default kernel
//!
//! Otherwise the command fails with a routing error. Every hop through a
//! composite is stamped on the command's routing slip, so a command that
//! comes back to a composite it already passed through is rejected.

use crate::error::{KernelError, Result};
use crate::handler::TypedCommand;
use crate::kernel::{CompositeState, Kernel, KernelRole, DEFAULT_HOST};
use polyglot_directives::KernelDirective;
use polyglot_types::commands::{Quit, RequestKernelInfo};
use polyglot_types::events::KernelInfoProduced;
use polyglot_types::{KernelCommand, KernelInfo, KernelUri};
use std::ops::Deref;
use tracing::info;

/// A kernel routing commands to its children
#[derive(Clone, Debug)]
pub struct CompositeKernel {
    kernel: Kernel,
}

impl CompositeKernel {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_host(name, DEFAULT_HOST)
    }

    /// A composite whose URI, and its children's, use `host`
    pub fn with_host(name: impl Into<String>, host: &str) -> Self {
        let kernel = Kernel::with_role(
            name.into(),
            KernelUri::local(host, ""),
            KernelRole::Composite(CompositeState::default()),
        );

        kernel.register_command_handler(|_: TypedCommand<RequestKernelInfo>, context| async move {
            let kernel = context.handling_kernel().clone();
            for kernel_info in kernel.kernel_infos() {
                context.publish(KernelInfoProduced { kernel_info });
            }
            Ok(())
        });
        kernel.register_command_handler(|command: TypedCommand<Quit>, context| async move {
            let kernel = context.handling_kernel().root();
            kernel.cancel_in_flight(None, command.command().token());
            Ok(())
        });

        Self { kernel }
    }

    /// Add `kernel` under its name and aliases
    pub fn add(&self, kernel: Kernel) -> Result<()> {
        self.add_with_aliases(kernel, &[])
    }

    /// Add `kernel`, registering additional aliases. The first kernel added
    /// becomes the default kernel.
    pub fn add_with_aliases(&self, kernel: Kernel, aliases: &[&str]) -> Result<()> {
        if kernel.parent().is_some() {
            return Err(KernelError::AlreadyAdopted(kernel.name()));
        }
        let name = kernel.name();
        let mut names: Vec<String> = Vec::new();
        for candidate in std::iter::once(name.clone())
            .chain(kernel.aliases())
            .chain(aliases.iter().map(|a| a.to_string()))
        {
            if !names.contains(&candidate) {
                names.push(candidate);
            }
        }

        let state = self.state();
        {
            let children = state.children.read();
            for candidate in &names {
                if self.kernel.answers_to(candidate) || children.iter().any(|c| c.answers_to(candidate)) {
                    return Err(KernelError::DuplicateKernelName(candidate.clone()));
                }
            }
        }

        let mut selector = KernelDirective::kernel_selector(format!("#!{}", name), name.clone());
        for alias in names.iter().skip(1) {
            selector = selector.with_alias(format!("#!{}", alias));
        }
        for parameter in kernel.selector_parameters() {
            selector = selector.with_parameter(parameter);
        }
        self.kernel.add_directive(selector)?;

        let extra: Vec<String> = aliases
            .iter()
            .map(|a| a.to_string())
            .filter(|a| !kernel.answers_to(a))
            .collect();
        kernel.update_info(|info| info.aliases.extend(extra));
        kernel.adopt(&self.kernel);

        state.children.write().push(kernel.clone());
        {
            let mut default = state.default_kernel_name.write();
            if default.is_none() {
                *default = Some(name.clone());
            }
        }
        info!(composite = %self.kernel.name(), kernel = %name, uri = %kernel.uri(), "kernel added");
        Ok(())
    }

    pub fn default_kernel_name(&self) -> Option<String> {
        self.state().default_kernel_name.read().clone()
    }

    /// Route commands without a target to `name`
    pub fn set_default_kernel_name(&self, name: &str) -> Result<()> {
        let child = self
            .kernel
            .find_child(name)
            .ok_or_else(|| KernelError::KernelNotFound(name.to_string()))?;
        *self.state().default_kernel_name.write() = Some(child.name());
        Ok(())
    }

    pub fn children(&self) -> Vec<Kernel> {
        self.state().children.read().clone()
    }

    /// The composite itself or the child answering to `name`
    pub fn find_kernel_by_name(&self, name: &str) -> Option<Kernel> {
        if self.kernel.answers_to(name) {
            return Some(self.kernel.clone());
        }
        self.kernel.find_child(name)
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn into_kernel(self) -> Kernel {
        self.kernel
    }

    fn state(&self) -> &CompositeState {
        match self.kernel.composite_state() {
            Some(state) => state,
            None => unreachable!("a CompositeKernel always wraps a composite"),
        }
    }
}

impl Deref for CompositeKernel {
    type Target = Kernel;

    fn deref(&self) -> &Kernel {
        &self.kernel
    }
}

impl From<CompositeKernel> for Kernel {
    fn from(composite: CompositeKernel) -> Self {
        composite.kernel
    }
}

impl Kernel {
    /// Direct child answering to `name`
    pub fn find_child(&self, name: &str) -> Option<Kernel> {
        self.composite_state()?
            .children
            .read()
            .iter()
            .find(|child| child.answers_to(name))
            .cloned()
    }

    /// This kernel's info followed by every descendant's
    pub fn kernel_infos(&self) -> Vec<KernelInfo> {
        let mut infos = vec![self.kernel_info()];
        if let Some(state) = self.composite_state() {
            for child in state.children.read().iter() {
                infos.extend(child.kernel_infos());
            }
        }
        infos
    }

    /// Resolve the kernel that will handle `command`, stamping the routing
    /// slip for every composite passed through and assigning the target's
    /// scheduling scope.
    pub(crate) fn route(&self, command: &mut KernelCommand) -> Result<Kernel> {
        let Some(state) = self.composite_state() else {
            self.assign_scope(command);
            return Ok(self.clone());
        };

        match self.select_child(state, command)? {
            None => {
                self.assign_scope(command);
                Ok(self.clone())
            }
            Some(child) => {
                command.stamp_routing_slip(&self.uri())?;
                child.route(command)
            }
        }
    }

    fn select_child(&self, state: &CompositeState, command: &KernelCommand) -> Result<Option<Kernel>> {
        let requested = command.target_kernel_name().or(command.kernel_selector());
        if let Some(name) = requested {
            if !self.answers_to(name) {
                return self
                    .find_child(name)
                    .map(Some)
                    .ok_or_else(|| KernelError::KernelNotFound(name.to_string()));
            }
        }

        if self.has_handler(command.kind_name()) {
            return Ok(None);
        }

        let default = state.default_kernel_name.read().clone();
        match default {
            Some(name) => self
                .find_child(&name)
                .map(Some)
                .ok_or(KernelError::KernelNotFound(name)),
            None => Err(KernelError::NoSuitableKernel {
                kind: command.kind_name().to_string(),
            }),
        }
    }

    fn assign_scope(&self, command: &mut KernelCommand) {
        if command.scheduling_scope().is_none() {
            command.set_scheduling_scope(self.scheduling_scope());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyglot_types::commands::SubmitCode;
    use polyglot_types::ErrorKind;

    fn leaf(name: &str) -> Kernel {
        let kernel = Kernel::new(name);
        kernel.register_command_handler(|_: TypedCommand<SubmitCode>, _| async move { Ok(()) });
        kernel
    }

    #[test]
    fn test_first_child_becomes_default() {
        let composite = CompositeKernel::new(".NET");
        composite.add(leaf("csharp")).unwrap();
        composite.add(leaf("pwsh")).unwrap();

        assert_eq!(composite.default_kernel_name().as_deref(), Some("csharp"));
        composite.set_default_kernel_name("pwsh").unwrap();
        assert_eq!(composite.default_kernel_name().as_deref(), Some("pwsh"));
        assert!(composite.set_default_kernel_name("fsharp").is_err());
    }

    #[test]
    fn test_names_and_aliases_must_be_unique() {
        let composite = CompositeKernel::new(".NET");
        composite.add_with_aliases(leaf("csharp"), &["c#"]).unwrap();

        assert!(matches!(
            composite.add(leaf("csharp")),
            Err(KernelError::DuplicateKernelName(_))
        ));
        assert!(matches!(
            composite.add_with_aliases(leaf("other"), &["c#"]),
            Err(KernelError::DuplicateKernelName(_))
        ));
        assert_eq!(composite.find_kernel_by_name("c#").map(|k| k.name()).as_deref(), Some("csharp"));
    }

    #[test]
    fn test_children_share_scheduler_and_get_nested_identity() {
        let composite = CompositeKernel::with_host(".NET", "host");
        let csharp = leaf("csharp");
        composite.add(csharp.clone()).unwrap();

        assert_eq!(csharp.uri().as_str(), "kernel://host/csharp");
        assert_eq!(csharp.scheduling_scope().to_string(), ".NET/csharp");
        assert!(csharp.root().ptr_eq(&composite));
        assert!(std::sync::Arc::ptr_eq(&csharp.scheduler(), &composite.scheduler()));
    }

    #[test]
    fn test_selectors_are_registered_for_children() {
        let composite = CompositeKernel::new(".NET");
        composite.add_with_aliases(leaf("csharp"), &["c#"]).unwrap();

        let catalog = composite.directive_catalog();
        assert!(catalog.find("#!csharp", None).is_some());
        assert!(catalog.find("#!c#", None).is_some());
    }

    #[tokio::test]
    async fn test_unknown_target_is_a_routing_error() {
        let composite = CompositeKernel::new(".NET");
        composite.add(leaf("csharp")).unwrap();

        let result = composite
            .send(KernelCommand::new(SubmitCode::new("x")).with_target("fsharp"))
            .await;
        let failure = result.failure().unwrap();
        assert_eq!(failure.kind, ErrorKind::Routing);
        assert!(failure.message.contains("fsharp"));
    }

    #[tokio::test]
    async fn test_composite_without_children_cannot_route_code() {
        let composite = CompositeKernel::new(".NET");
        let result = composite.send(KernelCommand::new(SubmitCode::new("x"))).await;
        assert_eq!(result.failure().unwrap().kind, ErrorKind::Routing);
    }
}
