//! Submission splitting
//!
//! Turns one submitted text into the sequence of commands it stands for:
//!
//! ```text
//! #!csharp                      SubmitCode("var x = 1;")   selector = csharp
//! var x = 1;              =>    AddPackage("Foo")          (from #!package)
//! #!package Foo                 SubmitCode("Get-Date")     selector = pwsh
//! #!pwsh
//! Get-Date
//! ```
//!
//! Compiler directives stay inside the language span they appear in.
//! Parameters bound on a kernel selector travel as properties of the code
//! command that follows it.

use crate::binder::{bind, BoundDirective};
use crate::catalog::DirectiveCatalog;
use crate::directive::DirectiveKind;
use crate::error::codes;
use crate::expression::ExpressionBinder;
use crate::parser::{parse, SyntaxNode};
use polyglot_types::commands::SubmitCode;
use polyglot_types::{Diagnostic, KernelCommand};

#[derive(Debug, Default)]
pub struct SplitResult {
    pub commands: Vec<KernelCommand>,
    pub diagnostics: Vec<Diagnostic>,
    /// False when the text contained no directive at all; the original
    /// command should then be handled unchanged.
    pub has_directives: bool,
}

impl SplitResult {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

#[derive(Default)]
struct PendingCode {
    kernel: Option<String>,
    text: String,
    selector: Option<BoundDirective>,
}

/// Split `code`, routed to `default_kernel`, into commands
pub async fn split_submission(
    code: &str,
    catalog: &DirectiveCatalog,
    default_kernel: Option<&str>,
    binder: Option<&dyn ExpressionBinder>,
) -> SplitResult {
    let parsed = parse(code, catalog, default_kernel);
    let mut result = SplitResult {
        commands: Vec::new(),
        diagnostics: parsed.diagnostics.clone(),
        has_directives: parsed.has_directives() || !parsed.diagnostics.is_empty(),
    };
    if !result.has_directives {
        return result;
    }

    let mut pending = PendingCode {
        kernel: default_kernel.map(str::to_string),
        ..PendingCode::default()
    };

    for node in &parsed.nodes {
        match node {
            SyntaxNode::Code(c) => {
                if pending.kernel != c.kernel {
                    flush(&mut pending, &mut result.commands);
                    pending.kernel = c.kernel.clone();
                }
                pending.text.push_str(parsed.text_of(c.span));
            }
            SyntaxNode::Directive(d) => match d.kind() {
                None => {}
                Some(DirectiveKind::CompilerDirective) => {
                    pending.text.push_str(parsed.text_of(d.span));
                }
                Some(DirectiveKind::KernelSelector { kernel_name }) => {
                    flush(&mut pending, &mut result.commands);
                    pending.kernel = Some(kernel_name.clone());
                    match bind(d, binder).await {
                        Ok(bound) => pending.selector = Some(bound),
                        Err(diagnostics) => result.diagnostics.extend(diagnostics),
                    }
                }
                Some(DirectiveKind::Action(factory)) => {
                    flush(&mut pending, &mut result.commands);
                    let bound = match bind(d, binder).await {
                        Ok(bound) => bound,
                        Err(diagnostics) => {
                            result.diagnostics.extend(diagnostics);
                            continue;
                        }
                    };
                    match factory(&bound) {
                        Ok(mut command) => {
                            if command.target_kernel_name().is_none() {
                                let owner = d.entry.as_ref().and_then(|e| e.owner.clone());
                                command.set_target_kernel_name(owner);
                            }
                            result.commands.push(command);
                        }
                        Err(message) => result.diagnostics.push(Diagnostic::error(
                            codes::EXPRESSION_BINDING_FAILED,
                            message,
                            d.span,
                        )),
                    }
                }
            },
        }
    }
    flush(&mut pending, &mut result.commands);

    result
}

fn flush(pending: &mut PendingCode, commands: &mut Vec<KernelCommand>) {
    let text = std::mem::take(&mut pending.text);
    let selector = pending.selector.take();
    let has_parameters = selector.as_ref().map_or(false, |s| !s.values().is_empty());
    if text.trim().is_empty() && !has_parameters {
        return;
    }

    let mut command = KernelCommand::new(SubmitCode::new(text));
    command.set_kernel_selector(pending.kernel.clone());
    if let Some(selector) = selector {
        for (name, value) in selector.values() {
            command.set_property(name.clone(), value.clone());
        }
    }
    commands.push(command);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::{DirectiveParameter, KernelDirective};
    use polyglot_types::commands::AddPackage;

    fn catalog() -> DirectiveCatalog {
        let mut catalog = DirectiveCatalog::new();
        catalog
            .add(KernelDirective::kernel_selector("#!csharp", "csharp"))
            .unwrap();
        catalog
            .add(KernelDirective::kernel_selector("#!pwsh", "pwsh"))
            .unwrap();
        catalog
            .add(
                KernelDirective::kernel_selector("#!value", "value")
                    .with_parameter(DirectiveParameter::new("--name")),
            )
            .unwrap();
        catalog
            .add_for_kernel(
                "csharp",
                KernelDirective::action("#!package", |bound| {
                    Ok(KernelCommand::new(AddPackage {
                        name: bound.get_str("--name").unwrap_or_default().to_string(),
                        version: None,
                    }))
                })
                .with_parameter(DirectiveParameter::new("--name").implicit().required()),
            )
            .unwrap();
        catalog.add(KernelDirective::compiler("#r")).unwrap();
        catalog
    }

    fn code_of(command: &KernelCommand) -> &str {
        &command.downcast::<SubmitCode>().expect("SubmitCode").code
    }

    #[tokio::test]
    async fn test_plain_code_is_not_split() {
        let result = split_submission("var x = 1;", &catalog(), Some("csharp"), None).await;
        assert!(!result.has_directives);
        assert!(result.commands.is_empty());
    }

    #[tokio::test]
    async fn test_split_by_selectors_and_actions() {
        let text = "#!csharp\n#r \"nuget:Foo\"\nvar x = 1;\n#!package Foo\n#!pwsh\nGet-Date\n";
        let result = split_submission(text, &catalog(), None, None).await;

        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        assert_eq!(result.commands.len(), 3);
        assert_eq!(code_of(&result.commands[0]), "#r \"nuget:Foo\"\nvar x = 1;\n");
        assert_eq!(result.commands[0].kernel_selector(), Some("csharp"));

        let package = result.commands[1].downcast::<AddPackage>().unwrap();
        assert_eq!(package.name, "Foo");
        assert_eq!(result.commands[1].target_kernel_name(), Some("csharp"));

        assert_eq!(code_of(&result.commands[2]), "Get-Date\n");
        assert_eq!(result.commands[2].kernel_selector(), Some("pwsh"));
    }

    #[tokio::test]
    async fn test_selector_parameters_become_properties() {
        let result = split_submission("#!value --name greeting\nhello", &catalog(), None, None).await;
        assert_eq!(result.commands.len(), 1);
        assert_eq!(
            result.commands[0].property("--name"),
            Some(serde_json::Value::String("greeting".to_string()))
        );
        assert_eq!(code_of(&result.commands[0]), "hello");
    }

    #[tokio::test]
    async fn test_action_directive_is_scoped_to_its_kernel() {
        // #!package belongs to csharp, so under pwsh it is just code
        let result = split_submission("#!pwsh\n#!package Foo", &catalog(), None, None).await;
        assert_eq!(result.commands.len(), 1);
        assert_eq!(code_of(&result.commands[0]), "#!package Foo");
    }

    #[tokio::test]
    async fn test_binding_errors_are_collected() {
        let result = split_submission("#!csharp\n#!package", &catalog(), None, None).await;
        assert!(result.has_errors());
        assert_eq!(result.diagnostics[0].code, codes::MISSING_REQUIRED_PARAMETER);
    }
}
