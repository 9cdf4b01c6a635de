//! Submission parser
//!
//! Parsing is total: every input yields a [`ParsedSubmission`], and problems
//! are reported as diagnostics on it rather than as errors.

use crate::catalog::{CatalogEntry, DirectiveCatalog};
use crate::directive::DirectiveKind;
use crate::error::codes;
use crate::lexer::{self, ArgToken, DirectiveLine, Segment};
use polyglot_types::{Diagnostic, TextSpan};

/// Language code routed to `kernel`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeNode {
    pub span: TextSpan,
    pub kernel: Option<String>,
}

/// A directive line resolved against the catalog
#[derive(Debug, Clone)]
pub struct DirectiveNode {
    pub name: String,
    pub name_span: TextSpan,
    pub args: Vec<ArgToken>,
    pub span: TextSpan,
    /// `None` when the directive is unknown
    pub entry: Option<CatalogEntry>,
    /// Kernel in effect where the directive appears
    pub kernel: Option<String>,
}

impl DirectiveNode {
    pub fn kind(&self) -> Option<&DirectiveKind> {
        self.entry.as_ref().map(|e| e.directive.kind())
    }

    pub fn is_compiler_directive(&self) -> bool {
        matches!(self.kind(), Some(DirectiveKind::CompilerDirective))
    }
}

#[derive(Debug, Clone)]
pub enum SyntaxNode {
    Code(CodeNode),
    Directive(DirectiveNode),
}

#[derive(Debug, Clone)]
pub struct ParsedSubmission {
    pub text: String,
    pub nodes: Vec<SyntaxNode>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ParsedSubmission {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    /// Whether any directive other than a compiler directive was found
    pub fn has_directives(&self) -> bool {
        self.directive_nodes().any(|d| !d.is_compiler_directive())
    }

    pub fn directive_nodes(&self) -> impl Iterator<Item = &DirectiveNode> {
        self.nodes.iter().filter_map(|n| match n {
            SyntaxNode::Directive(d) => Some(d),
            SyntaxNode::Code(_) => None,
        })
    }

    pub fn text_of(&self, span: TextSpan) -> &str {
        self.text.get(span.start..span.end).unwrap_or("")
    }
}

/// Parse `text` against `catalog`, starting out routed to `default_kernel`
pub fn parse(text: &str, catalog: &DirectiveCatalog, default_kernel: Option<&str>) -> ParsedSubmission {
    let mut nodes: Vec<SyntaxNode> = Vec::new();
    let mut diagnostics = Vec::new();
    let mut current = default_kernel.map(str::to_string);

    for segment in lexer::lex(text) {
        match segment {
            Segment::Code(span) => push_code(&mut nodes, span, &current),
            Segment::Directive(line) => {
                match catalog.find(&line.name, current.as_deref()) {
                    Some(entry) => {
                        if let DirectiveKind::KernelSelector { kernel_name } = entry.directive.kind() {
                            let selected = kernel_name.clone();
                            nodes.push(directive_node(line, Some(entry.clone()), &current));
                            current = Some(selected);
                        } else {
                            nodes.push(directive_node(line, Some(entry.clone()), &current));
                        }
                    }
                    None if !line.compiler && catalog.is_exhaustive_for(current.as_deref()) => {
                        diagnostics.push(Diagnostic::error(
                            codes::UNKNOWN_DIRECTIVE,
                            format!("Unrecognized magic command: {}", line.name),
                            line.name_span,
                        ));
                        nodes.push(directive_node(line, None, &current));
                    }
                    None => {
                        tracing::trace!(directive = %line.name, "Treating unknown directive as code");
                        push_code(&mut nodes, line.span, &current);
                    }
                }
            }
        }
    }

    ParsedSubmission {
        text: text.to_string(),
        nodes,
        diagnostics,
    }
}

fn directive_node(line: DirectiveLine, entry: Option<CatalogEntry>, kernel: &Option<String>) -> SyntaxNode {
    SyntaxNode::Directive(DirectiveNode {
        name: line.name,
        name_span: line.name_span,
        args: line.args,
        span: line.span,
        entry,
        kernel: kernel.clone(),
    })
}

fn push_code(nodes: &mut Vec<SyntaxNode>, span: TextSpan, kernel: &Option<String>) {
    if let Some(SyntaxNode::Code(last)) = nodes.last_mut() {
        if last.kernel == *kernel && last.span.end == span.start {
            last.span.end = span.end;
            return;
        }
    }
    nodes.push(SyntaxNode::Code(CodeNode {
        span,
        kernel: kernel.clone(),
    }));
}
