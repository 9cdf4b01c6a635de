//! Parameter binding
//!
//! Binds the argument tokens of a [`DirectiveNode`] against its directive's
//! parameter schema, evaluating value expressions through an optional
//! [`ExpressionBinder`]. All problems come back as diagnostics.

use crate::directive::{DirectiveParameter, KernelDirective, TypeHint};
use crate::error::codes;
use crate::expression::{ExpressionBinder, ValueExpression};
use crate::lexer::ArgToken;
use crate::parser::DirectiveNode;
use polyglot_types::{Diagnostic, TextSpan};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A directive with every parameter resolved to a JSON value
#[derive(Debug, Clone)]
pub struct BoundDirective {
    pub directive: Arc<KernelDirective>,
    pub span: TextSpan,
    /// Kernel in effect where the directive appeared
    pub kernel: Option<String>,
    values: BTreeMap<String, Value>,
}

impl BoundDirective {
    pub fn name(&self) -> &str {
        self.directive.name()
    }

    pub fn get(&self, parameter: &str) -> Option<&Value> {
        self.values.get(parameter)
    }

    pub fn get_str(&self, parameter: &str) -> Option<&str> {
        self.get(parameter).and_then(Value::as_str)
    }

    pub fn get_i64(&self, parameter: &str) -> Option<i64> {
        self.get(parameter).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, parameter: &str) -> bool {
        self.get(parameter).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Deserialize a parameter value
    pub fn get_as<T: DeserializeOwned>(&self, parameter: &str) -> Option<Result<T, serde_json::Error>> {
        self.get(parameter).map(|v| serde_json::from_value(v.clone()))
    }

    /// Bound values keyed by canonical parameter name
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }
}

enum RawValue<'a> {
    Token(&'a ArgToken),
    Present,
}

/// Bind `node` against its directive. Unknown directives produce no
/// diagnostics here; the parser already reported them.
pub async fn bind(
    node: &DirectiveNode,
    binder: Option<&dyn ExpressionBinder>,
) -> Result<BoundDirective, Vec<Diagnostic>> {
    let Some(entry) = &node.entry else {
        return Err(Vec::new());
    };
    let directive = &entry.directive;
    let mut diagnostics = Vec::new();
    let mut raw: Vec<(&DirectiveParameter, RawValue<'_>, TextSpan)> = Vec::new();

    let mut i = 0;
    while i < node.args.len() {
        let token = &node.args[i];
        i += 1;

        if token.is_option() {
            let Some(parameter) = directive.find_parameter(&token.raw) else {
                diagnostics.push(Diagnostic::error(
                    codes::UNKNOWN_PARAMETER_NAME,
                    format!("Unrecognized parameter name '{}'", token.raw),
                    token.span,
                ));
                if node.args.get(i).map(|t| !t.is_option()).unwrap_or(false) {
                    i += 1;
                }
                continue;
            };

            let next = node.args.get(i).filter(|t| !t.is_option());
            match (parameter.type_hint, next) {
                (TypeHint::Flag, Some(t)) if t.raw == "true" || t.raw == "false" => {
                    raw.push((parameter, RawValue::Token(t), t.span));
                    i += 1;
                }
                (TypeHint::Flag, _) => raw.push((parameter, RawValue::Present, token.span)),
                (_, Some(t)) => {
                    raw.push((parameter, RawValue::Token(t), t.span));
                    i += 1;
                }
                (_, None) => diagnostics.push(Diagnostic::error(
                    codes::MISSING_REQUIRED_PARAMETER,
                    format!("Missing value for parameter '{}'", parameter.name),
                    token.span,
                )),
            }
        } else if let Some(parameter) = directive.implicit_parameter() {
            raw.push((parameter, RawValue::Token(token), token.span));
        } else {
            diagnostics.push(Diagnostic::error(
                codes::UNKNOWN_PARAMETER_NAME,
                format!("Unrecognized parameter '{}'", token.raw),
                token.span,
            ));
        }
    }

    let mut collected: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    let mut invalid: Vec<&str> = Vec::new();
    for (parameter, value, span) in raw {
        let occurrences = collected.entry(parameter.name.clone()).or_default();
        if occurrences.len() >= parameter.max_occurrences {
            diagnostics.push(Diagnostic::error(
                codes::TOO_MANY_OCCURRENCES_OF_PARAMETER,
                format!("Parameter '{}' cannot appear more than {} time(s)", parameter.name, parameter.max_occurrences),
                span,
            ));
            continue;
        }
        match resolve(parameter, value, span, binder).await {
            Ok(v) => occurrences.push(v),
            Err(diagnostic) => {
                invalid.push(parameter.name.as_str());
                diagnostics.push(diagnostic);
            }
        }
    }

    let mut values = BTreeMap::new();
    for parameter in directive.parameters() {
        match collected.remove(&parameter.name) {
            Some(mut found) if !found.is_empty() => {
                let value = if parameter.max_occurrences > 1 {
                    Value::Array(found)
                } else {
                    found.remove(0)
                };
                values.insert(parameter.name.clone(), value);
            }
            _ => {
                if parameter.required {
                    if invalid.contains(&parameter.name.as_str()) {
                        continue;
                    }
                    diagnostics.push(Diagnostic::error(
                        codes::MISSING_REQUIRED_PARAMETER,
                        format!("Missing required parameter '{}'", parameter.name),
                        node.name_span,
                    ));
                } else if let Some(default) = parameter.default_value() {
                    values.insert(parameter.name.clone(), default);
                }
            }
        }
    }

    if diagnostics.is_empty() {
        Ok(BoundDirective {
            directive: directive.clone(),
            span: node.span,
            kernel: node.kernel.clone(),
            values,
        })
    } else {
        Err(diagnostics)
    }
}

async fn resolve(
    parameter: &DirectiveParameter,
    value: RawValue<'_>,
    span: TextSpan,
    binder: Option<&dyn ExpressionBinder>,
) -> Result<Value, Diagnostic> {
    let token = match value {
        RawValue::Present => return Ok(Value::Bool(true)),
        RawValue::Token(token) => token,
    };

    if let Some(expression) = ValueExpression::parse(&token.raw) {
        let Some(binder) = binder else {
            return Err(Diagnostic::error(
                codes::MISSING_BINDING_DELEGATE,
                format!("No binder is available for expression '{}'", token.raw),
                span,
            ));
        };
        let bound = binder
            .bind(&expression)
            .await
            .map_err(|e| Diagnostic::error(e.code(), e.to_string(), span))?;
        return match (parameter.type_hint, bound) {
            (TypeHint::Integer, Value::String(s)) => convert(parameter, &s, &s, span),
            (_, v) => Ok(v),
        };
    }

    convert(parameter, &token.raw, &token.unquoted(), span)
}

fn convert(parameter: &DirectiveParameter, raw: &str, text: &str, span: TextSpan) -> Result<Value, Diagnostic> {
    match parameter.type_hint {
        TypeHint::String => Ok(Value::String(text.to_string())),
        TypeHint::Integer => text.trim().parse::<i64>().map(Value::from).map_err(|_| {
            Diagnostic::error(
                codes::INVALID_VALUE_FOR_TYPE,
                format!("Invalid value '{}' for parameter '{}': expected an integer", text, parameter.name),
                span,
            )
        }),
        TypeHint::Flag => match text {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(Diagnostic::error(
                codes::INVALID_VALUE_FOR_TYPE,
                format!("Invalid value '{}' for parameter '{}': expected true or false", text, parameter.name),
                span,
            )),
        },
        TypeHint::Json => serde_json::from_str(raw)
            .or_else(|_| serde_json::from_str(text))
            .map_err(|e| {
                Diagnostic::error(
                    codes::INVALID_JSON_IN_PARAMETER_VALUE,
                    format!("Invalid JSON for parameter '{}': {}", parameter.name, e),
                    span,
                )
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DirectiveCatalog;
    use crate::directive::KernelDirective;
    use crate::expression::ExpressionError;
    use crate::parser::{parse, SyntaxNode};
    use async_trait::async_trait;
    use polyglot_types::commands::SubmitCode;
    use polyglot_types::KernelCommand;

    fn node(text: &str, directive: KernelDirective) -> DirectiveNode {
        let mut catalog = DirectiveCatalog::new();
        catalog.add(directive).unwrap();
        parse(text, &catalog, None)
            .nodes
            .into_iter()
            .find_map(|n| match n {
                SyntaxNode::Directive(d) => Some(d),
                SyntaxNode::Code(_) => None,
            })
            .expect("a directive node")
    }

    fn set_directive() -> KernelDirective {
        KernelDirective::action("#!set", |_| Ok(KernelCommand::new(SubmitCode::new(""))))
            .with_parameter(DirectiveParameter::new("--name").required())
            .with_parameter(DirectiveParameter::new("--value").implicit())
            .with_parameter(DirectiveParameter::new("--count").with_type(TypeHint::Integer))
            .with_parameter(DirectiveParameter::new("--data").with_type(TypeHint::Json))
            .with_parameter(DirectiveParameter::new("--verbose").with_alias("-v").with_type(TypeHint::Flag))
    }

    struct Answers;

    #[async_trait]
    impl ExpressionBinder for Answers {
        async fn bind(&self, expression: &ValueExpression) -> Result<Value, ExpressionError> {
            match expression {
                ValueExpression::Input { prompt, .. } => Ok(Value::String(format!("answer to {}", prompt))),
                ValueExpression::KernelValue { kernel, name } => Err(ExpressionError::ValueNotFound {
                    kernel: kernel.clone(),
                    name: name.clone(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_binds_named_implicit_and_typed_values() {
        let node = node(r#"#!set --name x "hello world" --count 3 --data {"a":1} -v"#, set_directive());
        let bound = bind(&node, None).await.unwrap();

        assert_eq!(bound.get_str("--name"), Some("x"));
        assert_eq!(bound.get_str("--value"), Some("hello world"));
        assert_eq!(bound.get_i64("--count"), Some(3));
        assert_eq!(bound.get("--data"), Some(&serde_json::json!({ "a": 1 })));
        assert!(bound.get_bool("--verbose"));
    }

    #[tokio::test]
    async fn test_reports_every_problem() {
        let node = node("#!set --count many --data {oops} --bogus 1 --name a --name b", set_directive());
        let diagnostics = bind(&node, None).await.unwrap_err();
        let codes: Vec<&str> = diagnostics.iter().map(|d| d.code.as_str()).collect();

        assert!(codes.contains(&codes::INVALID_VALUE_FOR_TYPE));
        assert!(codes.contains(&codes::INVALID_JSON_IN_PARAMETER_VALUE));
        assert!(codes.contains(&codes::UNKNOWN_PARAMETER_NAME));
        assert!(codes.contains(&codes::TOO_MANY_OCCURRENCES_OF_PARAMETER));
    }

    #[tokio::test]
    async fn test_expressions_need_a_binder() {
        let node = node("#!set --name x --value @input:who", set_directive());

        let diagnostics = bind(&node, None).await.unwrap_err();
        assert_eq!(diagnostics[0].code, codes::MISSING_BINDING_DELEGATE);

        let bound = bind(&node, Some(&Answers)).await.unwrap();
        assert_eq!(bound.get_str("--value"), Some("answer to who"));
    }

    #[tokio::test]
    async fn test_failed_expression_reports_binder_code() {
        let node = node("#!set --name x --value @csharp:missing", set_directive());
        let diagnostics = bind(&node, Some(&Answers)).await.unwrap_err();
        assert_eq!(diagnostics[0].code, codes::VALUE_NOT_FOUND_IN_KERNEL);
    }
}
