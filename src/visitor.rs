use oxc_ast::ast::{
    Argument, AssignmentExpression, AssignmentTarget, BindingPattern, CallExpression, Expression,
    Function, IdentifierReference, VariableDeclarator,
};
use oxc_ast_visit::{walk, Visit};
use oxc_semantic::{Scoping, SemanticBuilder};
use oxc_span::GetSpan;
use oxc_syntax::operator::UnaryOperator;
use oxc_syntax::scope::ScopeFlags;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::unit::{SourceLocation, SyntaxTree};

// ═══════════════════════════════════════════════════════════════════════════════
// CALL-SITE TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// What a call-site argument looks like syntactically. Only literals have a
/// known kind; everything else is `Dynamic` and checked at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArgumentKind {
    String,
    Number,
    Boolean,
    Null,
    Object,
    Array,
    Function,
    Spread,
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgumentExpression {
    pub kind: ArgumentKind,
    pub text: String,
}

/// How the script consumes the call's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Receivers {
    /// Bare call statement or nested expression.
    None,
    /// `var x = ns.f()` / `x = ns.f()`
    Single,
    /// `var [a, b] = ns.f()`
    Destructured(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSite {
    pub unit: String,
    pub namespace: String,
    pub called_name: String,
    pub arguments: Vec<ArgumentExpression>,
    pub receivers: Receivers,
    pub location: SourceLocation,
    pub enclosing_function: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// WALKER
// ═══════════════════════════════════════════════════════════════════════════════

/// Collects every `namespace.name(...)` call where `namespace` is one of the
/// unit's bound namespaces and is not shadowed by a script binding.
pub fn walk_call_sites(tree: &SyntaxTree, namespaces: &BTreeSet<String>) -> Vec<CallSite> {
    if namespaces.is_empty() {
        return Vec::new();
    }
    tree.with_program(|program| {
        let semantic = SemanticBuilder::new().build(program).semantic;
        let mut walker = CallSiteWalker {
            tree,
            namespaces,
            scoping: semantic.scoping(),
            function_stack: Vec::new(),
            receivers: HashMap::new(),
            sites: Vec::new(),
        };
        walker.visit_program(program);
        walker.sites
    })
}

struct CallSiteWalker<'s> {
    tree: &'s SyntaxTree,
    namespaces: &'s BTreeSet<String>,
    scoping: &'s Scoping,
    function_stack: Vec<String>,
    /// Receivers keyed by the full span of the call they receive. A chained
    /// call shares its start offset with the call it wraps.
    receivers: HashMap<(u32, u32), Receivers>,
    sites: Vec<CallSite>,
}

impl CallSiteWalker<'_> {
    fn is_unbound(&self, ident: &IdentifierReference) -> bool {
        match ident.reference_id.get() {
            Some(id) => self.scoping.get_reference(id).symbol_id().is_none(),
            None => true,
        }
    }

    fn text(&self, start: u32, end: u32) -> String {
        self.tree
            .source()
            .get(start as usize..end as usize)
            .unwrap_or_default()
            .to_string()
    }
}

fn classify(arg: &Argument) -> ArgumentKind {
    match arg {
        Argument::SpreadElement(_) => ArgumentKind::Spread,
        Argument::StringLiteral(_) | Argument::TemplateLiteral(_) => ArgumentKind::String,
        Argument::NumericLiteral(_) | Argument::BigIntLiteral(_) => ArgumentKind::Number,
        Argument::BooleanLiteral(_) => ArgumentKind::Boolean,
        Argument::NullLiteral(_) => ArgumentKind::Null,
        Argument::Identifier(id) if id.name == "undefined" => ArgumentKind::Null,
        Argument::ObjectExpression(_) => ArgumentKind::Object,
        Argument::ArrayExpression(_) => ArgumentKind::Array,
        Argument::ArrowFunctionExpression(_) | Argument::FunctionExpression(_) => {
            ArgumentKind::Function
        }
        Argument::UnaryExpression(unary)
            if unary.operator == UnaryOperator::UnaryNegation
                && matches!(unary.argument, Expression::NumericLiteral(_)) =>
        {
            ArgumentKind::Number
        }
        _ => ArgumentKind::Dynamic,
    }
}

impl<'a> Visit<'a> for CallSiteWalker<'_> {
    fn visit_variable_declarator(&mut self, decl: &VariableDeclarator<'a>) {
        if let Some(Expression::CallExpression(call)) = &decl.init {
            let receivers = match &decl.id {
                BindingPattern::ArrayPattern(arr) => Receivers::Destructured(arr.elements.len()),
                _ => Receivers::Single,
            };
            self.receivers.insert((call.span.start, call.span.end), receivers);
        }
        walk::walk_variable_declarator(self, decl);
    }

    fn visit_assignment_expression(&mut self, expr: &AssignmentExpression<'a>) {
        if let Expression::CallExpression(call) = &expr.right {
            let receivers = match &expr.left {
                AssignmentTarget::ArrayAssignmentTarget(arr) => {
                    Receivers::Destructured(arr.elements.len())
                }
                _ => Receivers::Single,
            };
            self.receivers.insert((call.span.start, call.span.end), receivers);
        }
        walk::walk_assignment_expression(self, expr);
    }

    fn visit_function(&mut self, func: &Function<'a>, flags: ScopeFlags) {
        let name = func
            .id
            .as_ref()
            .map(|id| id.name.to_string())
            .unwrap_or_else(|| "<anonymous>".to_string());
        self.function_stack.push(name);
        walk::walk_function(self, func, flags);
        self.function_stack.pop();
    }

    fn visit_call_expression(&mut self, call: &CallExpression<'a>) {
        if let Expression::StaticMemberExpression(member) = &call.callee {
            if let Expression::Identifier(object) = &member.object {
                let namespace = object.name.as_str();
                if self.namespaces.contains(namespace) && self.is_unbound(object) {
                    let arguments = call
                        .arguments
                        .iter()
                        .map(|arg| {
                            let span = arg.span();
                            ArgumentExpression {
                                kind: classify(arg),
                                text: self.text(span.start, span.end),
                            }
                        })
                        .collect();
                    self.sites.push(CallSite {
                        unit: self.tree.file_name().to_string(),
                        namespace: namespace.to_string(),
                        called_name: member.property.name.to_string(),
                        arguments,
                        receivers: self
                            .receivers
                            .get(&(call.span.start, call.span.end))
                            .copied()
                            .unwrap_or(Receivers::None),
                        location: self.tree.location(call.span.start),
                        enclosing_function: self.function_stack.last().cloned(),
                    });
                }
            }
        }
        walk::walk_call_expression(self, call);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sites(source: &str, namespaces: &[&str]) -> Vec<CallSite> {
        let tree = SyntaxTree::parse("walk.js", source).unwrap();
        let ns: BTreeSet<String> = namespaces.iter().map(|s| s.to_string()).collect();
        walk_call_sites(&tree, &ns)
    }

    #[test]
    fn test_finds_namespaced_calls_in_order() {
        let found = sites(
            "function Deploy() {\n  var body = net.Fetch(\"http://x\");\n  net.Post(body, 3);\n  console.log(body);\n}",
            &["net"],
        );
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].called_name, "Fetch");
        assert_eq!(found[0].receivers, Receivers::Single);
        assert_eq!(found[0].arguments[0].kind, ArgumentKind::String);
        assert_eq!(found[0].arguments[0].text, "\"http://x\"");
        assert_eq!(found[0].location, SourceLocation { line: 2, column: 14 });
        assert_eq!(found[0].enclosing_function.as_deref(), Some("Deploy"));
        assert_eq!(found[1].called_name, "Post");
        assert_eq!(found[1].receivers, Receivers::None);
        assert_eq!(found[1].arguments[0].kind, ArgumentKind::Dynamic);
        assert_eq!(found[1].arguments[1].kind, ArgumentKind::Number);
    }

    #[test]
    fn test_shadowed_namespace_is_ignored() {
        let found = sites(
            "function Deploy(net) { return net.Fetch('x'); }\nfunction Other() { return net.Fetch('y'); }",
            &["net"],
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].enclosing_function.as_deref(), Some("Other"));
    }

    #[test]
    fn test_destructured_receivers() {
        let found = sites("var [a, b] = fs.Split('x');\nvar c;\nc = fs.Read('y');", &["fs"]);
        assert_eq!(found[0].receivers, Receivers::Destructured(2));
        assert_eq!(found[1].receivers, Receivers::Single);
    }

    #[test]
    fn test_nested_calls_are_all_found() {
        let found = sites("net.Post(net.Fetch('a'), -1, [1], {k: 1}, null);", &["net"]);
        assert_eq!(found.len(), 2);
        let kinds: Vec<_> = found[0].arguments.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ArgumentKind::Dynamic,
                ArgumentKind::Number,
                ArgumentKind::Array,
                ArgumentKind::Object,
                ArgumentKind::Null,
            ]
        );
    }

    #[test]
    fn test_chained_call_keeps_its_own_receivers() {
        let found = sites(
            "var [a, b] = kit.Read('x').split(',');\nvar n = kit.Count('y').length;",
            &["kit"],
        );
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].called_name, "Read");
        assert_eq!(found[0].receivers, Receivers::None);
        assert_eq!(found[1].receivers, Receivers::None);
    }

    #[test]
    fn test_unbound_namespaces_are_not_collected() {
        assert!(sites("other.Fetch('x');", &["net"]).is_empty());
    }
}
