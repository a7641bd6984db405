//! Compiler macro extraction.
//!
//! Macros are line comments of the form `//name:value`. They are read from the
//! parser's comment table, so a macro-looking string inside a literal is never a
//! macro.

use lazy_static::lazy_static;
use oxc_ast::ast::{BindingPattern, Program, Statement};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::engine::EngineVersion;
use crate::error::{CompileError, Result};
use crate::unit::SyntaxTree;

lazy_static! {
    static ref MACRO_RE: Regex = Regex::new(r"^([a-z][a-z_]*):(.*)$").unwrap();
    static ref NATIVE_IMPORT_RE: Regex = Regex::new(
        r"^([A-Za-z_][A-Za-z0-9_\-]*(?:::[A-Za-z_][A-Za-z0-9_]*)*)(?:\s+as\s+([A-Za-z_$][A-Za-z0-9_$]*))?$"
    )
    .unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeImportMacro {
    pub import_path: String,
    pub namespace: String,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMacro {
    pub path: String,
    pub line: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Macros {
    pub priority: Option<i64>,
    pub timeout_secs: Option<u64>,
    pub engine: Option<EngineVersion>,
    pub assets: Vec<AssetMacro>,
    pub native_imports: Vec<NativeImportMacro>,
}

/// Extracts every compiler macro from a script.
pub fn process_macros(tree: &SyntaxTree) -> Result<Macros> {
    let unit = tree.file_name();
    let (raw, top_level) = tree.with_program(|program| {
        let raw = macro_comments(program, tree);
        (raw, top_level_names(program))
    });

    let mut macros = Macros::default();
    let mut namespaces = HashSet::new();

    for (line, name, value) in raw {
        let invalid = |message: String| CompileError::InvalidMacro {
            unit: unit.to_string(),
            line,
            name: name.clone(),
            message,
        };
        let value = value.trim();

        match name.as_str() {
            "priority" => {
                let priority = value
                    .parse::<i64>()
                    .map_err(|_| invalid(format!("'{}' is not an integer", value)))?;
                macros.priority = Some(priority);
            }
            "timeout" => {
                let secs = value
                    .parse::<u64>()
                    .map_err(|_| invalid(format!("'{}' is not a number of seconds", value)))?;
                macros.timeout_secs = Some(secs);
            }
            "engine" => {
                let version = EngineVersion::parse(value)
                    .ok_or_else(|| invalid(format!("unknown engine version '{}'", value)))?;
                macros.engine = Some(version);
            }
            "import" => {
                if value.is_empty() {
                    return Err(invalid("missing asset path".to_string()));
                }
                macros.assets.push(AssetMacro {
                    path: value.to_string(),
                    line,
                });
            }
            "native_import" => {
                let caps = NATIVE_IMPORT_RE.captures(value).ok_or_else(|| {
                    invalid(format!(
                        "expected '<crate>[::module] [as <alias>]', found '{}'",
                        value
                    ))
                })?;
                let import_path = caps[1].to_string();
                let namespace = match caps.get(2) {
                    Some(alias) => alias.as_str().to_string(),
                    None => default_namespace(&import_path),
                };
                if !namespaces.insert(namespace.clone()) {
                    return Err(CompileError::DuplicateNamespace {
                        unit: unit.to_string(),
                        namespace,
                    });
                }
                if top_level.contains(&namespace) {
                    return Err(CompileError::NamespaceCollision {
                        unit: unit.to_string(),
                        namespace,
                    });
                }
                macros.native_imports.push(NativeImportMacro {
                    import_path,
                    namespace,
                    line,
                });
            }
            other => debug!(unit, line, "ignoring unknown macro //{}", other),
        }
    }

    Ok(macros)
}

fn default_namespace(import_path: &str) -> String {
    import_path
        .rsplit("::")
        .next()
        .unwrap_or(import_path)
        .replace('-', "_")
}

fn macro_comments(program: &Program, tree: &SyntaxTree) -> Vec<(u32, String, String)> {
    let source = tree.source();
    let mut found = Vec::new();
    for comment in &program.comments {
        if comment.is_block() {
            continue;
        }
        let start = comment.span.start as usize;
        let end = comment.span.end as usize;
        let Some(text) = source.get(start..end) else {
            continue;
        };
        let text = text.strip_prefix("//").unwrap_or(text).trim_end();
        if let Some(caps) = MACRO_RE.captures(text) {
            found.push((
                tree.location(comment.span.start).line,
                caps[1].to_string(),
                caps[2].to_string(),
            ));
        }
    }
    found
}

fn top_level_names(program: &Program) -> HashSet<String> {
    let mut names = HashSet::new();
    for stmt in &program.body {
        match stmt {
            Statement::FunctionDeclaration(func) => {
                if let Some(id) = &func.id {
                    names.insert(id.name.to_string());
                }
            }
            Statement::VariableDeclaration(var) => {
                for decl in &var.declarations {
                    if let BindingPattern::BindingIdentifier(id) = &decl.id {
                        names.insert(id.name.to_string());
                    }
                }
            }
            Statement::ClassDeclaration(class) => {
                if let Some(id) = &class.id {
                    names.insert(id.name.to_string());
                }
            }
            _ => {}
        }
    }
    names
}
