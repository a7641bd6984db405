//! Script units: one script plus everything the pipeline derives from it.

use oxc_allocator::Allocator;
use oxc_ast::ast::Program;
use oxc_parser::Parser;
use oxc_span::SourceType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::declarations::NativePackage;
use crate::discovery::InstalledPackage;
use crate::engine::EngineVersion;
use crate::error::{CompileError, Result};
use crate::macros::Macros;
use crate::options::{DEFAULT_PRIORITY, DEFAULT_TIMEOUT_SECS};
use crate::swizzle::Binding;
use crate::visitor::CallSite;

// ═══════════════════════════════════════════════════════════════════════════════
// SOURCE LOCATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// 1-based line and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SYNTAX TREE
// ═══════════════════════════════════════════════════════════════════════════════

/// The parsed form of a script.
///
/// oxc trees live in an arena, so the unit keeps the immutable source and lends
/// the program out through [`SyntaxTree::with_program`]. Parsing is
/// deterministic: every borrower sees the same tree, and syntax errors are
/// reported once, when the tree is created.
#[derive(Debug, Clone)]
pub struct SyntaxTree {
    file_name: String,
    source: Arc<str>,
    line_starts: Vec<u32>,
}

impl SyntaxTree {
    pub fn parse(file_name: &str, source: impl Into<Arc<str>>) -> Result<Self> {
        let source: Arc<str> = source.into();
        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, &*source, Self::source_type()).parse();
        if ret.panicked || !ret.errors.is_empty() {
            let message = ret
                .errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(CompileError::ScriptSyntax {
                file: file_name.to_string(),
                message: if message.is_empty() {
                    "parser aborted".to_string()
                } else {
                    message
                },
            });
        }

        let mut line_starts = vec![0];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i as u32 + 1);
            }
        }

        Ok(Self {
            file_name: file_name.to_string(),
            source,
            line_starts,
        })
    }

    fn source_type() -> SourceType {
        SourceType::default().with_module(false)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Borrow the program. The tree was validated at construction.
    pub fn with_program<R>(&self, f: impl for<'a> FnOnce(&Program<'a>) -> R) -> R {
        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, &*self.source, Self::source_type()).parse();
        f(&ret.program)
    }

    pub fn location(&self, offset: u32) -> SourceLocation {
        let line_index = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let line_start = self.line_starts.get(line_index).copied().unwrap_or(0);
        SourceLocation {
            line: line_index as u32 + 1,
            column: offset.saturating_sub(line_start) + 1,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// IMPORTS & ASSETS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportDeclaration {
    /// Script-side alias.
    pub namespace: String,
    /// `crate` or `crate::module::path`.
    pub import_path: String,
    pub resolved: bool,
    pub package_dir: Option<PathBuf>,
    pub package_name: Option<String>,
}

impl ImportDeclaration {
    pub fn new(namespace: &str, import_path: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            import_path: import_path.to_string(),
            resolved: false,
            package_dir: None,
            package_name: None,
        }
    }

    /// Crate segment of the import path, normalized the way cargo names libraries.
    pub fn crate_name(&self) -> String {
        crate_segment(&self.import_path)
    }

    /// Marks the declaration resolved. Once resolved it never changes again.
    pub fn resolve(&mut self, package: &InstalledPackage) {
        if self.resolved {
            return;
        }
        self.resolved = true;
        self.package_dir = Some(package.dir.clone());
        self.package_name = Some(package.name.clone());
    }
}

pub fn crate_segment(import_path: &str) -> String {
    import_path
        .split("::")
        .next()
        .unwrap_or(import_path)
        .trim()
        .replace('-', "_")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedAsset {
    /// Name the script uses to look the asset up (the file name).
    pub name: String,
    pub source_path: PathBuf,
    /// Path inside the build directory's asset cache.
    pub cached_path: PathBuf,
    pub digest: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCRIPT UNIT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct ScriptUnit {
    pub file_name: String,
    pub absolute_path: PathBuf,
    pub tree: SyntaxTree,
    pub macros: Macros,
    pub imports: BTreeMap<String, ImportDeclaration>,
    pub engine_version: Option<EngineVersion>,
    pub assets: Vec<EmbeddedAsset>,
    pub call_sites: Vec<CallSite>,
    /// Native packages reachable from this unit, keyed by namespace.
    pub packages: BTreeMap<String, Arc<NativePackage>>,
    pub bindings: Vec<Binding>,
}

impl ScriptUnit {
    /// Reads and parses a script. All ingestion failures surface here.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CompileError::ScriptNotFound {
                path: path.to_path_buf(),
            });
        }
        let source = fs::read_to_string(path).map_err(|source| CompileError::ScriptUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let absolute_path =
            fs::canonicalize(path).map_err(|source| CompileError::ScriptUnreadable {
                path: path.to_path_buf(),
                source,
            })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| CompileError::ScriptNotFound {
                path: path.to_path_buf(),
            })?;

        Self::from_source(&file_name, absolute_path, source)
    }

    pub fn from_source(file_name: &str, absolute_path: PathBuf, source: String) -> Result<Self> {
        let tree = SyntaxTree::parse(file_name, source)?;
        Ok(Self {
            file_name: file_name.to_string(),
            absolute_path,
            tree,
            macros: Macros::default(),
            imports: BTreeMap::new(),
            engine_version: None,
            assets: Vec::new(),
            call_sites: Vec::new(),
            packages: BTreeMap::new(),
            bindings: Vec::new(),
        })
    }

    pub fn priority(&self) -> i64 {
        self.macros.priority.unwrap_or(DEFAULT_PRIORITY)
    }

    pub fn timeout_secs(&self) -> u64 {
        self.macros.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)
    }

    pub fn source_dir(&self) -> &Path {
        self.absolute_path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Rust module name used for this unit inside the generated program.
    pub fn module_name(&self) -> String {
        let mut name = String::from("unit_");
        for c in self.file_name.chars() {
            if c.is_ascii_alphanumeric() {
                name.push(c.to_ascii_lowercase());
            } else {
                name.push('_');
            }
        }
        name
    }

    /// Import declarations that the dependency locator could not match.
    pub fn unresolved_imports(&self) -> impl Iterator<Item = &ImportDeclaration> {
        self.imports.values().filter(|i| !i.resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_is_one_based() {
        let tree = SyntaxTree::parse("a.js", "var a = 1;\nvar b = 2;\n").unwrap();
        assert_eq!(tree.location(0), SourceLocation { line: 1, column: 1 });
        assert_eq!(tree.location(11), SourceLocation { line: 2, column: 1 });
        assert_eq!(tree.location(15), SourceLocation { line: 2, column: 5 });
    }

    #[test]
    fn test_syntax_error_is_reported_at_parse() {
        let err = SyntaxTree::parse("bad.js", "function (").unwrap_err();
        assert!(matches!(err, CompileError::ScriptSyntax { ref file, .. } if file == "bad.js"));
    }

    #[test]
    fn test_module_name_is_identifier() {
        let unit = ScriptUnit::from_source(
            "My-Script.v2.js",
            PathBuf::from("/tmp/My-Script.v2.js"),
            "function Deploy() {}".to_string(),
        )
        .unwrap();
        assert_eq!(unit.module_name(), "unit_my_script_v2_js");
    }

    #[test]
    fn test_missing_script_is_rejected() {
        let err = ScriptUnit::load(Path::new("/definitely/not/here.js")).unwrap_err();
        assert!(matches!(err, CompileError::ScriptNotFound { .. }));
    }

    #[test]
    fn test_resolve_happens_once() {
        let mut decl = ImportDeclaration::new("net", "net-tools::http");
        assert_eq!(decl.crate_name(), "net_tools");
        decl.resolve(&InstalledPackage {
            name: "net_tools".to_string(),
            manifest_name: "net-tools".to_string(),
            dir: PathBuf::from("/pkgs/net-tools"),
        });
        decl.resolve(&InstalledPackage {
            name: "other".to_string(),
            manifest_name: "other".to_string(),
            dir: PathBuf::from("/elsewhere"),
        });
        assert!(decl.resolved);
        assert_eq!(decl.package_dir, Some(PathBuf::from("/pkgs/net-tools")));
    }
}
