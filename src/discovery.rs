//! Discovery Module
//!
//! Scans the configured package roots for installed native packages (crates
//! with a `Cargo.toml`) and resolves script namespace imports against them.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::error::{CompileError, Result};
use crate::logger::Logger;
use crate::unit::ScriptUnit;

lazy_static! {
    static ref SECTION_RE: Regex = Regex::new(r"^\s*\[([^\]]+)\]\s*$").unwrap();
    static ref NAME_RE: Regex = Regex::new(r#"^\s*name\s*=\s*"([^"]+)""#).unwrap();
}

const SKIPPED_DIRS: &[&str] = &["target", ".git", "node_modules"];

// ═══════════════════════════════════════════════════════════════════════════════
// PACKAGE REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledPackage {
    /// Library name as it appears in Rust paths (`-` normalized to `_`).
    pub name: String,
    /// `[package] name` from the manifest, as Cargo expects it in dependencies.
    pub manifest_name: String,
    pub dir: PathBuf,
}

/// Snapshot of the native packages installed on the build host.
#[derive(Debug, Clone, Default)]
pub struct PackageRegistry {
    packages: BTreeMap<String, InstalledPackage>,
}

impl PackageRegistry {
    /// Walks every root looking for crates. Earlier roots win on name clashes.
    pub fn discover(roots: &[PathBuf]) -> Self {
        let mut registry = Self::default();

        for root in roots {
            if !root.exists() {
                debug!(root = %root.display(), "package root does not exist");
                continue;
            }
            for manifest in find_manifests(root) {
                let Some((name, manifest_name)) = read_library_name(&manifest) else {
                    continue;
                };
                let dir = manifest
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.clone());
                registry
                    .packages
                    .entry(name.clone())
                    .or_insert(InstalledPackage {
                        name,
                        manifest_name,
                        dir,
                    });
            }
        }

        debug!(count = registry.packages.len(), "native package registry built");
        registry
    }

    pub fn from_packages(packages: impl IntoIterator<Item = InstalledPackage>) -> Self {
        Self {
            packages: packages
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect(),
        }
    }

    pub fn get(&self, crate_name: &str) -> Option<&InstalledPackage> {
        self.packages.get(crate_name)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

fn is_skipped(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| SKIPPED_DIRS.contains(&name))
            .unwrap_or(false)
}

/// Recursively find all Cargo.toml files below a directory
fn find_manifests(dir: &Path) -> Vec<PathBuf> {
    let mut manifests = Vec::new();

    for entry in WalkDir::new(dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped(e))
        .flatten()
    {
        if entry.file_type().is_file() && entry.file_name() == "Cargo.toml" {
            manifests.push(entry.path().to_path_buf());
        }
    }

    manifests
}

/// Reads `[lib] name`, falling back to `[package] name`, plus the package name
/// itself. Workspace-only manifests have no package and are skipped.
fn read_library_name(manifest: &Path) -> Option<(String, String)> {
    let contents = fs::read_to_string(manifest).ok()?;
    let mut section = String::new();
    let mut package_name = None;
    let mut lib_name = None;

    for line in contents.lines() {
        if let Some(caps) = SECTION_RE.captures(line) {
            section = caps[1].trim().to_string();
            continue;
        }
        if let Some(caps) = NAME_RE.captures(line) {
            match section.as_str() {
                "package" => package_name = Some(caps[1].to_string()),
                "lib" => lib_name = Some(caps[1].to_string()),
                _ => {}
            }
        }
    }

    let package_name = package_name?;
    let lib_name = lib_name.unwrap_or_else(|| package_name.clone());
    Some((lib_name.replace('-', "_"), package_name))
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEPENDENCY LOCATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Marks every import whose crate is installed as resolved, then fails with one
/// aggregate error naming every import path that is still unresolved.
pub fn locate_dependencies(
    units: &mut [ScriptUnit],
    registry: &PackageRegistry,
    logger: &dyn Logger,
) -> Result<()> {
    for unit in units.iter_mut() {
        for decl in unit.imports.values_mut() {
            if let Some(package) = registry.get(&decl.crate_name()) {
                decl.resolve(package);
            }
        }
    }

    let unresolved: BTreeSet<String> = units
        .iter()
        .flat_map(|unit| unit.unresolved_imports().map(|d| d.import_path.clone()))
        .collect();

    if unresolved.is_empty() {
        return Ok(());
    }

    logger.error(format_args!(
        "a number of native dependencies could not be resolved:"
    ));
    for path in &unresolved {
        logger.error(format_args!("\t{}", path));
    }

    Err(CompileError::UnresolvedPackages {
        paths: unresolved.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::testing::MemoryLogger;
    use crate::unit::ImportDeclaration;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_discover_reads_lib_and_package_names() {
        let root = TempDir::new().unwrap();
        write(root.path(), "net-tools/Cargo.toml", "[package]\nname = \"net-tools\"\n");
        write(
            root.path(),
            "store/Cargo.toml",
            "[package]\nname = \"store-rs\"\n\n[lib]\nname = \"store\"\n",
        );
        write(root.path(), "ws/Cargo.toml", "[workspace]\nmembers = []\n");
        write(
            root.path(),
            "net-tools/target/debug/build/Cargo.toml",
            "[package]\nname = \"ignored\"\n",
        );

        let registry = PackageRegistry::discover(&[root.path().to_path_buf()]);
        assert_eq!(registry.len(), 2);
        let net = registry.get("net_tools").unwrap();
        assert_eq!(net.manifest_name, "net-tools");
        assert_eq!(net.dir, root.path().join("net-tools"));
        assert_eq!(registry.get("store").unwrap().manifest_name, "store-rs");
        assert!(registry.get("ignored").is_none());
    }

    #[test]
    fn test_earlier_roots_win() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        write(first.path(), "a/Cargo.toml", "[package]\nname = \"dup\"\n");
        write(second.path(), "b/Cargo.toml", "[package]\nname = \"dup\"\n");
        let registry =
            PackageRegistry::discover(&[first.path().to_path_buf(), second.path().to_path_buf()]);
        assert_eq!(registry.get("dup").unwrap().dir, first.path().join("a"));
    }

    #[test]
    fn test_unresolved_imports_are_reported_together() {
        let mut unit = ScriptUnit::from_source(
            "a.js",
            PathBuf::from("/tmp/a.js"),
            "function Deploy() {}".to_string(),
        )
        .unwrap();
        for (ns, path) in [("x", "missing_b"), ("y", "missing_a"), ("z", "present")] {
            unit.imports
                .insert(ns.to_string(), ImportDeclaration::new(ns, path));
        }
        let registry = PackageRegistry::from_packages([InstalledPackage {
            name: "present".to_string(),
            manifest_name: "present".to_string(),
            dir: PathBuf::from("/pkgs/present"),
        }]);
        let logger = MemoryLogger::default();

        let mut units = vec![unit];
        let err = locate_dependencies(&mut units, &registry, &logger).unwrap_err();
        match err {
            CompileError::UnresolvedPackages { paths } => {
                assert_eq!(paths, vec!["missing_a".to_string(), "missing_b".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(units[0].imports["z"].resolved);
        assert_eq!(logger.errors().len(), 3);
    }
}
