//! Native declaration tables.
//!
//! Reads a native package's Rust source with `syn` and records every top-level
//! function signature plus the serde capabilities of its structs and enums.
//! Tables are built once per import path and shared between units.

use parking_lot::RwLock;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use syn::{FnArg, GenericParam, Item, Pat, ReturnType as SynReturn, Visibility};
use tracing::debug;

use crate::error::{CompileError, Result};
use crate::types::{self, NativeType, ReturnType};
use crate::unit::crate_segment;

// ═══════════════════════════════════════════════════════════════════════════════
// DECLARATION TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeParameter {
    pub name: String,
    pub ty: NativeType,
    /// Rust source of the parameter type, as tokens.
    pub rust: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeFunctionSignature {
    pub name: String,
    pub parameter_types: Vec<NativeParameter>,
    pub return_types: Vec<ReturnType>,
    pub is_exported: bool,
    pub is_async: bool,
}

impl NativeFunctionSignature {
    pub fn arity(&self) -> usize {
        self.parameter_types.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeStruct {
    pub name: String,
    pub deserializable: bool,
    pub serializable: bool,
    /// Implements `Display`, by hand or through `#[derive(Error)]`.
    #[serde(default)]
    pub displayable: bool,
    #[serde(default)]
    pub debuggable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativePackage {
    pub import_path: String,
    pub directory: PathBuf,
    pub declarations: BTreeMap<String, NativeFunctionSignature>,
    pub structs: BTreeMap<String, NativeStruct>,
}

impl NativePackage {
    /// The import path as a Rust path (`net-tools::http` becomes `net_tools::http`).
    pub fn rust_path(&self) -> String {
        let mut segments: Vec<String> = self.import_path.split("::").map(str::to_string).collect();
        if let Some(first) = segments.first_mut() {
            *first = crate_segment(first);
        }
        segments.join("::")
    }

    pub fn crate_name(&self) -> String {
        crate_segment(&self.import_path)
    }

    /// Exported function named `name`, if any.
    pub fn exported(&self, name: &str) -> Option<&NativeFunctionSignature> {
        self.declarations.get(name).filter(|sig| sig.is_exported)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARSING
// ═══════════════════════════════════════════════════════════════════════════════

struct ModuleSource {
    items: Vec<Item>,
    file: PathBuf,
    child_dir: PathBuf,
}

fn parse_file(import_path: &str, file: &Path) -> Result<Vec<Item>> {
    let source = fs::read_to_string(file)
        .map_err(|e| CompileError::io(format!("cannot read {}", file.display()), e))?;
    let parsed = syn::parse_file(&source).map_err(|e| CompileError::PackageParse {
        import_path: import_path.to_string(),
        file: file.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(parsed.items)
}

/// Walks `crate::a::b` down to the items of module `b`.
fn resolve_module(import_path: &str, package_dir: &Path) -> Result<ModuleSource> {
    let src = package_dir.join("src");
    let root = src.join("lib.rs");
    let mut module = ModuleSource {
        items: parse_file(import_path, &root)?,
        file: root,
        child_dir: src,
    };

    for segment in import_path.split("::").skip(1) {
        let missing = || CompileError::MissingModule {
            import_path: import_path.to_string(),
            module: segment.to_string(),
        };

        let declared = module.items.iter().find_map(|item| match item {
            Item::Mod(m) if m.ident == segment => Some(m),
            _ => None,
        });
        let Some(declared) = declared else {
            return Err(missing());
        };
        if !matches!(declared.vis, Visibility::Public(_)) {
            return Err(missing());
        }

        let child_dir = module.child_dir.join(segment);
        if let Some((_, items)) = &declared.content {
            module = ModuleSource {
                items: items.clone(),
                file: module.file.clone(),
                child_dir,
            };
            continue;
        }

        let flat = module.child_dir.join(format!("{}.rs", segment));
        let nested = child_dir.join("mod.rs");
        let file = if flat.exists() {
            flat
        } else if nested.exists() {
            nested
        } else {
            return Err(missing());
        };
        module = ModuleSource {
            items: parse_file(import_path, &file)?,
            file,
            child_dir,
        };
    }

    Ok(module)
}

fn derives(attrs: &[syn::Attribute]) -> syn::Result<HashSet<String>> {
    let mut found = HashSet::new();
    for attr in attrs {
        if !attr.path().is_ident("derive") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if let Some(last) = meta.path.segments.last() {
                found.insert(last.ident.to_string());
            }
            Ok(())
        })?;
    }
    Ok(found)
}

fn native_struct(name: String, attrs: &[syn::Attribute]) -> syn::Result<NativeStruct> {
    let d = derives(attrs)?;
    Ok(NativeStruct {
        name,
        deserializable: d.contains("Deserialize"),
        serializable: d.contains("Serialize"),
        displayable: d.contains("Error"),
        debuggable: d.contains("Debug"),
    })
}

/// `impl Display for Foo` / `impl fmt::Debug for Foo`, as `(trait, type)`.
fn formatting_impl(item: &syn::ItemImpl) -> Option<(String, String)> {
    let (_, trait_path, _) = item.trait_.as_ref()?;
    let trait_name = trait_path.segments.last()?.ident.to_string();
    if trait_name != "Display" && trait_name != "Debug" {
        return None;
    }
    match &*item.self_ty {
        syn::Type::Path(path) => Some((trait_name, path.path.segments.last()?.ident.to_string())),
        _ => None,
    }
}

fn parameter_name(pat: &Pat, index: usize) -> String {
    match pat {
        Pat::Ident(ident) => ident.ident.to_string(),
        _ => format!("arg{}", index),
    }
}

fn signature_from_item(func: &syn::ItemFn) -> NativeFunctionSignature {
    let sig = &func.sig;
    let generics: HashSet<String> = sig
        .generics
        .params
        .iter()
        .filter_map(|p| match p {
            GenericParam::Type(t) => Some(t.ident.to_string()),
            _ => None,
        })
        .collect();

    let parameter_types = sig
        .inputs
        .iter()
        .enumerate()
        .filter_map(|(i, input)| match input {
            FnArg::Typed(pat_type) => Some(NativeParameter {
                name: parameter_name(&pat_type.pat, i),
                ty: types::from_syn(&pat_type.ty, &generics),
                rust: types::render(&*pat_type.ty),
            }),
            FnArg::Receiver(_) => None,
        })
        .collect();

    let output = match &sig.output {
        SynReturn::Default => NativeType::Unit,
        SynReturn::Type(_, ty) => types::from_syn(ty, &generics),
    };

    NativeFunctionSignature {
        name: sig.ident.to_string(),
        parameter_types,
        return_types: types::flatten_returns(&output),
        is_exported: matches!(func.vis, Visibility::Public(_)),
        is_async: sig.asyncness.is_some(),
    }
}

fn derive_error(import_path: &str, file: &Path, err: syn::Error) -> CompileError {
    CompileError::PackageParse {
        import_path: import_path.to_string(),
        file: file.to_path_buf(),
        message: format!("unreadable derive list: {}", err),
    }
}

/// Builds the declaration table for one import path.
pub fn build_package(import_path: &str, package_dir: &Path) -> Result<NativePackage> {
    let module = resolve_module(import_path, package_dir)?;
    let mut declarations = BTreeMap::new();
    let mut structs: BTreeMap<String, NativeStruct> = BTreeMap::new();
    let mut formatting = Vec::new();

    for item in &module.items {
        match item {
            Item::Fn(func) => {
                let signature = signature_from_item(func);
                declarations.insert(signature.name.clone(), signature);
            }
            Item::Struct(s) => {
                let parsed = native_struct(s.ident.to_string(), &s.attrs)
                    .map_err(|e| derive_error(import_path, &module.file, e))?;
                structs.insert(parsed.name.clone(), parsed);
            }
            Item::Enum(e) => {
                let parsed = native_struct(e.ident.to_string(), &e.attrs)
                    .map_err(|err| derive_error(import_path, &module.file, err))?;
                structs.insert(parsed.name.clone(), parsed);
            }
            Item::Impl(block) => {
                if let Some(found) = formatting_impl(block) {
                    formatting.push(found);
                }
            }
            _ => {}
        }
    }

    for (trait_name, type_name) in formatting {
        if let Some(target) = structs.get_mut(&type_name) {
            match trait_name.as_str() {
                "Display" => target.displayable = true,
                _ => target.debuggable = true,
            }
        }
    }

    debug!(
        import_path,
        file = %module.file.display(),
        functions = declarations.len(),
        "parsed native declarations"
    );

    Ok(NativePackage {
        import_path: import_path.to_string(),
        directory: package_dir.to_path_buf(),
        declarations,
        structs,
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED CACHE
// ═══════════════════════════════════════════════════════════════════════════════

/// Declaration tables keyed by import path, shared by every unit of a build.
#[derive(Default)]
pub struct PackageCache {
    packages: RwLock<HashMap<String, Arc<NativePackage>>>,
    builds: AtomicUsize,
}

impl PackageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds every requested import path that is not cached yet. Duplicate
    /// requests collapse before any parsing starts, so each path is parsed once.
    pub fn populate(&self, requests: impl IntoIterator<Item = (String, PathBuf)>) -> Result<()> {
        let pending: BTreeMap<String, PathBuf> = {
            let cached = self.packages.read();
            requests
                .into_iter()
                .filter(|(path, _)| !cached.contains_key(path))
                .collect()
        };

        let results: Vec<(String, Result<NativePackage>)> = pending
            .into_par_iter()
            .map(|(path, dir)| {
                self.builds.fetch_add(1, Ordering::SeqCst);
                let built = build_package(&path, &dir);
                (path, built)
            })
            .collect();

        let mut packages = self.packages.write();
        let mut first_error = None;
        for (path, built) in results {
            match built {
                Ok(package) => {
                    packages.insert(path, Arc::new(package));
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn get(&self, import_path: &str) -> Option<Arc<NativePackage>> {
        self.packages.read().get(import_path).cloned()
    }

    /// Number of declaration tables parsed so far.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn import_paths(&self) -> BTreeSet<String> {
        self.packages.read().keys().cloned().collect()
    }
}
