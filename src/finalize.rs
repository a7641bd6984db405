//! Finalize Module
//!
//! Writes everything the native backend needs into the build directory: the
//! shared runtime, per-unit preloads, cached scripts, asset tables, unit
//! modules with their shims, JSON bundles, the entry point and the manifest.

use minijinja::{context, Environment};
use oxc_codegen::{Codegen, CodegenOptions};
use quote::quote;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::backend::PROGRAM_NAME;
use crate::codegen::generate_unit_shims;
use crate::engine::EngineVersion;
use crate::error::{CompileError, Result};
use crate::options::CompileOptions;
use crate::priority::PriorityGroups;
use crate::swizzle::Binding;
use crate::unit::{EmbeddedAsset, ImportDeclaration, ScriptUnit};

const RUNTIME_SOURCE: &str = include_str!("../templates/runtime.rs");
const MAIN_TEMPLATE: &str = include_str!("../templates/main.rs.j2");
const MANIFEST_TEMPLATE: &str = include_str!("../templates/Cargo.toml.j2");

fn write_file(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents)
        .map_err(|e| CompileError::io(format!("cannot write {}", path.display()), e))
}

/// Paths inside generated Rust and TOML always use forward slashes.
fn portable(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

// ═══════════════════════════════════════════════════════════════════════════════
// WORKSPACE
// ═══════════════════════════════════════════════════════════════════════════════

pub fn create_build_dir(options: &CompileOptions) -> Result<()> {
    for dir in [
        options.build_dir.clone(),
        options.asset_dir(),
        options.script_dir(),
        options.preload_dir(),
        options.bundle_dir(),
        options.unit_source_dir(),
    ] {
        fs::create_dir_all(&dir)
            .map_err(|e| CompileError::io(format!("cannot create {}", dir.display()), e))?;
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRELOADS & SCRIPTS
// ═══════════════════════════════════════════════════════════════════════════════

pub fn write_runtime(options: &CompileOptions) -> Result<()> {
    write_file(&options.source_dir().join("runtime.rs"), RUNTIME_SOURCE)
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Script-visible globals evaluated before the unit's own source.
pub fn render_preload(unit: &ScriptUnit) -> String {
    let engine = unit.engine_version.unwrap_or(EngineVersion::V1);
    format!(
        "var SCRIPT_NAME = {name};\n\
         var SCRIPT_PRIORITY = {priority};\n\
         var SCRIPT_TIMEOUT = {timeout};\n\
         var ENGINE_VERSION = {engine};\n\
         function AssetBytes(name) {{\n  \
           if (!Object.prototype.hasOwnProperty.call(__assets, name)) {{\n    \
             throw new Error(\"unknown asset: \" + name);\n  \
           }}\n  \
           return __assets[name].slice();\n\
         }}\n\
         function Asset(name) {{\n  \
           AssetBytes(name);\n  \
           if (!Object.prototype.hasOwnProperty.call(__asset_texts, name)) {{\n    \
             throw new Error(\"asset is not UTF-8 text, use AssetBytes: \" + name);\n  \
           }}\n  \
           return __asset_texts[name];\n\
         }}\n",
        name = js_string(&unit.file_name),
        priority = unit.priority(),
        timeout = unit.timeout_secs(),
        engine = js_string(&engine.to_string()),
    )
}

pub fn write_preload(unit: &ScriptUnit, options: &CompileOptions) -> Result<()> {
    write_file(
        &options.preload_dir().join(&unit.file_name),
        &render_preload(unit),
    )
}

/// The script text that gets embedded; minified when configured.
pub fn script_text(unit: &ScriptUnit, minify: bool) -> String {
    if !minify {
        return unit.tree.source().to_string();
    }
    unit.tree.with_program(|program| {
        Codegen::new()
            .with_options(CodegenOptions::minify())
            .build(program)
            .code
    })
}

pub fn write_script(unit: &ScriptUnit, options: &CompileOptions) -> Result<()> {
    let text = script_text(unit, options.minify_scripts);
    debug!(unit = %unit.file_name, bytes = text.len(), "caching script");
    write_file(&options.script_dir().join(&unit.file_name), &text)
}

// ═══════════════════════════════════════════════════════════════════════════════
// ASSETS & BUNDLES
// ═══════════════════════════════════════════════════════════════════════════════

fn asset_table_path(unit: &ScriptUnit, options: &CompileOptions) -> std::path::PathBuf {
    options
        .unit_source_dir()
        .join(format!("{}.assets.rs", unit.module_name()))
}

/// `(name, bytes)` table for one unit, as a Rust expression.
pub fn render_asset_table(unit: &ScriptUnit, options: &CompileOptions) -> Result<String> {
    let mut entries = Vec::new();
    for asset in &unit.assets {
        if !asset.cached_path.is_file() {
            return Err(CompileError::AssetMissing {
                unit: unit.file_name.clone(),
                path: asset.cached_path.clone(),
            });
        }
        let relative = asset
            .cached_path
            .strip_prefix(&options.build_dir)
            .map(|p| format!("../../{}", portable(p)))
            .unwrap_or_else(|_| portable(&asset.cached_path));
        let name = &asset.name;
        entries.push(quote! { (#name, include_bytes!(#relative) as &[u8]) });
    }
    Ok(quote! { &[#(#entries),*] }.to_string())
}

pub fn encode_assets(unit: &ScriptUnit, options: &CompileOptions) -> Result<()> {
    let table = render_asset_table(unit, options)?;
    write_file(&asset_table_path(unit, options), &table)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitBundle<'a> {
    pub file_name: &'a str,
    pub module_name: String,
    pub priority: i64,
    pub timeout_secs: u64,
    pub engine: Option<EngineVersion>,
    pub imports: &'a BTreeMap<String, ImportDeclaration>,
    pub assets: &'a [EmbeddedAsset],
    pub bindings: &'a [Binding],
}

impl<'a> UnitBundle<'a> {
    pub fn new(unit: &'a ScriptUnit) -> Self {
        Self {
            file_name: &unit.file_name,
            module_name: unit.module_name(),
            priority: unit.priority(),
            timeout_secs: unit.timeout_secs(),
            engine: unit.engine_version,
            imports: &unit.imports,
            assets: &unit.assets,
            bindings: &unit.bindings,
        }
    }
}

/// Source of `src/units/<module>.rs`.
pub fn render_unit_module(unit: &ScriptUnit) -> Result<String> {
    let shims = generate_unit_shims(unit)?;
    let name = &unit.file_name;
    let preload = format!("../../preload/{}", unit.file_name);
    let source = format!("../../scripts/{}", unit.file_name);
    let assets = format!("{}.assets.rs", unit.module_name());
    let timeout = unit.timeout_secs();
    let entry_points = unit
        .engine_version
        .unwrap_or(EngineVersion::V1)
        .entry_points();

    let tokens = quote! {
        #![allow(unused_imports)]

        use crate::runtime;

        pub const UNIT: runtime::Unit = runtime::Unit {
            name: #name,
            preload: include_str!(#preload),
            source: include_str!(#source),
            assets: include!(#assets),
            timeout_secs: #timeout,
            entry_points: &[#(#entry_points),*],
            register,
        };

        #shims
    };
    Ok(format!("// Generated by scriptc. Do not edit.\n{}\n", tokens))
}

pub fn write_bundle(unit: &ScriptUnit, options: &CompileOptions) -> Result<()> {
    let bundle = serde_json::to_string_pretty(&UnitBundle::new(unit)).map_err(|e| {
        CompileError::io(
            format!("cannot encode bundle for {}", unit.file_name),
            std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        )
    })?;
    write_file(
        &options.bundle_dir().join(format!("{}.json", unit.file_name)),
        &bundle,
    )?;
    write_file(
        &options
            .unit_source_dir()
            .join(format!("{}.rs", unit.module_name())),
        &render_unit_module(unit)?,
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENTRY POINT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestDependency {
    /// Key in `[dependencies]`; the crate name used in Rust paths.
    pub lib: String,
    pub package: String,
    pub path: String,
}

impl ManifestDependency {
    pub fn new(lib: &str, package: &str, dir: &Path) -> Self {
        Self {
            lib: lib.to_string(),
            package: package.to_string(),
            path: portable(dir),
        }
    }
}

fn render(name: &str, source: &str, ctx: minijinja::Value) -> Result<String> {
    let template_error = |e: minijinja::Error| CompileError::Template {
        template: name.to_string(),
        message: e.to_string(),
    };
    let mut env = Environment::new();
    env.add_template(name, source).map_err(template_error)?;
    let template = env.get_template(name).map_err(template_error)?;
    template.render(ctx).map_err(template_error)
}

/// `src/main.rs`: groups run lowest priority first.
pub fn render_entry_point(groups: &PriorityGroups, modules: &BTreeMap<String, String>) -> Result<String> {
    #[derive(Serialize)]
    struct Group {
        priority: i64,
        units: Vec<String>,
    }

    let groups: Vec<Group> = groups
        .execution_order()
        .into_iter()
        .map(|group| Group {
            priority: group.priority,
            units: group
                .units
                .iter()
                .filter_map(|file| modules.get(file).cloned())
                .collect(),
        })
        .collect();
    render("main.rs", MAIN_TEMPLATE, context! { groups => groups })
}

pub fn render_manifest(dependencies: &[ManifestDependency]) -> Result<String> {
    render(
        "Cargo.toml",
        MANIFEST_TEMPLATE,
        context! { name => PROGRAM_NAME, dependencies => dependencies },
    )
}

pub fn write_entry_point(
    units: &[ScriptUnit],
    groups: &PriorityGroups,
    dependencies: &[ManifestDependency],
    options: &CompileOptions,
) -> Result<()> {
    let modules: BTreeMap<String, String> = units
        .iter()
        .map(|u| (u.file_name.clone(), u.module_name()))
        .collect();

    let index: String = units
        .iter()
        .map(|u| format!("pub mod {};\n", u.module_name()))
        .collect();
    write_file(&options.unit_source_dir().join("mod.rs"), &index)?;
    write_file(
        &options.source_dir().join("main.rs"),
        &render_entry_point(groups, &modules)?,
    )?;
    write_file(
        &options.build_dir.join("Cargo.toml"),
        &render_manifest(dependencies)?,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn unit(name: &str, source: &str) -> ScriptUnit {
        ScriptUnit::from_source(name, PathBuf::from(format!("/tmp/{}", name)), source.to_string())
            .unwrap()
    }

    #[test]
    fn test_entry_point_runs_lowest_priority_first() {
        let groups = PriorityGroups::from_pairs([
            (5, "a.js".to_string()),
            (1, "b.js".to_string()),
            (5, "c.js".to_string()),
        ]);
        let modules: BTreeMap<String, String> = [
            ("a.js", "unit_a_js"),
            ("b.js", "unit_b_js"),
            ("c.js", "unit_c_js"),
        ]
        .into_iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect();

        let main = render_entry_point(&groups, &modules).unwrap();
        let first = main.find("(1, &[units::unit_b_js::UNIT])").unwrap();
        let second = main
            .find("(5, &[units::unit_a_js::UNIT, units::unit_c_js::UNIT])")
            .unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_manifest_lists_native_packages() {
        let manifest = render_manifest(&[ManifestDependency::new(
            "net_tools",
            "net-tools",
            Path::new("/pkgs/net-tools"),
        )])
        .unwrap();
        assert!(manifest.contains("name = \"scriptc_program\""));
        assert!(manifest
            .contains("net_tools = { package = \"net-tools\", path = \"/pkgs/net-tools\" }"));
    }

    #[test]
    fn test_minified_script_drops_comments() {
        let u = unit("m.js", "//priority:3\nfunction Deploy() {\n  return   1 + 2;\n}\n");
        let min = script_text(&u, true);
        assert!(!min.contains("priority"));
        assert!(min.contains("Deploy"));
        assert!(min.len() < u.tree.source().len());
        assert_eq!(script_text(&u, false), u.tree.source());
    }

    #[test]
    fn test_assets_reach_scripts_as_bytes() {
        let preload = render_preload(&unit("a.js", "function Deploy() {}"));
        assert!(preload.contains("function AssetBytes(name)"));
        assert!(preload.contains("return __assets[name].slice();"));
        assert!(preload.contains("return __asset_texts[name];"));
        assert!(!RUNTIME_SOURCE.contains("from_utf8_lossy"));
        assert!(RUNTIME_SOURCE.contains("Value::Array(data.iter().map(|b| Value::from(*b)).collect())"));
    }

    #[test]
    fn test_preload_escapes_names() {
        let u = unit("we\"ird.js", "function Deploy() {}");
        let preload = render_preload(&u);
        assert!(preload.contains("var SCRIPT_NAME = \"we\\\"ird.js\";"));
        assert!(preload.contains("var SCRIPT_TIMEOUT = 30;"));
    }

    #[test]
    fn test_unit_module_embeds_sources() {
        let u = unit("a.js", "function Deploy() {}");
        let module = render_unit_module(&u).unwrap();
        assert!(module.contains("include_str ! (\"../../scripts/a.js\")"));
        assert!(module.contains("include ! (\"unit_a_js.assets.rs\")"));
        assert!(module.contains("entry_points : & [\"Deploy\"]"));
        assert!(module.contains("pub fn register"));
    }
}
