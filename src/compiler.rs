//! Build orchestration.
//!
//! A [`Compiler`] owns every registered script unit and drives them through a
//! fixed sequence of stages. Each stage fans out over all units and joins
//! before the next one starts; the first failing stage ends the build.

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span};

use crate::backend::{CargoBackend, NativeBackend};
use crate::cache::{self, AssetCache};
use crate::declarations::PackageCache;
use crate::discovery::{self, PackageRegistry};
use crate::engine;
use crate::error::{CompileError, Result};
use crate::finalize::{self, ManifestDependency};
use crate::logger::{Logger, NullLogger};
use crate::macros;
use crate::obfuscate::{NoopObfuscator, Obfuscator};
use crate::options::CompileOptions;
use crate::parallel::{for_each_unit, for_each_unit_ref};
use crate::priority::PriorityGroups;
use crate::sanity_check;
use crate::swizzle;
use crate::unit::{ImportDeclaration, ScriptUnit};
use crate::visitor;

type Stage = fn(&Compiler, &mut [ScriptUnit]) -> Result<()>;

/// Stage names in execution order.
pub const STAGES: [&str; 17] = [
    "create_build_dir",
    "process_macros",
    "initialize_imports",
    "detect_versions",
    "gather_assets",
    "walk_syntax_trees",
    "locate_dependencies",
    "build_declarations",
    "swizzle_native_calls",
    "sanity_check_swizzles",
    "write_preloads",
    "write_scripts",
    "encode_assets",
    "write_bundles",
    "create_entry_point",
    "obfuscate",
    "build_native_binary",
];

const PIPELINE: [Stage; 17] = [
    Compiler::create_build_dir,
    Compiler::process_macros,
    Compiler::initialize_imports,
    Compiler::detect_versions,
    Compiler::gather_assets,
    Compiler::walk_syntax_trees,
    Compiler::locate_dependencies,
    Compiler::build_declarations,
    Compiler::swizzle_native_calls,
    Compiler::sanity_check_swizzles,
    Compiler::write_preloads,
    Compiler::write_scripts,
    Compiler::encode_assets,
    Compiler::write_bundles,
    Compiler::create_entry_point,
    Compiler::obfuscate,
    Compiler::build_native_binary,
];

pub struct Compiler {
    options: CompileOptions,
    units: RwLock<Vec<ScriptUnit>>,
    priority_groups: RwLock<Option<PriorityGroups>>,
    packages: PackageCache,
    registry: RwLock<Option<PackageRegistry>>,
    logger: Arc<dyn Logger>,
    obfuscator: Box<dyn Obfuscator>,
    backend: Box<dyn NativeBackend>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::with_options(CompileOptions::default())
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: CompileOptions) -> Self {
        Self {
            options,
            units: RwLock::new(Vec::new()),
            priority_groups: RwLock::new(None),
            packages: PackageCache::new(),
            registry: RwLock::new(None),
            logger: Arc::new(NullLogger),
            obfuscator: Box::new(NoopObfuscator),
            backend: Box::new(CargoBackend::default()),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CONFIGURATION
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn set_logger(&mut self, logger: Arc<dyn Logger>) {
        self.logger = logger;
    }

    pub fn set_backend(&mut self, backend: Box<dyn NativeBackend>) {
        self.backend = backend;
    }

    pub fn set_obfuscator(&mut self, obfuscator: Box<dyn Obfuscator>) {
        self.obfuscator = obfuscator;
    }

    /// Uses a fixed package registry instead of scanning `package_paths`.
    pub fn set_registry(&mut self, registry: PackageRegistry) {
        *self.registry.get_mut() = Some(registry);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // UNITS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Reads, parses and registers a script. File names must be unique.
    pub fn add_script(&self, path: impl AsRef<Path>) -> Result<()> {
        let unit = ScriptUnit::load(path.as_ref())?;
        let mut units = self.units.write();
        if units.iter().any(|u| u.file_name == unit.file_name) {
            return Err(CompileError::DuplicateScript {
                file: unit.file_name,
            });
        }
        let module = unit.module_name();
        if let Some(existing) = units.iter().find(|u| u.module_name() == module) {
            return Err(CompileError::ModuleNameCollision {
                file: unit.file_name,
                existing: existing.file_name.clone(),
                module,
            });
        }
        debug!(unit = %unit.file_name, "script registered");
        units.push(unit);
        Ok(())
    }

    /// Registered units, in registration order.
    pub fn units(&self) -> parking_lot::RwLockReadGuard<'_, Vec<ScriptUnit>> {
        self.units.read()
    }

    /// Available once the entry point stage has run.
    pub fn priority_groups(&self) -> Option<PriorityGroups> {
        self.priority_groups.read().clone()
    }

    pub fn package_cache(&self) -> &PackageCache {
        &self.packages
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PIPELINE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Runs every stage in order. Registration is blocked while a build runs.
    pub fn run(&self) -> Result<()> {
        let mut units = self.units.write();
        let started = Instant::now();

        for (name, stage) in STAGES.iter().zip(PIPELINE) {
            let _span = info_span!("stage", stage = *name).entered();
            let stage_started = Instant::now();
            debug!("stage started");
            if let Err(err) = stage(self, &mut *units) {
                self.logger.error(format_args!(
                    "build failed during {} [{}]: {}",
                    name,
                    err.code(),
                    err
                ));
                return Err(err);
            }
            debug!(
                elapsed_ms = stage_started.elapsed().as_millis() as u64,
                "stage finished"
            );
        }

        info!(
            units = units.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            output = %self.options.output_file.display(),
            "build finished"
        );
        Ok(())
    }

    fn logger(&self) -> &dyn Logger {
        &*self.logger
    }

    fn create_build_dir(&self, _units: &mut [ScriptUnit]) -> Result<()> {
        finalize::create_build_dir(&self.options)
    }

    fn process_macros(&self, units: &mut [ScriptUnit]) -> Result<()> {
        if units.is_empty() {
            return Err(CompileError::NoUnits);
        }
        for_each_unit("process_macros", units, self.logger(), |unit| {
            unit.macros = macros::process_macros(&unit.tree)?;
            Ok(())
        })
    }

    fn initialize_imports(&self, units: &mut [ScriptUnit]) -> Result<()> {
        for_each_unit("initialize_imports", units, self.logger(), |unit| {
            unit.imports = unit
                .macros
                .native_imports
                .iter()
                .map(|m| {
                    (
                        m.namespace.clone(),
                        ImportDeclaration::new(&m.namespace, &m.import_path),
                    )
                })
                .collect();
            Ok(())
        })
    }

    fn detect_versions(&self, units: &mut [ScriptUnit]) -> Result<()> {
        for_each_unit("detect_versions", units, self.logger(), |unit| {
            unit.engine_version = Some(engine::detect_version(unit)?);
            Ok(())
        })
    }

    fn gather_assets(&self, units: &mut [ScriptUnit]) -> Result<()> {
        let cache = AssetCache::new(self.options.asset_dir());
        for_each_unit("gather_assets", units, self.logger(), |unit| {
            cache::gather_assets(unit, &cache)
        })
    }

    fn walk_syntax_trees(&self, units: &mut [ScriptUnit]) -> Result<()> {
        for_each_unit("walk_syntax_trees", units, self.logger(), |unit| {
            let namespaces: BTreeSet<String> = unit.imports.keys().cloned().collect();
            unit.call_sites = visitor::walk_call_sites(&unit.tree, &namespaces);
            Ok(())
        })
    }

    fn locate_dependencies(&self, units: &mut [ScriptUnit]) -> Result<()> {
        let mut registry = self.registry.write();
        let registry = registry
            .get_or_insert_with(|| PackageRegistry::discover(&self.options.package_paths));
        discovery::locate_dependencies(units, registry, self.logger())
    }

    /// Builds each distinct import path once, then shares the tables.
    fn build_declarations(&self, units: &mut [ScriptUnit]) -> Result<()> {
        let requests: BTreeMap<String, std::path::PathBuf> = units
            .iter()
            .flat_map(|unit| unit.imports.values())
            .filter_map(|decl| {
                decl.package_dir
                    .clone()
                    .map(|dir| (decl.import_path.clone(), dir))
            })
            .collect();

        if let Err(err) = self.packages.populate(requests) {
            self.logger
                .error(format_args!("[build_declarations] {}", err));
            return Err(err);
        }

        for_each_unit("build_declarations", units, self.logger(), |unit| {
            let mut packages = BTreeMap::new();
            for (namespace, decl) in &unit.imports {
                let package = self.packages.get(&decl.import_path).ok_or_else(|| {
                    CompileError::UnresolvedPackages {
                        paths: vec![decl.import_path.clone()],
                    }
                })?;
                packages.insert(namespace.clone(), package);
            }
            unit.packages = packages;
            Ok(())
        })
    }

    fn swizzle_native_calls(&self, units: &mut [ScriptUnit]) -> Result<()> {
        for_each_unit("swizzle_native_calls", units, self.logger(), |unit| {
            unit.bindings = swizzle::swizzle_unit(unit)?;
            Ok(())
        })
    }

    fn sanity_check_swizzles(&self, units: &mut [ScriptUnit]) -> Result<()> {
        for_each_unit_ref(
            "sanity_check_swizzles",
            units,
            self.logger(),
            sanity_check::sanity_check_unit,
        )
    }

    fn write_preloads(&self, units: &mut [ScriptUnit]) -> Result<()> {
        finalize::write_runtime(&self.options)?;
        for_each_unit_ref("write_preloads", units, self.logger(), |unit| {
            finalize::write_preload(unit, &self.options)
        })
    }

    fn write_scripts(&self, units: &mut [ScriptUnit]) -> Result<()> {
        for_each_unit_ref("write_scripts", units, self.logger(), |unit| {
            finalize::write_script(unit, &self.options)
        })
    }

    fn encode_assets(&self, units: &mut [ScriptUnit]) -> Result<()> {
        for_each_unit_ref("encode_assets", units, self.logger(), |unit| {
            finalize::encode_assets(unit, &self.options)
        })
    }

    fn write_bundles(&self, units: &mut [ScriptUnit]) -> Result<()> {
        for_each_unit_ref("write_bundles", units, self.logger(), |unit| {
            finalize::write_bundle(unit, &self.options)
        })
    }

    /// Derives the priority groups once and renders the program around them.
    fn create_entry_point(&self, units: &mut [ScriptUnit]) -> Result<()> {
        let groups = PriorityGroups::from_units(units);
        debug!(order = ?groups.order, "priority groups");

        let registry = self.registry.read();
        let mut dependencies: BTreeMap<String, ManifestDependency> = BTreeMap::new();
        for decl in units.iter().flat_map(|u| u.imports.values()) {
            let (Some(lib), Some(dir)) = (&decl.package_name, &decl.package_dir) else {
                continue;
            };
            let manifest_name = registry
                .as_ref()
                .and_then(|r| r.get(lib))
                .map(|p| p.manifest_name.clone())
                .unwrap_or_else(|| lib.clone());
            dependencies
                .entry(lib.clone())
                .or_insert_with(|| ManifestDependency::new(lib, &manifest_name, dir));
        }
        let dependencies: Vec<ManifestDependency> = dependencies.into_values().collect();

        finalize::write_entry_point(units, &groups, &dependencies, &self.options)?;
        *self.priority_groups.write() = Some(groups);
        Ok(())
    }

    fn obfuscate(&self, units: &mut [ScriptUnit]) -> Result<()> {
        for_each_unit_ref("obfuscate", units, self.logger(), |unit| {
            self.obfuscator.obfuscate_unit(unit, &self.options)
        })
    }

    fn build_native_binary(&self, _units: &mut [ScriptUnit]) -> Result<()> {
        self.backend.build(&self.options)
    }
}
