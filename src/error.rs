//! Error taxonomy for the build pipeline.
//!
//! Every variant carries a stable code and a one-line guarantee describing the
//! invariant the failing stage protects. Codes are what tooling should match on;
//! messages are for humans.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::unit::SourceLocation;

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const ERR_NO_UNITS: &str = "S-ERR-CONFIG-001";
pub const ERR_SCRIPT_NOT_FOUND: &str = "S-ERR-INGEST-001";
pub const ERR_SCRIPT_UNREADABLE: &str = "S-ERR-INGEST-002";
pub const ERR_SCRIPT_SYNTAX: &str = "S-ERR-INGEST-003";
pub const ERR_DUPLICATE_SCRIPT: &str = "S-ERR-INGEST-004";
pub const ERR_MODULE_NAME_COLLISION: &str = "S-ERR-INGEST-005";
pub const ERR_INVALID_MACRO: &str = "S-ERR-MACRO-001";
pub const ERR_DUPLICATE_NAMESPACE: &str = "S-ERR-MACRO-002";
pub const ERR_NAMESPACE_COLLISION: &str = "S-ERR-MACRO-003";
pub const ERR_MISSING_ENTRY_POINT: &str = "S-ERR-ENGINE-001";
pub const ERR_UNRESOLVED_PACKAGES: &str = "S-ERR-RESOLVE-001";
pub const ERR_PACKAGE_PARSE: &str = "S-ERR-DECL-001";
pub const ERR_MISSING_MODULE: &str = "S-ERR-DECL-002";
pub const ERR_UNKNOWN_NATIVE_FUNCTION: &str = "S-ERR-BIND-001";
pub const ERR_SANITY_CHECK: &str = "S-ERR-BIND-002";
pub const ERR_IO: &str = "S-ERR-PACKAGE-001";
pub const ERR_TEMPLATE: &str = "S-ERR-PACKAGE-002";
pub const ERR_ASSET_MISSING: &str = "S-ERR-PACKAGE-003";
pub const ERR_BACKEND: &str = "S-ERR-BACKEND-001";

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILE ERROR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("compiler has no scripts to process")]
    NoUnits,

    #[error("script cannot be located at {}", path.display())]
    ScriptNotFound { path: PathBuf },

    #[error("script {} could not be read: {source}", path.display())]
    ScriptUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("syntax error in {file}: {message}")]
    ScriptSyntax { file: String, message: String },

    #[error("a script named {file} has already been added to this build")]
    DuplicateScript { file: String },

    #[error("scripts {existing} and {file} would both compile into module {module}")]
    ModuleNameCollision {
        file: String,
        existing: String,
        module: String,
    },

    #[error("{unit}:{line}: invalid //{name} macro: {message}")]
    InvalidMacro {
        unit: String,
        line: u32,
        name: String,
        message: String,
    },

    #[error("{unit}: namespace '{namespace}' is bound more than once")]
    DuplicateNamespace { unit: String, namespace: String },

    #[error("{unit}: namespace '{namespace}' shadows a top-level script declaration")]
    NamespaceCollision { unit: String, namespace: String },

    #[error("{unit}: {message}")]
    MissingEntryPoint { unit: String, message: String },

    #[error("unresolved native packages: {}", paths.join(", "))]
    UnresolvedPackages { paths: Vec<String> },

    #[error("failed to parse native package {import_path} ({}): {message}", file.display())]
    PackageParse {
        import_path: String,
        file: PathBuf,
        message: String,
    },

    #[error("native package {import_path} has no module '{module}'")]
    MissingModule { import_path: String, module: String },

    #[error("{unit}:{location}: namespace '{namespace}' has no exported function '{name}'")]
    UnknownNativeFunction {
        unit: String,
        namespace: String,
        name: String,
        location: SourceLocation,
    },

    #[error("{unit}:{location}: {message}")]
    SanityCheck {
        unit: String,
        location: SourceLocation,
        message: String,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to render {template}: {message}")]
    Template { template: String, message: String },

    #[error("{unit}: embedded asset {} does not exist", path.display())]
    AssetMissing { unit: String, path: PathBuf },

    #[error("native build failed ({status})\n{diagnostics}")]
    Backend { status: String, diagnostics: String },

    #[error("stage '{stage}' failed for {unit}: {source}")]
    StageFailed {
        stage: &'static str,
        unit: String,
        #[source]
        source: Box<CompileError>,
    },
}

impl CompileError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        CompileError::Io {
            context: context.into(),
            source,
        }
    }

    /// Stable error code. Stage wrappers report the code of the wrapped error.
    pub fn code(&self) -> &'static str {
        match self {
            CompileError::NoUnits => ERR_NO_UNITS,
            CompileError::ScriptNotFound { .. } => ERR_SCRIPT_NOT_FOUND,
            CompileError::ScriptUnreadable { .. } => ERR_SCRIPT_UNREADABLE,
            CompileError::ScriptSyntax { .. } => ERR_SCRIPT_SYNTAX,
            CompileError::DuplicateScript { .. } => ERR_DUPLICATE_SCRIPT,
            CompileError::ModuleNameCollision { .. } => ERR_MODULE_NAME_COLLISION,
            CompileError::InvalidMacro { .. } => ERR_INVALID_MACRO,
            CompileError::DuplicateNamespace { .. } => ERR_DUPLICATE_NAMESPACE,
            CompileError::NamespaceCollision { .. } => ERR_NAMESPACE_COLLISION,
            CompileError::MissingEntryPoint { .. } => ERR_MISSING_ENTRY_POINT,
            CompileError::UnresolvedPackages { .. } => ERR_UNRESOLVED_PACKAGES,
            CompileError::PackageParse { .. } => ERR_PACKAGE_PARSE,
            CompileError::MissingModule { .. } => ERR_MISSING_MODULE,
            CompileError::UnknownNativeFunction { .. } => ERR_UNKNOWN_NATIVE_FUNCTION,
            CompileError::SanityCheck { .. } => ERR_SANITY_CHECK,
            CompileError::Io { .. } => ERR_IO,
            CompileError::Template { .. } => ERR_TEMPLATE,
            CompileError::AssetMissing { .. } => ERR_ASSET_MISSING,
            CompileError::Backend { .. } => ERR_BACKEND,
            CompileError::StageFailed { source, .. } => source.code(),
        }
    }

    pub fn guarantee(&self) -> &'static str {
        guarantee_for(self.code())
    }

    /// Strips stage wrappers.
    pub fn root(&self) -> &CompileError {
        match self {
            CompileError::StageFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

fn guarantee_for(code: &str) -> &'static str {
    match code {
        ERR_NO_UNITS => "A build always contains at least one script.",
        ERR_SCRIPT_NOT_FOUND | ERR_SCRIPT_UNREADABLE => {
            "Scripts are read once, when they are added to the build."
        }
        ERR_SCRIPT_SYNTAX => "Every script parses before the pipeline starts.",
        ERR_DUPLICATE_SCRIPT => "Script file names are unique within a build.",
        ERR_MODULE_NAME_COLLISION => "Each script compiles into a native module of its own.",
        ERR_INVALID_MACRO | ERR_DUPLICATE_NAMESPACE | ERR_NAMESPACE_COLLISION => {
            "Compiler macros are well formed and bind each namespace once."
        }
        ERR_MISSING_ENTRY_POINT => "Every script exposes the entry points of its engine version.",
        ERR_UNRESOLVED_PACKAGES => "Every native import resolves to an installed package.",
        ERR_PACKAGE_PARSE | ERR_MISSING_MODULE => {
            "Native declarations are read from the package source that will be linked."
        }
        ERR_UNKNOWN_NATIVE_FUNCTION => "Every namespaced call targets an exported native function.",
        ERR_SANITY_CHECK => "Generated bindings agree with their call-sites before native compilation.",
        ERR_IO | ERR_TEMPLATE | ERR_ASSET_MISSING => {
            "The build directory holds a complete, buildable program."
        }
        ERR_BACKEND => "No partial binary is produced on failure.",
        _ => "Unknown invariant.",
    }
}

pub type Result<T, E = CompileError> = std::result::Result<T, E>;
