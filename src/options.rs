use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{CompileError, Result};

/// Environment variable holding extra native package roots, separated like `PATH`.
pub const PACKAGE_PATH_ENV: &str = "SCRIPTC_PACKAGE_PATH";

pub const DEFAULT_PRIORITY: i64 = 100;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompileOptions {
    /// Target operating system (`linux`, `macos`, `windows`).
    pub os: String,
    /// Target architecture (`x86_64`, `aarch64`, ...).
    pub arch: String,
    pub build_dir: PathBuf,
    pub output_file: PathBuf,
    /// Directories searched for installed native packages.
    pub package_paths: Vec<PathBuf>,
    pub minify_scripts: bool,
    pub release: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            os: env::consts::OS.to_string(),
            arch: env::consts::ARCH.to_string(),
            build_dir: env::temp_dir().join("scriptc-build"),
            output_file: PathBuf::from("scriptc.bin"),
            package_paths: package_paths_from_env(),
            minify_scripts: false,
            release: true,
        }
    }
}

impl CompileOptions {
    /// Read options from a JSON file. Missing fields fall back to defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| CompileError::io(format!("cannot read {}", path.display()), e))?;
        serde_json::from_str(&data).map_err(|e| {
            CompileError::io(
                format!("invalid options file {}", path.display()),
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })
    }

    pub fn asset_dir(&self) -> PathBuf {
        self.build_dir.join("assets")
    }

    pub fn script_dir(&self) -> PathBuf {
        self.build_dir.join("scripts")
    }

    pub fn preload_dir(&self) -> PathBuf {
        self.build_dir.join("preload")
    }

    pub fn bundle_dir(&self) -> PathBuf {
        self.build_dir.join("bundles")
    }

    pub fn source_dir(&self) -> PathBuf {
        self.build_dir.join("src")
    }

    pub fn unit_source_dir(&self) -> PathBuf {
        self.source_dir().join("units")
    }
}

fn package_paths_from_env() -> Vec<PathBuf> {
    env::var_os(PACKAGE_PATH_ENV)
        .map(|value| env::split_paths(&value).collect())
        .unwrap_or_default()
}
