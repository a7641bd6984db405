//! Content-addressed asset cache.
//!
//! Files referenced by `//import:` are copied into the build directory's
//! `assets/` folder under `<digest prefix>_<file name>`, so identical content is
//! stored once and a rebuild with unchanged assets writes nothing.

use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{CompileError, Result};
use crate::unit::{EmbeddedAsset, ScriptUnit};

const DIGEST_PREFIX: usize = 16;

pub struct AssetCache {
    asset_dir: PathBuf,
}

impl AssetCache {
    pub fn new(asset_dir: impl Into<PathBuf>) -> Self {
        Self {
            asset_dir: asset_dir.into(),
        }
    }

    pub fn compute_hash(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        format!("{:x}", hasher.finalize())
    }

    fn cache_path(&self, digest: &str, source: &Path) -> PathBuf {
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "asset".to_string());
        let safe_name: String = file_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.asset_dir
            .join(format!("{}_{}", &digest[..DIGEST_PREFIX], safe_name))
    }

    /// Copies `source` into the cache unless identical content is already there.
    pub fn store(&self, unit: &str, name: &str, source: &Path) -> Result<EmbeddedAsset> {
        if !source.is_file() {
            return Err(CompileError::AssetMissing {
                unit: unit.to_string(),
                path: source.to_path_buf(),
            });
        }
        let bytes = fs::read(source)
            .map_err(|e| CompileError::io(format!("cannot read asset {}", source.display()), e))?;
        let digest = Self::compute_hash(&bytes);
        let cached_path = self.cache_path(&digest, source);

        if cached_path.exists() {
            debug!(unit, asset = name, "asset cache hit");
        } else {
            fs::write(&cached_path, &bytes).map_err(|e| {
                CompileError::io(format!("cannot write {}", cached_path.display()), e)
            })?;
        }

        Ok(EmbeddedAsset {
            name: name.to_string(),
            source_path: source.to_path_buf(),
            cached_path,
            digest,
        })
    }
}

/// Resolves every `//import:` of the unit relative to the script and caches it.
/// The asset name is the path as written in the macro.
pub fn gather_assets(unit: &mut ScriptUnit, cache: &AssetCache) -> Result<()> {
    let mut assets: Vec<EmbeddedAsset> = Vec::new();
    for asset in &unit.macros.assets {
        if assets.iter().any(|a| a.name == asset.path) {
            continue;
        }
        let source = unit.source_dir().join(&asset.path);
        assets.push(cache.store(&unit.file_name, &asset.path, &source)?);
    }
    unit.assets = assets;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::process_macros;
    use tempfile::TempDir;

    #[test]
    fn test_identical_content_is_stored_once() {
        let scripts = TempDir::new().unwrap();
        let assets = TempDir::new().unwrap();
        fs::write(scripts.path().join("a.txt"), "hello").unwrap();
        fs::create_dir(scripts.path().join("sub")).unwrap();
        fs::write(scripts.path().join("sub/a.txt"), "hello").unwrap();

        let script = scripts.path().join("s.js");
        fs::write(&script, "//import:a.txt\n//import:sub/a.txt\n//import:a.txt\nfunction Deploy() {}").unwrap();
        let mut unit = ScriptUnit::load(&script).unwrap();
        unit.macros = process_macros(&unit.tree).unwrap();

        gather_assets(&mut unit, &AssetCache::new(assets.path())).unwrap();
        assert_eq!(unit.assets.len(), 2);
        assert_eq!(unit.assets[0].cached_path, unit.assets[1].cached_path);
        assert_eq!(fs::read_dir(assets.path()).unwrap().count(), 1);
        assert_eq!(unit.assets[0].digest, AssetCache::compute_hash(b"hello"));
    }

    #[test]
    fn test_missing_asset_is_an_error() {
        let scripts = TempDir::new().unwrap();
        let script = scripts.path().join("s.js");
        fs::write(&script, "//import:nope.bin\nfunction Deploy() {}").unwrap();
        let mut unit = ScriptUnit::load(&script).unwrap();
        unit.macros = process_macros(&unit.tree).unwrap();

        let err = gather_assets(&mut unit, &AssetCache::new(scripts.path())).unwrap_err();
        assert!(matches!(err, CompileError::AssetMissing { .. }));
    }
}
