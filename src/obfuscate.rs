//! Obfuscation pass.
//!
//! Runs over the packaged build directory right before the native build. The
//! transforms themselves are pluggable; the default leaves every file as is.

use crate::error::Result;
use crate::options::CompileOptions;
use crate::unit::ScriptUnit;

pub trait Obfuscator: Send + Sync {
    /// Rewrites the packaged files of one unit in place.
    fn obfuscate_unit(&self, unit: &ScriptUnit, options: &CompileOptions) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObfuscator;

impl Obfuscator for NoopObfuscator {
    fn obfuscate_unit(&self, _unit: &ScriptUnit, _options: &CompileOptions) -> Result<()> {
        Ok(())
    }
}
